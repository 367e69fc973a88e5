//! Lazy column transformations, grounded on
//! `original_source/.../containers/ColumnView.hpp`.

use crate::column::{Column, ColumnElement};
use crate::error::{Error, Result};
use std::sync::Arc;

/// A view's length may be known exactly, unboundedly large (e.g. a constant
/// broadcast), or simply not knowable without materializing an upstream
/// view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    Known(usize),
    Infinite,
    NotKnowable,
}

impl Length {
    /// Eager length check for binary/ternary composition: fires only when
    /// both sides are `Known` and disagree.
    fn check_compatible(a: Length, b: Length) -> Result<Length> {
        match (a, b) {
            (Length::Known(x), Length::Known(y)) => {
                if x != y {
                    return Err(Error::invalid(format!(
                        "column view length mismatch: {x} vs {y}"
                    )));
                }
                Ok(Length::Known(x))
            }
            (Length::Known(x), _) | (_, Length::Known(x)) => Ok(Length::Known(x)),
            (Length::Infinite, Length::Infinite) => Ok(Length::Infinite),
            _ => Ok(Length::NotKnowable),
        }
    }
}

/// A lazy, possibly-infinite transformation of column values. Cloning is
/// cheap (the closure is reference-counted).
#[derive(Clone)]
pub struct ColumnView<T> {
    length: Length,
    value_at: Arc<dyn Fn(usize) -> Option<T> + Send + Sync>,
}

impl<T: Copy + Send + Sync + 'static> ColumnView<T> {
    pub fn from_column(col: &Column<T>) -> Self
    where
        T: ColumnElement,
    {
        let values = col.to_vec();
        let len = values.len();
        Self {
            length: Length::Known(len),
            value_at: Arc::new(move |i| values.get(i).copied()),
        }
    }

    pub fn constant(value: T) -> Self {
        Self {
            length: Length::Infinite,
            value_at: Arc::new(move |_| Some(value)),
        }
    }

    pub fn from_fn(length: Length, f: impl Fn(usize) -> Option<T> + Send + Sync + 'static) -> Self {
        Self {
            length,
            value_at: Arc::new(f),
        }
    }

    pub fn length(&self) -> Length {
        self.length
    }

    pub fn value_at(&self, i: usize) -> Option<T> {
        (self.value_at)(i)
    }

    pub fn map<U: Copy + Send + Sync + 'static>(
        &self,
        f: impl Fn(T) -> U + Send + Sync + 'static,
    ) -> ColumnView<U> {
        let inner = self.value_at.clone();
        ColumnView {
            length: self.length,
            value_at: Arc::new(move |i| inner(i).map(&f)),
        }
    }

    pub fn zip_with<U: Copy + Send + Sync + 'static, V: Copy + Send + Sync + 'static>(
        &self,
        other: &ColumnView<U>,
        f: impl Fn(T, U) -> V + Send + Sync + 'static,
    ) -> Result<ColumnView<V>> {
        let length = Length::check_compatible(self.length, other.length)?;
        let a = self.value_at.clone();
        let b = other.value_at.clone();
        Ok(ColumnView {
            length,
            value_at: Arc::new(move |i| match (a(i), b(i)) {
                (Some(x), Some(y)) => Some(f(x, y)),
                _ => None,
            }),
        })
    }

    pub fn zip3_with<
        U: Copy + Send + Sync + 'static,
        V: Copy + Send + Sync + 'static,
        W: Copy + Send + Sync + 'static,
    >(
        &self,
        b: &ColumnView<U>,
        c: &ColumnView<V>,
        f: impl Fn(T, U, V) -> W + Send + Sync + 'static,
    ) -> Result<ColumnView<W>> {
        let length = Length::check_compatible(self.length, b.length)?;
        let length = Length::check_compatible(length, c.length)?;
        let fa = self.value_at.clone();
        let fb = b.value_at.clone();
        let fc = c.value_at.clone();
        Ok(ColumnView {
            length,
            value_at: Arc::new(move |i| match (fa(i), fb(i), fc(i)) {
                (Some(x), Some(y), Some(z)) => Some(f(x, y, z)),
                _ => None,
            }),
        })
    }

    /// Materializes the view. Infinite/not-knowable views require an
    /// explicit `expected_len` from the caller.
    pub fn materialize(&self, expected_len: Option<usize>) -> Result<Vec<Option<T>>> {
        let len = match (self.length, expected_len) {
            (Length::Known(n), _) => n,
            (_, Some(n)) => n,
            (Length::Infinite, None) | (Length::NotKnowable, None) => {
                return Err(Error::invalid(
                    "cannot materialize an infinite or not-knowable column view without an expected length",
                ));
            }
        };
        Ok((0..len).map(|i| self.value_at(i)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_and_zip_compose() {
        let base = Column::from_vec("x", vec![1.0, 2.0, 3.0]);
        let view = ColumnView::from_column(&base);
        let doubled = view.map(|x| x * 2.0);
        let values = doubled.materialize(None).unwrap();
        assert_eq!(values, vec![Some(2.0), Some(4.0), Some(6.0)]);

        let other = ColumnView::from_column(&Column::from_vec("y", vec![10.0, 20.0, 30.0]));
        let summed = view.zip_with(&other, |a, b| a + b).unwrap();
        assert_eq!(
            summed.materialize(None).unwrap(),
            vec![Some(11.0), Some(22.0), Some(33.0)]
        );
    }

    #[test]
    fn known_length_mismatch_errors_eagerly() {
        let a = ColumnView::from_column(&Column::from_vec("a", vec![1.0, 2.0]));
        let b = ColumnView::from_column(&Column::from_vec("b", vec![1.0, 2.0, 3.0]));
        assert!(a.zip_with(&b, |x, y| x + y).is_err());
    }

    #[test]
    fn infinite_view_requires_expected_length() {
        let c = ColumnView::constant(7.0);
        assert!(c.materialize(None).is_err());
        let materialized = c.materialize(Some(3)).unwrap();
        assert_eq!(materialized, vec![Some(7.0), Some(7.0), Some(7.0)]);
    }
}
