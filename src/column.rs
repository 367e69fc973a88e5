//! Typed columnar storage, grounded on
//! `original_source/.../containers/Column.hpp`. Reworked per the spec's §9
//! redesign notes: a single canonical little-endian on-disk format (no
//! host-endian branch), and a pool that owns the growable mapping while
//! columns hold typed spans into it.

use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::mmap_pool::{Pool, PoolSlot};
use std::io::{Read, Write};

/// Element types allowed in a [`Column`]: `f64`, `i64`, or an interned
/// string (the interned-string case is [`crate::column::StringColumn`]).
pub trait ColumnElement: Copy + PartialEq + Send + Sync + 'static {
    /// Canonical null representation.
    const NULL: Self;
    fn is_null(self) -> bool;
    fn to_le_bytes(self) -> [u8; 8];
    fn from_le_bytes(bytes: [u8; 8]) -> Self;
}

impl ColumnElement for f64 {
    const NULL: Self = f64::NAN;
    fn is_null(self) -> bool {
        self.is_nan()
    }
    fn to_le_bytes(self) -> [u8; 8] {
        f64::to_le_bytes(self)
    }
    fn from_le_bytes(bytes: [u8; 8]) -> Self {
        f64::from_le_bytes(bytes)
    }
}

impl ColumnElement for i64 {
    const NULL: Self = i64::MIN;
    fn is_null(self) -> bool {
        self == i64::MIN
    }
    fn to_le_bytes(self) -> [u8; 8] {
        i64::to_le_bytes(self)
    }
    fn from_le_bytes(bytes: [u8; 8]) -> Self {
        i64::from_le_bytes(bytes)
    }
}

enum Storage<T> {
    InMemory(Vec<T>),
    Mmap { slot: PoolSlot, len: usize },
}

/// Homogeneous typed vector with a name, an optional unit, and subrole tags
///. Backed by an in-memory `Vec<T>` or a slice of a
/// memory-mapped [`Pool`].
pub struct Column<T: ColumnElement> {
    name: String,
    unit: String,
    subroles: Vec<String>,
    storage: Storage<T>,
}

impl<T: ColumnElement> Column<T> {
    pub fn from_vec(name: impl Into<String>, values: Vec<T>) -> Self {
        Self {
            name: name.into(),
            unit: String::new(),
            subroles: Vec::new(),
            storage: Storage::InMemory(values),
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::from_vec(name, Vec::new())
    }

    /// Builds a memory-mapped column backed by `pool`, copying `values` in.
    pub fn from_vec_mmap(name: impl Into<String>, values: &[T], pool: &Pool) -> Result<Self> {
        let byte_len = values.len() * 8;
        let mut slot = pool.allocate(byte_len)?;
        {
            let bytes = slot.as_mut_slice();
            for (i, v) in values.iter().enumerate() {
                bytes[i * 8..i * 8 + 8].copy_from_slice(&v.to_le_bytes());
            }
        }
        Ok(Self {
            name: name.into(),
            unit: String::new(),
            subroles: Vec::new(),
            storage: Storage::Mmap {
                slot,
                len: values.len(),
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn set_unit(&mut self, unit: impl Into<String>) {
        self.unit = unit.into();
    }

    pub fn subroles(&self) -> &[String] {
        &self.subroles
    }

    pub fn set_subroles(&mut self, subroles: Vec<String>) {
        self.subroles = subroles;
    }

    /// Excluded from aggregation when comparing same-unit columns (spec
    /// §4.D): units containing this substring remain eligible as condition
    /// terms but not as aggregation operands.
    pub fn is_comparison_only(&self) -> bool {
        self.unit.contains("comparison only")
    }

    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::InMemory(v) => v.len(),
            Storage::Mmap { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_size(&self) -> usize {
        self.len() * 8
    }

    pub fn get(&self, i: usize) -> Result<T> {
        if i >= self.len() {
            return Err(Error::invalid(format!(
                "column '{}': index {} out of bounds (len {})",
                self.name,
                i,
                self.len()
            )));
        }
        Ok(match &self.storage {
            Storage::InMemory(v) => v[i],
            Storage::Mmap { slot, .. } => {
                let bytes = slot.as_slice();
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
                T::from_le_bytes(buf)
            }
        })
    }

    pub fn append_value(&mut self, value: T) -> Result<()> {
        match &mut self.storage {
            Storage::InMemory(v) => {
                v.push(value);
                Ok(())
            }
            Storage::Mmap { .. } => Err(Error::StorageFull(
                "memory-mapped columns are append-only through a fresh allocation; use append()"
                    .to_string(),
            )),
        }
    }

    /// Row-binds `other` onto the end of `self`. Mutation is append-only.
    pub fn append(&mut self, other: &Column<T>) -> Result<()> {
        for i in 0..other.len() {
            self.append_value(other.get(i)?)?;
        }
        Ok(())
    }

    /// Materializes all values (memory-mapped columns pay a copy here).
    pub fn to_vec(&self) -> Vec<T> {
        match &self.storage {
            Storage::InMemory(v) => v.clone(),
            Storage::Mmap { .. } => (0..self.len()).map(|i| self.get(i).unwrap()).collect(),
        }
    }

    /// Returns a copy gathered by `key` (spec: "does not have to be the same
    /// length as the original one, but will be of the same length as the
    /// key").
    pub fn sort_by_key(&self, key: &[usize]) -> Result<Column<T>> {
        let mut out = Vec::with_capacity(key.len());
        for &k in key {
            out.push(self.get(k)?);
        }
        let mut col = Column::from_vec(self.name.clone(), out);
        col.unit = self.unit.clone();
        col.subroles = self.subroles.clone();
        Ok(col)
    }

    /// Returns a column containing all rows for which `condition` is true.
    pub fn where_(&self, condition: &[bool]) -> Result<Column<T>> {
        if condition.len() != self.len() {
            return Err(Error::invalid(
                "boolean selection mask length does not match column length",
            ));
        }
        let mut out = Vec::new();
        for (i, &keep) in condition.iter().enumerate() {
            if keep {
                out.push(self.get(i)?);
            }
        }
        let mut col = Column::from_vec(self.name.clone(), out);
        col.unit = self.unit.clone();
        col.subroles = self.subroles.clone();
        Ok(col)
    }

    pub fn clone_into_pool(&self, pool: &Pool) -> Result<Column<T>> {
        let values = self.to_vec();
        let mut col = Column::from_vec_mmap(self.name.clone(), &values, pool)?;
        col.unit = self.unit.clone();
        col.subroles = self.subroles.clone();
        Ok(col)
    }

    /// Saves in the canonical little-endian binary format:
    /// `[u64 length][length * 8 bytes][u64 name-len][name][u64 unit-len][unit]`.
    pub fn save(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&(self.len() as u64).to_le_bytes())?;
        for i in 0..self.len() {
            writer.write_all(&self.get(i)?.to_le_bytes())?;
        }
        write_string(writer, &self.name)?;
        write_string(writer, &self.unit)?;
        Ok(())
    }

    /// Loads from the canonical little-endian binary format, always as an
    /// in-memory column; use [`Column::clone_into_pool`] afterward to move it
    /// into a pool.
    pub fn load(reader: &mut impl Read) -> Result<Column<T>> {
        let len = read_u64(reader)? as usize;
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
            values.push(T::from_le_bytes(buf));
        }
        let name = read_string(reader)?;
        let unit = read_string(reader)?;
        let mut col = Column::from_vec(name, values);
        col.unit = unit;
        Ok(col)
    }
}

impl<T: ColumnElement> Clone for Column<T> {
    fn clone(&self) -> Self {
        let mut col = Column::from_vec(self.name.clone(), self.to_vec());
        col.unit = self.unit.clone();
        col.subroles = self.subroles.clone();
        col
    }
}

fn write_string(writer: &mut impl Write, s: &str) -> Result<()> {
    writer.write_all(&(s.len() as u64).to_le_bytes())?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

fn read_string(reader: &mut impl Read) -> Result<String> {
    let len = read_u64(reader)? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| Error::invalid(format!("invalid utf8 in column name/unit: {e}")))
}

fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// A column of interned strings: stores ids but
/// serializes/deserializes as literal UTF-8 strings to match the external
/// binary format — the interning is purely an in-process
/// optimization.
pub struct StringColumn {
    ids: Column<i64>,
    encoding: Encoding,
}

impl StringColumn {
    pub fn from_strings(name: impl Into<String>, values: &[String], encoding: &Encoding) -> Self {
        let ids: Vec<i64> = values.iter().map(|s| encoding.intern(s)).collect();
        Self {
            ids: Column::from_vec(name, ids),
            encoding: encoding.clone(),
        }
    }

    pub fn name(&self) -> &str {
        self.ids.name()
    }

    pub fn unit(&self) -> &str {
        self.ids.unit()
    }

    pub fn set_unit(&mut self, unit: impl Into<String>) {
        self.ids.set_unit(unit);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id_at(&self, i: usize) -> Result<i64> {
        self.ids.get(i)
    }

    pub fn get(&self, i: usize) -> Result<String> {
        let id = self.ids.get(i)?;
        Ok(self.encoding.get(id).unwrap_or_default())
    }

    pub fn ids(&self) -> &Column<i64> {
        &self.ids
    }

    pub fn append_value(&mut self, value: &str) -> Result<()> {
        let id = self.encoding.intern(value);
        self.ids.append_value(id)
    }

    pub fn append(&mut self, other: &StringColumn) -> Result<()> {
        for i in 0..other.len() {
            self.append_value(&other.get(i)?)?;
        }
        Ok(())
    }

    pub fn sort_by_key(&self, key: &[usize]) -> Result<StringColumn> {
        Ok(StringColumn {
            ids: self.ids.sort_by_key(key)?,
            encoding: self.encoding.clone(),
        })
    }

    pub fn where_(&self, condition: &[bool]) -> Result<StringColumn> {
        Ok(StringColumn {
            ids: self.ids.where_(condition)?,
            encoding: self.encoding.clone(),
        })
    }

    pub fn save(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&(self.len() as u64).to_le_bytes())?;
        for i in 0..self.len() {
            write_string(writer, &self.get(i)?)?;
        }
        write_string(writer, self.name())?;
        write_string(writer, self.unit())?;
        Ok(())
    }

    pub fn load(reader: &mut impl Read, encoding: &Encoding) -> Result<StringColumn> {
        let len = read_u64(reader)? as usize;
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            values.push(read_string(reader)?);
        }
        let name = read_string(reader)?;
        let unit = read_string(reader)?;
        let mut col = StringColumn::from_strings(name, &values, encoding);
        col.set_unit(unit);
        Ok(col)
    }
}
