//! Sparse per-row word index for `text` columns, implemented as a CSR
//! matrix of interned word ids (row pointer + column index arrays; the
//! "data" array is implicitly all-ones since we only need membership, not
//! term frequency, for text splits).

use crate::encoding::Encoding;
use std::collections::BTreeSet;

/// CSR-style sparse matrix: row `i` owns `word_ids[row_ptr[i]..row_ptr[i+1]]`,
/// sorted ascending and deduplicated.
#[derive(Debug, Clone, Default)]
pub struct WordIndex {
    row_ptr: Vec<u32>,
    word_ids: Vec<i64>,
}

impl WordIndex {
    /// Builds the index from a column of raw text, tokenizing on
    /// non-alphanumeric boundaries and lower-casing, interning each distinct
    /// token through `encoding`.
    pub fn build(texts: &[String], encoding: &Encoding) -> Self {
        let mut row_ptr = Vec::with_capacity(texts.len() + 1);
        let mut word_ids = Vec::new();
        row_ptr.push(0u32);
        for text in texts {
            let mut row_words: BTreeSet<i64> = BTreeSet::new();
            for token in tokenize(text) {
                row_words.insert(encoding.intern(&token));
            }
            word_ids.extend(row_words.into_iter());
            row_ptr.push(word_ids.len() as u32);
        }
        Self { row_ptr, word_ids }
    }

    pub fn num_rows(&self) -> usize {
        self.row_ptr.len().saturating_sub(1)
    }

    pub fn row(&self, i: usize) -> &[i64] {
        let start = self.row_ptr[i] as usize;
        let end = self.row_ptr[i + 1] as usize;
        &self.word_ids[start..end]
    }

    pub fn contains(&self, i: usize, word_id: i64) -> bool {
        self.row(i).binary_search(&word_id).is_ok()
    }

    pub fn contains_any(&self, i: usize, word_ids: &[i64]) -> bool {
        word_ids.iter().any(|w| self.contains(i, *w))
    }

    /// All distinct word ids appearing anywhere in the index, ascending.
    pub fn vocabulary(&self) -> Vec<i64> {
        let mut vocab: BTreeSet<i64> = BTreeSet::new();
        vocab.extend(self.word_ids.iter().copied());
        vocab.into_iter().collect()
    }

    pub fn append(&mut self, other: &WordIndex) {
        let offset = self.word_ids.len() as u32;
        self.word_ids.extend(other.word_ids.iter().copied());
        // skip other's leading 0 (always row_ptr[0] == 0)
        self.row_ptr
            .extend(other.row_ptr.iter().skip(1).map(|&p| p + offset));
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_and_dedups_per_row() {
        let enc = Encoding::new();
        let idx = WordIndex::build(
            &["the Quick quick fox".to_string(), "lazy dog".to_string()],
            &enc,
        );
        assert_eq!(idx.num_rows(), 2);
        assert_eq!(idx.row(0).len(), 3); // the, quick, fox (quick deduped)
        assert_eq!(idx.row(1).len(), 2);
    }

    #[test]
    fn contains_and_contains_any() {
        let enc = Encoding::new();
        let idx = WordIndex::build(&["alpha beta".to_string()], &enc);
        let alpha = enc.find("alpha").unwrap();
        let gamma_missing = 999_999i64;
        assert!(idx.contains(0, alpha));
        assert!(idx.contains_any(0, &[gamma_missing, alpha]));
        assert!(!idx.contains_any(0, &[gamma_missing]));
    }

    #[test]
    fn append_concatenates_rows() {
        let enc = Encoding::new();
        let mut a = WordIndex::build(&["one".to_string()], &enc);
        let b = WordIndex::build(&["two three".to_string()], &enc);
        a.append(&b);
        assert_eq!(a.num_rows(), 2);
        assert_eq!(a.row(1).len(), 2);
    }
}
