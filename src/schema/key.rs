//! Keys, sentinels and key ranges
//!
//! Keys compare part by part; a key that is a proper prefix of another sorts
//! before it. `Min` and `Max` sentinels sort below and above every value, so
//! `[20, 10]` .. `[20, 10, Max]` covers every key starting with `20, 10`.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::rows::Row;
use crate::value::Value;

/// A single key component
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Min,
    Value(Value),
    Max,
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Min => write!(f, "<Min>"),
            KeyPart::Value(v) => write!(f, "{}", v),
            KeyPart::Max => write!(f, "<Max>"),
        }
    }
}

/// Key or key bound
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Vec<KeyPart>);

impl Key {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    /// Smallest possible bound
    pub fn min() -> Self {
        Self(vec![KeyPart::Min])
    }

    /// Largest possible bound
    pub fn max() -> Self {
        Self(vec![KeyPart::Max])
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self(values.into_iter().map(KeyPart::Value).collect())
    }

    /// Key formed by the first `width` values of a row
    pub fn from_row(row: &Row, width: usize) -> Self {
        Self::from_values(row.values()[..width.min(row.len())].iter().cloned())
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, part: KeyPart) {
        self.0.push(part);
    }

    /// Copy with one more part appended
    pub fn with(&self, part: KeyPart) -> Self {
        let mut parts = self.0.clone();
        parts.push(part);
        Self(parts)
    }

    /// Values of the key, skipping sentinels
    pub fn values(&self) -> Vec<Value> {
        self.0
            .iter()
            .filter_map(|part| match part {
                KeyPart::Value(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Half-open key range `[lower, upper)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct KeyRange {
    pub lower: Key,
    pub upper: Key,
}

impl KeyRange {
    pub fn new(lower: Key, upper: Key) -> Self {
        Self { lower, upper }
    }

    /// `[Min, Max)`
    pub fn universal() -> Self {
        Self::new(Key::min(), Key::max())
    }

    pub fn is_empty(&self) -> bool {
        self.lower >= self.upper
    }

    pub fn contains(&self, key: &Key) -> bool {
        &self.lower <= key && key < &self.upper
    }

    /// Overlap of two ranges, `None` if they are disjoint
    pub fn intersect(&self, other: &KeyRange) -> Option<KeyRange> {
        let lower = std::cmp::max(&self.lower, &other.lower).clone();
        let upper = std::cmp::min(&self.upper, &other.upper).clone();
        let range = KeyRange::new(lower, upper);
        (!range.is_empty()).then_some(range)
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {})", self.lower, self.upper)
    }
}

/// Sorts ranges and merges overlapping or touching neighbours
pub fn merge_ranges(mut ranges: Vec<KeyRange>) -> Vec<KeyRange> {
    ranges.retain(|r| !r.is_empty());
    ranges.sort_by(|a, b| a.lower.cmp(&b.lower));
    let mut merged: Vec<KeyRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.lower <= last.upper => {
                if range.upper > last.upper {
                    last.upper = range.upper;
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}
