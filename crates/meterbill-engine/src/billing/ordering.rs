//! Fixed display order for flats in billing reports

use std::cmp::Ordering;
use std::collections::HashMap;

/// Building layout order used when no table is configured
pub const DEFAULT_FLAT_ORDER: &[&str] = &[
    "S1", "A1", "B1", "C1", "D1", "Guest House", "H1", "A2", "B2", "C2", "D2", "E2", "F2", "G2",
    "H2", "A3", "B3", "C3", "D3", "E3", "F3", "G3", "H3", "A4", "B4", "C4", "D4", "E4", "F4",
    "G4", "H4", "P1", "P2",
];

/// Ranks flats by a configured table. Listed flats come first in table
/// order; unlisted flats follow alphabetically.
#[derive(Debug, Clone)]
pub struct FlatOrdering {
    ranks: HashMap<String, usize>,
}

impl FlatOrdering {
    pub fn from_list<I, S>(flats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ranks = HashMap::new();
        for (i, flat) in flats.into_iter().enumerate() {
            // First occurrence wins on duplicates
            ranks.entry(flat.into()).or_insert(i);
        }
        Self { ranks }
    }

    pub fn rank(&self, flat_id: &str) -> Option<usize> {
        self.ranks.get(flat_id).copied()
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match (self.rank(a), self.rank(b)) {
            (Some(ra), Some(rb)) => ra.cmp(&rb),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        }
    }
}

impl Default for FlatOrdering {
    fn default() -> Self {
        Self::from_list(DEFAULT_FLAT_ORDER.iter().copied())
    }
}
