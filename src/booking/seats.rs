//! Seat identity and the auditorium layout.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A seat: row letter plus seat number, `C7` style. Ordering is row-major so
/// sorted seat lists read the way an usher would read them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SeatId {
    pub row: char,
    pub number: u32,
}

impl SeatId {
    pub fn new(row: char, number: u32) -> Self {
        Self { row, number }
    }

    /// Parse `"C7"` / `"AA12"` is not supported; rows are single letters.
    pub fn parse(s: &str) -> Result<Self, SeatParseError> {
        let mut chars = s.chars();
        let row = chars
            .next()
            .filter(|c| c.is_ascii_alphabetic())
            .ok_or_else(|| SeatParseError(s.to_string()))?
            .to_ascii_uppercase();
        let number: u32 = chars
            .as_str()
            .parse()
            .map_err(|_| SeatParseError(s.to_string()))?;
        if number == 0 {
            return Err(SeatParseError(s.to_string()));
        }
        Ok(Self { row, number })
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row, self.number)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("not a seat id: {0:?} (expected row letter + number, like C7)")]
pub struct SeatParseError(String);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum SeatClass {
    Regular,
    Premium,
    Recliner,
}

/// The seat grid of one auditorium: rows of equal width, each row assigned a
/// class. Built front-to-back with the builder methods.
#[derive(Debug, Clone, Default)]
pub struct SeatMap {
    rows: BTreeMap<char, (u32, SeatClass)>,
}

impl SeatMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rows `from..=to`, each `width` seats wide, all of `class`.
    pub fn rows(mut self, from: char, to: char, width: u32, class: SeatClass) -> Self {
        for row in from..=to {
            self.rows.insert(row.to_ascii_uppercase(), (width, class));
        }
        self
    }

    pub fn class_of(&self, seat: &SeatId) -> Option<SeatClass> {
        let (width, class) = self.rows.get(&seat.row)?;
        (seat.number >= 1 && seat.number <= *width).then_some(*class)
    }

    pub fn seat_count(&self) -> usize {
        self.rows.values().map(|(w, _)| *w as usize).sum()
    }

    /// Every seat in the map, row-major.
    pub fn all_seats(&self) -> Vec<SeatId> {
        self.rows
            .iter()
            .flat_map(|(row, (width, _))| {
                (1..=*width).map(move |n| SeatId::new(*row, n))
            })
            .collect()
    }
}
