use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{DEFAULT_SPOT_LABELS, SPOT_COUNT};

/// One of the ten mutually exclusive outcomes of a round.
///
/// Spots are identified by position; labels are a presentation concern held by
/// [`SpotLabels`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct Spot(u8);

impl Spot {
    pub const ALL: [Spot; SPOT_COUNT] = [
        Spot(0),
        Spot(1),
        Spot(2),
        Spot(3),
        Spot(4),
        Spot(5),
        Spot(6),
        Spot(7),
        Spot(8),
        Spot(9),
    ];

    pub fn new(index: u8) -> Option<Self> {
        ((index as usize) < SPOT_COUNT).then_some(Self(index))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for Spot {
    type Error = LabelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Spot::new(value).ok_or(LabelError::IndexOutOfRange(value))
    }
}

impl From<Spot> for u8 {
    fn from(spot: Spot) -> Self {
        spot.0
    }
}

impl fmt::Display for Spot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(DEFAULT_SPOT_LABELS[self.index()])
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("spot index out of range: {0}")]
    IndexOutOfRange(u8),
    #[error("unknown spot label: {0}")]
    Unknown(String),
    #[error("spot label must not be empty (spot {0})")]
    Empty(usize),
    #[error("duplicate spot label: {0}")]
    Duplicate(String),
}

/// Display labels for the ten spots, in spot order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct SpotLabels([String; SPOT_COUNT]);

impl SpotLabels {
    pub fn new(labels: [String; SPOT_COUNT]) -> Result<Self, LabelError> {
        for (idx, label) in labels.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(LabelError::Empty(idx));
            }
            if labels[..idx].contains(label) {
                return Err(LabelError::Duplicate(label.clone()));
            }
        }
        Ok(Self(labels))
    }

    pub fn label(&self, spot: Spot) -> &str {
        &self.0[spot.index()]
    }

    pub fn parse(&self, label: &str) -> Result<Spot, LabelError> {
        self.0
            .iter()
            .position(|candidate| candidate == label)
            .and_then(|idx| Spot::new(idx as u8))
            .ok_or_else(|| LabelError::Unknown(label.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Spot, &str)> {
        Spot::ALL.into_iter().zip(self.0.iter().map(String::as_str))
    }
}

impl Default for SpotLabels {
    fn default() -> Self {
        Self(DEFAULT_SPOT_LABELS.map(str::to_string))
    }
}

impl TryFrom<Vec<String>> for SpotLabels {
    type Error = String;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        let len = value.len();
        let labels: [String; SPOT_COUNT] = value
            .try_into()
            .map_err(|_| format!("expected {SPOT_COUNT} spot labels, got {len}"))?;
        SpotLabels::new(labels).map_err(|err| err.to_string())
    }
}

impl From<SpotLabels> for Vec<String> {
    fn from(labels: SpotLabels) -> Self {
        labels.0.into()
    }
}
