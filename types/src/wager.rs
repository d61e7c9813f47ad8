use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::{Amount, LabelError, Spot, SpotLabels, SPOT_COUNT};

/// Largest quantity a single ticket may stake on one spot.
pub const MAX_QUANTITY_PER_SPOT: u32 = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WagerError {
    #[error(transparent)]
    Label(#[from] LabelError),
    #[error("negative quantity {quantity} on spot {label}")]
    NegativeQuantity { label: String, quantity: i64 },
    #[error("quantity {quantity} on spot {label} exceeds {max}")]
    QuantityTooLarge { label: String, quantity: i64, max: u32 },
    #[error("spot {0} listed more than once")]
    DuplicateSpot(String),
    #[error("wager has no stake on any spot")]
    Empty,
    #[error("wager total overflows")]
    Overflow,
}

/// Per-spot wager quantities for one ticket.
///
/// Stored densely; a zero entry means no stake on that spot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wager([u32; SPOT_COUNT]);

impl Wager {
    /// Build a wager from dense quantities. Rejects an all-zero wager.
    pub fn from_quantities(quantities: [u32; SPOT_COUNT]) -> Result<Self, WagerError> {
        if quantities.iter().all(|qty| *qty == 0) {
            return Err(WagerError::Empty);
        }
        if let Some(idx) = quantities.iter().position(|qty| *qty > MAX_QUANTITY_PER_SPOT) {
            return Err(WagerError::QuantityTooLarge {
                label: Spot::ALL[idx].to_string(),
                quantity: quantities[idx] as i64,
                max: MAX_QUANTITY_PER_SPOT,
            });
        }
        Ok(Self(quantities))
    }

    /// Build a wager from a label → quantity map as submitted by a retailer.
    pub fn from_labeled<I, S>(labels: &SpotLabels, entries: I) -> Result<Self, WagerError>
    where
        I: IntoIterator<Item = (S, i64)>,
        S: AsRef<str>,
    {
        let mut quantities = [0u32; SPOT_COUNT];
        let mut seen = [false; SPOT_COUNT];
        for (label, quantity) in entries {
            let label = label.as_ref();
            let spot = labels.parse(label)?;
            if seen[spot.index()] {
                return Err(WagerError::DuplicateSpot(label.to_string()));
            }
            seen[spot.index()] = true;
            if quantity < 0 {
                return Err(WagerError::NegativeQuantity {
                    label: label.to_string(),
                    quantity,
                });
            }
            if quantity > MAX_QUANTITY_PER_SPOT as i64 {
                return Err(WagerError::QuantityTooLarge {
                    label: label.to_string(),
                    quantity,
                    max: MAX_QUANTITY_PER_SPOT,
                });
            }
            quantities[spot.index()] = quantity as u32;
        }
        Self::from_quantities(quantities)
    }

    pub fn quantity(&self, spot: Spot) -> u32 {
        self.0[spot.index()]
    }

    pub fn quantities(&self) -> &[u32; SPOT_COUNT] {
        &self.0
    }

    /// Total units staked across all spots.
    pub fn units(&self) -> u64 {
        self.0.iter().map(|qty| *qty as u64).sum()
    }

    /// Gross ticket amount at the given unit price.
    pub fn total(&self, unit_price: Amount) -> Result<Amount, WagerError> {
        unit_price.checked_mul(self.units()).ok_or(WagerError::Overflow)
    }

    /// Spots carrying a nonzero stake, with their quantities.
    pub fn staked(&self) -> impl Iterator<Item = (Spot, u32)> + '_ {
        Spot::ALL
            .into_iter()
            .map(|spot| (spot, self.quantity(spot)))
            .filter(|(_, qty)| *qty > 0)
    }

    /// Sparse label → quantity view for presentation.
    pub fn to_labeled(&self, labels: &SpotLabels) -> BTreeMap<String, u32> {
        self.staked()
            .map(|(spot, qty)| (labels.label(spot).to_string(), qty))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn labeled(entries: &[(&str, i64)]) -> Result<Wager, WagerError> {
        Wager::from_labeled(&SpotLabels::default(), entries.iter().copied())
    }

    #[test]
    fn test_from_labeled_sparse() {
        let wager = labeled(&[("A0", 5), ("C2", 0), ("J9", 2)]).unwrap();
        assert_eq!(wager.quantity(Spot::ALL[0]), 5);
        assert_eq!(wager.quantity(Spot::ALL[2]), 0);
        assert_eq!(wager.quantity(Spot::ALL[9]), 2);
        assert_eq!(wager.units(), 7);
        assert_eq!(wager.staked().count(), 2);
    }

    #[test]
    fn test_rejects_unknown_negative_and_empty() {
        assert_eq!(
            labeled(&[("Z9", 1)]),
            Err(WagerError::Label(LabelError::Unknown("Z9".to_string())))
        );
        assert_eq!(
            labeled(&[("B1", -1)]),
            Err(WagerError::NegativeQuantity {
                label: "B1".to_string(),
                quantity: -1
            })
        );
        assert_eq!(labeled(&[("B1", 0)]), Err(WagerError::Empty));
        assert_eq!(labeled(&[]), Err(WagerError::Empty));
        assert!(matches!(
            labeled(&[("B1", 1), ("B1", 2)]),
            Err(WagerError::DuplicateSpot(_))
        ));
        assert!(matches!(
            labeled(&[("B1", MAX_QUANTITY_PER_SPOT as i64 + 1)]),
            Err(WagerError::QuantityTooLarge { .. })
        ));
    }

    #[test]
    fn test_total_at_unit_price() {
        let wager = labeled(&[("A0", 5), ("B1", 10)]).unwrap();
        assert_eq!(
            wager.total(Amount::from_major(10)).unwrap(),
            Amount::from_major(150)
        );
    }

    #[test]
    fn test_serializes_dense() {
        let wager = labeled(&[("A0", 5)]).unwrap();
        let json = serde_json::to_string(&wager).unwrap();
        assert_eq!(json, "[5,0,0,0,0,0,0,0,0,0]");
        let back: Wager = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wager);
    }

    #[test]
    fn test_to_labeled_drops_zeroes() {
        let wager = labeled(&[("D3", 3)]).unwrap();
        let view = wager.to_labeled(&SpotLabels::default());
        assert_eq!(view.len(), 1);
        assert_eq!(view.get("D3"), Some(&3));
    }

    proptest! {
        #[test]
        fn prop_total_is_units_times_price(
            quantities in proptest::array::uniform10(0u32..=MAX_QUANTITY_PER_SPOT),
            price in 1u64..=100_000,
        ) {
            prop_assume!(quantities.iter().any(|q| *q > 0));
            let wager = Wager::from_quantities(quantities).unwrap();
            let total = wager.total(Amount::from_minor(price)).unwrap();
            let expected: u64 = quantities.iter().map(|q| *q as u64 * price).sum();
            prop_assert_eq!(total.minor(), expected);
        }
    }
}
