//! Column conversions shared by the SQL backends.
//!
//! Amounts, ids and instants are stored as signed 64-bit integers (unix
//! seconds for instants), wagers as a JSON array of ten quantities and the
//! winning spot as its index.

use chrono::{DateTime, Utc};
use tenspot_execution::StoreError;
use tenspot_types::{Amount, Role, Spot, Wager};

pub(crate) fn to_i64(value: u64, field: &'static str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::corrupt(field, format!("{value} exceeds i64")))
}

pub(crate) fn to_u64(value: i64, field: &'static str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::corrupt(field, format!("negative value {value}")))
}

pub(crate) fn amount(value: i64, field: &'static str) -> Result<Amount, StoreError> {
    to_u64(value, field).map(Amount::from_minor)
}

pub(crate) fn amount_column(value: Amount, field: &'static str) -> Result<i64, StoreError> {
    to_i64(value.minor(), field)
}

pub(crate) fn instant(secs: i64, field: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::corrupt(field, format!("timestamp {secs} out of range")))
}

pub(crate) fn spot(value: Option<i64>) -> Result<Option<Spot>, StoreError> {
    value
        .map(|index| {
            u8::try_from(index)
                .ok()
                .and_then(Spot::new)
                .ok_or_else(|| StoreError::corrupt("rounds.winning_spot", index))
        })
        .transpose()
}

pub(crate) fn spot_column(spot: Spot) -> i64 {
    spot.index() as i64
}

pub(crate) fn wager(text: &str) -> Result<Wager, StoreError> {
    serde_json::from_str(text).map_err(|err| StoreError::corrupt("tickets.wager", err))
}

pub(crate) fn wager_column(wager: &Wager) -> Result<String, StoreError> {
    serde_json::to_string(wager).map_err(|err| StoreError::corrupt("tickets.wager", err))
}

pub(crate) fn role(text: &str) -> Result<Role, StoreError> {
    text.parse()
        .map_err(|err| StoreError::corrupt("accounts.role", err))
}
