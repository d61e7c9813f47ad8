//! Tenspot execution layer.
//!
//! This crate contains the draw settlement engine and the ticket lifecycle
//! that run against a transactional [`Ledger`].
//!
//! ## Settlement requirements
//! - Each round is settled at most once. The processed flag, checked under the
//!   round lock inside the settling transaction, is the only guard.
//! - Do not read the wall clock inside the engine; callers pass `now`.
//! - Every random draw goes through the injected [`Entropy`] source.
//!
//! ## Ticket requirements
//! - Every operation locks the caller's account and runs in one transaction.
//! - A refusal returns before commit and leaves the ledger untouched.
//!
//! ## Minimal settlement pass (example)
//! ```rust,ignore
//! use tenspot_execution::{GameRules, Settlement, SystemEntropy};
//!
//! let settlement = Settlement::new(ledger, GameRules::default(), offset);
//! let sweep = settlement.settle_due(now, &mut SystemEntropy)?;
//! for report in sweep.settled() {
//!     println!("{} won, paid {}", report.spot, report.payout);
//! }
//! ```

mod aggregator;
mod entropy;
mod error;
mod ledger;
pub mod round_clock;
mod rules;
mod selector;
mod settlement;
mod tickets;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

#[cfg(test)]
mod idempotency_tests;

pub use aggregator::StakeSummary;
pub use entropy::{Entropy, SystemEntropy};
pub use error::{SettleError, TicketError};
pub use ledger::{Ledger, LedgerTx, StoreError};
pub use round_clock::RoundCalendar;
pub use rules::{GameRules, PayoutPolicy, ShopHours};
pub use selector::{RtpContext, Selection, SelectionMode, WinnerSelector};
pub use settlement::{RoundReport, Settlement, SettlementOutcome, Sweep};
pub use tickets::{CancelReceipt, ClaimReceipt, SubmitReceipt, TicketDesk};
