//! Request facade over the engine.
//!
//! Every call runs its ledger work on a blocking thread, retries transient
//! store failures with jittered backoff and folds the result into a
//! serializable [`Reply`]. Business refusals (closed shop, short balance,
//! duplicate claim) become unsuccessful replies carrying the refusal text;
//! store faults that outlast the retries are reported generically and logged.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use rand::rngs::OsRng;
use serde::Serialize;
use tenspot_execution::{
    CancelReceipt, ClaimReceipt, GameRules, Ledger, LedgerTx, SettleError, Settlement,
    SettlementOutcome, StoreError, SubmitReceipt, SystemEntropy, TicketDesk, TicketError,
};
use tenspot_types::{AccountId, Amount, RoundId, TicketId};
use tracing::{error, warn};

use crate::backoff::jittered_backoff;
use crate::RetryPolicy;

/// Structured response handed back to a caller.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reply<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T> Reply<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

/// One round as shown on a public results board.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResultEntry {
    pub round_id: RoundId,
    pub spot: String,
    pub end_time: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PublicResults {
    pub results: Vec<ResultEntry>,
}

/// What a manual settlement run did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SettlementSummary {
    pub settled: Vec<SettledRound>,
    pub already_processed: usize,
    pub failed: Vec<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SettledRound {
    pub round_id: RoundId,
    pub end_time: DateTime<Utc>,
    pub spot: String,
    pub collection: Amount,
    pub payout: Amount,
    pub mode: &'static str,
}

/// Errors the retry loop knows how to classify.
trait Retryable: fmt::Debug + fmt::Display {
    fn is_transient(&self) -> bool;

    /// Text safe to show the caller, or `None` for internal faults.
    fn public_message(&self) -> Option<String>;
}

impl Retryable for TicketError {
    fn is_transient(&self) -> bool {
        TicketError::is_transient(self)
    }

    fn public_message(&self) -> Option<String> {
        self.is_business().then(|| self.to_string())
    }
}

impl Retryable for SettleError {
    fn is_transient(&self) -> bool {
        SettleError::is_transient(self)
    }

    fn public_message(&self) -> Option<String> {
        matches!(self, SettleError::RoundOpen(_)).then(|| self.to_string())
    }
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }

    fn public_message(&self) -> Option<String> {
        None
    }
}

const INTERNAL_ERROR: &str = "internal error, please retry";

struct Inner<L> {
    desk: TicketDesk<L>,
    settlement: Settlement<L>,
    ledger: L,
    retry: RetryPolicy,
}

/// Cloneable handle; clones share one ledger.
pub struct Service<L> {
    inner: Arc<Inner<Arc<L>>>,
}

impl<L> Clone for Service<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L: Ledger + 'static> Service<L> {
    pub fn new(ledger: Arc<L>, rules: GameRules, offset: FixedOffset, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                desk: TicketDesk::new(ledger.clone(), rules.clone(), offset),
                settlement: Settlement::new(ledger.clone(), rules, offset),
                ledger,
                retry,
            }),
        }
    }

    pub fn settlement(&self) -> &Settlement<Arc<L>> {
        &self.inner.settlement
    }

    /// Sell a ticket for the round closing at `round_end`, or for the round
    /// currently open when none is given.
    pub async fn submit_ticket(
        &self,
        account: AccountId,
        entries: BTreeMap<String, i64>,
        round_end: Option<DateTime<Utc>>,
    ) -> Reply<SubmitReceipt> {
        let wager = match self.inner.desk.parse_wager(entries) {
            Ok(wager) => wager,
            Err(err) => return Reply::refused(err.to_string()),
        };
        self.run("submit_ticket", move |inner| {
            let now = Utc::now();
            let round_end = match round_end {
                Some(round_end) => round_end,
                None => inner.desk.open_round_end(now)?,
            };
            inner.desk.submit(account, &wager, round_end, now)
        })
        .await
    }

    pub async fn cancel_ticket(&self, account: AccountId, ticket: TicketId) -> Reply<CancelReceipt> {
        self.run("cancel_ticket", move |inner| {
            inner.desk.cancel(account, ticket, Utc::now())
        })
        .await
    }

    pub async fn claim_ticket(&self, account: AccountId, ticket: TicketId) -> Reply<ClaimReceipt> {
        self.run("claim_ticket", move |inner| inner.desk.claim(account, ticket))
            .await
    }

    /// Settle one closed round (when `end_time` is given) or sweep every due
    /// round. A round that has not closed yet is refused.
    pub async fn run_settlement(&self, end_time: Option<DateTime<Utc>>) -> Reply<SettlementSummary> {
        self.run("run_settlement", move |inner| {
            let labels = &inner.settlement.rules().labels;
            let now = Utc::now();
            let mut summary = SettlementSummary::default();
            let outcomes = match end_time {
                Some(end_time) => vec![inner
                    .settlement
                    .settle_round(end_time, now, &mut SystemEntropy)?],
                None => {
                    let sweep = inner.settlement.settle_due(now, &mut SystemEntropy)?;
                    summary.failed = sweep.failed.iter().map(|(end, _)| *end).collect();
                    sweep.outcomes
                }
            };
            for outcome in outcomes {
                match outcome {
                    SettlementOutcome::Settled(report) => summary.settled.push(SettledRound {
                        round_id: report.round_id,
                        end_time: report.end_time,
                        spot: labels.label(report.spot).to_string(),
                        collection: report.collection,
                        payout: report.payout,
                        mode: report.mode.as_str(),
                    }),
                    SettlementOutcome::AlreadyProcessed(_) => summary.already_processed += 1,
                }
            }
            Ok::<_, SettleError>(summary)
        })
        .await
    }

    /// Most recent winning spots, newest first.
    pub async fn public_results(&self, limit: usize) -> Reply<PublicResults> {
        self.run("public_results", move |inner| {
            let results = inner.ledger.begin()?.recent_results(limit)?;
            let labels = &inner.desk.rules().labels;
            Ok::<_, StoreError>(PublicResults {
                results: results
                    .into_iter()
                    .map(|result| ResultEntry {
                        round_id: result.round_id,
                        spot: labels.label(result.spot).to_string(),
                        end_time: result.end_time,
                    })
                    .collect(),
            })
        })
        .await
    }

    async fn run<T, E, F>(&self, operation: &'static str, work: F) -> Reply<T>
    where
        T: Send + 'static,
        E: Retryable + Send + 'static,
        F: Fn(&Inner<Arc<L>>) -> Result<T, E> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let mut retry = 0;
        loop {
            let inner = self.inner.clone();
            let attempt = work.clone();
            let result = tokio::task::spawn_blocking(move || (*attempt)(&*inner)).await;
            let err = match result {
                Ok(Ok(value)) => return Reply::ok(value),
                Ok(Err(err)) => err,
                Err(join) => {
                    error!(operation, ?join, "request task panicked");
                    return Reply::refused(INTERNAL_ERROR);
                }
            };
            if err.is_transient() && retry < self.inner.retry.attempts {
                let pause = jittered_backoff(&mut OsRng, self.inner.retry.backoff(retry));
                warn!(operation, retry, ?err, "transient failure, retrying");
                tokio::time::sleep(pause).await;
                retry += 1;
                continue;
            }
            return match err.public_message() {
                Some(message) => Reply::refused(message),
                None => {
                    error!(operation, ?err, "request failed");
                    Reply::refused(INTERNAL_ERROR)
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tenspot_execution::{mocks::Memory, PayoutPolicy, ShopHours};

    fn service(memory: &Arc<Memory>, policy: PayoutPolicy) -> Service<Memory> {
        let rules = GameRules {
            payout_policy: policy,
            // Tests run at arbitrary wall-clock hours
            shop_hours: ShopHours {
                open_hour: 0,
                close_hour: 23,
            },
            ..GameRules::default()
        };
        let retry = RetryPolicy {
            attempts: 3,
            base: Duration::from_millis(1),
            max: Duration::from_millis(4),
        };
        Service::new(memory.clone(), rules, memory.offset(), retry)
    }

    fn entries(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
        pairs
            .iter()
            .map(|(label, qty)| (label.to_string(), *qty))
            .collect()
    }

    #[tokio::test]
    async fn test_submit_reply_serializes_flat() {
        let memory = Arc::new(Memory::default());
        let alice = memory.account("alice", Amount::from_major(100));
        let reply = service(&memory, PayoutPolicy::OnSettlement)
            .submit_ticket(alice, entries(&[("A0", 2)]), None)
            .await;
        assert!(reply.success, "{reply:?}");

        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["success"], true);
        assert!(json.get("message").is_none());
        assert_eq!(json["total_amount"], 2000);
        assert_eq!(json["charged"], 1820);
    }

    #[tokio::test]
    async fn test_business_refusal_is_reported() {
        let memory = Arc::new(Memory::default());
        let alice = memory.account("alice", Amount::from_major(1));
        let service = service(&memory, PayoutPolicy::OnSettlement);

        let broke = service.submit_ticket(alice, entries(&[("A0", 5)]), None).await;
        assert!(!broke.success);
        assert!(broke.message.unwrap().contains("insufficient balance"));

        let unknown = service.submit_ticket(alice, entries(&[("Z9", 1)]), None).await;
        assert!(!unknown.success);
        assert!(unknown.data.is_none());

        let missing = service.claim_ticket(alice, TicketId(404)).await;
        assert!(!missing.success);
    }

    #[tokio::test]
    async fn test_transient_commit_failures_are_retried() {
        let memory = Arc::new(Memory::default());
        let alice = memory.account("alice", Amount::from_major(100));
        memory.fail_commits(2);
        let reply = service(&memory, PayoutPolicy::OnSettlement)
            .submit_ticket(alice, entries(&[("B1", 1)]), None)
            .await;
        assert!(reply.success, "{reply:?}");
        assert_eq!(memory.balance(alice), Amount::from_minor(10_000 - 910));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let memory = Arc::new(Memory::default());
        let alice = memory.account("alice", Amount::from_major(100));
        memory.fail_commits(10);
        let reply = service(&memory, PayoutPolicy::OnSettlement)
            .submit_ticket(alice, entries(&[("B1", 1)]), None)
            .await;
        assert!(!reply.success);
        assert_eq!(reply.message.as_deref(), Some(INTERNAL_ERROR));
        assert_eq!(memory.balance(alice), Amount::from_major(100));
    }

    #[tokio::test]
    async fn test_settle_then_public_results() {
        let memory = Arc::new(Memory::default());
        let service = service(&memory, PayoutPolicy::OnSettlement);
        let end = tenspot_execution::mocks::at("2026-03-01T10:00:00+05:30");

        let first = service.run_settlement(Some(end)).await;
        assert!(first.success);
        let summary = first.data.unwrap();
        assert_eq!(summary.settled.len(), 1);
        assert_eq!(summary.settled[0].mode, "empty");

        let again = service.run_settlement(Some(end)).await.data.unwrap();
        assert!(again.settled.is_empty());
        assert_eq!(again.already_processed, 1);

        let board = service.public_results(7).await.data.unwrap();
        assert_eq!(board.results.len(), 1);
        assert_eq!(board.results[0].spot, summary.settled[0].spot);
        assert_eq!(board.results[0].end_time, end);
    }

    #[tokio::test]
    async fn test_open_round_cannot_be_settled() {
        let memory = Arc::new(Memory::default());
        let alice = memory.account("alice", Amount::from_major(100));
        let service = service(&memory, PayoutPolicy::OnSettlement);
        let round_end = service
            .submit_ticket(alice, entries(&[("A0", 1)]), None)
            .await
            .data
            .unwrap()
            .round_end;

        let reply = service.run_settlement(Some(round_end)).await;
        assert!(!reply.success);
        assert!(reply.message.unwrap().contains("still open"));
        assert!(!memory.round_at(round_end).unwrap().processed);

        let again = service
            .submit_ticket(alice, entries(&[("B1", 1)]), Some(round_end))
            .await;
        assert!(again.success, "{again:?}");
    }
}
