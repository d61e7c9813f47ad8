//! Periodic settlement.
//!
//! Sleeps until a few seconds past each round boundary, then sweeps every
//! due round. The sweep itself is idempotent, so a late wake-up, a restart
//! or an operator running `tenspot-admin settle` at the same moment are all
//! harmless.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, FixedOffset, Utc};
use rand::rngs::OsRng;
use tenspot_execution::{
    Ledger, LedgerTx, RoundCalendar, Settlement, SettlementOutcome, Sweep, SystemEntropy,
};
use tenspot_types::DEFAULT_ROUND_MINUTES;
use tracing::{error, info, warn};

use crate::backoff::jittered_backoff;
use crate::RetryPolicy;

pub struct Scheduler<L> {
    settlement: Arc<Settlement<L>>,
    offset: FixedOffset,
    delay: chrono::Duration,
    retry: RetryPolicy,
}

impl<L: Ledger + 'static> Scheduler<L> {
    pub fn new(
        settlement: Arc<Settlement<L>>,
        offset: FixedOffset,
        delay: chrono::Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            settlement,
            offset,
            delay,
            retry,
        }
    }

    /// Settle everything due right now on a blocking thread.
    ///
    /// While any round failed transiently the sweep is repeated after a
    /// jittered backoff, up to `retry.attempts` times. Rounds settled by an
    /// earlier pass are kept in the returned sweep.
    pub async fn tick(&self) -> anyhow::Result<Sweep> {
        let mut settled = Vec::new();
        let mut retry = 0;
        loop {
            let settlement = self.settlement.clone();
            let result = tokio::task::spawn_blocking(move || {
                settlement.settle_due(Utc::now(), &mut SystemEntropy)
            })
            .await
            .context("settlement task panicked")?;

            let transient = match &result {
                Ok(sweep) => sweep.failed.iter().any(|(_, err)| err.is_transient()),
                Err(err) => err.is_transient(),
            };
            if transient && retry < self.retry.attempts {
                if let Ok(sweep) = result {
                    settled.extend(
                        sweep
                            .outcomes
                            .into_iter()
                            .filter(|outcome| matches!(outcome, SettlementOutcome::Settled(_))),
                    );
                }
                let pause = jittered_backoff(&mut OsRng, self.retry.backoff(retry));
                warn!(retry, ?pause, "transient settlement failure, sweeping again");
                tokio::time::sleep(pause).await;
                retry += 1;
                continue;
            }

            let mut sweep = result?;
            settled.append(&mut sweep.outcomes);
            sweep.outcomes = settled;
            return Ok(sweep);
        }
    }

    /// When the next sweep should run. Round length is read from the stored
    /// settings so an operator change takes effect on the following round.
    pub async fn next_wake(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let settlement = self.settlement.clone();
        let minutes = tokio::task::spawn_blocking(move || {
            let mut tx = settlement.ledger().begin()?;
            tx.settings().map(|settings| settings.round_minutes)
        })
        .await;
        let round_minutes = match minutes {
            Ok(Ok(minutes)) => minutes,
            Ok(Err(err)) => {
                warn!(?err, "could not read settings, using default round length");
                DEFAULT_ROUND_MINUTES
            }
            Err(err) => {
                warn!(?err, "settings task panicked, using default round length");
                DEFAULT_ROUND_MINUTES
            }
        };
        RoundCalendar::new(round_minutes, self.offset).next_settlement(now, self.delay)
    }

    /// Run until `shutdown` resolves. Starts with a catch-up sweep so rounds
    /// missed while the process was down settle immediately.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!(delay_secs = self.delay.num_seconds(), "settlement scheduler started");
        loop {
            match self.tick().await {
                Ok(sweep) => {
                    let settled = sweep.settled().count();
                    if settled > 0 || !sweep.failed.is_empty() {
                        info!(settled, failed = sweep.failed.len(), "settlement sweep finished");
                    }
                }
                Err(err) => error!(?err, "settlement sweep failed"),
            }

            let now = Utc::now();
            let wake = self.next_wake(now).await;
            let pause = (wake - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = &mut shutdown => {
                    info!("settlement scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
