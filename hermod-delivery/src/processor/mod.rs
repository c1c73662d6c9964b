//! Delivery processor orchestration

mod cycle;
mod reconcile;

use std::{sync::Arc, time::Duration};

use hermod_common::{Policy, Signal, UserDirectory, internal};
use hermod_spool::BackingStore;
use hermod_tracing::traced;
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};

pub use self::{cycle::CycleReport, reconcile::Outcome};
use crate::transport::{RemoteTransport, SmtpTransport, TransportConfig};

const fn default_scan_interval() -> u64 {
    60
}

const fn default_max_attempts() -> u32 {
    10
}

const fn default_max_sleep_slice() -> u64 {
    10
}

/// Everything a delivery pass needs, built once by [`DeliveryProcessor::init`].
#[derive(Debug)]
pub struct DeliveryEngine {
    spool: Arc<dyn BackingStore>,
    policy: Arc<Policy>,
    users: Arc<dyn UserDirectory>,
    transport: Arc<dyn RemoteTransport>,
    max_attempts: u32,
}

impl DeliveryEngine {
    #[must_use]
    pub fn new(
        spool: Arc<dyn BackingStore>,
        policy: Arc<Policy>,
        users: Arc<dyn UserDirectory>,
        transport: Arc<dyn RemoteTransport>,
        max_attempts: u32,
    ) -> Self {
        Self {
            spool,
            policy,
            users,
            transport,
            max_attempts,
        }
    }
}

/// Background worker draining the spool.
///
/// Configured from the `delivery` section:
///
/// ```ron
/// delivery: (
///     scan_interval_secs: 60,
///     max_attempts: 10,
///     max_sleep_slice_secs: 10,
///     transport: (relay_host: None),
/// ),
/// ```
///
/// Each pass delivers every due record, then the processor sleeps for `scan_interval_secs`,
/// in slices of at most `max_sleep_slice_secs`, before starting the next one.
#[derive(Debug, Deserialize)]
pub struct DeliveryProcessor {
    /// Pause between the end of one pass and the start of the next
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Attempts made before a failing record is bounced and dropped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Longest single sleep between checks for shutdown
    #[serde(default = "default_max_sleep_slice")]
    pub max_sleep_slice_secs: u64,

    #[serde(default)]
    pub transport: TransportConfig,

    /// Initialised in `init()`
    #[serde(skip)]
    engine: Option<Arc<DeliveryEngine>>,
}

impl Default for DeliveryProcessor {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            max_attempts: default_max_attempts(),
            max_sleep_slice_secs: default_max_sleep_slice(),
            transport: TransportConfig::default(),
            engine: None,
        }
    }
}

impl DeliveryProcessor {
    /// Checks the intervals, and builds the SMTP transport for remote recipients.
    ///
    /// # Errors
    ///
    /// If an interval is zero, or the DNS resolver cannot be created.
    pub fn init(
        &mut self,
        spool: Arc<dyn BackingStore>,
        policy: Arc<Policy>,
        users: Arc<dyn UserDirectory>,
    ) -> anyhow::Result<()> {
        internal!("Initialising Delivery Processor ...");

        let transport = SmtpTransport::new(self.transport.clone(), policy.primary_domain())?;
        if let Some(relay) = &self.transport.relay_host {
            internal!(level = INFO, "Remote mail will be relayed through {relay}");
        } else {
            internal!(
                "DNS resolver initialised with timeout={}s",
                self.transport.dns.timeout_secs
            );
        }

        self.init_with_transport(spool, policy, users, Arc::new(transport))
    }

    /// As [`init`](Self::init), with a caller-supplied transport.
    ///
    /// # Errors
    ///
    /// If an interval is zero.
    pub fn init_with_transport(
        &mut self,
        spool: Arc<dyn BackingStore>,
        policy: Arc<Policy>,
        users: Arc<dyn UserDirectory>,
        transport: Arc<dyn RemoteTransport>,
    ) -> anyhow::Result<()> {
        if self.scan_interval_secs == 0 {
            anyhow::bail!("delivery.scan_interval_secs must be greater than zero");
        }
        if self.max_sleep_slice_secs == 0 {
            anyhow::bail!("delivery.max_sleep_slice_secs must be greater than zero");
        }

        self.engine = Some(Arc::new(DeliveryEngine::new(
            spool,
            policy,
            users,
            transport,
            self.max_attempts,
        )));

        Ok(())
    }

    #[must_use]
    pub fn engine(&self) -> Option<&DeliveryEngine> {
        self.engine.as_deref()
    }

    /// Runs delivery passes until a shutdown signal arrives.
    ///
    /// A signal received mid-pass is acted on once the pass completes, so no record is left
    /// half processed.
    ///
    /// # Errors
    ///
    /// If the processor was not initialised.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all))]
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        let Some(engine) = &self.engine else {
            anyhow::bail!("Delivery processor not initialised. Call init() first.");
        };

        internal!(level = INFO, "Delivery processor starting");

        loop {
            let report = engine.run_cycle().await;
            if report.scanned > 0 {
                internal!(level = DEBUG, "Delivery pass finished: {report}");
            }

            if self.pause(&mut shutdown).await {
                break;
            }
        }

        internal!(level = INFO, "Delivery processor shutdown complete");
        Ok(())
    }

    /// Sleeps for the scan interval. Returns `true` if shutdown was requested meanwhile.
    async fn pause(&self, shutdown: &mut broadcast::Receiver<Signal>) -> bool {
        let slice = Duration::from_secs(self.max_sleep_slice_secs);
        let mut remaining = Duration::from_secs(self.scan_interval_secs);

        while !remaining.is_zero() {
            let nap = remaining.min(slice);

            tokio::select! {
                signal = shutdown.recv() => {
                    match signal {
                        Ok(signal) => internal!("Delivery processor received {signal:?}"),
                        Err(RecvError::Closed) => internal!("Shutdown channel closed"),
                        Err(RecvError::Lagged(missed)) => {
                            internal!(level = WARN, "Missed {missed} shutdown signals");
                        }
                    }
                    return true;
                }
                () = tokio::time::sleep(nap) => {}
            }

            remaining = remaining.saturating_sub(nap);
        }

        false
    }
}
