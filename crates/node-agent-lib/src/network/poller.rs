//! Network readiness polling loop
//!
//! Queries the host network on a fixed interval until it has a management
//! address, then resolves the source VIP once. A resolver failure ends the
//! loop without retrying; the outcome reports it so callers can tell it
//! apart from a network that never came up.

use super::{HostNetworkService, SourceVipResolver};
use crate::observability::AgentMetrics;
use std::future;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Configuration for the readiness poller
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Time between host network queries (default: 5 seconds)
    pub interval: Duration,
    /// Give up after this many queries (default: unbounded)
    pub max_attempts: Option<u32>,
    /// Give up after this much time (default: unbounded)
    pub deadline: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: None,
            deadline: None,
        }
    }
}

/// How a wait for the source VIP ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The network is up and a source VIP was allocated
    Resolved(IpAddr),
    /// The network is up but the VIP could not be allocated; not retried
    ResolverFailed(String),
    /// Attempt or deadline limit reached before the network came up
    TimedOut { attempts: u32 },
    /// Shutdown was signalled while waiting
    Cancelled,
}

impl PollOutcome {
    pub fn source_vip(&self) -> Option<IpAddr> {
        match self {
            PollOutcome::Resolved(vip) => Some(*vip),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, PollOutcome::Resolved(_))
    }
}

/// Waits for a host network to be provisioned and resolves its source VIP
pub struct NetworkReadinessPoller<H, R> {
    hns: H,
    resolver: R,
    config: PollConfig,
    metrics: AgentMetrics,
}

impl<H, R> NetworkReadinessPoller<H, R>
where
    H: HostNetworkService,
    R: SourceVipResolver,
{
    pub fn new(hns: H, resolver: R, config: PollConfig) -> Self {
        Self {
            hns,
            resolver,
            config,
            metrics: AgentMetrics::new(),
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll `network_name` until its source VIP is known
    ///
    /// The first query happens immediately, later ones every
    /// `config.interval`. Shutdown and the deadline are honoured while a
    /// query or resolver call is in flight.
    pub async fn wait_for_source_vip(
        &self,
        network_name: &str,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> PollOutcome {
        let started = Instant::now();
        let deadline = self.config.deadline.map(|d| started + d);
        let deadline_reached = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_reached);

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts = 0u32;

        info!(
            network = %network_name,
            interval_secs = self.config.interval.as_secs(),
            "Waiting for host network to obtain a management address"
        );

        loop {
            if self
                .config
                .max_attempts
                .is_some_and(|max| attempts >= max)
            {
                warn!(network = %network_name, attempts, "Giving up waiting for host network");
                return PollOutcome::TimedOut { attempts };
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => return self.cancelled(network_name, attempts),
                _ = &mut deadline_reached => return self.timed_out(network_name, attempts),
            }

            attempts += 1;
            self.metrics.inc_network_poll_attempts();

            let step = tokio::select! {
                step = self.poll_once(network_name, attempts, started) => step,
                _ = shutdown.recv() => return self.cancelled(network_name, attempts),
                _ = &mut deadline_reached => return self.timed_out(network_name, attempts),
            };

            if let Some(outcome) = step {
                return outcome;
            }
        }
    }

    /// One query; `None` means keep polling
    async fn poll_once(
        &self,
        network_name: &str,
        attempt: u32,
        started: Instant,
    ) -> Option<PollOutcome> {
        let network = match self.hns.network_by_name(network_name).await {
            Ok(network) => network,
            Err(e) => {
                self.metrics.inc_network_query_errors();
                warn!(
                    network = %network_name,
                    attempt,
                    error = %e,
                    "Can't find host network, retrying"
                );
                return None;
            }
        };

        if network.management_ip.is_empty() {
            debug!(network = %network_name, attempt, "Host network has no management address yet");
            return None;
        }

        let outcome = match self.resolver.resolve_source_vip(&network).await {
            Ok(vip) => {
                info!(
                    network = %network_name,
                    management_ip = %network.management_ip,
                    source_vip = %vip,
                    attempts = attempt,
                    "Resolved kube-proxy source VIP"
                );
                PollOutcome::Resolved(vip)
            }
            Err(e) => {
                error!(
                    network = %network_name,
                    error = %e,
                    "Failed to resolve kube-proxy source VIP"
                );
                PollOutcome::ResolverFailed(e.to_string())
            }
        };

        self.metrics
            .observe_source_vip_wait(started.elapsed().as_secs_f64());
        Some(outcome)
    }

    fn cancelled(&self, network_name: &str, attempts: u32) -> PollOutcome {
        info!(network = %network_name, attempts, "Source VIP wait cancelled");
        PollOutcome::Cancelled
    }

    fn timed_out(&self, network_name: &str, attempts: u32) -> PollOutcome {
        warn!(network = %network_name, attempts, "Source VIP wait deadline reached");
        PollOutcome::TimedOut { attempts }
    }
}
