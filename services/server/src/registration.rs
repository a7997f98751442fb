//! The registration state machine (§4.5): reconciles an accepted `REGISTER`
//! message against the host store, then schedules DNS propagation.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use prism_config::{Config, RetractionPolicy};
use prism_dns::{DnsError, DnsProvider, UpsertOutcome};
use prism_store::{DnsSyncState, HostStore, StoreError};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;

use crate::stats::Statistics;

/// Outcome of reconciling one accepted registration against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    NewRegistration,
    IpUpdated,
    Refreshed,
}

impl RegistrationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RegistrationOutcome::NewRegistration => "new_registration",
            RegistrationOutcome::IpUpdated => "ip_updated",
            RegistrationOutcome::Refreshed => "refreshed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("auth token did not match")]
    AuthRejected,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Authoritative logic that reconciles a validated registration against the
/// host store and schedules DNS propagation (§4.5). Generic over the store
/// implementation so tests can substitute an in-memory one.
pub struct RegistrationProcessor<S: HostStore> {
    store: Arc<Mutex<S>>,
    dns: Arc<dyn DnsProvider>,
    stats: Statistics,
    auth_token: Option<String>,
    dns_enabled: bool,
    default_zone: Option<String>,
    default_ttl: Duration,
    retraction_policy: RetractionPolicy,
    dns_retry: DnsRetryConfig,
}

/// Backoff parameters for the bounded DNS retry loop (§4.5, §9 open
/// question: seconds-scale cadence, same breaker-free bounded-retry shape
/// as §4.12 but without a circuit breaker -- DNS failures are per-host).
#[derive(Debug, Clone, Copy)]
pub struct DnsRetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for DnsRetryConfig {
    fn default() -> Self {
        DnsRetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl<S: HostStore> RegistrationProcessor<S> {
    pub fn new(store: Arc<Mutex<S>>, dns: Arc<dyn DnsProvider>, stats: Statistics, config: &Config) -> Self {
        RegistrationProcessor {
            store,
            dns,
            stats,
            auth_token: config.server.auth_token.clone(),
            dns_enabled: config.dns.enabled,
            default_zone: config.dns.default_zone.clone(),
            default_ttl: config.dns.default_ttl,
            retraction_policy: config.dns.retraction_policy.clone(),
            dns_retry: DnsRetryConfig::default(),
        }
    }

    /// Process one accepted, validated registration from `source_ip`.
    ///
    /// Returns the reconciliation outcome on success. DNS propagation runs
    /// after the store mutation and never turns a successful store mutation
    /// into an error -- failures are recorded on the host record and
    /// reported only through the read API (§4.5 response contract).
    pub async fn process(
        &self,
        hostname: &str,
        source_ip: IpAddr,
        auth_token: Option<&str>,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        if let Some(expected) = &self.auth_token {
            if !token_matches(expected, auth_token.unwrap_or("")) {
                return Err(RegistrationError::AuthRejected);
            }
        }

        let ip_str = source_ip.to_string();
        let now = Utc::now();

        let outcome = {
            let mut store = self.store.lock().await;
            let existing = store.get(hostname)?;
            match existing {
                None => {
                    store.create(hostname, &ip_str, self.default_zone.as_deref(), now)?;
                    RegistrationOutcome::NewRegistration
                }
                Some(host) if host.current_ip != ip_str => {
                    store.update_ip(hostname, &ip_str, now)?;
                    RegistrationOutcome::IpUpdated
                }
                Some(_) => {
                    store.touch(hostname, now)?;
                    RegistrationOutcome::Refreshed
                }
            }
        };

        self.stats.record_outcome(outcome.as_str());

        if self.dns_enabled
            && matches!(
                outcome,
                RegistrationOutcome::NewRegistration | RegistrationOutcome::IpUpdated
            )
        {
            self.sync_dns(hostname, source_ip).await;
        }

        Ok(outcome)
    }

    /// Upsert the DNS record for `hostname`, retrying transient failures
    /// with bounded exponential backoff, then record the final
    /// `dns_sync_state` on the host record.
    async fn sync_dns(&self, hostname: &str, ip: IpAddr) {
        let zone = {
            match self.store.lock().await.get(hostname) {
                Ok(Some(host)) => host.dns_zone,
                _ => self.default_zone.clone(),
            }
        };
        let Some(zone) = zone else {
            return;
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.dns.ensure_record(hostname, &zone, ip, self.default_ttl).await {
                Ok(_outcome) => {
                    self.stats.set_dns_provider_alive(true);
                    let _ = self
                        .store
                        .lock()
                        .await
                        .set_dns_state(hostname, DnsSyncState::Synced, None);
                    return;
                }
                Err(err) if err.is_retryable() && attempt < self.dns_retry.max_attempts => {
                    let delay = backoff_delay(&self.dns_retry, attempt);
                    tracing::warn!(hostname, attempt, error = %err, "transient dns failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.stats.set_dns_provider_alive(!matches!(err, DnsError::Unreachable(_)));
                    self.stats.record_error("dns", err.to_string());
                    let _ = self.store.lock().await.set_dns_state(
                        hostname,
                        DnsSyncState::Failed,
                        Some(&err.to_string()),
                    );
                    return;
                }
            }
        }
    }

    pub fn retraction_policy(&self) -> &RetractionPolicy {
        &self.retraction_policy
    }

    pub fn store(&self) -> &Arc<Mutex<S>> {
        &self.store
    }

    pub fn dns(&self) -> &Arc<dyn DnsProvider> {
        &self.dns
    }
}

fn backoff_delay(config: &DnsRetryConfig, attempt: u32) -> Duration {
    let exp = 2u32.saturating_pow(attempt.saturating_sub(1));
    let secs = (config.initial_delay.as_secs_f64() * exp as f64).min(config.max_delay.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Constant-time comparison of the configured shared secret against the
/// token presented on the wire (§4.5 step 1, §9 open question).
fn token_matches(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}
