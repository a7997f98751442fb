use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::{DeleteOutcome, DnsError, DnsProvider, UpsertOutcome};

/// Default provider when DNS propagation is not configured.
///
/// Every call succeeds as a no-op, matching the `dns.enabled = false`
/// default in the configuration schema.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledDnsProvider;

#[async_trait]
impl DnsProvider for DisabledDnsProvider {
    async fn ensure_record(
        &self,
        _hostname: &str,
        _zone: &str,
        _ip: IpAddr,
        _ttl: Duration,
    ) -> Result<UpsertOutcome, DnsError> {
        Ok(UpsertOutcome::Unchanged)
    }

    async fn delete_record(&self, _hostname: &str, _zone: &str) -> Result<DeleteOutcome, DnsError> {
        Ok(DeleteOutcome::Absent)
    }

    async fn zone_exists(&self, _zone: &str) -> Result<bool, DnsError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_call_is_a_no_op_success() {
        let dns = DisabledDnsProvider;
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(
            dns.ensure_record("host-a", "example.com", ip, Duration::from_secs(60))
                .await
                .unwrap(),
            UpsertOutcome::Unchanged
        );
        assert_eq!(
            dns.delete_record("host-a", "example.com").await.unwrap(),
            DeleteOutcome::Absent
        );
        assert!(dns.zone_exists("example.com").await.unwrap());
    }
}
