//! Suppression list gate (§4.10): recipients that must never receive mail.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

/// Capability consulted before every production send. Implementations may be
/// backed by a database table in the surrounding system; the core only needs
/// a membership check.
#[async_trait]
pub trait SuppressionList: Send + Sync {
    /// Return the subset of `recipients` that are suppressed.
    async fn check(&self, recipients: &[String]) -> Vec<String>;
}

/// In-memory suppression list. Used by the console/SMTP providers in
/// environments without a backing suppression store, and by tests.
#[derive(Default)]
pub struct InMemorySuppressionList {
    suppressed: Mutex<HashSet<String>>,
}

impl InMemorySuppressionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suppress(&self, address: &str) {
        self.suppressed
            .lock()
            .expect("suppression mutex poisoned")
            .insert(address.trim().to_lowercase());
    }
}

#[async_trait]
impl SuppressionList for InMemorySuppressionList {
    async fn check(&self, recipients: &[String]) -> Vec<String> {
        let suppressed = self.suppressed.lock().expect("suppression mutex poisoned");
        recipients
            .iter()
            .filter(|r| suppressed.contains(r.as_str()))
            .cloned()
            .collect()
    }
}

/// Run the suppression gate over a message's recipients.
///
/// Returns the recipients that were suppressed; an empty vec means the send
/// may proceed unmodified. The caller (§4.10) must treat "every recipient
/// suppressed" as a non-transport `success = false` result.
pub async fn suppressed_recipients(
    list: &dyn SuppressionList,
    recipients: &[String],
) -> Vec<String> {
    list.check(recipients).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unsuppressed_recipients_pass_through() {
        let list = InMemorySuppressionList::new();
        let hit = suppressed_recipients(&list, &["a@example.com".to_owned()]).await;
        assert!(hit.is_empty());
    }

    #[tokio::test]
    async fn suppressed_recipient_is_reported() {
        let list = InMemorySuppressionList::new();
        list.suppress("a@example.com");
        let hit = suppressed_recipients(&list, &["a@example.com".to_owned(), "b@example.com".to_owned()]).await;
        assert_eq!(hit, vec!["a@example.com".to_owned()]);
    }
}
