//! Error type reported by an ingestion cycle

use thiserror::Error;

/// Why an ingestion cycle did not complete.
///
/// Whatever the variant, the cursor of the source is exactly where it was
/// before the cycle started.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The source is unknown or its configuration is unusable
    #[error("source {source_id} is misconfigured: {reason}")]
    Config { source_id: String, reason: String },
    /// Another cycle of the same source holds its lock
    #[error("a cycle of source {0} is already running")]
    Busy(String),
    /// The ledger could not be read
    #[error("ledger read failed: {0:#}")]
    Ledger(anyhow::Error),
    /// The cursor or event store could not be read or written
    #[error("store access failed: {0:#}")]
    Store(anyhow::Error),
}

impl CycleError {
    pub fn config(source_id: &str, reason: impl Into<String>) -> Self {
        CycleError::Config {
            source_id: source_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the next scheduled tick can be expected to succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CycleError::Config { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(!CycleError::config("MPE", "batch_limit must be positive").is_retryable());
        assert!(CycleError::Busy("MPE".to_string()).is_retryable());
        assert!(CycleError::Ledger(anyhow::anyhow!("timeout")).is_retryable());
        assert!(CycleError::Store(anyhow::anyhow!("io")).is_retryable());
    }

    #[test]
    fn test_messages_include_context_chain() {
        let source = anyhow::anyhow!("connection refused").context("eth_blockNumber");
        let err = CycleError::Ledger(source);
        assert_eq!(
            err.to_string(),
            "ledger read failed: eth_blockNumber: connection refused"
        );
    }
}
