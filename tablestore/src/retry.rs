//! Retry policy: which (operation, error) pairs are safe to retry, and how
//! long to pause between attempts.

use std::time::Duration;

use crate::request::Action;
use crate::TableStoreError;

/// A per-call retry capability. The client holds a prototype and clones it
/// for every logical call, so strategies may keep per-call state.
pub trait RetryStrategy: Send + Sync {
    /// Whether the given failure of `action` should be retried. For batch
    /// operations this is consulted once per failed sub-row; the call is
    /// retried only when every verdict is positive.
    fn should_retry(&self, action: Action, error: &TableStoreError) -> bool;

    /// The pause before the next attempt. Called once per granted retry.
    fn next_pause(&mut self) -> Duration;

    /// Number of retries granted so far on this call.
    fn retries(&self) -> u32;

    fn clone_box(&self) -> Box<dyn RetryStrategy>;
}

impl Clone for Box<dyn RetryStrategy> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// The stock policy: reads retry on any transient error, writes only on the
/// error codes the server documents as safe, with exponential backoff.
#[derive(Debug, Clone)]
pub struct DefaultRetryStrategy {
    max_retries: u32,
    base_interval: Duration,
    max_interval: Duration,
    granted: u32,
}

impl DefaultRetryStrategy {
    pub fn new(max_retries: u32, base_interval: Duration) -> Self {
        DefaultRetryStrategy {
            max_retries,
            base_interval,
            max_interval: Duration::from_secs(10),
            granted: 0,
        }
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    fn is_server_error_retriable(
        &self,
        status: i32,
        code: &str,
        message: &str,
        idempotent: bool,
    ) -> bool {
        match code {
            "OTSRowOperationConflict"
            | "OTSNotEnoughCapacityUnit"
            | "OTSTableNotReady"
            | "OTSPartitionUnavailable"
            | "OTSServerBusy" => return true,
            "OTSQuotaExhausted" if message == "Too frequent table operations." => return true,
            _ => {}
        }
        if !idempotent {
            return false;
        }
        matches!(
            code,
            "OTSTimeout" | "OTSInternalServerError" | "OTSServerUnavailable"
        ) || (500..=599).contains(&status)
    }
}

impl RetryStrategy for DefaultRetryStrategy {
    fn should_retry(&self, action: Action, error: &TableStoreError) -> bool {
        if self.granted >= self.max_retries {
            return false;
        }
        let idempotent = action.is_idempotent();
        match error {
            TableStoreError::Server {
                status,
                code,
                message,
                ..
            } => self.is_server_error_retriable(*status, code, message, idempotent),
            // The request may not have reached the server at all, so only
            // idempotent actions are safe.
            _ => idempotent,
        }
    }

    fn next_pause(&mut self) -> Duration {
        self.granted += 1;
        let factor = 1u32 << (self.granted - 1).min(20);
        self.base_interval
            .saturating_mul(factor)
            .min(self.max_interval)
    }

    fn retries(&self) -> u32 {
        self.granted
    }

    fn clone_box(&self) -> Box<dyn RetryStrategy> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status: i32, code: &str) -> TableStoreError {
        TableStoreError::Server {
            status,
            code: code.to_string(),
            message: String::new(),
            request_id: None,
            trace_id: None,
        }
    }

    #[test]
    fn writes_do_not_retry_idempotent_only_errors() {
        let strategy = DefaultRetryStrategy::new(3, Duration::from_millis(100));
        let unavailable = server_error(503, "OTSServerUnavailable");
        assert!(!strategy.should_retry(Action::PutRow, &unavailable));
        assert!(strategy.should_retry(Action::GetRow, &unavailable));
    }

    #[test]
    fn always_retriable_codes_apply_to_writes() {
        let strategy = DefaultRetryStrategy::new(3, Duration::from_millis(100));
        for code in [
            "OTSRowOperationConflict",
            "OTSNotEnoughCapacityUnit",
            "OTSTableNotReady",
            "OTSPartitionUnavailable",
            "OTSServerBusy",
        ] {
            assert!(
                strategy.should_retry(Action::BatchWriteRow, &server_error(200, code)),
                "{code} should retry for writes"
            );
        }
    }

    #[test]
    fn quota_exhausted_needs_the_exact_message() {
        let strategy = DefaultRetryStrategy::new(3, Duration::from_millis(100));
        let matching = TableStoreError::Server {
            status: 403,
            code: "OTSQuotaExhausted".to_string(),
            message: "Too frequent table operations.".to_string(),
            request_id: None,
            trace_id: None,
        };
        assert!(strategy.should_retry(Action::CreateTable, &matching));
        assert!(!strategy.should_retry(Action::CreateTable, &server_error(403, "OTSQuotaExhausted")));
    }

    #[test]
    fn http_5xx_is_idempotent_only() {
        let strategy = DefaultRetryStrategy::new(3, Duration::from_millis(100));
        let internal = server_error(502, "SomethingElse");
        assert!(strategy.should_retry(Action::GetRange, &internal));
        assert!(!strategy.should_retry(Action::UpdateRow, &internal));
    }

    #[test]
    fn client_errors_follow_idempotency() {
        let strategy = DefaultRetryStrategy::new(3, Duration::from_millis(100));
        let client = TableStoreError::NoAvailableConnection;
        assert!(strategy.should_retry(Action::ListTable, &client));
        assert!(!strategy.should_retry(Action::DeleteRow, &client));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut strategy = DefaultRetryStrategy::new(10, Duration::from_millis(100))
            .with_max_interval(Duration::from_millis(500));
        assert_eq!(strategy.next_pause(), Duration::from_millis(100));
        assert_eq!(strategy.next_pause(), Duration::from_millis(200));
        assert_eq!(strategy.next_pause(), Duration::from_millis(400));
        assert_eq!(strategy.next_pause(), Duration::from_millis(500));
        assert_eq!(strategy.retries(), 4);
    }

    #[test]
    fn retry_cap_is_enforced() {
        let mut strategy = DefaultRetryStrategy::new(2, Duration::from_millis(1));
        let throttled = server_error(200, "OTSServerBusy");
        assert!(strategy.should_retry(Action::GetRow, &throttled));
        strategy.next_pause();
        assert!(strategy.should_retry(Action::GetRow, &throttled));
        strategy.next_pause();
        assert!(!strategy.should_retry(Action::GetRow, &throttled));
    }
}
