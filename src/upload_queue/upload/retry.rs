//! Retry logic with exponential backoff and error classification.
//!
//! Handles retry strategy, error classification (client/server/network),
//! and backoff calculation.

use super::super::types::UploadItem;
use chrono::Utc;
use reqwest::StatusCode;
use std::time::Duration;

/// Upper bound for a single backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Error classification for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Client errors (400-499) - invalid input, don't retry
    Client,
    /// Server errors (500-599, 408, 429) - temporary issues, retry with backoff
    Server,
    /// Network errors - connection issues, retry with backoff
    Network,
}

/// A failed upload attempt and how to treat it
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct UploadFailure {
    pub error_type: ErrorType,
    pub message: String,
}

impl UploadFailure {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let body = body.trim();
        let message = if body.is_empty() {
            format!("Server returned status {}", status)
        } else {
            // Keep log lines readable when the server returns an HTML page
            let snippet: String = body.chars().take(200).collect();
            format!("Server returned status {}: {}", status, snippet)
        };

        Self {
            error_type: classify_status(status),
            message,
        }
    }

    pub fn from_transport(error: &reqwest::Error) -> Self {
        Self {
            error_type: classify_transport(error),
            message: format!("Request failed: {}", error),
        }
    }
}

/// Retry strategy configuration
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each later one
    pub base_delay: Duration,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryStrategy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Check if we should retry an item that just failed
    pub fn should_retry(&self, item: &UploadItem, error_type: ErrorType) -> bool {
        // Never retry client errors
        if error_type == ErrorType::Client {
            return false;
        }

        item.retry_count < self.max_retries
    }

    /// Exponential backoff: base_delay * 2^retry_count
    pub fn calculate_backoff(&self, retry_count: u32) -> Duration {
        self.base_delay
            .checked_mul(2u32.saturating_pow(retry_count))
            .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }

    /// Schedule next retry time for an item
    pub fn schedule_retry(&self, item: &mut UploadItem) -> Duration {
        let delay = self.calculate_backoff(item.retry_count);
        let delay_chrono =
            chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(300));
        item.next_retry_at = Some(Utc::now() + delay_chrono);
        delay
    }
}

/// Classify a non-success HTTP status
pub fn classify_status(status: StatusCode) -> ErrorType {
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        return ErrorType::Server;
    }

    if status.is_client_error() {
        return ErrorType::Client;
    }

    ErrorType::Server
}

/// Classify an error raised before any response arrived
pub fn classify_transport(error: &reqwest::Error) -> ErrorType {
    // A request that cannot even be built will fail the same way every time
    if error.is_builder() {
        return ErrorType::Client;
    }

    ErrorType::Network
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_classify_client_errors() {
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), ErrorType::Client);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), ErrorType::Client);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), ErrorType::Client);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), ErrorType::Client);
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY),
            ErrorType::Client
        );
    }

    #[test]
    fn test_classify_server_errors() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            ErrorType::Server
        );
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), ErrorType::Server);
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            ErrorType::Server
        );
        assert_eq!(
            classify_status(StatusCode::REQUEST_TIMEOUT),
            ErrorType::Server
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorType::Server
        );
    }

    #[test]
    fn test_failure_message_from_status() {
        let failure = UploadFailure::from_status(StatusCode::BAD_REQUEST, "  missing records ");
        assert_eq!(failure.error_type, ErrorType::Client);
        assert_eq!(
            failure.to_string(),
            "Server returned status 400 Bad Request: missing records"
        );

        let long_body = "x".repeat(1000);
        let failure = UploadFailure::from_status(StatusCode::BAD_GATEWAY, &long_body);
        assert!(failure.message.len() < 300);
    }

    #[test]
    fn test_default_retry_strategy() {
        let strategy = RetryStrategy::default();
        assert_eq!(strategy.max_retries, 3);
        assert_eq!(strategy.base_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_should_retry_client_error() {
        let strategy = RetryStrategy::default();
        let mut item = create_test_item();

        // Client errors should never retry
        item.retry_count = 0;
        assert!(!strategy.should_retry(&item, ErrorType::Client));

        item.retry_count = 2;
        assert!(!strategy.should_retry(&item, ErrorType::Client));
    }

    #[test]
    fn test_should_retry_server_and_network_errors() {
        let strategy = RetryStrategy::default();
        let mut item = create_test_item();

        for error_type in [ErrorType::Server, ErrorType::Network] {
            item.retry_count = 0;
            assert!(strategy.should_retry(&item, error_type));

            item.retry_count = 2;
            assert!(strategy.should_retry(&item, error_type));

            item.retry_count = 3;
            assert!(!strategy.should_retry(&item, error_type));
        }
    }

    #[test]
    fn test_calculate_backoff() {
        let strategy = RetryStrategy::default();

        // base = 2s, so backoff = 2^(retry_count + 1) seconds
        assert_eq!(strategy.calculate_backoff(0), Duration::from_secs(2));
        assert_eq!(strategy.calculate_backoff(1), Duration::from_secs(4));
        assert_eq!(strategy.calculate_backoff(2), Duration::from_secs(8));
        assert_eq!(strategy.calculate_backoff(3), Duration::from_secs(16));
    }

    #[test]
    fn test_calculate_backoff_is_capped() {
        let strategy = RetryStrategy::default();
        assert_eq!(strategy.calculate_backoff(20), MAX_BACKOFF);
        assert_eq!(strategy.calculate_backoff(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn test_schedule_retry() {
        let strategy = RetryStrategy::default();
        let mut item = create_test_item();

        assert!(item.next_retry_at.is_none());

        let delay = strategy.schedule_retry(&mut item);
        assert_eq!(delay, Duration::from_secs(2));

        // Should be approximately 2 seconds in the future
        let next_retry = item.next_retry_at.unwrap();
        let diff = (next_retry - Utc::now()).num_seconds();
        assert!((1..=3).contains(&diff), "Expected ~2s, got {}s", diff);
    }

    fn create_test_item() -> UploadItem {
        UploadItem::new(
            PathBuf::from("/test/export.csv"),
            "export.csv".to_string(),
            "hash".to_string(),
            Vec::new(),
            0,
        )
    }
}
