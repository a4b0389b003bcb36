//! Upload transport and retry policy.

pub mod client;
pub mod retry;

pub use client::{UploadPayload, Uploader};
pub use retry::{classify_status, classify_transport, ErrorType, RetryStrategy, UploadFailure};
