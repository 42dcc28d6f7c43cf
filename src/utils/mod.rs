//! Utility modules.

pub mod file;
pub mod retry;
pub mod text;

pub use file::{calculate_checksum, collect_corpus_files, read_file_content};
pub use retry::{RetryConfig, RetryResult, Retryable, retry, with_retry};
pub use text::{has_meaningful_content, normalize_arabic};
