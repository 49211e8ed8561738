//! Artifact sinks.
//!
//! The pipeline talks to storage through the two-method [`Sink`] surface
//! (plus a metadata upsert); cloud adapters live behind the same trait
//! outside this crate.

pub mod local;
pub mod memory;

pub use local::LocalSink;
pub use memory::MemorySink;

use crate::error::Result;

/// Destination for finished artifacts.
///
/// `put` must be atomic: a reader never observes a partially written
/// object. The pipeline relies on this for its cancellation guarantee.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Key-value upsert keyed by
    /// `{ticker}-{filing_type}-{fiscal_year}-{fiscal_period}`.
    async fn record_metadata(&self, filing_id: &str, attrs: serde_json::Value) -> Result<()>;
}
