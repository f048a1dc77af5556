//! Shared result cache for analytics queries.
//!
//! - Results are keyed by operation name plus the canonical form of the
//!   filters they were fetched with
//! - Every entry carries its own time-to-live and is evicted both lazily
//!   on read and by a timer, so abandoned keys are swept
//! - Payloads are stored behind `Arc`; readers share them and never mutate
//!   a stored entry

mod key;
mod ttl;

use serde_json::Value;
use std::sync::Arc;

pub use key::{CacheKey, KeyError};
pub use ttl::TtlCache;

/// Opaque analytics payload as returned by the transport.
pub type Payload = Arc<Value>;

/// The process-wide payload cache handed to orchestrators and the store.
pub type CacheService = TtlCache<Payload>;
