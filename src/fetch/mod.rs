//! Fetch orchestration: cache lookup, single-flight de-duplication,
//! supersede-on-new-request cancellation and bounded retry.
//!
//! ```text
//! fetch(op, filters)
//!   ├─ cache hit ───────────────────────────────▶ payload
//!   ├─ operation missing ───────────────────────▶ Unavailable
//!   └─ join or start the flight for the key
//!        Attempting(1) ─fail─▶ Retrying ─1s─▶ Attempting(2) ─fail─▶ Retrying ─2s─▶ Attempting(3)
//!        any success ─▶ cache.set(key, payload, ttl) ─▶ payload
//!        third failure ─▶ Failed
//! ```

mod error;
mod flight;
mod orchestrator;
mod retry;

pub use error::FetchError;
pub use flight::FlightRegistry;
pub use orchestrator::{FetchMode, FetchOrchestrator, FetchSettings};
pub use retry::RetryPolicy;
