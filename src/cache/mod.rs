//! Persistent dependency cache
//!
//! Resolved dependencies are stored under a content fingerprint and served
//! until their TTL lapses or the dependency manifest changes.
//!
//! # Entry States
//!
//! | State | Served | Description |
//! |-------|--------|-------------|
//! | valid | yes | Artifacts fetched and verified |
//! | stale | no | Kept for inspection, re-resolved on next use |
//! | failed | no | Last resolution failed, retried on next use |

pub mod entry;
pub mod lock;
pub mod store;

pub use entry::{CacheEntry, CacheStatus};
pub use lock::FileLock;
pub use store::{Cached, DependencyCache, Resolution};
