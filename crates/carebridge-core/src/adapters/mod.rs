//! # Storage Adapters
//!
//! Infrastructure implementations of the core storage traits.
//!
//! Memory adapters back unit tests and degraded/offline deployments;
//! filesystem adapters give single-node durability with the same contracts.

mod filesystem_dead_letter;
mod filesystem_idempotency;
mod memory_dead_letter;
mod memory_idempotency;

pub use filesystem_dead_letter::FilesystemDeadLetterStore;
pub use filesystem_idempotency::FilesystemIdempotencyTracker;
pub use memory_dead_letter::InMemoryDeadLetterStore;
pub use memory_idempotency::InMemoryIdempotencyTracker;
