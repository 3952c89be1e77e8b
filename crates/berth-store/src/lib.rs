//! Berth Store - slot allocation and lifecycle
//!
//! Each environment class (e.g. "ai") owns a set of small-integer slots.
//! A slot's identity is one backing record in a control namespace; the
//! backing store's create-if-absent primitive is the *only* concurrency
//! mechanism: when two CLI invocations race for the same slot, exactly one
//! create succeeds. No distributed lock, no compare-and-swap.
//!
//! Backends:
//! - `KubectlBackend`: ConfigMaps managed through the `kubectl` CLI
//! - `MemoryBackend`: in-memory, for tests and dry runs

pub mod backend;
pub mod error;
pub mod kubectl;
pub mod ops;
pub mod record;

pub use backend::{MemoryBackend, OperationCounts, SlotBackend};
pub use error::{Result, StoreError};
pub use kubectl::KubectlBackend;
pub use ops::{
    allocate, find_matching, garbage_collect, update_attributes, update_namespace, AllocateRequest,
    DEFAULT_TTL, UNBOUNDED_SEARCH_CAP,
};
pub use record::SlotRecord;
