//! Object-store abstraction: typed record access with resource-version
//! compare-and-swap, watch streams, and leader election.

pub mod client;
pub mod error;
pub mod leader;
pub mod memory;
mod mutate;
pub mod slate;
pub mod watch;

pub use client::{Store, StoreExt};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use slate::SlateStore;
pub use watch::{WatchEvent, WatchOp};
