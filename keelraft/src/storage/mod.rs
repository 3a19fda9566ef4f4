//! The durable store contract and state restoration.

mod memory;
mod store;

pub use memory::MemStore;
pub use store::RaftStore;
pub use store::RestoredSnapshot;
pub use store::RestoredState;
