//! Request store backends.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlRequestStore;
pub use memory::InMemoryRequestStore;
