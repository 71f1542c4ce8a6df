pub mod engine;
pub mod fault;
pub mod memory;

pub use engine::{PersistentStore, StoreOperation};
pub use fault::FaultInjectionStore;
pub use memory::InMemoryStore;
