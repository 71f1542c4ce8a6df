pub mod config;
pub mod error;
pub mod types;

pub use config::FailoverConfig;
pub use error::{AbortOnFatal, FailoverError, FatalHandler, Result, StoreError, StoreResult};
pub use types::{
    ActivityId, EntityKey, JobGate, NodeLifecycle, NodePhase, RowIdentifier, RowType,
};
