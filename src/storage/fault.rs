// ============================================================================
// Fault Injection Decorator
// ============================================================================

use super::engine::{PersistentStore, StoreOperation};
use crate::core::{RowIdentifier, StoreError, StoreResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

struct InjectedFault {
    error: StoreError,
    remaining: usize,
}

/// Store decorator that forces a configured error for the next N operations,
/// then delegates again. Test harnesses wrap the real store with this instead
/// of touching store code.
pub struct FaultInjectionStore {
    inner: Arc<dyn PersistentStore>,
    fault: Mutex<Option<InjectedFault>>,
}

impl FaultInjectionStore {
    pub fn new(inner: Arc<dyn PersistentStore>) -> Self {
        Self {
            inner,
            fault: Mutex::new(None),
        }
    }

    /// Force `error` on the next operation only.
    pub fn fail_next(&self, error: StoreError) {
        self.fail_times(error, 1);
    }

    /// Force `error` on the next `count` operations.
    pub fn fail_times(&self, error: StoreError, count: usize) {
        *self.fault.lock().expect("fault slot poisoned") = Some(InjectedFault {
            error,
            remaining: count,
        });
    }

    /// Remove any pending injected fault.
    pub fn clear(&self) {
        *self.fault.lock().expect("fault slot poisoned") = None;
    }

    fn take_fault(&self) -> Option<StoreError> {
        let mut slot = self.fault.lock().expect("fault slot poisoned");
        match slot.as_mut() {
            Some(fault) if fault.remaining > 0 => {
                fault.remaining -= 1;
                let error = fault.error;
                if fault.remaining == 0 {
                    *slot = None;
                }
                Some(error)
            }
            _ => None,
        }
    }
}

#[async_trait]
impl PersistentStore for FaultInjectionStore {
    async fn execute(
        &self,
        op: StoreOperation,
        row: RowIdentifier,
        payload: Option<Vec<u8>>,
        timeout: Duration,
    ) -> StoreResult<()> {
        if let Some(error) = self.take_fault() {
            debug!(%op, %row, %error, "injecting store fault");
            return Err(error);
        }
        self.inner.execute(op, row, payload, timeout).await
    }
}
