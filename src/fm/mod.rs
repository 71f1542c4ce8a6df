pub mod message_state;

pub use message_state::{
    DEFAULT_FM_RETRY_INTERVAL, FmEffects, FmMessageStage, FmMessageState, FmRetrySignal,
};

use crate::core::EntityKey;
use crate::entity::EntityMap;
use std::time::Instant;

/// Poll pass of the FM resend pump: read-lock every entity and collect the
/// keys (with their retry sequence numbers) whose message state wants a
/// resend now.
pub fn pending_fm_retries<T, F>(map: &EntityMap<T>, now: Instant, state_of: F) -> Vec<(EntityKey, i64)>
where
    F: Fn(&T) -> &FmMessageState,
{
    let mut due = Vec::new();
    for entry in map.get_all_entries() {
        let read = entry.acquire_read();
        if let Some(value) = read.value() {
            if let Some(sequence) = state_of(value.as_ref()).should_retry(now) {
                due.push((read.key().clone(), sequence));
            }
        }
    }
    due
}
