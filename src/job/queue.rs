// ============================================================================
// Job Queue Manager
// ============================================================================
//
// Serializes job items per entity (at most one in flight per key) while
// letting items against distinct keys run in parallel on the runtime. A
// per-key runner task drains that key's backlog, then retires.
//
// ============================================================================

use super::item::JobItem;
use crate::core::{AbortOnFatal, EntityKey, FailoverConfig, FatalHandler, NodeLifecycle};
use crate::entity::EntityMap;
use crate::storage::PersistentStore;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

/// Shared collaborators every job item runs against.
pub(crate) struct JobEnv<T> {
    pub(crate) map: Arc<EntityMap<T>>,
    pub(crate) store: Arc<dyn PersistentStore>,
    pub(crate) node: Arc<NodeLifecycle>,
    pub(crate) config: FailoverConfig,
    pub(crate) fatal: Arc<dyn FatalHandler>,
}

struct QueueInner<T> {
    pending: HashMap<EntityKey, VecDeque<JobItem<T>>>,
    in_flight: HashSet<EntityKey>,
    outstanding: usize,
}

pub struct JobQueueManager<T> {
    env: Arc<JobEnv<T>>,
    inner: Arc<Mutex<QueueInner<T>>>,
    quiesced: Arc<Notify>,
}

impl<T> JobQueueManager<T>
where
    T: Serialize + Send + Sync + 'static,
{
    pub fn new(
        map: Arc<EntityMap<T>>,
        store: Arc<dyn PersistentStore>,
        node: Arc<NodeLifecycle>,
        config: FailoverConfig,
    ) -> Self {
        Self {
            env: Arc::new(JobEnv {
                map,
                store,
                node,
                config,
                fatal: Arc::new(AbortOnFatal),
            }),
            inner: Arc::new(Mutex::new(QueueInner {
                pending: HashMap::new(),
                in_flight: HashSet::new(),
                outstanding: 0,
            })),
            quiesced: Arc::new(Notify::new()),
        }
    }

    /// Replace the fatal-escalation sink. Call before scheduling anything.
    pub fn with_fatal_handler(mut self, fatal: Arc<dyn FatalHandler>) -> Self {
        self.env = Arc::new(JobEnv {
            map: Arc::clone(&self.env.map),
            store: Arc::clone(&self.env.store),
            node: Arc::clone(&self.env.node),
            config: self.env.config.clone(),
            fatal,
        });
        self
    }

    pub fn map(&self) -> &Arc<EntityMap<T>> {
        &self.env.map
    }

    pub fn node(&self) -> &Arc<NodeLifecycle> {
        &self.env.node
    }

    /// Admit a job item. It runs immediately if its entity has no item in
    /// flight, otherwise it queues behind them.
    pub fn schedule(&self, item: JobItem<T>) {
        let key = item.key().clone();
        let run_now = {
            let mut inner = self.inner.lock().expect("job queue poisoned");
            inner.outstanding += 1;
            if inner.in_flight.contains(&key) {
                inner.pending.entry(key.clone()).or_default().push_back(item);
                debug!(%key, "job item queued behind in-flight item");
                None
            } else {
                inner.in_flight.insert(key.clone());
                Some(item)
            }
        };
        if let Some(item) = run_now {
            self.spawn_runner(key, item);
        }
    }

    fn spawn_runner(&self, key: EntityKey, first: JobItem<T>) {
        let env = Arc::clone(&self.env);
        let inner = Arc::clone(&self.inner);
        let quiesced = Arc::clone(&self.quiesced);

        tokio::spawn(async move {
            let mut current = first;
            loop {
                let outcome = current.run(&env).await;
                debug!(%key, ?outcome, "job item finished");

                let (next, idle) = {
                    let mut inner = inner.lock().expect("job queue poisoned");
                    inner.outstanding -= 1;
                    let next = inner
                        .pending
                        .get_mut(&key)
                        .and_then(|backlog| backlog.pop_front());
                    if next.is_none() {
                        inner.pending.remove(&key);
                        inner.in_flight.remove(&key);
                    }
                    (next, inner.outstanding == 0)
                };

                if idle {
                    quiesced.notify_waiters();
                }
                match next {
                    Some(item) => current = item,
                    None => break,
                }
            }
        });
    }

    /// Number of scheduled items that have not finished yet.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().expect("job queue poisoned").outstanding
    }

    /// Pump point for tests and shutdown: resolves once every scheduled item
    /// has finished.
    pub async fn drain(&self) {
        loop {
            let notified = self.quiesced.notified();
            tokio::pin!(notified);
            // Register before the idle check so a completion in between is
            // not lost.
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}
