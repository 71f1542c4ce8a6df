/// Commit pipeline tests
///
/// End-to-end coverage of the lock / reduce / commit / rollback protocol and
/// the deferred action queue, driven through the job queue manager with a
/// fault-injecting store.
use async_trait::async_trait;
use failover_core::{
    ActionContext, ActivityId, EntityKey, EntityLifecycle, EntityMap, FailoverConfig,
    FatalHandler, FaultInjectionStore, InMemoryStore, JobGate, JobItem, JobQueueManager,
    NodeLifecycle, PersistentStore, RowType, StateMachineAction, StoreError,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const ROW_TYPE: RowType = RowType::new("FailoverUnit");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ReplicaRecord {
    epoch: u64,
    node: String,
}

fn record(epoch: u64) -> ReplicaRecord {
    ReplicaRecord {
        epoch,
        node: "node-1".to_string(),
    }
}

struct Harness {
    map: Arc<EntityMap<ReplicaRecord>>,
    store: Arc<InMemoryStore>,
    faults: Arc<FaultInjectionStore>,
    node: Arc<NodeLifecycle>,
    queue: JobQueueManager<ReplicaRecord>,
}

fn harness() -> Harness {
    let map = Arc::new(EntityMap::new(ROW_TYPE));
    let store = Arc::new(InMemoryStore::new());
    let faults = Arc::new(FaultInjectionStore::new(
        Arc::clone(&store) as Arc<dyn PersistentStore>
    ));
    let node = Arc::new(NodeLifecycle::default());
    let queue = JobQueueManager::new(
        Arc::clone(&map),
        Arc::clone(&faults) as Arc<dyn PersistentStore>,
        Arc::clone(&node),
        FailoverConfig::new(),
    );
    Harness {
        map,
        store,
        faults,
        node,
        queue,
    }
}

fn key(name: &str) -> EntityKey {
    EntityKey::new(name)
}

#[tokio::test]
async fn test_insert_commit_transitions_created_to_inserted() {
    let h = harness();

    h.queue.schedule(JobItem::new(
        key("k"),
        "insert replica",
        JobGate::None,
        |handle, _ctx| {
            handle.insert(record(1));
            false
        },
    ));
    h.queue.drain().await;

    let entry = h.map.get_entry(&key("k")).unwrap();
    assert_eq!(entry.lifecycle(), EntityLifecycle::Inserted);
    assert_eq!(entry.snapshot().unwrap().epoch, 1);

    let row = h.map.row_for(&key("k"));
    let stored: ReplicaRecord = rmp_serde::from_slice(&h.store.get(&row).await.unwrap()).unwrap();
    assert_eq!(stored.epoch, 1);
}

#[tokio::test]
async fn test_insert_failure_leaves_entity_created() {
    let h = harness();
    h.faults.fail_next(StoreError::GenericFailure);

    h.queue.schedule(JobItem::new(
        key("k"),
        "insert replica",
        JobGate::None,
        |handle, _ctx| {
            handle.insert(record(1));
            false
        },
    ));
    h.queue.drain().await;

    let entry = h.map.get_entry(&key("k")).unwrap();
    assert_eq!(entry.lifecycle(), EntityLifecycle::Created);
    assert!(entry.snapshot().is_none());
    assert_eq!(h.store.row_count().await, 0);
}

#[tokio::test]
async fn test_update_failure_never_mutates_snapshot() {
    let h = harness();

    h.queue.schedule(JobItem::new(
        key("k"),
        "insert replica",
        JobGate::None,
        |handle, _ctx| {
            handle.insert(record(1));
            false
        },
    ));
    h.queue.drain().await;

    h.faults.fail_next(StoreError::NotPrimary);
    h.queue.schedule(JobItem::new(
        key("k"),
        "update replica",
        JobGate::None,
        |handle, _ctx| {
            handle.update(record(2));
            false
        },
    ));
    h.queue.drain().await;

    let entry = h.map.get_entry(&key("k")).unwrap();
    assert_eq!(entry.lifecycle(), EntityLifecycle::Inserted);
    assert_eq!(entry.snapshot().unwrap().epoch, 1);

    let row = h.map.row_for(&key("k"));
    let stored: ReplicaRecord = rmp_serde::from_slice(&h.store.get(&row).await.unwrap()).unwrap();
    assert_eq!(stored.epoch, 1);
}

#[tokio::test]
async fn test_delete_failure_leaves_entity_inserted() {
    let h = harness();

    h.queue.schedule(JobItem::new(
        key("k"),
        "insert replica",
        JobGate::None,
        |handle, _ctx| {
            handle.insert(record(1));
            false
        },
    ));
    h.queue.drain().await;

    h.faults.fail_next(StoreError::StoreNotUsable);
    h.queue.schedule(JobItem::new(
        key("k"),
        "delete replica",
        JobGate::None,
        |handle, _ctx| {
            handle.delete();
            false
        },
    ));
    h.queue.drain().await;

    let entry = h.map.get_entry(&key("k")).unwrap();
    assert_eq!(entry.lifecycle(), EntityLifecycle::Inserted);
    assert_eq!(entry.snapshot().unwrap().epoch, 1);
    assert_eq!(h.store.row_count().await, 1);
}

#[tokio::test]
async fn test_create_then_delete_never_touches_the_store() {
    let h = harness();
    // Any store traffic would fail loudly.
    h.faults.fail_times(StoreError::GenericFailure, usize::MAX);

    h.queue.schedule(JobItem::new(
        key("k"),
        "insert then discard",
        JobGate::None,
        |handle, _ctx| {
            handle.insert(record(1));
            handle.delete();
            false
        },
    ));
    h.queue.drain().await;

    let entry = h.map.get_entry(&key("k")).unwrap();
    assert_eq!(entry.lifecycle(), EntityLifecycle::Deleted);
    assert_eq!(h.store.row_count().await, 0);
}

#[tokio::test]
async fn test_full_lifecycle_ends_with_inert_entity() {
    let h = harness();
    let k = key("k");

    // Insert: persisted epoch 1, in-memory epoch 2.
    h.queue.schedule(JobItem::new(
        k.clone(),
        "insert replica",
        JobGate::None,
        |handle, _ctx| {
            handle.insert(record(1));
            handle.update_in_memory(record(2));
            false
        },
    ));
    h.queue.drain().await;

    let entry = h.map.get_entry(&k).unwrap();
    assert_eq!(entry.snapshot().unwrap().epoch, 2);
    let row = h.map.row_for(&k);
    let stored: ReplicaRecord = rmp_serde::from_slice(&h.store.get(&row).await.unwrap()).unwrap();
    assert_eq!(stored.epoch, 1);

    // Update: persisted epoch 3, in-memory epoch 4.
    h.queue.schedule(JobItem::new(
        k.clone(),
        "update replica",
        JobGate::None,
        |handle, _ctx| {
            handle.update(record(3));
            handle.update_in_memory(record(4));
            false
        },
    ));
    h.queue.drain().await;

    assert_eq!(entry.snapshot().unwrap().epoch, 4);
    let stored: ReplicaRecord = rmp_serde::from_slice(&h.store.get(&row).await.unwrap()).unwrap();
    assert_eq!(stored.epoch, 3);

    // Delete: store row gone, entity terminal.
    h.queue.schedule(JobItem::new(
        k.clone(),
        "delete replica",
        JobGate::None,
        |handle, _ctx| {
            handle.delete();
            false
        },
    ));
    h.queue.drain().await;

    assert_eq!(entry.lifecycle(), EntityLifecycle::Deleted);
    assert_eq!(h.store.row_count().await, 0);

    // A later job item never reaches its processor.
    let invoked = Arc::new(AtomicBool::new(false));
    let invoked_probe = Arc::clone(&invoked);
    h.queue.schedule(JobItem::new(
        k.clone(),
        "poke deleted replica",
        JobGate::None,
        move |_handle, _ctx| {
            invoked_probe.store(true, Ordering::SeqCst);
            false
        },
    ));
    h.queue.drain().await;
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_lifecycle_gate_skips_processor() {
    let h = harness();
    h.node.begin_close();

    let invoked = Arc::new(AtomicBool::new(false));
    let open_probe = Arc::clone(&invoked);
    h.queue.schedule(JobItem::new(
        key("k"),
        "open-only work",
        JobGate::Open,
        move |_handle, _ctx| {
            open_probe.store(true, Ordering::SeqCst);
            false
        },
    ));
    h.queue.drain().await;
    assert!(!invoked.load(Ordering::SeqCst));

    // OpenOrClosing still admits while closing.
    let closing_probe = Arc::clone(&invoked);
    h.queue.schedule(JobItem::new(
        key("k"),
        "closing work",
        JobGate::OpenOrClosing,
        move |_handle, _ctx| {
            closing_probe.store(true, Ordering::SeqCst);
            false
        },
    ));
    h.queue.drain().await;
    assert!(invoked.load(Ordering::SeqCst));
}

struct RecordingAction {
    label: &'static str,
    performed: Arc<Mutex<Vec<String>>>,
    cancelled: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl StateMachineAction<ReplicaRecord> for RecordingAction {
    fn name(&self) -> &'static str {
        self.label
    }

    async fn perform(&self, ctx: &ActionContext<ReplicaRecord>) {
        let epoch = ctx.snapshot.as_ref().map(|r| r.epoch);
        self.performed
            .lock()
            .unwrap()
            .push(format!("{}:{:?}", self.label, epoch));
    }

    fn cancel(&self, _ctx: &ActionContext<ReplicaRecord>) {
        self.cancelled.lock().unwrap().push(self.label.to_string());
    }
}

#[tokio::test]
async fn test_actions_run_in_order_with_updated_snapshot() {
    let h = harness();
    let performed = Arc::new(Mutex::new(Vec::new()));
    let cancelled = Arc::new(Mutex::new(Vec::new()));

    let (p, c) = (Arc::clone(&performed), Arc::clone(&cancelled));
    h.queue.schedule(JobItem::new(
        key("k"),
        "insert with actions",
        JobGate::None,
        move |handle, ctx| {
            handle.insert(record(7));
            ctx.enqueue_action(Box::new(RecordingAction {
                label: "first",
                performed: Arc::clone(&p),
                cancelled: Arc::clone(&c),
            }));
            ctx.enqueue_action(Box::new(RecordingAction {
                label: "second",
                performed: Arc::clone(&p),
                cancelled: Arc::clone(&c),
            }));
            false
        },
    ));
    h.queue.drain().await;

    // Actions observed the committed snapshot, in enqueue order.
    assert_eq!(
        *performed.lock().unwrap(),
        vec!["first:Some(7)".to_string(), "second:Some(7)".to_string()]
    );
    assert!(cancelled.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_commit_failure_cancels_actions() {
    let h = harness();
    h.faults.fail_next(StoreError::GenericFailure);

    let performed = Arc::new(Mutex::new(Vec::new()));
    let cancelled = Arc::new(Mutex::new(Vec::new()));

    let (p, c) = (Arc::clone(&performed), Arc::clone(&cancelled));
    h.queue.schedule(JobItem::new(
        key("k"),
        "insert with actions",
        JobGate::None,
        move |handle, ctx| {
            handle.insert(record(7));
            ctx.enqueue_action(Box::new(RecordingAction {
                label: "only",
                performed: Arc::clone(&p),
                cancelled: Arc::clone(&c),
            }));
            false
        },
    ));
    h.queue.drain().await;

    assert!(performed.lock().unwrap().is_empty());
    assert_eq!(*cancelled.lock().unwrap(), vec!["only".to_string()]);
}

#[tokio::test]
async fn test_actions_run_when_no_commit_is_needed() {
    let h = harness();
    let performed = Arc::new(Mutex::new(Vec::new()));
    let cancelled = Arc::new(Mutex::new(Vec::new()));

    let (p, c) = (Arc::clone(&performed), Arc::clone(&cancelled));
    h.queue.schedule(JobItem::new(
        key("k"),
        "read-only with action",
        JobGate::None,
        move |_handle, ctx| {
            ctx.enqueue_action(Box::new(RecordingAction {
                label: "side-effect",
                performed: Arc::clone(&p),
                cancelled: Arc::clone(&c),
            }));
            false
        },
    ));
    h.queue.drain().await;

    assert_eq!(performed.lock().unwrap().len(), 1);
    assert!(cancelled.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_touch_signal_forces_update_commit() {
    let h = harness();

    h.queue.schedule(JobItem::new(
        key("k"),
        "insert replica",
        JobGate::None,
        |handle, _ctx| {
            handle.insert(record(1));
            false
        },
    ));
    h.queue.drain().await;

    // The touch reaches the store: an injected failure is consumed by it and
    // rolls the (no-op) update back.
    h.faults.fail_next(StoreError::GenericFailure);
    h.queue.schedule(JobItem::new(
        key("k"),
        "touch replica",
        JobGate::None,
        |_handle, _ctx| true,
    ));
    h.queue.drain().await;

    // Fault was consumed by the touch commit; the next operation succeeds.
    h.queue.schedule(JobItem::new(
        key("k2"),
        "insert second replica",
        JobGate::None,
        |handle, _ctx| {
            handle.insert(record(9));
            false
        },
    ));
    h.queue.drain().await;
    assert_eq!(h.store.row_count().await, 2);
}

struct RecordingFatal {
    messages: Mutex<Vec<String>>,
}

impl FatalHandler for RecordingFatal {
    fn on_fatal(&self, _activity_id: ActivityId, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

#[tokio::test]
async fn test_generic_failure_escalates_only_under_fail_fast_policy() {
    let map = Arc::new(EntityMap::new(ROW_TYPE));
    let store = Arc::new(InMemoryStore::new());
    let faults = Arc::new(FaultInjectionStore::new(
        Arc::clone(&store) as Arc<dyn PersistentStore>
    ));
    let fatal = Arc::new(RecordingFatal {
        messages: Mutex::new(Vec::new()),
    });
    let queue = JobQueueManager::new(
        Arc::clone(&map),
        Arc::clone(&faults) as Arc<dyn PersistentStore>,
        Arc::new(NodeLifecycle::default()),
        FailoverConfig::new(),
    )
    .with_fatal_handler(Arc::clone(&fatal) as Arc<dyn FatalHandler>);

    // GenericFailure with the policy set escalates.
    faults.fail_next(StoreError::GenericFailure);
    queue.schedule(
        JobItem::new(key("k"), "insert replica", JobGate::None, |handle, _ctx| {
            handle.insert(record(1));
            false
        })
        .with_fail_fast_on_commit_failure(true),
    );
    queue.drain().await;
    assert_eq!(fatal.messages.lock().unwrap().len(), 1);

    // NotPrimary indicates expected ownership loss and never escalates.
    faults.fail_next(StoreError::NotPrimary);
    queue.schedule(
        JobItem::new(key("k"), "insert replica", JobGate::None, |handle, _ctx| {
            handle.insert(record(1));
            false
        })
        .with_fail_fast_on_commit_failure(true),
    );
    queue.drain().await;
    assert_eq!(fatal.messages.lock().unwrap().len(), 1);

    // Rollback happened both times.
    assert_eq!(map.get_entry(&key("k")).unwrap().lifecycle(), EntityLifecycle::Created);
}
