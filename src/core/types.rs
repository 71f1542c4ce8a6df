// ============================================================================
// Core Identifiers and Node Lifecycle
// ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use uuid::Uuid;

/// Opaque, stable identifier for one managed entity (e.g. one partition
/// replica hosted on this node).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntityKey {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

/// Entity-type tag of a persisted row. One per entity map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowType(&'static str);

impl RowType {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External store address: entity type plus persistence key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowIdentifier {
    row_type: RowType,
    key: String,
}

impl RowIdentifier {
    pub fn new(row_type: RowType, key: impl Into<String>) -> Self {
        Self {
            row_type,
            key: key.into(),
        }
    }

    pub fn row_type(&self) -> RowType {
        self.row_type
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for RowIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.row_type, self.key)
    }
}

/// Correlation id threaded through a unit of scheduled work and its traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivityId(Uuid);

impl ActivityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActivityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Phase of the hosting node, consumed by job gating checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodePhase {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

/// Shared handle to the node's lifecycle phase.
///
/// The outer agent drives transitions; this core only reads the phase when
/// admitting job items.
#[derive(Debug)]
pub struct NodeLifecycle {
    phase: AtomicU8,
}

impl NodeLifecycle {
    pub fn new(initial: NodePhase) -> Self {
        Self {
            phase: AtomicU8::new(initial as u8),
        }
    }

    pub fn phase(&self) -> NodePhase {
        match self.phase.load(Ordering::Acquire) {
            0 => NodePhase::Open,
            1 => NodePhase::Closing,
            _ => NodePhase::Closed,
        }
    }

    pub fn open(&self) {
        self.phase.store(NodePhase::Open as u8, Ordering::Release);
    }

    pub fn begin_close(&self) {
        self.phase.store(NodePhase::Closing as u8, Ordering::Release);
    }

    pub fn finish_close(&self) {
        self.phase.store(NodePhase::Closed as u8, Ordering::Release);
    }
}

impl Default for NodeLifecycle {
    fn default() -> Self {
        Self::new(NodePhase::Open)
    }
}

/// Lifecycle predicate a job item declares for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobGate {
    /// No gating: runs in any phase.
    #[default]
    None,
    /// Runs only while the node is open.
    Open,
    /// Runs while the node is open or draining toward close.
    OpenOrClosing,
}

impl JobGate {
    pub fn admits(&self, phase: NodePhase) -> bool {
        match self {
            JobGate::None => true,
            JobGate::Open => phase == NodePhase::Open,
            JobGate::OpenOrClosing => matches!(phase, NodePhase::Open | NodePhase::Closing),
        }
    }
}
