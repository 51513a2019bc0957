use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use super::error::SyncError;

/// Operations that need exclusive use of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Operation {
    Update = 1,
    Defragment = 2,
    Purge = 3,
    StructuralEdit = 4,
}

impl Operation {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Operation::Update),
            2 => Some(Operation::Defragment),
            3 => Some(Operation::Purge),
            4 => Some(Operation::StructuralEdit),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Update => "update",
            Operation::Defragment => "defragment",
            Operation::Purge => "purge",
            Operation::StructuralEdit => "structural edit",
        })
    }
}

const IDLE: u8 = 0;

/// The engine-wide busy flag. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct OperationLock {
    state: Arc<AtomicU8>,
}

impl OperationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the lock for `op`, or report what holds it.
    ///
    /// Never waits: a held lock is an immediate `Busy`.
    pub fn try_acquire(&self, op: Operation) -> Result<OperationGuard, SyncError> {
        match self
            .state
            .compare_exchange(IDLE, op as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                tracing::trace!(operation = %op, "Operation lock acquired");
                Ok(OperationGuard {
                    state: Arc::clone(&self.state),
                    op,
                })
            }
            Err(current) => {
                // Released between the exchange and the load: report as update
                let active = Operation::from_u8(current).unwrap_or(Operation::Update);
                tracing::debug!(requested = %op, active = %active, "Engine busy");
                Err(SyncError::Busy { active })
            }
        }
    }

    /// The operation currently holding the lock.
    pub fn active(&self) -> Option<Operation> {
        Operation::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Holds the engine lock; releases it when dropped, including on panic
/// unwinding and task abort.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct OperationGuard {
    state: Arc<AtomicU8>,
    op: Operation,
}

impl OperationGuard {
    pub fn operation(&self) -> Operation {
        self.op
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.state.store(IDLE, Ordering::Release);
        tracing::trace!(operation = %self.op, "Operation lock released");
    }
}
