//! Process-wide named reader/writer locks over the logical catalog domains.
//!
//! Acquisition order is fixed by the rank of `LockName` (snapshot before
//! space before id before listener before user). `acquire` sorts every
//! request set into rank order before touching any lock, so the ordering is
//! a property of the registry instead of a per-processor convention.

use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Logical catalog domains guarded by the registry. Declaration order is the
/// global acquisition order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockName {
    Snapshot = 0,
    Space,
    Id,
    Listener,
    User,
}

const LOCK_COUNT: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

enum Guard {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

/// Guards held by a processor for the duration of its critical section.
/// Dropping releases every lock.
pub struct LockGuards {
    _guards: Vec<Guard>,
}

/// The fixed set of catalog locks.
pub struct LockRegistry {
    locks: [Arc<RwLock<()>>; LOCK_COUNT],
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            locks: std::array::from_fn(|_| Arc::new(RwLock::new(()))),
        }
    }

    /// Acquire a set of locks in global rank order. Duplicate names collapse
    /// to the strongest requested mode.
    pub async fn acquire(&self, requests: &[(LockName, LockMode)]) -> LockGuards {
        let mut wanted: [Option<LockMode>; LOCK_COUNT] = [None; LOCK_COUNT];
        for (name, mode) in requests {
            let slot = &mut wanted[*name as usize];
            *slot = match (*slot, mode) {
                (Some(LockMode::Write), _) => Some(LockMode::Write),
                (_, LockMode::Write) => Some(LockMode::Write),
                _ => Some(LockMode::Read),
            };
        }

        let mut guards = Vec::new();
        for (rank, mode) in wanted.iter().enumerate() {
            let Some(mode) = mode else {
                continue;
            };
            let lock = self.locks[rank].clone();
            let guard = match mode {
                LockMode::Read => Guard::Read(lock.read_owned().await),
                LockMode::Write => Guard::Write(lock.write_owned().await),
            };
            guards.push(guard);
        }
        LockGuards { _guards: guards }
    }

    pub async fn read(&self, name: LockName) -> OwnedRwLockReadGuard<()> {
        self.locks[name as usize].clone().read_owned().await
    }

    pub async fn write(&self, name: LockName) -> OwnedRwLockWriteGuard<()> {
        self.locks[name as usize].clone().write_owned().await
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
