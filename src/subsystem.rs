//! Process-wide native subsystem initialization, reference counted.
//!
//! The subsystem is initialized when the first lease is taken and torn down
//! when the last lease is dropped, however many bridges come and go in between.

use crate::error::{LockResultExt, NativeResult};
use std::sync::{Arc, Mutex, MutexGuard};

/// Backend-specific initialize/uninitialize pair.
pub trait SubsystemHooks: Send + Sync {
    fn initialize(&self) -> NativeResult<()>;
    fn uninitialize(&self);
}

/// Hooks for backends with nothing to initialize.
pub struct NoSubsystem;

impl SubsystemHooks for NoSubsystem {
    fn initialize(&self) -> NativeResult<()> {
        Ok(())
    }

    fn uninitialize(&self) {}
}

pub struct Subsystem {
    users: Mutex<usize>,
    hooks: Box<dyn SubsystemHooks>,
}

impl Subsystem {
    pub fn new(hooks: impl SubsystemHooks + 'static) -> Arc<Self> {
        Arc::new(Self {
            users: Mutex::new(0),
            hooks: Box::new(hooks),
        })
    }

    /// Take a lease, initializing the subsystem if this is the first one.
    ///
    /// If initialization fails no lease is recorded, so the next caller retries.
    pub fn acquire(self: &Arc<Self>) -> NativeResult<SubsystemLease> {
        let mut users = self.lock_users();
        if *users == 0 {
            self.hooks.initialize()?;
            log::debug!(target: "title_bridge::subsystem", "Native subsystem initialized");
        }
        *users += 1;
        Ok(SubsystemLease {
            subsystem: Arc::clone(self),
        })
    }

    /// Number of outstanding leases
    pub fn users(&self) -> usize {
        *self.lock_users()
    }

    fn release(&self) {
        let mut users = self.lock_users();
        *users = users.saturating_sub(1);
        if *users == 0 {
            self.hooks.uninitialize();
            log::debug!(target: "title_bridge::subsystem", "Native subsystem uninitialized");
        }
    }

    fn lock_users(&self) -> MutexGuard<'_, usize> {
        self.users.lock().recover_poison("subsystem::users")
    }
}

/// Keeps the subsystem initialized while held.
pub struct SubsystemLease {
    subsystem: Arc<Subsystem>,
}

impl Drop for SubsystemLease {
    fn drop(&mut self) {
        self.subsystem.release();
    }
}
