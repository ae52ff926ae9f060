use std::cell::RefCell;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use nix::unistd::Pid;

use crate::error::{Error, Result};
use crate::popen::HandleId;

// Shared by every manager so a handle closed on the wrong manager can never
// match a record there.
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/***
Hand out the next registry token. Tokens are never reused.
 */
pub fn next_handle_id() -> HandleId {
    NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Correlates one spawned child with the parent-side descriptors of its
/// channel handles. The record never owns those descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub id: HandleId,
    pub pid: Pid,
    pub fds: Vec<RawFd>,
    // set once a close has started; the record is then invisible to lookups
    reaping: bool,
}

impl ProcessRecord {
    pub fn new(id: HandleId, pid: Pid, fds: Vec<RawFd>) -> ProcessRecord {
        ProcessRecord { id, pid, fds, reaping: false }
    }

    pub fn is_reaping(&self) -> bool {
        self.reaping
    }
}

/// Ordered collection of live, not-yet-reaped children.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    records: Vec<ProcessRecord>,
}

impl ProcessRegistry {
    pub fn new() -> ProcessRegistry {
        ProcessRegistry::default()
    }

    /***
    Track a freshly forked child. A record still holding the same pid can
    only be stale: that child was reaped behind our back and the kernel has
    handed its pid to this one. The stale record is evicted and returned.
     */
    pub fn insert(&mut self, record: ProcessRecord) -> Option<ProcessRecord> {
        debug_assert!(self.records.iter().all(|r| r.id != record.id), "handle id {} reused", record.id);
        let stale = self.records.iter().position(|r| r.pid == record.pid).map(|index| self.records.remove(index));
        self.records.push(record);
        stale
    }

    pub fn find(&self, id: HandleId) -> Option<&ProcessRecord> {
        self.records.iter().find(|r| r.id == id && !r.reaping)
    }

    /***
    Claim a record for reaping and return its pid.
    Its descriptors are about to be closed, so they drop out of the
    hygiene set right away.
     */
    pub fn begin_reap(&mut self, id: HandleId) -> Result<Pid> {
        match self.records.iter_mut().find(|r| r.id == id && !r.reaping) {
            None => Err(Error::NotTracked { id }),
            Some(record) => {
                record.reaping = true;
                record.fds.clear();
                Ok(record.pid)
            }
        }
    }

    pub fn remove(&mut self, id: HandleId) -> Option<ProcessRecord> {
        let index = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(index))
    }

    /***
    Every descriptor a freshly forked child inherits from earlier spawns.
     */
    pub fn inherited_fds(&self) -> Vec<RawFd> {
        self.records.iter().flat_map(|r| r.fds.iter().copied()).collect()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.records.iter().map(|r| r.pid).collect()
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.find(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/***
How a manager guards its registry.

`Unsynchronized` is `!Sync`, so a manager using it cannot be shared across
threads at all. `Synchronized` takes one lock around every registry read
and write.
 */
pub trait RegistryAccess: Default {
    fn with<T>(&self, f: impl FnOnce(&mut ProcessRegistry) -> T) -> T;
}

#[derive(Debug, Default)]
pub struct Unsynchronized(RefCell<ProcessRegistry>);

#[derive(Debug, Default)]
pub struct Synchronized(Mutex<ProcessRegistry>);

impl RegistryAccess for Unsynchronized {
    fn with<T>(&self, f: impl FnOnce(&mut ProcessRegistry) -> T) -> T {
        f(&mut self.0.borrow_mut())
    }
}

impl RegistryAccess for Synchronized {
    fn with<T>(&self, f: impl FnOnce(&mut ProcessRegistry) -> T) -> T {
        // every mutation is a single Vec operation, so a poisoned registry is still whole
        let mut registry = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn instance() -> ProcessRegistry {
        ProcessRegistry::new()
    }

    fn given_a_registry_with(pids: &[i32]) -> ProcessRegistry {
        let mut registry = instance();
        for pid in pids {
            let id = *pid as HandleId;
            assert!(registry.insert(ProcessRecord::new(id, Pid::from_raw(*pid), vec![pid * 10, pid * 10 + 1])).is_none());
        }
        registry
    }

    #[test]
    fn registry_is_empty_after_creation() {
        let registry = instance();
        assert!(registry.is_empty());
        assert_eq!(registry.inherited_fds(), Vec::<RawFd>::new());
    }

    #[test]
    fn ids_are_never_reused() {
        let first = next_handle_id();
        let second = next_handle_id();
        assert!(second > first);
    }

    #[test]
    fn a_reused_pid_evicts_the_stale_record() {
        let mut registry = given_a_registry_with(&[100, 200]);
        let fresh = 300;
        let stale = registry.insert(ProcessRecord::new(fresh, Pid::from_raw(100), vec![7])).unwrap();

        assert_eq!(stale.id, 100);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(fresh));
        assert!(!registry.contains(100));
        assert_eq!(registry.inherited_fds(), vec![2000, 2001, 7]);
    }

    #[test]
    fn inherited_fds_cover_every_record_in_order() {
        let registry = given_a_registry_with(&[1, 2]);
        assert_eq!(registry.inherited_fds(), vec![10, 11, 20, 21]);
    }

    #[test]
    fn begin_reap_hides_the_record_and_its_fds() {
        let mut registry = given_a_registry_with(&[1, 2]);
        assert_eq!(registry.begin_reap(1).unwrap(), Pid::from_raw(1));
        assert!(!registry.contains(1));
        assert_eq!(registry.inherited_fds(), vec![20, 21]);
        // still occupies its slot until removed
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn begin_reap_twice_is_not_tracked() {
        let mut registry = given_a_registry_with(&[1]);
        registry.begin_reap(1).unwrap();
        assert!(matches!(registry.begin_reap(1), Err(Error::NotTracked { id: 1 })));
    }

    #[test]
    fn unknown_ids_are_not_tracked() {
        let mut registry = given_a_registry_with(&[1]);
        assert!(matches!(registry.begin_reap(99), Err(Error::NotTracked { id: 99 })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_drops_the_record() {
        let mut registry = given_a_registry_with(&[1, 2]);
        let removed = registry.remove(1).unwrap();
        assert_eq!(removed.pid, Pid::from_raw(1));
        assert_eq!(registry.pids(), vec![Pid::from_raw(2)]);
        assert!(registry.remove(1).is_none());
    }

    #[test]
    fn synchronized_registry_survives_concurrent_inserts() {
        let shared = Arc::new(Synchronized::default());
        let workers = (0..4).map(|t| {
            let shared = shared.clone();
            thread::spawn(move || {
                for n in 0..50 {
                    shared.with(|r| {
                        assert!(r.insert(ProcessRecord::new(next_handle_id(), Pid::from_raw(t * 1000 + n + 1), vec![])).is_none());
                    });
                }
            })
        }).collect::<Vec<_>>();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(shared.with(|r| r.len()), 200);
    }
}
