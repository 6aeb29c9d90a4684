//! Shared/exclusive table locks with FIFO waiters and deadlock
//! detection.
//!
//! The lock table is the only process-wide mutable structure: a single
//! mutex guards it, and each resource carries its own condition
//! variable for waiter wakeup. A request that cannot be granted
//! immediately enqueues; strict FIFO ordering means a request is only
//! granted at the head of its queue, so compatible requests queued
//! behind an incompatible one do not starve it.
//!
//! Cycles in the wait-for graph are detected at acquisition time: the
//! enqueue that closes a cycle is the later-arriving member, and that
//! transaction is the one aborted.

use crate::error::ConcurrencyError;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

pub type TxId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct Waiter {
    tx: TxId,
    mode: LockMode,
    /// Set when the transaction already holds the shared lock and is
    /// queueing for exclusive.
    upgrade: bool,
}

#[derive(Default)]
struct Resource {
    holders: HashMap<TxId, LockMode>,
    queue: VecDeque<Waiter>,
    condvar: Arc<Condvar>,
}

#[derive(Default)]
struct LockTable {
    resources: HashMap<String, Resource>,
    cancelled: HashSet<TxId>,
}

#[derive(Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager::default()
    }

    /// Blocks until `tx` holds `resource` in (at least) `mode`.
    ///
    /// Re-acquisition is idempotent; a shared holder requesting exclusive
    /// enqueues an upgrade and drops its shared hold when granted. Errors
    /// mean the transaction must abort: it was chosen as a deadlock victim
    /// or its wait was cancelled.
    pub fn acquire(&self, tx: TxId, resource: &str, mode: LockMode) -> Result<(), ConcurrencyError> {
        let mut table = self.table.lock();

        let res = table.resources.entry(resource.to_owned()).or_default();
        match res.holders.get(&tx) {
            Some(LockMode::Exclusive) => return Ok(()),
            Some(LockMode::Shared) if mode == LockMode::Shared => return Ok(()),
            held => {
                let upgrade = held == Some(&LockMode::Shared);
                if upgrade && res.queue.iter().any(|w| w.upgrade) {
                    // Two shared holders upgrading on the same resource wait
                    // on each other forever; the later one loses.
                    log::warn!("tx {tx} deadlocked upgrading lock on `{resource}`");
                    return Err(ConcurrencyError::Deadlock(tx));
                }
                res.queue.push_back(Waiter { tx, mode, upgrade });
            }
        }
        let condvar = res.condvar.clone();

        // A cycle can only be closed by the enqueue that just happened,
        // so one check at acquisition time suffices and always names the
        // later-arriving member as the victim.
        if in_cycle(&table, tx) {
            remove_waiter(&mut table, resource, tx);
            log::warn!("tx {tx} deadlocked waiting for lock on `{resource}`");
            return Err(ConcurrencyError::Deadlock(tx));
        }

        loop {
            if table.cancelled.remove(&tx) {
                remove_waiter(&mut table, resource, tx);
                log::debug!("tx {tx} lock wait on `{resource}` cancelled");
                return Err(ConcurrencyError::Cancelled(tx));
            }
            if try_grant(&mut table, resource, tx) {
                log::debug!("tx {tx} acquired {mode:?} lock on `{resource}`");
                return Ok(());
            }
            condvar.wait(&mut table);
        }
    }

    /// Releases every lock and queued request of `tx`, waking the
    /// affected waiters.
    pub fn release_all(&self, tx: TxId) {
        let mut table = self.table.lock();
        table.cancelled.remove(&tx);
        table.resources.retain(|_, res| {
            let held = res.holders.remove(&tx).is_some();
            let queued = res.queue.iter().any(|w| w.tx == tx);
            if queued {
                res.queue.retain(|w| w.tx != tx);
            }
            if held || queued {
                res.condvar.notify_all();
            }
            !res.holders.is_empty() || !res.queue.is_empty()
        });
    }

    /// Cancels any in-flight or future lock wait of `tx`.
    pub fn cancel(&self, tx: TxId) {
        let mut table = self.table.lock();
        table.cancelled.insert(tx);
        for res in table.resources.values() {
            if res.queue.iter().any(|w| w.tx == tx) {
                res.condvar.notify_all();
            }
        }
    }

    /// Lock modes currently held by `tx`, for tests and introspection.
    pub fn held(&self, tx: TxId, resource: &str) -> Option<LockMode> {
        let table = self.table.lock();
        table.resources.get(resource)?.holders.get(&tx).copied()
    }
}

/// Grants `tx`'s queued request on `resource` if it is at the head of
/// the queue and compatible with the current holders.
fn try_grant(table: &mut LockTable, resource: &str, tx: TxId) -> bool {
    let Some(res) = table.resources.get_mut(resource) else {
        return false;
    };
    let Some(head) = res.queue.front() else {
        return false;
    };
    if head.tx != tx {
        return false;
    }
    let compatible = match head.mode {
        LockMode::Shared => !res.holders.values().any(|&m| m == LockMode::Exclusive),
        // An upgrade is granted once the requester is the only holder left.
        LockMode::Exclusive => res.holders.keys().all(|&h| h == tx),
    };
    if !compatible {
        return false;
    }
    let waiter = res.queue.pop_front().expect("head exists");
    res.holders.insert(waiter.tx, waiter.mode);
    // The next queued request may now be grantable too.
    res.condvar.notify_all();
    true
}

fn remove_waiter(table: &mut LockTable, resource: &str, tx: TxId) {
    if let Some(res) = table.resources.get_mut(resource) {
        res.queue.retain(|w| w.tx != tx);
        res.condvar.notify_all();
    }
}

/// Walks the wait-for graph looking for a cycle through `tx`.
///
/// A waiter waits for every holder of its resource and for every
/// earlier waiter in the same queue (FIFO).
fn in_cycle(table: &LockTable, tx: TxId) -> bool {
    let mut edges: HashMap<TxId, HashSet<TxId>> = HashMap::new();
    for res in table.resources.values() {
        for (pos, waiter) in res.queue.iter().enumerate() {
            let entry = edges.entry(waiter.tx).or_default();
            entry.extend(res.holders.keys().copied().filter(|&h| h != waiter.tx));
            entry.extend(
                res.queue
                    .iter()
                    .take(pos)
                    .map(|w| w.tx)
                    .filter(|&w| w != waiter.tx),
            );
        }
    }
    let mut stack: Vec<TxId> = edges.get(&tx).map(|s| s.iter().copied().collect()).unwrap_or_default();
    let mut seen = HashSet::new();
    while let Some(next) = stack.pop() {
        if next == tx {
            return true;
        }
        if !seen.insert(next) {
            continue;
        }
        if let Some(out) = edges.get(&next) {
            stack.extend(out.iter().copied());
        }
    }
    false
}
