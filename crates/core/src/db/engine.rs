//! The execution engine.
//!
//! Requests arrive on a single intake channel; each one is dispatched
//! to its own worker thread, which runs the batch as one transaction:
//! fresh id, lock acquisition and shadow materialization on first
//! touch, sequential operation execution, then an atomic commit (or a
//! rollback on the first error or an explicit ROLLBACK).

use crate::db::locks::LockManager;
use crate::db::ops::{self, OpResult, Operation, TxContext};
use crate::db::paths::DbPath;
use crate::error::DBError;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// How a batch asked to finish: explicit `ROLLBACK` discards the
/// transaction even if every operation succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxFinish {
    Commit,
    Rollback,
}

/// Ordered per-operation outcomes; execution stops at the first error.
pub type Response = Vec<Result<OpResult, DBError>>;

struct Request {
    ops: Vec<Operation>,
    finish: TxFinish,
    reply: Sender<Response>,
}

struct EngineShared {
    db: DbPath,
    locks: LockManager,
    next_txid: AtomicU64,
}

/// Handle to a running engine. Cloning shares the same intake channel.
#[derive(Clone)]
pub struct Engine {
    intake: Sender<Request>,
    shared: Arc<EngineShared>,
}

impl Engine {
    /// Opens (or creates) the database directory and starts the
    /// dispatcher. Stale shadow directories from a previous process are
    /// discarded: their transactions never committed.
    pub fn start(db: DbPath) -> Result<Engine, DBError> {
        fs::create_dir_all(db.tables_dir())?;
        let shadow = db.shadow_dir();
        if shadow.exists() {
            for entry in fs::read_dir(&shadow)? {
                let path = entry?.path();
                log::warn!("discarding stale shadow dir {}", path.display());
                fs::remove_dir_all(path)?;
            }
        }
        fs::create_dir_all(&shadow)?;

        let shared = Arc::new(EngineShared {
            db,
            locks: LockManager::new(),
            next_txid: AtomicU64::new(1),
        });
        let (intake, rx) = unbounded::<Request>();
        let dispatcher = Arc::clone(&shared);
        thread::Builder::new()
            .name("liminaldb-engine".into())
            .spawn(move || dispatch(dispatcher, rx))?;

        log::info!("engine started at {}", shared.db.root().display());
        Ok(Engine { intake, shared })
    }

    pub fn db(&self) -> &DbPath {
        &self.shared.db
    }

    /// Submits a batch and returns the channel the reply will arrive on.
    pub fn submit(&self, ops: Vec<Operation>, finish: TxFinish) -> Receiver<Response> {
        let (reply, rx) = bounded(1);
        let request = Request { ops, finish, reply };
        if self.intake.send(request).is_err() {
            log::error!("engine intake channel closed");
        }
        rx
    }

    /// Submits a batch and blocks for the reply.
    pub fn exec(&self, ops: Vec<Operation>, finish: TxFinish) -> Result<Response, DBError> {
        self.submit(ops, finish)
            .recv()
            .map_err(|_| DBError::ReplyChannelClosed)
    }
}

fn dispatch(shared: Arc<EngineShared>, rx: Receiver<Request>) {
    for request in rx {
        let shared = Arc::clone(&shared);
        let txid = shared.next_txid.fetch_add(1, Ordering::Relaxed);
        let spawned = thread::Builder::new()
            .name(format!("liminaldb-tx-{txid}"))
            .spawn(move || run_transaction(&shared, txid, request));
        if let Err(e) = spawned {
            log::error!("failed to spawn transaction worker: {e}");
        }
    }
}

fn run_transaction(shared: &EngineShared, txid: u64, request: Request) {
    let mut ctx = TxContext::new(txid, &shared.db, &shared.locks);
    let mut results: Response = Vec::with_capacity(request.ops.len());
    let mut failed = false;

    log::debug!("tx {txid} started with {} op(s)", request.ops.len());
    for op in &request.ops {
        match ops::execute(&mut ctx, op) {
            Ok(result) => results.push(Ok(result)),
            Err(e) => {
                log::warn!("tx {txid} aborted: {e}");
                results.push(Err(e));
                failed = true;
                break;
            }
        }
    }

    let shadow = ctx.shadow;
    if failed || request.finish == TxFinish::Rollback {
        shadow.rollback();
    } else if let Err(e) = shadow.commit(&shared.db) {
        log::error!("tx {txid} failed to commit: {e}");
        results.push(Err(e));
    }
    shared.locks.release_all(txid);

    // A dropped receiver just means the client went away.
    let _ = request.reply.send(results);
}
