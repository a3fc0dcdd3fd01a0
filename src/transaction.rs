//! Atomic execution of caller-supplied operations against the single
//! database handle.
//!
//! Every unit of work runs inside one native SQLite transaction. When an
//! operation calls back into the manager while a transaction is already open
//! on the handle, the inner unit runs inside a savepoint instead, so an inner
//! failure only undoes the inner work and the outer unit still decides its
//! own outcome.

use crate::connection::{ConnectionOptions, DatabaseLocation};
use crate::error::TransactionError;
use parking_lot::ReentrantMutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::cell::{Cell, Ref, RefCell};
use tracing::{debug, warn};

/// Declarative intent for one atomic unit of work.
///
/// `read_only` wins over the locking flags; `exclusive` wins over `immediate`.
/// With no flag set the engine default (deferred) applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    pub read_only: bool,
    pub immediate: bool,
    pub exclusive: bool,
}

impl TransactionOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::default()
        }
    }

    pub fn exclusive() -> Self {
        Self {
            exclusive: true,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> TransactionMode {
        if self.read_only {
            TransactionMode::ReadOnly
        } else if self.exclusive {
            TransactionMode::Exclusive
        } else if self.immediate {
            TransactionMode::Immediate
        } else {
            TransactionMode::Deferred
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    Deferred,
    Immediate,
    Exclusive,
}

impl TransactionMode {
    fn behavior(self) -> TransactionBehavior {
        match self {
            TransactionMode::ReadOnly | TransactionMode::Deferred => TransactionBehavior::Deferred,
            TransactionMode::Immediate => TransactionBehavior::Immediate,
            TransactionMode::Exclusive => TransactionBehavior::Exclusive,
        }
    }
}

/// One operation of a batch; all of a batch's operations share a transaction.
pub type BatchOperation<'a, T, E> = Box<dyn FnOnce(&Connection) -> Result<T, E> + 'a>;

struct Handle {
    conn: RefCell<Option<Connection>>,
    next_savepoint: Cell<u64>,
}

pub struct TransactionManager {
    options: Option<ConnectionOptions>,
    handle: ReentrantMutex<Handle>,
}

impl TransactionManager {
    /// Create a manager that opens its handle on first use.
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            options: Some(options),
            handle: ReentrantMutex::new(Handle {
                conn: RefCell::new(None),
                next_savepoint: Cell::new(0),
            }),
        }
    }

    /// Wrap a handle that is already open. Once closed it cannot be reopened.
    pub fn with_connection(conn: Connection) -> Self {
        Self {
            options: None,
            handle: ReentrantMutex::new(Handle {
                conn: RefCell::new(Some(conn)),
                next_savepoint: Cell::new(0),
            }),
        }
    }

    pub fn location(&self) -> Option<&DatabaseLocation> {
        self.options.as_ref().map(|o| &o.location)
    }

    pub fn is_open(&self) -> bool {
        let guard = self.handle.lock();
        guard.conn.borrow().is_some()
    }

    /// Drop the handle. A manager built from `ConnectionOptions` reopens lazily
    /// on its next call.
    pub fn close(&self) {
        let guard = self.handle.lock();
        match guard.conn.try_borrow_mut() {
            Ok(mut slot) => {
                if slot.take().is_some() {
                    debug!("Closed database handle");
                }
            }
            Err(_) => warn!("Ignoring close() issued from inside an active transaction"),
        };
    }

    fn acquire<'h>(&self, handle: &'h Handle) -> Result<Ref<'h, Connection>, TransactionError> {
        if handle.conn.borrow().is_none() {
            let options = self.options.as_ref().ok_or(TransactionError::Closed)?;
            let conn = options.open()?;
            *handle.conn.borrow_mut() = Some(conn);
        }

        Ref::filter_map(handle.conn.borrow(), |c| c.as_ref()).map_err(|_| TransactionError::Closed)
    }

    /// Run `operation` inside one transaction (or a savepoint when nested).
    ///
    /// The operation's own error is returned exactly as produced, after the
    /// work has been rolled back. Only failures of the transaction machinery
    /// are converted through `From<TransactionError>`.
    pub fn execute_transaction<T, E, F>(
        &self,
        options: TransactionOptions,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<TransactionError>,
    {
        let guard = self.handle.lock();
        let handle = self.acquire(&guard)?;
        let conn: &Connection = &handle;

        let savepoint = if conn.is_autocommit() {
            None
        } else {
            let seq = guard.next_savepoint.get();
            guard.next_savepoint.set(seq + 1);
            Some(format!("sp_{seq}"))
        };

        let active = ActiveTransaction::begin(conn, options.mode(), savepoint)?;

        match operation(conn) {
            Ok(value) => {
                active.commit()?;
                Ok(value)
            }
            Err(e) => {
                active.rollback();
                Err(e)
            }
        }
    }

    /// Run every operation in order inside a single transaction. The first
    /// failure rolls back the whole batch and is returned as is.
    pub fn execute_batch_transaction<'a, T, E>(
        &self,
        operations: Vec<BatchOperation<'a, T, E>>,
        options: TransactionOptions,
    ) -> Result<Vec<T>, E>
    where
        E: From<TransactionError>,
    {
        self.execute_transaction(options, move |conn| {
            let mut results = Vec::with_capacity(operations.len());
            for operation in operations {
                results.push(operation(conn)?);
            }
            Ok(results)
        })
    }

    pub fn execute_read_only_transaction<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<TransactionError>,
    {
        self.execute_transaction(TransactionOptions::read_only(), operation)
    }

    pub fn execute_immediate_transaction<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<TransactionError>,
    {
        self.execute_transaction(TransactionOptions::immediate(), operation)
    }

    pub fn execute_exclusive_transaction<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<TransactionError>,
    {
        self.execute_transaction(TransactionOptions::exclusive(), operation)
    }
}

enum Scope<'c> {
    /// Top level; rusqlite's guard rolls back if it is dropped unfinished.
    Transaction(Transaction<'c>),
    /// Nested. The handle is only shared-borrowed at this point and
    /// rusqlite's `Savepoint` needs `&mut Connection`, so the savepoint is
    /// driven with plain SQL.
    Savepoint(String),
}

/// An open transaction or savepoint, plus the `query_only` value to restore.
/// Rolled back on drop unless committed, which covers operations that panic.
struct ActiveTransaction<'c> {
    conn: &'c Connection,
    scope: Option<Scope<'c>>,
    restore_query_only: Option<bool>,
}

impl<'c> ActiveTransaction<'c> {
    fn begin(
        conn: &'c Connection,
        mode: TransactionMode,
        savepoint: Option<String>,
    ) -> Result<Self, TransactionError> {
        let restore_query_only = if mode == TransactionMode::ReadOnly {
            let previous: bool = conn.query_row("PRAGMA query_only", [], |row| row.get(0))?;
            set_query_only(conn, true)?;
            Some(previous)
        } else {
            None
        };

        let scope = match savepoint {
            None => Transaction::new_unchecked(conn, mode.behavior()).map(Scope::Transaction),
            Some(name) => {
                if matches!(mode, TransactionMode::Immediate | TransactionMode::Exclusive) {
                    debug!("Nested {:?} request runs under the outer transaction's lock", mode);
                }
                conn.execute_batch(&format!("SAVEPOINT {name}"))
                    .map(|()| Scope::Savepoint(name))
            }
        };

        match scope {
            Ok(scope) => Ok(Self {
                conn,
                scope: Some(scope),
                restore_query_only,
            }),
            Err(e) => {
                if let Some(previous) = restore_query_only {
                    let _ = set_query_only(conn, previous);
                }
                Err(e.into())
            }
        }
    }

    fn commit(mut self) -> Result<(), TransactionError> {
        let result = match self.scope.take() {
            // A failed COMMIT drops the guard, which rolls back.
            Some(Scope::Transaction(tx)) => tx.commit(),
            Some(Scope::Savepoint(name)) => {
                let released = self.conn.execute_batch(&format!("RELEASE SAVEPOINT {name}"));
                if released.is_err() {
                    rollback_savepoint(self.conn, &name);
                }
                released
            }
            None => Ok(()),
        };

        if let Err(e) = &result {
            warn!("Commit failed, rolled back: {}", e);
        }
        result.map_err(TransactionError::from)
    }

    fn rollback(mut self) {
        self.abandon();
    }

    fn abandon(&mut self) {
        match self.scope.take() {
            // finish() skips the ROLLBACK when the engine already ended the
            // transaction on its own (e.g. after SQLITE_FULL).
            Some(Scope::Transaction(tx)) => {
                if let Err(e) = tx.finish() {
                    warn!("Rollback failed: {}", e);
                }
            }
            Some(Scope::Savepoint(name)) => rollback_savepoint(self.conn, &name),
            None => {}
        }
    }
}

impl Drop for ActiveTransaction<'_> {
    fn drop(&mut self) {
        if self.scope.is_some() {
            warn!("Transaction abandoned without commit, rolling back");
            self.abandon();
        }
        if let Some(previous) = self.restore_query_only.take() {
            if let Err(e) = set_query_only(self.conn, previous) {
                warn!("Failed to restore query_only: {}", e);
            }
        }
    }
}

fn rollback_savepoint(conn: &Connection, name: &str) {
    let sql = format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}");
    if let Err(e) = conn.execute_batch(&sql) {
        warn!("Rollback of savepoint {} failed: {}", name, e);
    }
}

fn set_query_only(conn: &Connection, on: bool) -> rusqlite::Result<()> {
    conn.execute_batch(if on { "PRAGMA query_only = ON" } else { "PRAGMA query_only = OFF" })
}
