//! Autocommit mode and transaction boundary tracking for one connection

use crate::wire::EnvChange;

pub(crate) const BEGIN_TRANSACTION: &str = "BEGIN TRANSACTION";
pub(crate) const COMMIT_TRANSACTION: &str = "COMMIT TRANSACTION";
pub(crate) const ROLLBACK_TRANSACTION: &str = "ROLLBACK TRANSACTION";

/// How `end_transaction` finishes the open transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Completion {
    Commit,
    Rollback,
}

impl Completion {
    pub(crate) fn statement(self) -> &'static str {
        match self {
            Completion::Commit => COMMIT_TRANSACTION,
            Completion::Rollback => ROLLBACK_TRANSACTION,
        }
    }
}

/// Client-side view of the connection's transaction state.
///
/// With autocommit off, the first statement after a boundary opens a
/// transaction explicitly. Backend environment changes keep the view in sync
/// when the caller begins or ends transactions in SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionController {
    autocommit: bool,
    in_transaction: bool,
}

impl TransactionController {
    pub fn new(autocommit: bool) -> Self {
        Self {
            autocommit,
            in_transaction: false,
        }
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// A `BEGIN TRANSACTION` must precede the next statement
    pub fn needs_begin(&self) -> bool {
        !self.autocommit && !self.in_transaction
    }

    /// Switch the mode; returns whether the open transaction must be committed
    pub fn set_autocommit(&mut self, on: bool) -> bool {
        let commit_open = on && !self.autocommit && self.in_transaction;
        self.autocommit = on;
        commit_open
    }

    pub fn apply(&mut self, change: EnvChange) {
        let open = matches!(change, EnvChange::BeginTransaction);
        if open != self.in_transaction {
            tracing::debug!(?change, "transaction state changed");
        }
        self.in_transaction = open;
    }

    pub(crate) fn begun(&mut self) {
        self.in_transaction = true;
    }

    pub(crate) fn ended(&mut self) {
        self.in_transaction = false;
    }
}
