use crate::engine::connection::Connection;
use crate::error::{OdbcError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::ReadUncommitted),
            1 => Some(Self::ReadCommitted),
            2 => Some(Self::RepeatableRead),
            3 => Some(Self::Serializable),
            _ => None,
        }
    }

    /// `SQL_TXN_*` bitmask value for the connection attribute.
    pub(crate) fn mask(self) -> u32 {
        match self {
            Self::ReadUncommitted => 1,
            Self::ReadCommitted => 2,
            Self::RepeatableRead => 4,
            Self::Serializable => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// Scope guard for a manually-committed transaction.
///
/// Autocommit is switched off on begin and restored after commit or
/// rollback. A guard dropped while still active rolls back and logs a
/// warning.
pub struct Transaction<'c> {
    conn: &'c Connection,
    state: TransactionState,
}

impl<'c> Transaction<'c> {
    fn begin(conn: &'c Connection, isolation: Option<IsolationLevel>) -> Result<Self> {
        if let Some(level) = isolation {
            conn.set_isolation_level(level)?;
        }
        conn.set_autocommit(false)?;
        Ok(Self {
            conn,
            state: TransactionState::Active,
        })
    }

    pub fn connection(&self) -> &Connection {
        self.conn
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn finish(&mut self, commit: bool) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(OdbcError::ValidationError(format!(
                "cannot {} a transaction in state {:?}",
                if commit { "commit" } else { "roll back" },
                self.state
            )));
        }
        let result = if commit {
            self.conn.commit()
        } else {
            self.conn.rollback()
        };
        result?;
        self.conn.set_autocommit(true)?;
        self.state = if commit {
            TransactionState::Committed
        } else {
            TransactionState::RolledBack
        };
        Ok(())
    }

    pub fn commit(mut self) -> Result<()> {
        self.finish(true)
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finish(false)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            log::warn!("transaction dropped while active; rolling back");
            if let Err(err) = self.finish(false) {
                log::warn!("rollback on drop failed: {err}");
            }
        }
    }
}

impl Connection {
    /// Begin a manually-committed transaction, optionally raising the
    /// isolation level first.
    pub fn begin_transaction(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> Result<Transaction<'_>> {
        Transaction::begin(self, isolation)
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    pub fn with_transaction<F, T>(&self, isolation: Option<IsolationLevel>, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let txn = self.begin_transaction(isolation)?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rb_err) = txn.rollback() {
                    log::warn!("rollback after failed transaction body failed: {rb_err}");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_from_u32() {
        assert_eq!(
            IsolationLevel::from_u32(0),
            Some(IsolationLevel::ReadUncommitted)
        );
        assert_eq!(
            IsolationLevel::from_u32(3),
            Some(IsolationLevel::Serializable)
        );
        assert_eq!(IsolationLevel::from_u32(4), None);
    }

    #[test]
    fn test_isolation_level_masks_are_odbc_bits() {
        assert_eq!(IsolationLevel::ReadUncommitted.mask(), 1);
        assert_eq!(IsolationLevel::ReadCommitted.mask(), 2);
        assert_eq!(IsolationLevel::RepeatableRead.mask(), 4);
        assert_eq!(IsolationLevel::Serializable.mask(), 8);
    }

    #[test]
    fn test_begin_transaction_requires_connection() {
        let conn = Connection::new();
        assert!(conn.begin_transaction(None).is_err());
    }

    #[test]
    fn test_with_transaction_requires_connection() {
        let conn = Connection::new();
        let result = conn.with_transaction(None, |_| Ok(42));
        assert!(result.is_err());
    }
}
