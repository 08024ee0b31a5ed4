//! Account persistence.
//!
//! The lifecycle core only ever lists accounts and adds newly paired ones, so the
//! store seam is the small [`AccountStore`] trait. [`Database`] is the SQLite-backed
//! implementation used by the server.

use crate::error::{Error, Result};
use crate::types::{Account, NewAccount};
use rusqlite::{params, types::Type, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Persistence collaborator for account records.
pub trait AccountStore: Send + Sync {
    /// List all accounts in creation order.
    fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Persist a newly paired account.
    ///
    /// Fails if an account with the same phone number already exists.
    fn add_account(&self, account: &NewAccount) -> Result<Account>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tg_account (
    id           TEXT PRIMARY KEY NOT NULL,
    phone_number TEXT NOT NULL UNIQUE,
    first_name   TEXT NOT NULL,
    last_name    TEXT,
    created_at   INTEGER NOT NULL,
    updated_at   INTEGER
);
";

/// Database connection wrapper.
///
/// Thread-safe via internal Mutex. All database operations acquire the lock.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open database at specific path, creating the schema if needed
    pub fn open_path(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(Error::Database)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        info!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::Database)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Create tables that do not exist yet
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        conn.execute_batch(SCHEMA).map_err(Error::Database)
    }

    /// Check database connectivity
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        conn.execute_batch("SELECT 1").map_err(Error::Database)
    }

    fn map_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
        let id: String = row.get(0)?;
        let id = Uuid::parse_str(&id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
        Ok(Account {
            id,
            phone_number: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl AccountStore for Database {
    fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, phone_number, first_name, last_name, created_at, updated_at
             FROM tg_account
             ORDER BY created_at, rowid",
        )?;
        let accounts = stmt
            .query_map([], Self::map_account)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    fn add_account(&self, account: &NewAccount) -> Result<Account> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let id = Uuid::new_v4();
        let now = chrono::Utc::now().timestamp_millis();

        conn.execute(
            "INSERT INTO tg_account (id, phone_number, first_name, last_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                account.phone_number,
                account.first_name,
                account.last_name,
                now,
            ],
        )?;

        Ok(Account {
            id,
            phone_number: account.phone_number.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            created_at: now,
            updated_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_account(phone: &str, first: &str) -> NewAccount {
        NewAccount {
            phone_number: phone.to_string(),
            first_name: first.to_string(),
            last_name: None,
        }
    }

    #[test]
    fn test_empty_database_lists_nothing() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.list_accounts().unwrap().is_empty());
        assert!(db.ping().is_ok());
    }

    #[test]
    fn test_add_and_list_accounts_in_order() {
        let db = Database::open_in_memory().unwrap();
        let first = db.add_account(&new_account("380501112233", "Alice")).unwrap();
        let second = db.add_account(&new_account("380501112244", "Bob")).unwrap();

        let accounts = db.list_accounts().unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].id, first.id);
        assert_eq!(accounts[1].id, second.id);
        assert_eq!(accounts[1].first_name, "Bob");
    }

    #[test]
    fn test_duplicate_phone_number_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.add_account(&new_account("380501112233", "Alice")).unwrap();

        let result = db.add_account(&new_account("380501112233", "Alice again"));
        assert!(matches!(result, Err(Error::Database(_))));
        assert_eq!(db.list_accounts().unwrap().len(), 1);
    }

    #[test]
    fn test_open_path_persists_between_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tgm.db");

        {
            let db = Database::open_path(&path).unwrap();
            db.add_account(&NewAccount {
                phone_number: "15550001111".to_string(),
                first_name: "Carol".to_string(),
                last_name: Some("Smith".to_string()),
            })
            .unwrap();
        }

        let db = Database::open_path(&path).unwrap();
        let accounts = db.list_accounts().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].last_name.as_deref(), Some("Smith"));
    }
}
