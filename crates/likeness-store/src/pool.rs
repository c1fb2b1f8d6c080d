//! Fixed-size pool of SQLite connections.

use crate::schema;
use crate::store::StoreError;
use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_POOL_SIZE: usize = 5;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A bounded set of open connections to one database file.
///
/// [`get`](Self::get) blocks while every connection is checked out. A
/// checked-out connection returns to the pool when its guard drops, on every
/// exit path.
pub struct ConnectionPool {
    idle: Mutex<Vec<Connection>>,
    returned: Condvar,
    size: usize,
}

impl ConnectionPool {
    /// Open `size` connections to `path`, creating the schema if needed.
    pub fn open(path: &Path, size: usize) -> Result<Self, StoreError> {
        if size == 0 {
            return Err(StoreError::Config("connection pool size must be positive".into()));
        }

        let mut connections = Vec::with_capacity(size);
        for i in 0..size {
            let mut conn = open_connection(path)?;
            if i == 0 {
                schema::apply(&mut conn)?;
            }
            connections.push(conn);
        }

        tracing::debug!(path = %path.display(), size, "connection pool opened");

        Ok(Self {
            idle: Mutex::new(connections),
            returned: Condvar::new(),
            size,
        })
    }

    /// Check out a connection, waiting for one to be returned if necessary.
    pub fn get(&self) -> PooledConnection<'_> {
        let mut idle = self.idle.lock();
        loop {
            if let Some(conn) = idle.pop() {
                return PooledConnection {
                    pool: self,
                    conn: Some(conn),
                };
            }
            tracing::trace!(size = self.size, "waiting for a pooled connection");
            self.returned.wait(&mut idle);
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections currently not checked out.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn put_back(&self, conn: Connection) {
        self.idle.lock().push(conn);
        self.returned.notify_one();
    }
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::trace!(path = %path.display(), journal_mode = %mode, "connection opened");
    Ok(conn)
}

/// A connection on loan from a [`ConnectionPool`].
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("pooled connection present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("pooled connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_zero_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ConnectionPool::open(&dir.path().join("db.sqlite"), 0),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_checkout_and_return() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(&dir.path().join("db.sqlite"), 3).unwrap();
        assert_eq!(pool.idle_count(), 3);
        {
            let a = pool.get();
            let _b = pool.get();
            assert_eq!(pool.idle_count(), 1);
            let one: i64 = a.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
            assert_eq!(one, 1);
        }
        assert_eq!(pool.idle_count(), 3);
    }

    #[test]
    fn test_returned_on_error_path() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(&dir.path().join("db.sqlite"), 2).unwrap();
        for _ in 0..5 {
            let conn = pool.get();
            assert!(conn.execute("INSERT INTO no_such_table VALUES (1)", []).is_err());
        }
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_get_blocks_until_returned() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(&dir.path().join("db.sqlite"), 1).unwrap();
        let acquired = AtomicBool::new(false);

        let held = pool.get();
        std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                let _conn = pool.get();
                acquired.store(true, Ordering::SeqCst);
            });
            std::thread::sleep(Duration::from_millis(50));
            assert!(!acquired.load(Ordering::SeqCst), "pool handed out more than its size");
            drop(held);
            waiter.join().unwrap();
        });
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(pool.idle_count(), 1);
    }
}
