//! `SQLite`-backed check list.
//!
//! Four tables: `to_check` (one row per tracked app, identity-unique),
//! `chains_to_check` / `certs_to_check` (certificate chains, cascading off
//! their app), and `ocsp_urls` (responder cache, newest date wins). WAL
//! journaling keeps the single-writer daemon restart-safe.

use std::path::Path;
use std::sync::{Arc, Mutex};

use certwatch_core::app::{App, Chain, Verified};
use certwatch_core::store::{AppStore, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS to_check (
    check_id INTEGER PRIMARY KEY AUTOINCREMENT,
    app_id   TEXT NOT NULL,
    pkg_id   TEXT NOT NULL,
    uid      INTEGER NOT NULL,
    verified INTEGER NOT NULL,
    UNIQUE (app_id, pkg_id, uid)
);
CREATE TABLE IF NOT EXISTS chains_to_check (
    chain_id INTEGER PRIMARY KEY AUTOINCREMENT,
    check_id INTEGER NOT NULL REFERENCES to_check(check_id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS certs_to_check (
    chain_id    INTEGER NOT NULL REFERENCES chains_to_check(chain_id) ON DELETE CASCADE,
    certificate TEXT NOT NULL,
    cert_order  INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS ocsp_urls (
    issuer TEXT PRIMARY KEY,
    url    TEXT NOT NULL,
    date   INTEGER NOT NULL
);
";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (and if needed create) the check-list database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the file cannot be opened
    /// or the schema cannot be installed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Self::with_connection(conn)
    }

    /// In-memory database, for tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the database cannot be set
    /// up.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    fn check_id_of(conn: &Connection, app: &App) -> Result<Option<i64>, StoreError> {
        conn.query_row(
            "SELECT check_id FROM to_check WHERE app_id = ?1 AND pkg_id = ?2 AND uid = ?3",
            params![app.app_id, app.pkg_id, app.uid],
            |row| row.get(0),
        )
        .optional()
        .map_err(query_err)
    }
}

fn query_err(err: rusqlite::Error) -> StoreError {
    StoreError::Query(err.to_string())
}

impl AppStore for SqliteStore {
    fn insert(&self, app: &App) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(query_err)?;

        if Self::check_id_of(&tx, app)?.is_some() {
            // Existing row (and its verified state) wins.
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO to_check (app_id, pkg_id, uid, verified) VALUES (?1, ?2, ?3, ?4)",
            params![app.app_id, app.pkg_id, app.uid, app.verified.as_i64()],
        )
        .map_err(query_err)?;
        let check_id = tx.last_insert_rowid();

        for chain in &app.signatures {
            tx.execute(
                "INSERT INTO chains_to_check (check_id) VALUES (?1)",
                params![check_id],
            )
            .map_err(query_err)?;
            let chain_id = tx.last_insert_rowid();
            for (order, certificate) in chain.iter().enumerate() {
                tx.execute(
                    "INSERT INTO certs_to_check (chain_id, certificate, cert_order)
                     VALUES (?1, ?2, ?3)",
                    params![chain_id, certificate, order as i64],
                )
                .map_err(query_err)?;
            }
        }

        tx.commit().map_err(query_err)?;
        debug!(%app, check_id, "app added to check list");
        Ok(true)
    }

    fn remove(&self, app: &App) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM to_check WHERE app_id = ?1 AND pkg_id = ?2 AND uid = ?3",
                params![app.app_id, app.pkg_id, app.uid],
            )
            .map_err(query_err)?;
        debug!(%app, removed, "app removed from check list");
        Ok(())
    }

    fn mark_verified(&self, app: &App, verified: Verified) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE to_check SET verified = ?1
             WHERE app_id = ?2 AND pkg_id = ?3 AND uid = ?4",
            params![verified.as_i64(), app.app_id, app.pkg_id, app.uid],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<App>, StoreError> {
        let conn = self.lock()?;
        let mut apps = {
            let mut stmt = conn
                .prepare(
                    "SELECT check_id, app_id, pkg_id, uid, verified FROM to_check
                     ORDER BY check_id ASC",
                )
                .map_err(query_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(App {
                        check_id: Some(row.get(0)?),
                        app_id: row.get(1)?,
                        pkg_id: row.get(2)?,
                        uid: row.get(3)?,
                        signatures: Vec::new(),
                        verified: Verified::from_i64(row.get(4)?),
                    })
                })
                .map_err(query_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(query_err)?
        };

        for app in &mut apps {
            let check_id = app.check_id.unwrap_or_default();
            let chain_ids: Vec<i64> = {
                let mut stmt = conn
                    .prepare("SELECT chain_id FROM chains_to_check WHERE check_id = ?1")
                    .map_err(query_err)?;
                let rows = stmt
                    .query_map(params![check_id], |row| row.get(0))
                    .map_err(query_err)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(query_err)?
            };

            for chain_id in chain_ids {
                let mut stmt = conn
                    .prepare(
                        "SELECT certificate FROM certs_to_check
                         WHERE chain_id = ?1 ORDER BY cert_order ASC",
                    )
                    .map_err(query_err)?;
                let rows = stmt
                    .query_map(params![chain_id], |row| row.get(0))
                    .map_err(query_err)?;
                let chain: Chain = rows.collect::<Result<Vec<_>, _>>().map_err(query_err)?;
                app.signatures.push(chain);
            }
        }

        Ok(apps)
    }

    fn ocsp_url(&self, issuer: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT url FROM ocsp_urls WHERE issuer = ?1",
            params![issuer],
            |row| row.get(0),
        )
        .optional()
        .map_err(query_err)
    }

    fn set_ocsp_url(&self, issuer: &str, url: &str, date: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO ocsp_urls (issuer, url, date) VALUES (?1, ?2, ?3)
             ON CONFLICT(issuer) DO UPDATE SET url = excluded.url, date = excluded.date
             WHERE excluded.date > ocsp_urls.date",
            params![issuer, url, date],
        )
        .map_err(query_err)?;
        Ok(())
    }
}
