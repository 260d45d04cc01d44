use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::error::LedgerWriteError;

/// Durable backing for the set of published article ids.
pub trait LedgerStore: Send {
    /// Read every recorded id.
    fn load(&mut self) -> Result<HashSet<String>>;

    /// Record one id. Must be durable when this returns `Ok`.
    fn append(&mut self, id: &str) -> Result<()>;

    fn describe(&self) -> String;
}

/// One id per line, appended and fsynced on every write.
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LedgerStore for FileLedgerStore {
    fn load(&mut self) -> Result<HashSet<String>> {
        // First start: nothing posted yet
        if !self.path.exists() {
            return Ok(HashSet::new());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read ledger file: {}", self.path.display()))?;

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn append(&mut self, id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create ledger directory")?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open ledger file: {}", self.path.display()))?;

        // A last line without its newline would swallow this id
        let line = if ends_mid_line(&mut file)? {
            format!("\n{}\n", id)
        } else {
            format!("{}\n", id)
        };
        file.write_all(line.as_bytes())
            .context("Failed to append to ledger file")?;
        file.sync_all().context("Failed to flush ledger file")?;

        Ok(())
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

fn ends_mid_line(file: &mut fs::File) -> Result<bool> {
    let len = file.metadata().context("Failed to stat ledger file")?.len();
    if len == 0 {
        return Ok(false);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))
        .and_then(|_| file.read_exact(&mut last))
        .context("Failed to read end of ledger file")?;
    Ok(last[0] != b'\n')
}

/// Ledger kept in a single SQLite table.
pub struct SqliteLedgerStore {
    path: PathBuf,
    conn: Option<Connection>,
}

impl SqliteLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: None,
        }
    }

    fn connection(&mut self) -> Result<&Connection> {
        if self.conn.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).context("Failed to create ledger directory")?;
                }
            }

            let conn = Connection::open(&self.path).with_context(|| {
                format!("Failed to open ledger database: {}", self.path.display())
            })?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS published_articles (
                    id TEXT PRIMARY KEY,
                    recorded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
                )",
                [],
            )
            .context("Failed to create ledger table")?;

            self.conn = Some(conn);
        }

        self.conn
            .as_ref()
            .context("Ledger database connection unavailable")
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn load(&mut self) -> Result<HashSet<String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT id FROM published_articles")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row.context("Failed to read ledger row")?);
        }
        Ok(ids)
    }

    fn append(&mut self, id: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT OR IGNORE INTO published_articles (id) VALUES (?1)",
            [id],
        )
        .context("Failed to insert into ledger database")?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite {}", self.path.display())
    }
}

/// Pick a store from the file extension: `.db`, `.sqlite` and `.sqlite3` use
/// SQLite, anything else is a flat file.
pub fn open_store(path: &Path) -> Box<dyn LedgerStore> {
    match path.extension().and_then(|s| s.to_str()) {
        Some("db") | Some("sqlite") | Some("sqlite3") => Box::new(SqliteLedgerStore::new(path)),
        _ => Box::new(FileLedgerStore::new(path)),
    }
}

/// In-memory view of every published id, backed by a durable store.
pub struct DedupLedger {
    ids: HashSet<String>,
    store: Box<dyn LedgerStore>,
    degraded: Option<String>,
    unpersisted: Vec<String>,
}

impl DedupLedger {
    /// Load the full ledger. An unreadable store leaves the ledger empty and
    /// marked degraded instead of failing startup.
    pub fn open(mut store: Box<dyn LedgerStore>) -> Self {
        let (ids, degraded) = match store.load() {
            Ok(ids) => {
                info!(store = %store.describe(), count = ids.len(), "Loaded publish ledger");
                (ids, None)
            }
            Err(e) => {
                warn!(
                    store = %store.describe(),
                    error = %format!("{:#}", e),
                    "Could not load publish ledger; starting empty, duplicates possible"
                );
                (HashSet::new(), Some(format!("{:#}", e)))
            }
        };

        Self {
            ids,
            store,
            degraded,
            unpersisted: Vec::new(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Durably record a published id. The in-memory set is only updated once
    /// the store confirms the write.
    pub fn add(&mut self, id: &str) -> Result<(), LedgerWriteError> {
        if self.ids.contains(id) && !self.unpersisted.iter().any(|u| u == id) {
            return Ok(());
        }

        self.store.append(id).map_err(|e| LedgerWriteError {
            id: id.to_string(),
            message: format!("{:#}", e),
        })?;

        self.ids.insert(id.to_string());
        self.unpersisted.retain(|u| u != id);
        Ok(())
    }

    /// Keep an id that was posted but could not be written, so this process
    /// at least won't post it again.
    pub fn remember_unpersisted(&mut self, id: &str) {
        error!(id, store = %self.store.describe(), "Article posted but missing from durable ledger");
        self.ids.insert(id.to_string());
        if !self.unpersisted.iter().any(|u| u == id) {
            self.unpersisted.push(id.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Load failure message, if the ledger started empty because of one.
    pub fn degraded(&self) -> Option<&str> {
        self.degraded.as_deref()
    }

    pub fn unpersisted(&self) -> &[String] {
        &self.unpersisted
    }

    pub fn describe(&self) -> String {
        self.store.describe()
    }
}
