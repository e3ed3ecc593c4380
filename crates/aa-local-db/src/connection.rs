//! Database connection management.

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Environment variable overriding the state directory.
pub const HOME_ENV: &str = "AA_HOME";

const STATE_DIR_NAME: &str = "app-automation";
const DB_FILE_NAME: &str = "state.db";

/// Shared SQLite connection.
///
/// All access goes through a single mutex, so every write is serialized.
#[derive(Debug, Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

fn env_dir(name: &str) -> crate::Result<PathBuf> {
    std::env::var(name)
        .map(PathBuf::from)
        .map_err(|_| crate::Error::generic(format!("{name} environment variable not set")))
}

impl Database {
    /// Get the default database path based on AA_HOME environment variable or platform defaults.
    ///
    /// Priority order:
    /// 1. AA_HOME environment variable (custom)
    /// 2. Platform-specific defaults:
    ///    - Linux: `${XDG_STATE_HOME:-~/.local/state}/app-automation/state.db`
    ///    - macOS: `~/Library/Application Support/app-automation/state.db`
    ///    - Windows: `%LOCALAPPDATA%\app-automation\state.db`
    pub fn default_path() -> crate::Result<PathBuf> {
        if let Ok(home) = std::env::var(HOME_ENV) {
            return Ok(PathBuf::from(home).join(DB_FILE_NAME));
        }

        #[cfg(target_os = "linux")]
        {
            let state_home = match env_dir("XDG_STATE_HOME") {
                Ok(dir) => dir,
                Err(_) => env_dir("HOME")?.join(".local").join("state"),
            };
            Ok(state_home.join(STATE_DIR_NAME).join(DB_FILE_NAME))
        }

        #[cfg(target_os = "macos")]
        {
            Ok(env_dir("HOME")?
                .join("Library")
                .join("Application Support")
                .join(STATE_DIR_NAME)
                .join(DB_FILE_NAME))
        }

        #[cfg(target_os = "windows")]
        {
            Ok(env_dir("LOCALAPPDATA")?.join(STATE_DIR_NAME).join(DB_FILE_NAME))
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            Ok(env_dir("HOME")?.join(format!(".{STATE_DIR_NAME}")).join(DB_FILE_NAME))
        }
    }

    /// Open the database at the default path.
    pub fn open_default() -> crate::Result<Self> {
        let path = Self::default_path()?;
        Self::open(&path)
    }

    /// Open a new database connection at the specified path.
    ///
    /// Missing parent directories and the database file itself are created.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        tracing::debug!(path = %path.display(), "opening automation database");
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize_schema(conn: &Connection) -> crate::Result<()> {
        // WAL, and wait on locks held by other processes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        crate::migrations::MigrationManager::migrate(conn)?;

        Ok(())
    }

    /// Lock the underlying connection.
    pub fn lock(&self) -> crate::Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|e| crate::Error::generic(format!("Failed to acquire database lock: {}", e)))
    }

    /// Execute a transaction with automatic rollback on error.
    pub fn transaction<F, T>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&Connection) -> crate::Result<T>,
    {
        let conn = self.lock()?;

        let tx = conn.unchecked_transaction()?;
        match f(&tx) {
            Ok(result) => {
                tx.commit()?;
                Ok(result)
            }
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }
}
