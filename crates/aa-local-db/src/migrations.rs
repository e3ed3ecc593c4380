//! Database migration management.

use rusqlite::{params, Connection};

/// Database migration manager.
pub struct MigrationManager;

impl MigrationManager {
    /// Apply all pending migrations to the database.
    pub fn migrate(conn: &Connection) -> crate::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        let current_version = Self::current_version(conn)?.unwrap_or(0);
        if current_version > crate::SCHEMA_VERSION {
            return Err(crate::Error::migration(format!(
                "database schema version {} is newer than supported version {}",
                current_version,
                crate::SCHEMA_VERSION
            )));
        }

        if current_version < 1 {
            tracing::debug!("applying schema migration 1");
            Self::apply_migration_1(conn)?;
        }

        Ok(())
    }

    /// Apply migration version 1 - sessions and outcome log
    fn apply_migration_1(conn: &Connection) -> crate::Result<()> {
        conn.execute_batch(
            r#"
            -- One run through an ordered app queue
            CREATE TABLE IF NOT EXISTS automation_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_time INTEGER NOT NULL,
                app_queue TEXT NOT NULL,
                current_index INTEGER NOT NULL DEFAULT 0 CHECK (current_index >= 0),
                is_active INTEGER NOT NULL DEFAULT 0 CHECK (is_active IN (0, 1)),
                completed_count INTEGER NOT NULL DEFAULT 0
                    CHECK (completed_count >= 0 AND completed_count <= current_index)
            );

            -- At most one session may be active
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_single_active
                ON automation_sessions(is_active) WHERE is_active = 1;
            CREATE INDEX IF NOT EXISTS idx_sessions_start_time
                ON automation_sessions(start_time);

            -- Outcome of each launch attempt; no foreign key so rows outlive sessions
            CREATE TABLE IF NOT EXISTS automation_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                app_package TEXT NOT NULL,
                app_name TEXT NOT NULL,
                duration_millis INTEGER NOT NULL,
                success INTEGER NOT NULL CHECK (success IN (0, 1)),
                error_message TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON automation_logs(timestamp);

            INSERT OR REPLACE INTO schema_migrations (version) VALUES (1);
            "#,
        )?;

        Ok(())
    }

    /// Get the current schema version.
    pub fn current_version(conn: &Connection) -> crate::Result<Option<u32>> {
        let mut stmt = conn.prepare("SELECT MAX(version) FROM schema_migrations")?;
        let version: Option<u32> = stmt.query_row(params![], |row| row.get(0))?;
        Ok(version)
    }
}
