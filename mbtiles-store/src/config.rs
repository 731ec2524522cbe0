use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};

/// `SQLite` journal mode used by store connections
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Write-ahead log: readers never wait for the single writer
    #[default]
    Wal,
    Delete,
}

/// Connection settings of a [`TileStore`](crate::TileStore)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Size of the connection pool, defaults to the number of CPUs
    pub max_connections: u32,
    /// How long a connection waits for a locked database before failing
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
    pub journal_mode: JournalMode,
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: u32::try_from(num_cpus::get()).unwrap_or(4).max(1),
            busy_timeout: Duration::from_secs(5),
            journal_mode: JournalMode::default(),
            create_if_missing: true,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn connect_options(&self, filepath: &str) -> SqliteConnectOptions {
        let journal_mode = match self.journal_mode {
            JournalMode::Wal => SqliteJournalMode::Wal,
            JournalMode::Delete => SqliteJournalMode::Delete,
        };
        SqliteConnectOptions::new()
            .filename(filepath)
            .create_if_missing(self.create_if_missing)
            .journal_mode(journal_mode)
            .busy_timeout(self.busy_timeout)
            .foreign_keys(true)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn parse_full() {
        let cfg: StoreConfig = serde_yaml::from_str(indoc! {"
            max_connections: 3
            busy_timeout: 250ms
            journal_mode: delete
            create_if_missing: false
        "})
        .unwrap();
        assert_eq!(
            cfg,
            StoreConfig {
                max_connections: 3,
                busy_timeout: Duration::from_millis(250),
                journal_mode: JournalMode::Delete,
                create_if_missing: false,
            }
        );
    }

    #[test]
    fn parse_defaults() {
        let cfg: StoreConfig = serde_yaml::from_str("busy_timeout: 1m").unwrap();
        assert_eq!(cfg.busy_timeout, Duration::from_secs(60));
        assert_eq!(cfg.journal_mode, JournalMode::Wal);
        assert!(cfg.create_if_missing);
        assert!(cfg.max_connections >= 1);
    }

    #[test]
    fn parse_unknown_journal_mode() {
        assert!(serde_yaml::from_str::<StoreConfig>("journal_mode: memory").is_err());
    }
}
