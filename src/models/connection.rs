//! Connection-related data models.
//!
//! This module defines the database backend detection, transaction isolation
//! levels and connection summaries shared by the connection factories.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Parse database type from the backend name reported by an `AnyConnection`.
    pub fn from_backend_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "postgresql" | "postgres" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" => Some(Self::MySQL),
            "sqlite" => Some(Self::SQLite),
            _ => None,
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Transaction isolation level requested when a transaction begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Keep whatever the server or session default is.
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL keyword form, `None` for [`IsolationLevel::Default`].
    pub fn as_sql(&self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::ReadUncommitted => Some("READ UNCOMMITTED"),
            Self::ReadCommitted => Some("READ COMMITTED"),
            Self::RepeatableRead => Some("REPEATABLE READ"),
            Self::Serializable => Some("SERIALIZABLE"),
        }
    }

    /// Statements that open a manual-commit transaction at this level.
    ///
    /// SQLite only distinguishes uncommitted reads (shared-cache mode);
    /// every other level runs serializable there.
    pub fn begin_statements(&self, db_type: DatabaseType) -> Vec<String> {
        match (db_type, self.as_sql()) {
            (DatabaseType::PostgreSQL, Some(level)) => {
                vec![format!("BEGIN ISOLATION LEVEL {}", level)]
            }
            (DatabaseType::PostgreSQL, None) => vec!["BEGIN".to_string()],
            (DatabaseType::MySQL, Some(level)) => vec![
                format!("SET TRANSACTION ISOLATION LEVEL {}", level),
                "START TRANSACTION".to_string(),
            ],
            (DatabaseType::MySQL, None) => vec!["START TRANSACTION".to_string()],
            (DatabaseType::SQLite, _) if *self == Self::ReadUncommitted => vec![
                "PRAGMA read_uncommitted = 1".to_string(),
                "BEGIN".to_string(),
            ],
            (DatabaseType::SQLite, _) => vec!["BEGIN".to_string()],
        }
    }

    /// Statements that apply this level to an auto-commit session.
    pub fn session_statements(&self, db_type: DatabaseType) -> Vec<String> {
        match (db_type, self.as_sql()) {
            (_, None) => Vec::new(),
            (DatabaseType::PostgreSQL, Some(level)) => vec![format!(
                "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {}",
                level
            )],
            (DatabaseType::MySQL, Some(level)) => {
                vec![format!("SET SESSION TRANSACTION ISOLATION LEVEL {}", level)]
            }
            (DatabaseType::SQLite, _) if *self == Self::ReadUncommitted => {
                vec!["PRAGMA read_uncommitted = 1".to_string()]
            }
            (DatabaseType::SQLite, _) => Vec::new(),
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_sql().unwrap_or("DEFAULT"))
    }
}

/// Get a display-safe version of a connection string (credentials masked).
pub fn mask_connection_string(connection_string: &str) -> String {
    if let Some(at_pos) = connection_string.find('@') {
        if let Some(colon_pos) = connection_string[..at_pos].rfind(':') {
            // Skip the scheme separator in "user@host" URLs without a password
            if !connection_string[colon_pos..].starts_with("://") {
                let prefix = &connection_string[..colon_pos + 1];
                let suffix = &connection_string[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
    }
    connection_string.to_string()
}
