//! Shared identifiers used by every dockyard crate.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// What an instance runs: a user application or a managed database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    Application,
    Database,
}

impl InstanceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceKind::Application => "application",
            InstanceKind::Database => "database",
        }
    }

    /// Short prefix used for container names and storage paths.
    pub fn prefix(self) -> &'static str {
        match self {
            InstanceKind::Application => "app",
            InstanceKind::Database => "db",
        }
    }

    /// Container name for an instance of this kind.
    ///
    /// Names are unique within a kind only, so the kind prefix keeps an
    /// application and a database with the same name apart.
    pub fn container_name(self, name: &str) -> String {
        format!("{}-{name}", self.prefix())
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "application" | "app" => Ok(InstanceKind::Application),
            "database" | "db" => Ok(InstanceKind::Database),
            other => Err(format!("unknown instance kind: {other}")),
        }
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_names_are_kind_prefixed() {
        assert_eq!(InstanceKind::Application.container_name("blog"), "app-blog");
        assert_eq!(InstanceKind::Database.container_name("blog"), "db-blog");
    }

    #[test]
    fn kind_parses_long_and_short_forms() {
        assert_eq!("app".parse::<InstanceKind>(), Ok(InstanceKind::Application));
        assert_eq!("database".parse::<InstanceKind>(), Ok(InstanceKind::Database));
        assert!("cluster".parse::<InstanceKind>().is_err());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&InstanceKind::Database).unwrap();
        assert_eq!(json, "\"database\"");
    }
}
