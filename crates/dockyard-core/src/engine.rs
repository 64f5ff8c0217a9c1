//! Database engine profiles.
//!
//! Each supported engine has a fixed profile: where its data lives inside
//! the container, which file holds its configuration, where the query log
//! is written once logging is enabled, and which command the runtime uses
//! as a health check. Paths can be overridden per engine in the platform
//! config; the profile supplies the defaults.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Marker line written at the top of the logging block so the block is
/// appended at most once per container.
pub const LOGGING_MARKER: &str = "# dockyard: query logging";

/// Supported managed database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    Mysql,
    Postgresql,
    Mongodb,
}

/// Static facts about an engine's container image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineProfile {
    /// Port the engine listens on inside the container.
    pub internal_port: u16,
    /// Data directory inside the container (bind-mounted from the host).
    pub data_dir: &'static str,
    /// Engine configuration file the logging block is appended to.
    pub config_file: &'static str,
    /// Query log written once the logging block is active.
    pub log_file: &'static str,
    /// Engine-specific logging configuration.
    pub logging_block: &'static str,
    /// Health check command run by the container runtime.
    pub healthcheck: &'static [&'static str],
}

const MYSQL: EngineProfile = EngineProfile {
    internal_port: 3306,
    data_dir: "/var/lib/mysql",
    config_file: "/etc/my.cnf",
    log_file: "/var/log/mysql/general.log",
    logging_block: "[mysqld]\ngeneral_log = 1\ngeneral_log_file = /var/log/mysql/general.log\n",
    healthcheck: &["CMD", "mysqladmin", "ping", "-h", "localhost"],
};

const POSTGRESQL: EngineProfile = EngineProfile {
    internal_port: 5432,
    data_dir: "/var/lib/postgresql/data",
    config_file: "/var/lib/postgresql/data/postgresql.conf",
    log_file: "/var/lib/postgresql/data/pg_log/postgresql_log.log",
    logging_block: "logging_collector = on\n\
                    log_directory = 'pg_log'\n\
                    log_filename = 'postgresql_log.log'\n\
                    log_statement = 'all'\n\
                    log_duration = on\n\
                    log_min_duration_statement = 0\n",
    healthcheck: &["CMD", "pg_isready"],
};

const MONGODB: EngineProfile = EngineProfile {
    internal_port: 27017,
    data_dir: "/data/db",
    config_file: "/etc/mongod.conf",
    log_file: "/var/log/mongodb/mongodb.log",
    logging_block: "systemLog:\n  destination: file\n  logAppend: true\n  path: /var/log/mongodb/mongodb.log\n  verbosity: 1\n",
    healthcheck: &["CMD", "mongosh", "--quiet", "--eval", "db.adminCommand('ping')"],
};

impl DatabaseEngine {
    pub const ALL: [DatabaseEngine; 3] = [
        DatabaseEngine::Mysql,
        DatabaseEngine::Postgresql,
        DatabaseEngine::Mongodb,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DatabaseEngine::Mysql => "mysql",
            DatabaseEngine::Postgresql => "postgresql",
            DatabaseEngine::Mongodb => "mongodb",
        }
    }

    pub fn profile(self) -> EngineProfile {
        match self {
            DatabaseEngine::Mysql => MYSQL,
            DatabaseEngine::Postgresql => POSTGRESQL,
            DatabaseEngine::Mongodb => MONGODB,
        }
    }

    /// Environment the official image needs to create the database and
    /// its owning user on first start.
    pub fn credential_env(self, database: &str, user: &str, password: &str) -> Vec<(String, String)> {
        let pairs: [(&str, &str); 3] = match self {
            DatabaseEngine::Mysql => [
                ("MYSQL_DATABASE", database),
                ("MYSQL_USER", user),
                ("MYSQL_PASSWORD", password),
            ],
            DatabaseEngine::Postgresql => [
                ("POSTGRES_DB", database),
                ("POSTGRES_USER", user),
                ("POSTGRES_PASSWORD", password),
            ],
            DatabaseEngine::Mongodb => [
                ("MONGO_INITDB_DATABASE", database),
                ("MONGO_INITDB_ROOT_USERNAME", user),
                ("MONGO_INITDB_ROOT_PASSWORD", password),
            ],
        };
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl DatabaseEngine {
    /// Container command replacing the image default, if the engine needs
    /// one to read `config_file` at all.
    ///
    /// The MongoDB image only loads a config file passed with `--config`,
    /// and ships none at that path, so the command seeds a minimal one and
    /// a log directory the engine user can write to before handing over to
    /// the image entrypoint.
    pub fn start_command(self, config_file: &str, log_file: &str) -> Option<Vec<String>> {
        match self {
            DatabaseEngine::Mysql | DatabaseEngine::Postgresql => None,
            DatabaseEngine::Mongodb => {
                let log_dir = log_file.rsplit_once('/').map_or("/", |(dir, _)| dir);
                let script = format!(
                    "[ -f {config_file} ] || printf 'net:\\n  bindIpAll: true\\n' > {config_file}; \
                     mkdir -p {log_dir} && chown mongodb:mongodb {log_dir}; \
                     exec docker-entrypoint.sh mongod --config {config_file}"
                );
                Some(vec!["sh".to_string(), "-c".to_string(), script])
            }
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(DatabaseEngine::Mysql),
            "postgresql" | "postgres" => Ok(DatabaseEngine::Postgresql),
            "mongodb" | "mongo" => Ok(DatabaseEngine::Mongodb),
            other => Err(format!("unknown database engine: {other}")),
        }
    }
}
