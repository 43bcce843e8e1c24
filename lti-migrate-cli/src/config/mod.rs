//! Run configuration loaded from the environment
//!
//! Values come from process environment variables, usually populated from a
//! dotenv file by `main`. Parsing goes through a lookup function so every
//! problem can be collected and reported at once.

pub mod repository;

use log::{LevelFilter, info};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Record store path used when `RECORDS_DB_PATH` is unset
pub const DEFAULT_RECORDS_DB: &str = "migration-records.sqlite3";

/// Record store path that keeps records in memory only
pub const MEMORY_RECORDS_DB: &str = ":memory:";

const DEFAULT_MAX_WORKERS: usize = 4;

#[derive(Debug, Error)]
#[error("invalid configuration: {}", .problems.join("; "))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

/// Scope and tool pair of one migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    pub account_id: u64,
    pub term_ids: BTreeSet<u64>,
    pub source_tool_id: u64,
    pub target_tool_id: u64,
    pub warehouse_enabled: bool,
    /// Cap on the number of enumerated courses
    pub course_limit: Option<usize>,
    pub max_workers: usize,
    /// Inspect and report only
    pub dry_run: bool,
    /// Skip courses whose record is already `done` without asking Canvas
    pub trust_records: bool,
}

#[derive(Clone)]
pub struct ApiSettings {
    pub url: String,
    pub key: String,
}

impl fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSettings")
            .field("url", &self.url)
            .field("key", &"*REDACTED*")
            .finish()
    }
}

#[derive(Clone)]
pub struct WarehouseSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for WarehouseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"*REDACTED*")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LevelFilter,
    /// Applied to the HTTP and database client crates
    pub http_level: LevelFilter,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            http_level: LevelFilter::Warn,
        }
    }
}

impl LogSettings {
    /// Lenient parse used before the logger exists; bad values fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            level: parse_level(lookup("LOG_LEVEL")).unwrap_or(defaults.level),
            http_level: parse_level(lookup("HTTP_LOG_LEVEL")).unwrap_or(defaults.http_level),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }
}

fn parse_level(value: Option<String>) -> Option<LevelFilter> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse().ok())
}

#[derive(Debug, Clone)]
pub struct MigrationSettings {
    pub api: ApiSettings,
    pub migration: MigrationConfig,
    /// `None` when `WH_DISABLED` is set
    pub warehouse: Option<WarehouseSettings>,
    pub logging: LogSettings,
    pub records_db: String,
}

/// Overrides supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub dry_run: bool,
    pub trust_records: bool,
    pub course_limit: Option<usize>,
    pub max_workers: Option<usize>,
    pub records_db: Option<String>,
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

struct Reader<F> {
    lookup: F,
    problems: Vec<String>,
}

impl<F> Reader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&mut self, key: &str) -> Option<String> {
        let value = self.optional(key);
        if value.is_none() {
            self.problems.push(format!("{} is required", key));
        }
        value
    }

    fn required_int<T: std::str::FromStr>(&mut self, key: &str) -> Option<T> {
        let raw = self.required(key)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                self.problems
                    .push(format!("{} must be a non-negative integer, got {:?}", key, raw));
                None
            }
        }
    }

    fn optional_int<T: std::str::FromStr>(&mut self, key: &str) -> Option<T> {
        let raw = self.optional(key)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                self.problems
                    .push(format!("{} must be a non-negative integer, got {:?}", key, raw));
                None
            }
        }
    }

    fn flag(&mut self, key: &str) -> bool {
        let Some(raw) = self.optional(key) else {
            return false;
        };
        match parse_bool(&raw) {
            Some(v) => v,
            None => {
                self.problems
                    .push(format!("{} must be true or false, got {:?}", key, raw));
                false
            }
        }
    }

    fn int_set(&mut self, key: &str) -> BTreeSet<u64> {
        let Some(raw) = self.required(key) else {
            return BTreeSet::new();
        };
        match parse_id_csv(&raw) {
            Ok(ids) => ids,
            Err(problem) => {
                self.problems.push(format!("{}: {}", key, problem));
                BTreeSet::new()
            }
        }
    }
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `"1, 2,3"` into an ordered id set; blanks between commas are ignored
pub fn parse_id_csv(raw: &str) -> Result<BTreeSet<u64>, String> {
    let mut ids = BTreeSet::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id = part
            .parse::<u64>()
            .map_err(|_| format!("{:?} is not an integer id", part))?;
        ids.insert(id);
    }
    if ids.is_empty() {
        return Err("at least one id is required".to_string());
    }
    Ok(ids)
}

impl MigrationSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let logging = LogSettings::from_lookup(&lookup);
        let mut reader = Reader {
            lookup,
            problems: Vec::new(),
        };

        for key in ["LOG_LEVEL", "HTTP_LOG_LEVEL"] {
            if let Some(raw) = reader.optional(key) {
                if raw.parse::<LevelFilter>().is_err() {
                    reader
                        .problems
                        .push(format!("{} is not a log level: {:?}", key, raw));
                }
            }
        }

        let api_url = reader.required("API_URL");
        let api_key = reader.required("API_KEY");
        let account_id = reader.required_int::<u64>("ACCOUNT_ID");
        let term_ids = reader.int_set("ENROLLMENT_TERM_IDS_CSV");
        let source_tool_id = reader.required_int::<u64>("SOURCE_TOOL_ID");
        let target_tool_id = reader.required_int::<u64>("TARGET_TOOL_ID");

        if let (Some(source), Some(target)) = (source_tool_id, target_tool_id) {
            if source == target {
                reader
                    .problems
                    .push("SOURCE_TOOL_ID and TARGET_TOOL_ID must differ".to_string());
            }
        }

        let warehouse_disabled = reader.flag("WH_DISABLED");
        let warehouse = if warehouse_disabled {
            None
        } else {
            let host = reader.required("WH_HOST");
            let port = reader.required_int::<u16>("WH_PORT");
            let name = reader.required("WH_NAME");
            let user = reader.required("WH_USER");
            let password = reader.required("WH_PASSWORD");
            match (host, port, name, user, password) {
                (Some(host), Some(port), Some(name), Some(user), Some(password)) => {
                    Some(WarehouseSettings {
                        host,
                        port,
                        name,
                        user,
                        password,
                    })
                }
                _ => None,
            }
        };

        let course_limit = reader.optional_int::<usize>("COURSE_LIMIT");
        let max_workers = reader
            .optional_int::<usize>("MAX_WORKERS")
            .unwrap_or(DEFAULT_MAX_WORKERS);
        if max_workers == 0 {
            reader
                .problems
                .push("MAX_WORKERS must be at least 1".to_string());
        }
        let dry_run = reader.flag("DRY_RUN");
        let trust_records = reader.flag("TRUST_RECORDS");
        let records_db = reader
            .optional("RECORDS_DB_PATH")
            .unwrap_or_else(|| DEFAULT_RECORDS_DB.to_string());

        if !reader.problems.is_empty() {
            return Err(ConfigError {
                problems: reader.problems,
            });
        }

        // Every required value was checked above
        match (api_url, api_key, account_id, source_tool_id, target_tool_id) {
            (Some(url), Some(key), Some(account_id), Some(source_tool_id), Some(target_tool_id)) => {
                Ok(Self {
                    api: ApiSettings { url, key },
                    migration: MigrationConfig {
                        account_id,
                        term_ids,
                        source_tool_id,
                        target_tool_id,
                        warehouse_enabled: warehouse.is_some(),
                        course_limit,
                        max_workers,
                        dry_run,
                        trust_records,
                    },
                    warehouse,
                    logging,
                    records_db,
                })
            }
            _ => Err(ConfigError {
                problems: vec!["incomplete configuration".to_string()],
            }),
        }
    }

    /// Apply command line flags on top of the environment
    pub fn with_overrides(mut self, overrides: &SettingsOverrides) -> Self {
        let migration = &mut self.migration;
        migration.dry_run |= overrides.dry_run;
        migration.trust_records |= overrides.trust_records;
        if let Some(limit) = overrides.course_limit {
            migration.course_limit = Some(limit);
        }
        if let Some(workers) = overrides.max_workers {
            migration.max_workers = workers.max(1);
        }
        if let Some(path) = &overrides.records_db {
            self.records_db = path.clone();
        }
        self
    }

    /// Log the effective parameters, secrets redacted
    pub fn log_summary(&self) {
        let m = &self.migration;
        info!("Parameters from environment…");
        info!("  LOG_LEVEL: {}", self.logging.level);
        info!("  HTTP_LOG_LEVEL: {}", self.logging.http_level);
        info!("  API_URL: {:?}", self.api.url);
        info!("  API_KEY: *REDACTED*");
        info!("  ACCOUNT_ID: ({})", m.account_id);
        info!("  ENROLLMENT_TERM_IDS_CSV: {:?}", m.term_ids);
        info!("  SOURCE_TOOL_ID: ({})", m.source_tool_id);
        info!("  TARGET_TOOL_ID: ({})", m.target_tool_id);
        match &self.warehouse {
            Some(wh) => {
                info!("  WH_HOST: {:?}", wh.host);
                info!("  WH_PORT: {}", wh.port);
                info!("  WH_NAME: {:?}", wh.name);
                info!("  WH_USER: {:?}", wh.user);
                info!("  WH_PASSWORD: *REDACTED*");
            }
            None => info!("  WH_DISABLED: true"),
        }
        info!("  MAX_WORKERS: {}", m.max_workers);
        if let Some(limit) = m.course_limit {
            info!("  COURSE_LIMIT: {}", limit);
        }
        info!("  RECORDS_DB_PATH: {:?}", self.records_db);
        info!("  TRUST_RECORDS: {}", m.trust_records);
        info!("  DRY_RUN: {}", m.dry_run);
    }
}
