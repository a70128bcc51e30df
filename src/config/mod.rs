// backrest/src/config/mod.rs
pub mod resolver;

pub use resolver::Resolver;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{AppError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/backrest.conf";

const GLOBAL_SCOPE: &str = "global";

/// Configuration categories a key can live under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Command,
    CommandOption,
    Backup,
    Archive,
    Retention,
    /// Keys of the bare `[<stanza>]` section (user/host/path of the database).
    Stanza,
}

impl Section {
    fn from_category(category: &str) -> Option<Self> {
        match category {
            "command" => Some(Section::Command),
            "command:option" => Some(Section::CommandOption),
            "backup" => Some(Section::Backup),
            "archive" => Some(Section::Archive),
            "retention" => Some(Section::Retention),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Command => "command",
            Section::CommandOption => "command:option",
            Section::Backup => "backup",
            Section::Archive => "archive",
            Section::Retention => "retention",
            Section::Stanza => "stanza",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Stanza(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigKey {
    pub scope: Scope,
    pub section: Section,
    pub key: String,
}

impl ConfigKey {
    pub fn new(scope: Scope, section: Section, key: &str) -> Self {
        ConfigKey {
            scope,
            section,
            key: key.to_string(),
        }
    }
}

/// The named backup target selected with `--stanza`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stanza(String);

impl Stanza {
    pub fn new(name: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Usage("stanza name cannot be empty".to_string()));
        }
        if name.contains(':') || name.contains('[') || name.contains(']') {
            return Err(AppError::Usage(format!("invalid stanza name '{}'", name)));
        }
        Ok(Stanza(name.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn scope(&self) -> Scope {
        Scope::Stanza(self.0.clone())
    }
}

impl fmt::Display for Stanza {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only hierarchical configuration, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct Store {
    values: HashMap<ConfigKey, String>,
}

impl Store {
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path).map_err(|e| AppError::ConfigLoad {
            path: config_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let store = Self::parse(&content).map_err(|reason| AppError::ConfigLoad {
            path: config_path.to_path_buf(),
            reason,
        })?;
        debug!(
            path = %config_path.display(),
            keys = store.values.len(),
            "configuration loaded"
        );
        Ok(store)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, String> {
        let mut values = HashMap::new();
        let mut current: Option<(Scope, Section)> = None;

        for (index, raw_line) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let header = header
                    .strip_suffix(']')
                    .ok_or_else(|| format!("line {}: unterminated section header", line_no))?;
                current = Some(parse_header(header.trim()).map_err(|e| format!("line {}: {}", line_no, e))?);
                continue;
            }

            let (scope, section) = current
                .clone()
                .ok_or_else(|| format!("line {}: key defined outside of a section", line_no))?;
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| format!("line {}: expected key=value", line_no))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("line {}: empty key", line_no));
            }

            let config_key = ConfigKey::new(scope, section, key);
            if values.insert(config_key, value.trim().to_string()).is_some() {
                return Err(format!("line {}: duplicate key '{}'", line_no, key));
            }
        }

        Ok(Store { values })
    }

    pub fn get(&self, key: &ConfigKey) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

fn parse_header(header: &str) -> std::result::Result<(Scope, Section), String> {
    match header.split_once(':') {
        None if header == GLOBAL_SCOPE => Err("the global section needs a category".to_string()),
        None if header.is_empty() => Err("empty section name".to_string()),
        None => Ok((Scope::Stanza(header.to_string()), Section::Stanza)),
        Some((scope, category)) => {
            let section = Section::from_category(category.trim())
                .ok_or_else(|| format!("unknown section category '{}'", category))?;
            let scope = match scope.trim() {
                GLOBAL_SCOPE => Scope::Global,
                "" => return Err("empty scope name".to_string()),
                name => Scope::Stanza(name.to_string()),
            };
            Ok((scope, section))
        }
    }
}

/// Resolves the configuration file location: explicit flag or env, else the system default.
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
