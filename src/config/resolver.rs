// backrest/src/config/resolver.rs
use super::{ConfigKey, Scope, Section, Stanza, Store};
use crate::errors::{AppError, Result};

/// Token in a command template replaced by the matching `command:option` value.
pub const OPTION_MACRO: &str = "%option%";

/// A resolved configuration value. Stored values are always `Str`; the other
/// variants only appear as caller-supplied defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Bool(bool),
    Int(i64),
    Absent,
}

impl Value {
    pub fn text(self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s),
            Value::Bool(b) => Some(if b { "y" } else { "n" }.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Absent => None,
        }
    }

    /// `y`/`n` coercion. `Err` carries the offending raw value.
    pub fn flag(&self) -> std::result::Result<Option<bool>, String> {
        match self {
            Value::Str(s) if s == "y" => Ok(Some(true)),
            Value::Str(s) if s == "n" => Ok(Some(false)),
            Value::Str(s) => Err(s.clone()),
            Value::Bool(b) => Ok(Some(*b)),
            Value::Int(i) => Err(i.to_string()),
            Value::Absent => Ok(None),
        }
    }

    pub fn int(&self) -> std::result::Result<Option<i64>, String> {
        match self {
            Value::Str(s) => s.trim().parse().map(Some).map_err(|_| s.clone()),
            Value::Int(i) => Ok(Some(*i)),
            Value::Bool(b) => Err(Value::Bool(*b).text().unwrap_or_default()),
            Value::Absent => Ok(None),
        }
    }
}

/// Looks up `(section, key)` for one stanza, falling back to the global scope.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    store: &'a Store,
    stanza: &'a Stanza,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a Store, stanza: &'a Stanza) -> Self {
        Resolver { store, stanza }
    }

    pub fn stanza(&self) -> &'a Stanza {
        self.stanza
    }

    pub fn resolve(
        &self,
        section: Section,
        key: &str,
        required: bool,
        default: Option<Value>,
    ) -> Result<Value> {
        let mut value = match self.lookup(section, key) {
            Some(raw) => raw.to_string(),
            None if required => {
                return default.ok_or_else(|| AppError::ConfigMissing {
                    section,
                    key: key.to_string(),
                });
            }
            None => return Ok(Value::Absent),
        };

        // One level only: command:option values are never expanded themselves.
        if section == Section::Command && value.contains(OPTION_MACRO) {
            if let Some(option) = self.lookup(Section::CommandOption, key) {
                value = value.replace(OPTION_MACRO, option);
            }
        }

        Ok(Value::Str(value))
    }

    fn lookup(&self, section: Section, key: &str) -> Option<&'a str> {
        if section == Section::Stanza {
            return self
                .store
                .get(&ConfigKey::new(self.stanza.scope(), Section::Stanza, key));
        }
        self.store
            .get(&ConfigKey::new(self.stanza.scope(), section, key))
            .or_else(|| self.store.get(&ConfigKey::new(Scope::Global, section, key)))
    }

    /// Optional string value.
    pub fn text(&self, section: Section, key: &str) -> Result<Option<String>> {
        Ok(self.resolve(section, key, false, None)?.text())
    }

    /// Mandatory string value; fails with `ConfigMissing` when undefined.
    pub fn require_text(&self, section: Section, key: &str) -> Result<String> {
        self.resolve(section, key, true, None)?
            .text()
            .ok_or_else(|| AppError::ConfigMissing {
                section,
                key: key.to_string(),
            })
    }

    /// Command template, mandatory only when the feature using it is enabled.
    pub fn command(&self, key: &str, required: bool) -> Result<Option<String>> {
        Ok(self.resolve(Section::Command, key, required, None)?.text())
    }

    pub fn flag(&self, section: Section, key: &str, default: bool) -> Result<bool> {
        let value = self.resolve(section, key, true, Some(Value::Bool(default)))?;
        value
            .flag()
            .map(|flag| flag.unwrap_or(default))
            .map_err(|raw| AppError::ConfigValue {
                section,
                key: key.to_string(),
                value: raw,
            })
    }

    pub fn int(&self, section: Section, key: &str) -> Result<Option<i64>> {
        self.resolve(section, key, false, None)?
            .int()
            .map_err(|raw| AppError::ConfigValue {
                section,
                key: key.to_string(),
                value: raw,
            })
    }

    /// Integer value, `default` when undefined.
    pub fn int_or(&self, section: Section, key: &str, default: i64) -> Result<i64> {
        self.resolve(section, key, true, Some(Value::Int(default)))?
            .int()
            .map(|value| value.unwrap_or(default))
            .map_err(|raw| AppError::ConfigValue {
                section,
                key: key.to_string(),
                value: raw,
            })
    }

    pub fn is_defined(&self, section: Section, key: &str) -> bool {
        self.lookup(section, key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::parse(
            r#"
[global:command]
psql = /usr/bin/psql -X %option%
compress = gzip --stdout %file%
checksum = sha1sum %option% %option%

[global:command:option]
psql = --port=6000
checksum = -b

[db:command:option]
psql = --port=5433 %option%

[global:backup]
path = /backup
hardlink = y
thread-max = 2

[db:backup]
thread-max = 8
compress = maybe

[db]
path = /var/lib/pg
"#,
        )
        .unwrap()
    }

    fn stanza() -> Stanza {
        Stanza::new("db").unwrap()
    }

    #[test]
    fn test_global_value_used_without_override() {
        let store = store();
        let stanza = stanza();
        let resolver = Resolver::new(&store, &stanza);
        assert_eq!(
            resolver.resolve(Section::Backup, "path", false, None).unwrap(),
            Value::Str("/backup".to_string())
        );
    }

    #[test]
    fn test_stanza_override_wins() {
        let store = store();
        let stanza = stanza();
        let resolver = Resolver::new(&store, &stanza);
        assert_eq!(resolver.int(Section::Backup, "thread-max").unwrap(), Some(8));
    }

    #[test]
    fn test_other_stanza_sees_global() {
        let store = store();
        let other = Stanza::new("other").unwrap();
        let resolver = Resolver::new(&store, &other);
        assert_eq!(resolver.int(Section::Backup, "thread-max").unwrap(), Some(2));
        assert_eq!(resolver.text(Section::Stanza, "path").unwrap(), None);
    }

    #[test]
    fn test_stanza_section_reads_bare_stanza() {
        let store = store();
        let stanza = stanza();
        let resolver = Resolver::new(&store, &stanza);
        assert_eq!(
            resolver.text(Section::Stanza, "path").unwrap().as_deref(),
            Some("/var/lib/pg")
        );
        // The stanza section has no global fallback.
        assert_eq!(resolver.text(Section::Stanza, "hardlink").unwrap(), None);
    }

    #[test]
    fn test_command_macro_substituted_once() {
        let store = store();
        let stanza = stanza();
        let resolver = Resolver::new(&store, &stanza);
        // The stanza option itself contains the token; it must not be expanded again.
        assert_eq!(
            resolver.command("psql", true).unwrap().as_deref(),
            Some("/usr/bin/psql -X --port=5433 %option%")
        );
        assert_eq!(
            resolver.command("checksum", true).unwrap().as_deref(),
            Some("sha1sum -b -b")
        );
    }

    #[test]
    fn test_command_macro_left_without_option() {
        let store = Store::parse("[global:command]\npsql = psql %option%\n").unwrap();
        let stanza = stanza();
        let resolver = Resolver::new(&store, &stanza);
        assert_eq!(
            resolver.command("psql", false).unwrap().as_deref(),
            Some("psql %option%")
        );
    }

    #[test]
    fn test_macro_only_applies_to_command_section() {
        let store = Store::parse(
            "[global:backup]\npath = /b/%option%\n[global:command:option]\npath = x\n",
        )
        .unwrap();
        let stanza = stanza();
        let resolver = Resolver::new(&store, &stanza);
        assert_eq!(
            resolver.text(Section::Backup, "path").unwrap().as_deref(),
            Some("/b/%option%")
        );
    }

    #[test]
    fn test_required_missing_returns_default() {
        let store = store();
        let stanza = stanza();
        let resolver = Resolver::new(&store, &stanza);
        let value = resolver
            .resolve(Section::Archive, "compress-async", true, Some(Value::Str("n".into())))
            .unwrap();
        assert_eq!(value, Value::Str("n".to_string()));
    }

    #[test]
    fn test_optional_missing_ignores_default() {
        let store = store();
        let stanza = stanza();
        let resolver = Resolver::new(&store, &stanza);
        let value = resolver
            .resolve(Section::Archive, "path", false, Some(Value::Str("/x".into())))
            .unwrap();
        assert_eq!(value, Value::Absent);
    }

    #[test]
    fn test_required_missing_without_default_names_section_and_key() {
        let store = store();
        let stanza = stanza();
        let resolver = Resolver::new(&store, &stanza);
        match resolver.resolve(Section::Retention, "full_retention", true, None) {
            Err(AppError::ConfigMissing { section, key }) => {
                assert_eq!(section, Section::Retention);
                assert_eq!(key, "full_retention");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        let message = resolver.require_text(Section::Retention, "full_retention").unwrap_err().to_string();
        assert!(message.contains("retention->full_retention"), "{}", message);
    }

    #[test]
    fn test_flag_coercion() {
        let store = store();
        let stanza = stanza();
        let resolver = Resolver::new(&store, &stanza);
        assert!(resolver.flag(Section::Backup, "hardlink", false).unwrap());
        assert!(resolver.flag(Section::Backup, "checksum", true).unwrap());
        assert!(!resolver.flag(Section::Backup, "archive-required", false).unwrap());
        assert!(matches!(
            resolver.flag(Section::Backup, "compress", true),
            Err(AppError::ConfigValue { .. })
        ));
    }

    #[test]
    fn test_int_or_default() {
        let store = store();
        let other = Stanza::new("other").unwrap();
        let resolver = Resolver::new(&store, &other);
        assert_eq!(resolver.int_or(Section::Backup, "thread-max", 1).unwrap(), 2);
        assert_eq!(resolver.int_or(Section::Backup, "thread-timeout", 30).unwrap(), 30);
    }

    #[test]
    fn test_value_coercions() {
        assert_eq!(Value::Str("12".into()).int(), Ok(Some(12)));
        assert_eq!(Value::Absent.int(), Ok(None));
        assert!(Value::Str("twelve".into()).int().is_err());
        assert_eq!(Value::Bool(false).text().as_deref(), Some("n"));
        assert_eq!(Value::Absent.flag(), Ok(None));
    }
}
