use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Deployment settings of a configurator.
///
/// Unknown keys are kept in [`extra`](Self::extra), where configuration
/// units can read them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Execute actions as soon as they are recorded, without conflict
    /// detection.
    pub autocommit: bool,
    /// Hand the introspectables of executed winners to a sink.
    pub introspection: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            autocommit: false,
            introspection: true,
            extra: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Applies `SHIKUMI_AUTOCOMMIT` and `SHIKUMI_INTROSPECTION`.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up by variable name.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("SHIKUMI_AUTOCOMMIT") {
            self.autocommit = asbool(&value);
        }

        if let Some(value) = lookup("SHIKUMI_INTROSPECTION") {
            self.introspection = asbool(&value);
        }

        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Reads an extra setting into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.extra.get(key) {
            Some(value) => Ok(Some(T::deserialize(value)?)),
            None => Ok(None),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra.insert(key.into(), value.into());
    }
}

/// Interprets a setting string as a flag.
pub fn asbool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "y" | "t"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(!settings.autocommit);
        assert!(settings.introspection);

        assert_eq!(Settings::from_json("{}").unwrap(), settings);
    }

    #[test]
    fn test_from_json_keeps_extra() {
        let settings = Settings::from_json(r#"{ "autocommit": true, "site.name": "blog", "retries": 3 }"#).unwrap();

        assert!(settings.autocommit);
        assert_eq!(settings.get("site.name"), Some(&Value::from("blog")));
        assert_eq!(settings.get_as::<u32>("retries").unwrap(), Some(3));
        assert_eq!(settings.get_as::<u32>("missing").unwrap(), None);
        assert!(settings.get_as::<u32>("site.name").is_err());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            Settings::from_json(r#"{ "autocommit": "sometimes" }"#),
            Err(ConfigError::Settings(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::default().with_overrides_from(|key| match key {
            "SHIKUMI_AUTOCOMMIT" => Some("Yes".into()),
            "SHIKUMI_INTROSPECTION" => Some("off".into()),
            _ => None,
        });

        assert!(settings.autocommit);
        assert!(!settings.introspection);
    }

    #[test]
    fn test_asbool() {
        for value in ["1", "true", "YES", " on ", "y", "t"] {
            assert!(asbool(value), "{value}");
        }

        for value in ["0", "false", "no", "", "maybe"] {
            assert!(!asbool(value), "{value}");
        }
    }
}
