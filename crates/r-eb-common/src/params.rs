//! ---
//! eb_section: "04-configuration-orchestration"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Activity parameter maps and typed accessors."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::units::{parse_count, parse_duration};

/// Ordered string parameters describing an activity.
///
/// Values stay as strings until an accessor interprets them, which keeps the
/// map usable for workload specific knobs the engine knows nothing about.
/// Entries are written `key=value` and separated by `;` or whitespace, e.g.
/// `alias=smoke;type=diag;cycles=0..10K;cyclerate=1000,1.5,hybrid`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterMap {
    values: IndexMap<String, String>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `key=value;key=value` string.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let mut map = Self::new();
        for entry in spec
            .split(|c: char| c == ';' || c.is_whitespace())
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
        {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedEntry(entry.to_owned()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::MalformedEntry(entry.to_owned()));
            }
            map.set(key, value.trim());
        }
        Ok(map)
    }

    /// Build a map from `key=value` arguments as passed on a command line.
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = Self::new();
        for arg in args {
            let parsed = Self::parse(arg.as_ref())?;
            map.extend(parsed);
        }
        Ok(map)
    }

    /// Insert or replace a value, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(key.into(), value.into())
    }

    /// Builder style variant of [`ParameterMap::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.shift_remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ConfigError::Missing(key.to_owned()))
    }

    /// Read a count, honouring unit suffixes such as `10K`.
    pub fn get_count(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.get(key)
            .map(|value| {
                parse_count(value).map_err(|err| ConfigError::invalid(key, value, err.to_string()))
            })
            .transpose()
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>, ConfigError> {
        match self.get_count(key)? {
            Some(count) => usize::try_from(count)
                .map(Some)
                .map_err(|_| ConfigError::invalid(key, &count.to_string(), "too large")),
            None => Ok(None),
        }
    }

    pub fn get_f64(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        self.get(key)
            .map(|value| {
                value
                    .trim()
                    .parse::<f64>()
                    .map_err(|err| ConfigError::invalid(key, value, err.to_string()))
            })
            .transpose()
    }

    /// Read a duration where bare numbers are milliseconds.
    pub fn get_millis(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        self.get(key)
            .map(|value| {
                parse_duration(value, Duration::from_millis(1))
                    .map_err(|err| ConfigError::invalid(key, value, err.to_string()))
            })
            .transpose()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Extend<(String, String)> for ParameterMap {
    fn extend<T: IntoIterator<Item = (String, String)>>(&mut self, iter: T) {
        for (key, value) in iter {
            self.values.insert(key, value);
        }
    }
}

impl IntoIterator for ParameterMap {
    type Item = (String, String);
    type IntoIter = indexmap::map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.set(key, value);
        }
        map
    }
}

impl FromStr for ParameterMap {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ParameterMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.values {
            if !first {
                f.write_str(";")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_semicolon_and_whitespace_separated_entries() {
        let map = ParameterMap::parse("alias=a; type=diag cycles=0..10K;cyclerate=1000,1.5,hybrid")
            .unwrap();
        assert_eq!(map.get("alias"), Some("a"));
        assert_eq!(map.get("type"), Some("diag"));
        assert_eq!(map.get("cycles"), Some("0..10K"));
        assert_eq!(map.get("cyclerate"), Some("1000,1.5,hybrid"));
        assert_eq!(map.to_string(), "alias=a;type=diag;cycles=0..10K;cyclerate=1000,1.5,hybrid");
    }

    #[test]
    fn rejects_entries_without_equals() {
        assert_eq!(
            ParameterMap::parse("alias=a;oops"),
            Err(ConfigError::MalformedEntry("oops".into()))
        );
        assert!(ParameterMap::parse("=value").is_err());
    }

    #[test]
    fn typed_accessors_report_the_offending_key() {
        let map: ParameterMap = [("threads", "ten"), ("interval", "2s"), ("phases", "3")]
            .into_iter()
            .collect();
        let err = map.get_usize("threads").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "threads"));
        assert_eq!(map.get_millis("interval").unwrap(), Some(Duration::from_secs(2)));
        assert_eq!(map.get_usize("phases").unwrap(), Some(3));
        assert_eq!(map.get_usize("absent").unwrap(), None);
        assert_eq!(map.require("alias"), Err(ConfigError::Missing("alias".into())));
    }

    #[test]
    fn later_arguments_override_earlier_ones() {
        let map = ParameterMap::from_args(["threads=1", "threads=4 alias=x"]).unwrap();
        assert_eq!(map.get("threads"), Some("4"));
        assert_eq!(map.len(), 2);
    }
}
