//! Layered configuration properties.
//!
//! Properties are computed once at build time by overlaying, in order:
//! registered suppliers (later suppliers override earlier ones), the process
//! environment, and explicit overrides. Property customizers then overlay
//! their returned maps. Keys are dotted lowercase (`otel.metrics.exporter`);
//! environment variable names are normalized (`OTEL_METRICS_EXPORTER`).

use std::collections::HashMap;
use std::time::Duration;

use super::ConfigError;

/// The effective, immutable property set used during assembly.
#[derive(Clone, Debug, Default)]
pub struct ConfigProperties {
    values: HashMap<String, String>,
}

/// Normalizes a dotted property key: trimmed and lowercased.
pub(crate) fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Normalizes an environment variable name into a dotted property key.
pub(crate) fn normalize_env_key(key: &str) -> String {
    key.trim().to_lowercase().replace('_', ".")
}

impl ConfigProperties {
    /// Builds the property set from the given layers, lowest precedence
    /// first: `suppliers` in order, then `env`, then `overrides`.
    pub(crate) fn compute(
        suppliers: &[HashMap<String, String>],
        env: impl Iterator<Item = (String, String)>,
        overrides: &HashMap<String, String>,
    ) -> Self {
        let mut values = HashMap::new();

        for supplier in suppliers {
            for (key, value) in supplier {
                values.insert(normalize_key(key), value.clone());
            }
        }

        for (key, value) in env {
            let is_otel = key
                .get(..5)
                .map(|prefix| prefix.eq_ignore_ascii_case("otel_"))
                .unwrap_or(false);
            if is_otel {
                values.insert(normalize_env_key(&key), value);
            }
        }

        for (key, value) in overrides {
            values.insert(normalize_key(key), value.clone());
        }

        ConfigProperties { values }
    }

    /// Overlays `overrides` on top of this property set.
    pub(crate) fn overlay(&self, overrides: &HashMap<String, String>) -> Self {
        let mut values = self.values.clone();
        for (key, value) in overrides {
            values.insert(normalize_key(key), value.clone());
        }
        ConfigProperties { values }
    }

    /// The raw string value for `key`, if set and non-empty.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values
            .get(&normalize_key(key))
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// The string value for `key`, or `default` when unset.
    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or(default).to_string()
    }

    /// The boolean value for `key`. Accepts `true`/`false`, case-insensitive.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get_string(key) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: "expected true or false".to_string(),
                }),
            },
        }
    }

    /// The integer value for `key`.
    pub fn get_int(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.get_string(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: "expected an integer".to_string(),
                }),
        }
    }

    /// The duration value for `key`.
    ///
    /// A bare number is milliseconds; the suffixes `ms`, `s`, `m` and `h`
    /// are recognized.
    pub fn get_duration(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let Some(raw) = self.get_string(key) else {
            return Ok(default);
        };
        let raw = raw.trim();

        let (digits, unit): (&str, fn(u64) -> Duration) = if let Some(n) = raw.strip_suffix("ms") {
            (n, Duration::from_millis)
        } else if let Some(n) = raw.strip_suffix('s') {
            (n, Duration::from_secs)
        } else if let Some(n) = raw.strip_suffix('m') {
            (n, |v| Duration::from_secs(v * 60))
        } else if let Some(n) = raw.strip_suffix('h') {
            (n, |v| Duration::from_secs(v * 3600))
        } else {
            (raw, Duration::from_millis)
        };

        digits
            .trim()
            .parse::<u64>()
            .map(unit)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                reason: "expected a duration such as 500, 500ms, 30s, 1m or 1h".to_string(),
            })
    }

    /// The comma-separated list value for `key`, entries trimmed and empty
    /// entries removed.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get_string(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The comma-separated `key=value` map for `key`, in listed order.
    pub fn get_dict(&self, key: &str) -> Result<Vec<(String, String)>, ConfigError> {
        let Some(raw) = self.get_string(key) else {
            return Ok(Vec::new());
        };

        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry
                    .split_once('=')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                    .filter(|(k, _)| !k.is_empty())
                    .ok_or_else(|| ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: entry.to_string(),
                        reason: "expected key=value entries".to_string(),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn precedence_env_over_suppliers_later_supplier_wins() {
        let p1 = map(&[("a", "1"), ("b", "2")]);
        let p2 = map(&[("b", "3"), ("c", "4")]);
        let env = vec![("OTEL_A".to_string(), "9".to_string())];
        let overrides = HashMap::new();

        let props = ConfigProperties::compute(&[p1, p2], env.into_iter(), &overrides);

        assert_eq!(props.get_string("a"), Some("9"));
        assert_eq!(props.get_string("b"), Some("3"));
        assert_eq!(props.get_string("c"), Some("4"));
    }

    #[test]
    fn overrides_win_over_env() {
        let env = vec![(
            "OTEL_METRICS_EXPORTER".to_string(),
            "otlp".to_string(),
        )];
        let overrides = map(&[("otel.metrics.exporter", "none")]);

        let props = ConfigProperties::compute(&[], env.into_iter(), &overrides);
        assert_eq!(props.get_string("otel.metrics.exporter"), Some("none"));
    }

    #[test]
    fn env_keys_are_normalized() {
        let env = vec![(
            "OTEL_EXPORTER_OTLP_PROTOCOL".to_string(),
            "grpc".to_string(),
        )];
        let props = ConfigProperties::compute(&[], env.into_iter(), &HashMap::new());
        assert_eq!(props.get_string("otel.exporter.otlp.protocol"), Some("grpc"));
    }

    #[test]
    fn non_otel_env_entries_are_ignored() {
        let env = vec![("PATH".to_string(), "/usr/bin".to_string())];
        let props = ConfigProperties::compute(&[], env.into_iter(), &HashMap::new());
        assert_eq!(props.get_string("path"), None);
    }

    #[test]
    fn duration_parsing() {
        let props = ConfigProperties::compute(
            &[map(&[
                ("bare", "250"),
                ("millis", "250ms"),
                ("secs", "30s"),
                ("mins", "1m"),
                ("bad", "soon"),
            ])],
            std::iter::empty(),
            &HashMap::new(),
        );

        let default = Duration::from_secs(60);
        assert_eq!(
            props.get_duration("bare", default).unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(
            props.get_duration("millis", default).unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(
            props.get_duration("secs", default).unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(
            props.get_duration("mins", default).unwrap(),
            Duration::from_secs(60)
        );
        assert_eq!(props.get_duration("missing", default).unwrap(), default);
        assert!(props.get_duration("bad", default).is_err());
    }

    #[test]
    fn list_and_dict_parsing() {
        let props = ConfigProperties::compute(
            &[map(&[
                ("list", "tracecontext, baggage ,,"),
                ("dict", "authorization=secret, tenant=a"),
            ])],
            std::iter::empty(),
            &HashMap::new(),
        );

        assert_eq!(props.get_list("list"), vec!["tracecontext", "baggage"]);
        assert_eq!(
            props.get_dict("dict").unwrap(),
            vec![
                ("authorization".to_string(), "secret".to_string()),
                ("tenant".to_string(), "a".to_string())
            ]
        );
    }
}
