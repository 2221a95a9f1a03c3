use std::env;
use std::fmt;

pub const STACK_LIMIT_ENV: &str = "TK_RT_STACK_LIMIT";
pub const HEAP_LIMIT_ENV: &str = "TK_RT_HEAP_LIMIT";

/// Limits copied into every runtime context. Zero means unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub stack_limit: usize,
    pub heap_limit: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigError {
    pub key: String,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid value '{}' for {}: expected a non-negative integer",
            self.value, self.key
        )
    }
}

impl std::error::Error for ConfigError {}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Unset keys keep the
    /// default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            stack_limit: parse_usize(&lookup, STACK_LIMIT_ENV, defaults.stack_limit)?,
            heap_limit: parse_usize(&lookup, HEAP_LIMIT_ENV, defaults.heap_limit)?,
        })
    }
}

pub fn parse_limit(key: &str, raw: &str) -> Result<usize, ConfigError> {
    let trimmed = raw.trim();
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => trimmed.parse::<usize>(),
    };
    parsed.map_err(|_| ConfigError {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn parse_usize(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => parse_limit(key, &value),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_keys_fall_back_to_unlimited() {
        let config = RuntimeConfig::from_lookup(|_| None).expect("empty env is valid");
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.stack_limit, 0);
    }

    #[test]
    fn reads_decimal_and_hex_limits() {
        let config = RuntimeConfig::from_lookup(|key| match key {
            STACK_LIMIT_ENV => Some("4096".to_string()),
            HEAP_LIMIT_ENV => Some(" 0x10000 ".to_string()),
            _ => None,
        })
        .expect("valid limits");
        assert_eq!(config.stack_limit, 4096);
        assert_eq!(config.heap_limit, 0x10000);
    }

    #[test]
    fn rejects_garbage() {
        let err = RuntimeConfig::from_lookup(|key| {
            (key == HEAP_LIMIT_ENV).then(|| "-1".to_string())
        })
        .expect_err("negative limit must fail");
        assert_eq!(err.key, HEAP_LIMIT_ENV);
        assert!(err.to_string().contains("'-1'"));
    }
}
