//! Named, typed encoder options.
//!
//! Backends declare the options they understand in an [`OptionTable`] and
//! delegate `set_option` / `option` to it. Values arrive as strings (they
//! usually come from user settings) and are validated against the declared
//! kind before being stored.

use std::collections::BTreeMap;

use crate::CodecError;

/// Type and range of an option.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionKind {
    /// Integer within an inclusive range. Accepts `k`, `M` and `G` suffixes.
    Int { min: i64, max: i64 },
    /// `0`/`1`/`true`/`false`.
    Bool,
    /// One of a fixed set of names.
    Choice(Vec<String>),
    /// Free-form text.
    Text,
}

#[derive(Debug, Clone)]
struct OptionEntry {
    kind: OptionKind,
    value: String,
}

/// Declared options of one encoder and their current values.
#[derive(Debug, Clone, Default)]
pub struct OptionTable {
    entries: BTreeMap<String, OptionEntry>,
}

impl OptionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an option with its default value.
    #[must_use]
    pub fn declare(mut self, key: &str, kind: OptionKind, default: &str) -> Self {
        self.entries.insert(
            key.to_string(),
            OptionEntry {
                kind,
                value: default.to_string(),
            },
        );
        self
    }

    /// Declare an integer option.
    #[must_use]
    pub fn int(self, key: &str, min: i64, max: i64, default: i64) -> Self {
        self.declare(key, OptionKind::Int { min, max }, &default.to_string())
    }

    /// Declare a boolean option.
    #[must_use]
    pub fn flag(self, key: &str, default: bool) -> Self {
        self.declare(key, OptionKind::Bool, if default { "1" } else { "0" })
    }

    /// Declare an option restricted to `choices`.
    #[must_use]
    pub fn choice(self, key: &str, choices: &[&str], default: &str) -> Self {
        let choices = choices.iter().map(|c| c.to_string()).collect();
        self.declare(key, OptionKind::Choice(choices), default)
    }

    /// Returns true if `key` is declared.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Validate and store a value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), CodecError> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| CodecError::UnknownOption(key.to_string()))?;
        entry.value = normalize(key, &entry.kind, value)?;
        Ok(())
    }

    /// Current value as text.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Current value of an integer or boolean option.
    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(|entry| entry.value.parse().ok())
    }

    /// Current value of a boolean option.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_int(key).map(|value| value != 0)
    }

    /// Iterate over declared option names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Check `value` against `kind`, returning the canonical stored form.
fn normalize(key: &str, kind: &OptionKind, value: &str) -> Result<String, CodecError> {
    let value = value.trim();
    match kind {
        OptionKind::Int { min, max } => {
            let parsed = parse_int(value)
                .ok_or_else(|| CodecError::invalid_value(key, value, "not an integer"))?;
            if parsed < *min || parsed > *max {
                return Err(CodecError::invalid_value(
                    key,
                    value,
                    format!("out of range [{}, {}]", min, max),
                ));
            }
            Ok(parsed.to_string())
        }
        OptionKind::Bool => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Ok("1".to_string()),
            "0" | "false" | "off" | "no" => Ok("0".to_string()),
            _ => Err(CodecError::invalid_value(key, value, "not a boolean")),
        },
        OptionKind::Choice(choices) => {
            if choices.iter().any(|c| c == value) {
                Ok(value.to_string())
            } else {
                Err(CodecError::invalid_value(
                    key,
                    value,
                    format!("expected one of {}", choices.join(", ")),
                ))
            }
        }
        OptionKind::Text => Ok(value.to_string()),
    }
}

/// Parse an integer with an optional SI suffix (`2500k`, `6M`).
fn parse_int(value: &str) -> Option<i64> {
    let (digits, scale) = match value.char_indices().last()? {
        (idx, 'k' | 'K') => (&value[..idx], 1_000),
        (idx, 'M') => (&value[..idx], 1_000_000),
        (idx, 'G') => (&value[..idx], 1_000_000_000),
        _ => (value, 1),
    };
    digits.parse::<i64>().ok()?.checked_mul(scale)
}
