//! Serde helpers for human-readable durations such as `"15s"` or `"500ms"`

use std::time::Duration;

use serde::{Deserialize, Deserializer};

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(serde::de::Error::custom)
}

pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|raw| parse(&raw).map_err(serde::de::Error::custom))
        .transpose()
}

fn parse(raw: &str) -> Result<Duration, String> {
    duration_str::parse(raw).map_err(|e| format!("invalid duration '{raw}': {e}"))
}
