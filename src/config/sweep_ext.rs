use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;

use crate::config::sweep::SweepOptions;
use crate::config::traits::MergeFromMap;

fn as_millis(key: &str, value: &Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| anyhow::anyhow!("Option '{key}' must be a non-negative integer, got {value}"))
}

fn as_flag(key: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| anyhow::anyhow!("Option '{key}' must be a boolean, got {value}"))
}

impl MergeFromMap<String, Value> for SweepOptions {
    fn merge_from_map(&self, map: &HashMap<String, Value>) -> Result<Self> {
        let mut result = self.clone();

        if let Some(v) = map.get("settle_delay_ms") {
            result.settle_delay_ms = as_millis("settle_delay_ms", v)?;
        }

        if let Some(v) = map.get("poll_interval_ms") {
            result.poll_interval_ms = as_millis("poll_interval_ms", v)?;
        }

        if let Some(v) = map.get("drain_interval_ms") {
            result.drain_interval_ms = as_millis("drain_interval_ms", v)?;
        }

        if let Some(v) = map.get("drain") {
            result.drain = as_flag("drain", v)?;
        }

        if let Some(v) = map.get("silence_output") {
            result.silence_output = as_flag("silence_output", v)?;
        }

        Ok(result)
    }
}
