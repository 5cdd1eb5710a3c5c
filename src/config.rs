use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use jsonschema::JSONSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::rules::RULE_IDS;

/// Default body length, in bytes, at which a method is reported as too large to JIT.
pub(crate) const DEFAULT_OVERSIZED_METHOD_THRESHOLD: usize = 8000;

/// Settings the analysis core recognizes.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct AnalysisConfig {
    pub(crate) oversized_method_threshold_bytes: usize,
    pub(crate) enabled_rules: BTreeSet<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            oversized_method_threshold_bytes: DEFAULT_OVERSIZED_METHOD_THRESHOLD,
            enabled_rules: RULE_IDS.iter().map(|id| id.to_string()).collect(),
        }
    }
}

impl AnalysisConfig {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("failed to load {}", path.display()))
    }

    pub(crate) fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).context("configuration is not valid JSON")?;
        validate(&value)?;
        serde_json::from_value(value).context("failed to deserialize configuration")
    }

    pub(crate) fn with_threshold(mut self, threshold: usize) -> Result<Self> {
        if threshold == 0 {
            anyhow::bail!("oversized method threshold must be at least 1 byte");
        }
        self.oversized_method_threshold_bytes = threshold;
        Ok(self)
    }

    pub(crate) fn with_enabled_rules<I, S>(mut self, rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut enabled = BTreeSet::new();
        for rule in rules {
            let rule = rule.into();
            if !RULE_IDS.contains(&rule.as_str()) {
                anyhow::bail!(
                    "unknown rule id: {rule} (known: {})",
                    RULE_IDS.join(", ")
                );
            }
            enabled.insert(rule);
        }
        self.enabled_rules = enabled;
        Ok(self)
    }

    pub(crate) fn is_enabled(&self, rule_id: &str) -> bool {
        self.enabled_rules.contains(rule_id)
    }
}

fn schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "oversizedMethodThresholdBytes": {
                "type": "integer",
                "minimum": 1
            },
            "enabledRules": {
                "type": "array",
                "uniqueItems": true,
                "items": {
                    "type": "string",
                    "enum": RULE_IDS
                }
            }
        }
    })
}

fn validate(value: &Value) -> Result<()> {
    let schema = schema();
    let compiled = JSONSchema::compile(&schema)
        .map_err(|err| anyhow::anyhow!("invalid configuration schema: {err}"))?;
    if let Err(errors) = compiled.validate(value) {
        let messages: Vec<String> = errors
            .map(|err| format!("{} at '{}'", err, err.instance_path))
            .collect();
        anyhow::bail!("invalid configuration: {}", messages.join("; "));
    }
    Ok(())
}
