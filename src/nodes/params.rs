//! Typed parameter configs, one per node type.
//!
//! Raw `params` JSON is deserialized into these structs during validation
//! and again at execute time, so executor bodies never touch untyped maps.
//! Unknown keys are rejected to surface typos at workflow save.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::WaitUntil;
use crate::error::ExecError;

fn parse<T: serde::de::DeserializeOwned>(params: &Value) -> Result<T, ExecError> {
    serde_json::from_value(params.clone())
        .map_err(|e| ExecError::Validation(format!("invalid params: {e}")))
}

/// `navigate` — drive the page to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NavigateParams {
    /// Literal URL, or `"$seed"` / absent to navigate to the queue item's
    /// own URL
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub wait_until: WaitUntil,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl NavigateParams {
    pub fn parse(params: &Value) -> Result<Self, ExecError> {
        parse(params)
    }

    /// The URL this navigation targets for the given queue item.
    #[must_use]
    pub fn target<'a>(&'a self, item_url: &'a str) -> &'a str {
        match self.url.as_deref() {
            None | Some("$seed") | Some("$current") => item_url,
            Some(explicit) => explicit,
        }
    }
}

/// Post-extraction value transforms, applied in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    Trim,
    Lowercase,
    Uppercase,
    /// Parse the first number in the string, keeping it as a JSON number
    Number,
}

impl Transform {
    #[must_use]
    pub fn apply(&self, value: Value) -> Value {
        let Value::String(s) = value else {
            return value;
        };
        match self {
            Self::Trim => Value::String(s.trim().to_string()),
            Self::Lowercase => Value::String(s.to_lowercase()),
            Self::Uppercase => Value::String(s.to_uppercase()),
            Self::Number => {
                let numeric: String = s
                    .chars()
                    .skip_while(|c| !c.is_ascii_digit() && *c != '-')
                    .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                    .collect();
                numeric
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(Value::String(s), Value::Number)
            }
        }
    }
}

/// One field of an `extract` node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub selector: String,
    /// Attribute to read instead of text content
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub transforms: Vec<Transform>,
}

/// `extract` — read a keyed map of values off the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractParams {
    /// Field name → spec; BTreeMap keeps output ordering deterministic
    pub fields: BTreeMap<String, FieldSpec>,
    #[serde(default = "default_schema_key")]
    pub schema_key: String,
}

fn default_schema_key() -> String {
    "default".to_string()
}

impl ExtractParams {
    pub fn parse(params: &Value) -> Result<Self, ExecError> {
        let parsed: Self = parse(params)?;
        if parsed.fields.is_empty() {
            return Err(ExecError::Validation(
                "extract node requires at least one field".into(),
            ));
        }
        Ok(parsed)
    }
}

/// `discover` — collect hrefs for the frontier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoverParams {
    #[serde(default = "default_anchor_selector")]
    pub selector: String,
    #[serde(default = "default_href_attribute")]
    pub attribute: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "default_true")]
    pub dedupe: bool,
}

fn default_anchor_selector() -> String {
    "a".to_string()
}

fn default_href_attribute() -> String {
    "href".to_string()
}

const fn default_true() -> bool {
    true
}

impl DiscoverParams {
    pub fn parse(params: &Value) -> Result<Self, ExecError> {
        parse(params)
    }
}

/// `click` — dispatch a trusted click.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClickParams {
    pub selector: String,
    #[serde(default)]
    pub wait_after_ms: Option<u64>,
}

impl ClickParams {
    pub fn parse(params: &Value) -> Result<Self, ExecError> {
        parse(params)
    }
}

/// `wait` — wait for a selector or sleep a fixed duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitParams {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl WaitParams {
    pub fn parse(params: &Value) -> Result<Self, ExecError> {
        let parsed: Self = parse(params)?;
        if parsed.selector.is_none() && parsed.duration_ms.is_none() {
            return Err(ExecError::Validation(
                "wait node requires either 'selector' or 'duration_ms'".into(),
            ));
        }
        Ok(parsed)
    }
}

/// `scroll` — scroll the viewport, optionally repeatedly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScrollParams {
    #[serde(default)]
    pub dx: i64,
    #[serde(default = "default_scroll_dy")]
    pub dy: i64,
    #[serde(default = "default_one")]
    pub times: u32,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

const fn default_scroll_dy() -> i64 {
    800
}

const fn default_one() -> u32 {
    1
}

impl ScrollParams {
    pub fn parse(params: &Value) -> Result<Self, ExecError> {
        parse(params)
    }
}

/// Repeated action inside a `loop` node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LoopAction {
    Scroll {
        #[serde(default = "default_scroll_dy")]
        dy: i64,
    },
    Click { selector: String },
}

/// `loop` — bounded repetition of a scroll or click.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopParams {
    pub action: LoopAction,
    pub max_iterations: u32,
    /// Stop early once this selector matches
    #[serde(default)]
    pub stop_selector: Option<String>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl LoopParams {
    pub fn parse(params: &Value) -> Result<Self, ExecError> {
        let parsed: Self = parse(params)?;
        if parsed.max_iterations == 0 {
            return Err(ExecError::Validation(
                "loop node requires max_iterations >= 1".into(),
            ));
        }
        Ok(parsed)
    }
}

/// `conditional` — gate downstream nodes on selector presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionalParams {
    pub selector: String,
    /// Invert the check: gate opens when the selector is absent
    #[serde(default)]
    pub negate: bool,
}

impl ConditionalParams {
    pub fn parse(params: &Value) -> Result<Self, ExecError> {
        parse(params)
    }
}

/// `plugin` — a named binding in the closed plugin registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginParams {
    pub plugin: String,
    #[serde(default)]
    pub config: Value,
}

impl PluginParams {
    pub fn parse(params: &Value) -> Result<Self, ExecError> {
        parse(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn navigate_target_resolution() {
        let p = NavigateParams::parse(&json!({ "url": "$seed" })).expect("valid");
        assert_eq!(p.target("https://a/b"), "https://a/b");

        let p = NavigateParams::parse(&json!({})).expect("valid");
        assert_eq!(p.target("https://a/b"), "https://a/b");

        let p = NavigateParams::parse(&json!({ "url": "https://x" })).expect("valid");
        assert_eq!(p.target("https://a/b"), "https://x");
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(NavigateParams::parse(&json!({ "uarl": "typo" })).is_err());
        assert!(ClickParams::parse(&json!({ "selector": "a", "bogus": 1 })).is_err());
    }

    #[test]
    fn extract_requires_fields() {
        assert!(ExtractParams::parse(&json!({ "fields": {} })).is_err());
        let p = ExtractParams::parse(&json!({
            "fields": { "name": { "selector": "h1", "required": true } }
        }))
        .expect("valid");
        assert_eq!(p.schema_key, "default");
        assert!(p.fields["name"].required);
    }

    #[test]
    fn wait_needs_one_of() {
        assert!(WaitParams::parse(&json!({})).is_err());
        assert!(WaitParams::parse(&json!({ "duration_ms": 100 })).is_ok());
    }

    #[test]
    fn number_transform() {
        let v = Transform::Number.apply(Value::String("$ 1,299.99".replace(',', "")));
        assert_eq!(v, json!(1299.99));

        let untouched = Transform::Number.apply(Value::String("no digits".into()));
        assert_eq!(untouched, Value::String("no digits".into()));
    }

    #[test]
    fn loop_bounds() {
        assert!(
            LoopParams::parse(&json!({
                "action": { "type": "scroll" },
                "max_iterations": 0
            }))
            .is_err()
        );
        assert!(
            LoopParams::parse(&json!({
                "action": { "type": "click", "selector": ".more" },
                "max_iterations": 5
            }))
            .is_ok()
        );
    }
}
