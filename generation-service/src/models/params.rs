//! Generation parameter normalization.
//!
//! Clients send a loose `params` object. Only a small, fixed set of keys is
//! forwarded, and the output size is pinned so cost stays predictable.

use serde::Serialize;
use serde_json::{Map, Value};

/// Fixed output aspect ratio.
pub const OUTPUT_SIZE: &str = "2048x1152";

const DEFAULT_SEASON: &str = "summer";
const DEFAULT_TIME: &str = "noon";
const DEFAULT_WEATHER: &str = "clear";
const MAX_INTERVENTIONS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NormalizedParams {
    /// Free-form text prompt. Every other key is dropped.
    Text { text: Value, size: &'static str },
    /// Scenario controls.
    Scenario {
        season: String,
        time: String,
        weather: String,
        interventions: Vec<Value>,
        size: &'static str,
    },
}

impl NormalizedParams {
    /// Text that is appended to the generation instruction.
    pub fn prompt_suffix(&self) -> String {
        match self {
            NormalizedParams::Text { text, .. } => match text {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            NormalizedParams::Scenario {
                season,
                time,
                weather,
                interventions,
                ..
            } => {
                let mut description = format!(
                    "Render the scene in {} at {} with {} weather.",
                    season, time, weather
                );
                let interventions: Vec<String> = interventions
                    .iter()
                    .map(|i| match i {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                if !interventions.is_empty() {
                    description.push_str(" Apply these changes: ");
                    description.push_str(&interventions.join("; "));
                    description.push('.');
                }
                description
            }
        }
    }
}

/// Sanitize raw request parameters. Never fails: anything missing or
/// malformed falls back to its default.
pub fn normalize(params: &Value) -> NormalizedParams {
    let empty = Map::new();
    let params = params.as_object().unwrap_or(&empty);

    if let Some(text) = params.get("text").filter(|t| !t.is_null()) {
        return NormalizedParams::Text {
            text: text.clone(),
            size: OUTPUT_SIZE,
        };
    }

    let interventions = params
        .get("interventions")
        .and_then(Value::as_array)
        .map(|list| list.iter().take(MAX_INTERVENTIONS).cloned().collect())
        .unwrap_or_default();

    NormalizedParams::Scenario {
        season: string_or(params, "season", DEFAULT_SEASON),
        time: string_or(params, "time", DEFAULT_TIME),
        weather: string_or(params, "weather", DEFAULT_WEATHER),
        interventions,
        size: OUTPUT_SIZE,
    }
}

fn string_or(params: &Map<String, Value>, key: &str, default: &str) -> String {
    params
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_drops_every_other_key() {
        let normalized = normalize(&json!({
            "text": "sunset",
            "season": "winter",
            "interventions": ["trees"],
            "size": "4096x4096"
        }));

        assert_eq!(
            serde_json::to_value(&normalized).unwrap(),
            json!({ "text": "sunset", "size": "2048x1152" })
        );
    }

    #[test]
    fn null_text_falls_through_to_scenario() {
        let normalized = normalize(&json!({ "text": null }));
        assert!(matches!(normalized, NormalizedParams::Scenario { .. }));
    }

    #[test]
    fn scenario_defaults_apply_when_missing() {
        let normalized = normalize(&json!({}));

        assert_eq!(
            serde_json::to_value(&normalized).unwrap(),
            json!({
                "season": "summer",
                "time": "noon",
                "weather": "clear",
                "interventions": [],
                "size": "2048x1152"
            })
        );
    }

    #[test]
    fn interventions_keep_first_four_in_order() {
        let normalized = normalize(&json!({
            "season": "autumn",
            "interventions": ["a", "b", "c", "d", "e", "f"]
        }));

        match normalized {
            NormalizedParams::Scenario {
                season,
                interventions,
                ..
            } => {
                assert_eq!(season, "autumn");
                assert_eq!(interventions, vec![json!("a"), json!("b"), json!("c"), json!("d")]);
            }
            other => panic!("expected scenario, got {:?}", other),
        }
    }

    #[test]
    fn malformed_fields_fall_back_silently() {
        let normalized = normalize(&json!({
            "season": 42,
            "weather": null,
            "interventions": "not-a-list"
        }));

        assert_eq!(
            normalized,
            NormalizedParams::Scenario {
                season: "summer".to_string(),
                time: "noon".to_string(),
                weather: "clear".to_string(),
                interventions: Vec::new(),
                size: OUTPUT_SIZE,
            }
        );
    }

    #[test]
    fn non_object_params_are_treated_as_empty() {
        assert_eq!(normalize(&Value::Null), normalize(&json!({})));
        assert_eq!(normalize(&json!(["text"])), normalize(&json!({})));
    }

    #[test]
    fn prompt_suffix_uses_text_verbatim() {
        let normalized = normalize(&json!({ "text": "a rainy boulevard" }));
        assert_eq!(normalized.prompt_suffix(), "a rainy boulevard");
    }

    #[test]
    fn prompt_suffix_describes_scenario() {
        let normalized = normalize(&json!({
            "season": "winter",
            "time": "dusk",
            "interventions": ["add bike lanes", "plant trees"]
        }));

        assert_eq!(
            normalized.prompt_suffix(),
            "Render the scene in winter at dusk with clear weather. \
             Apply these changes: add bike lanes; plant trees."
        );
    }
}
