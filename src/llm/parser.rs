//! Lenient structured-response parsing.
//!
//! Models return JSON in four observed shapes: bare, fenced, embedded in
//! prose, and wrapped in stray backticks. The extractor tries each in turn;
//! a decision that survives none of them becomes the universal
//! "proceed to the next tier" signal: `action=error, confidence=0`.

use serde_json::Value;

use crate::engine::decision::{ActionDecision, ActionKind, DecisionMethod, PercentLocation};
use crate::errors::{TapwrightError, TapwrightResult};

/// Recover the first JSON object (or array) from a model response.
pub fn extract_json(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('`').trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(trimmed.to_string());
    }

    // Fenced block, with or without a language tag.
    let fence = "```";
    if let Some(start) = raw.find(fence) {
        let after_fence = &raw[start + fence.len()..];
        let after_lang =
            after_fence.trim_start_matches(|c: char| c.is_alphanumeric() || c == '_');
        if let Some(end) = after_lang.find(fence) {
            let block = after_lang[..end].trim().trim_matches('`').trim();
            if block.starts_with('{') || block.starts_with('[') {
                return Some(block.to_string());
            }
        }
    }

    // First balanced {...} block inside surrounding prose.
    let start = raw.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in raw[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(raw[start..start + idx + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a tier response into an `ActionDecision`. Never fails: anything
/// unusable comes back as the error decision with confidence zero.
pub fn parse_decision(raw: &str, method: DecisionMethod) -> ActionDecision {
    let Some(json_str) = extract_json(raw) else {
        return error_decision(method, raw);
    };
    let Ok(value) = serde_json::from_str::<Value>(&json_str) else {
        return error_decision(method, raw);
    };

    let Some(action) = value["action"]
        .as_str()
        .and_then(ActionKind::from_str_lenient)
    else {
        return error_decision(method, raw);
    };

    let element_id = string_or_number(&value["element_id"]);
    let tag_id = match &value["tag_id"] {
        Value::Number(n) => n.as_u64().map(|n| n as u32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    let grid_position = value["grid_position"]
        .as_str()
        .map(|s| s.trim().to_uppercase());
    let location = value["location"].as_object().and_then(|loc| {
        Some(PercentLocation {
            x_percent: loc.get("x_percent")?.as_f64()?,
            y_percent: loc.get("y_percent")?.as_f64()?,
        })
    });

    let parameters = value["parameters"]
        .as_object()
        .cloned()
        .unwrap_or_default();
    let reasoning = value["reasoning"].as_str().unwrap_or("").to_string();
    let confidence = value["confidence"].as_f64().map(|c| c.clamp(0.0, 1.0));

    ActionDecision {
        action,
        element_id,
        coordinates: None,
        parameters,
        reasoning,
        confidence,
        method,
        tag_id,
        grid_position,
        location,
    }
}

fn string_or_number(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn error_decision(method: DecisionMethod, raw: &str) -> ActionDecision {
    let snippet: String = raw.chars().take(200).collect();
    ActionDecision {
        action: ActionKind::Error,
        element_id: None,
        coordinates: None,
        parameters: serde_json::Map::new(),
        reasoning: format!("unparseable response: {snippet}"),
        confidence: Some(0.0),
        method,
        tag_id: None,
        grid_position: None,
        location: None,
    }
}

/// Outcome of one LLM-judged verification.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub passed: bool,
    pub assertions: Vec<String>,
    pub issues: Vec<String>,
    pub confidence: Option<f64>,
}

pub fn parse_verification(raw: &str) -> TapwrightResult<VerificationOutcome> {
    let json_str = extract_json(raw).ok_or_else(|| {
        TapwrightError::Parse(format!(
            "verification response contains no JSON: {}",
            raw.chars().take(200).collect::<String>()
        ))
    })?;
    let value: Value = serde_json::from_str(&json_str)
        .map_err(|e| TapwrightError::Parse(format!("verification JSON invalid: {e}")))?;

    let passed = value["passed"]
        .as_bool()
        .ok_or_else(|| TapwrightError::Parse("verification response missing 'passed'".into()))?;

    Ok(VerificationOutcome {
        passed,
        assertions: string_list(&value["assertions"]),
        issues: string_list(&value["issues"]),
        confidence: value["confidence"].as_f64(),
    })
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
