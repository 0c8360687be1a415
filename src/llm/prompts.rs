//! Tier-specific prompt templates.
//!
//! Templates are data: each one carries a literal example of the JSON the
//! engine expects back, so the response schema is never left to the model's
//! imagination.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::device::WindowSize;
use crate::perception::overlay::col_label;
use crate::perception::types::{UIElement, UIState};

pub const DECISION_SYSTEM_PROMPT: &str = "\
You are a mobile UI automation assistant. You decide exactly one UI action \
per request and respond with a single JSON object, no surrounding prose. \
Valid actions: click, tap, double_tap, long_press, type_text, swipe, scroll, \
pinch, zoom. For type_text put the text in parameters.text; for swipe and \
scroll put direction (up/down/left/right) and optional distance (0..1) in \
parameters.";

const HIERARCHY_EXAMPLE: &str = r#"{
  "action": "click",
  "element_id": "7",
  "parameters": {},
  "reasoning": "Element 7 is the blue login button the instruction refers to",
  "confidence": 0.95
}"#;

const TAGGED_EXAMPLE: &str = r#"{
  "action": "click",
  "tag_id": 3,
  "parameters": {},
  "reasoning": "The circle labeled 3 sits on the login button",
  "confidence": 0.85
}"#;

const GRID_EXAMPLE: &str = r#"{
  "action": "click",
  "grid_position": "E5",
  "parameters": {},
  "reasoning": "The login button is centered in cell E5",
  "confidence": 0.7
}"#;

const PURE_VISION_EXAMPLE: &str = r#"{
  "element": "Blue login button",
  "location": { "x_percent": 50, "y_percent": 85 },
  "action": "click",
  "parameters": {},
  "reasoning": "The button sits centered near the bottom of the screen",
  "confidence": 0.75
}"#;

const VERIFICATION_EXAMPLE: &str = r#"{
  "passed": true,
  "assertions": ["A home screen header is visible"],
  "issues": [],
  "confidence": 0.9
}"#;

/// Tier 1: structured hierarchy, text only.
pub fn hierarchy_prompt(instruction: &str, state: &UIState, history: &[String]) -> String {
    let mut elements_block = String::new();
    for element in state.interactive_elements() {
        let bounds = element
            .bounds
            .map(|b| format!("[{},{}][{},{}]", b.x1, b.y1, b.x2, b.y2))
            .unwrap_or_else(|| "no bounds".to_string());
        let _ = writeln!(
            elements_block,
            "  [{}] {:?} \"{}\" bounds={}",
            element.element_id,
            element.element_type,
            element.label(),
            bounds,
        );
    }
    if elements_block.is_empty() {
        elements_block.push_str("  (no clickable elements)\n");
    }

    format!(
        "Current activity: {activity}\nPlatform: {platform}\n\n\
         Clickable elements on screen:\n{elements}\n\
         Instruction: {instruction}\n{history}\n\
         Choose the action and target element that carry out the instruction.\n\
         Respond with JSON exactly like this example:\n{example}",
        activity = state.activity,
        platform = state.device_info.platform,
        elements = elements_block,
        instruction = instruction,
        history = history_block(history),
        example = HIERARCHY_EXAMPLE,
    )
}

/// Tier 2: screenshot with numbered circles.
pub fn tagged_prompt(
    instruction: &str,
    mapping: &BTreeMap<u32, UIElement>,
    history: &[String],
) -> String {
    let mut labels = String::new();
    for (tag, element) in mapping {
        let _ = writeln!(labels, "  [{}] {}", tag, element.label());
    }

    format!(
        "The screenshot shows the current screen with numbered circles drawn \
         over every clickable element.\n\nTagged elements:\n{labels}\n\
         Instruction: {instruction}\n{history}\n\
         Pick the tag whose element carries out the instruction.\n\
         Respond with JSON exactly like this example:\n{example}",
        labels = labels,
        instruction = instruction,
        history = history_block(history),
        example = TAGGED_EXAMPLE,
    )
}

/// Tier 3: screenshot with a labeled N×N grid.
pub fn grid_prompt(instruction: &str, grid_size: u32, history: &[String]) -> String {
    let last_col = col_label(grid_size - 1);
    format!(
        "The screenshot has a {n}x{n} coordinate grid overlay. Columns are \
         labeled A-{last} left to right, rows 1-{n} top to bottom; A1 is the \
         top-left cell and {last}{n} the bottom-right.\n\n\
         Instruction: {instruction}\n{history}\n\
         Identify the cell containing the target of the instruction.\n\
         Respond with JSON exactly like this example:\n{example}",
        n = grid_size,
        last = last_col,
        instruction = instruction,
        history = history_block(history),
        example = GRID_EXAMPLE,
    )
}

/// Tier 4: raw screenshot plus screen dimensions.
pub fn pure_vision_prompt(
    instruction: &str,
    window: WindowSize,
    history: &[String],
) -> String {
    format!(
        "The screenshot shows the current screen of a {w}x{h} device.\n\n\
         Instruction: {instruction}\n{history}\n\
         Locate the target of the instruction and give its position as \
         percentages of the screen size (0-100 on each axis).\n\
         Respond with JSON exactly like this example:\n{example}",
        w = window.width,
        h = window.height,
        instruction = instruction,
        history = history_block(history),
        example = PURE_VISION_EXAMPLE,
    )
}

/// Verification: up to 50 visible elements plus the condition.
pub fn verification_prompt(condition: &str, state: &UIState) -> String {
    let mut elements_block = String::new();
    for element in state.elements.iter().filter(|e| e.visible).take(50) {
        let _ = writeln!(
            elements_block,
            "  [{}] {:?} \"{}\"",
            element.element_id,
            element.element_type,
            element.label(),
        );
    }
    if elements_block.is_empty() {
        elements_block.push_str("  (no visible elements)\n");
    }

    format!(
        "Current activity: {activity}\n\nVisible elements:\n{elements}\n\
         Condition to verify: {condition}\n\n\
         Judge whether the condition holds for this screen.\n\
         Respond with JSON exactly like this example:\n{example}",
        activity = state.activity,
        elements = elements_block,
        condition = condition,
        example = VERIFICATION_EXAMPLE,
    )
}

fn history_block(history: &[String]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let mut block = String::from("\nPrevious actions:\n");
    for entry in history {
        let _ = writeln!(block, "  - {entry}");
    }
    block
}
