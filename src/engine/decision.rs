//! The cascading four-tier decision engine.
//!
//! Tier 1 reads the accessibility hierarchy with a text-only model. When the
//! result fails the gating predicate the engine re-observes the screen and
//! climbs through the vision tiers: numeric tags, grid overlay, and finally
//! pure vision. Every tier consumes its own fresh snapshot; nothing ever
//! resolves coordinates against a stale tree.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::device::DeviceSession;
use crate::errors::{TapwrightError, TapwrightResult};
use crate::geometry::LogicalPoint;
use crate::llm::parser;
use crate::llm::prompts;
use crate::llm::provider::LlmProvider;
use crate::perception::observer::UiObserver;
use crate::perception::types::{CaptureMode, UIElement, UIState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMethod {
    Hierarchy,
    VisionTagging,
    GridOverlay,
    PureVision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Tap,
    DoubleTap,
    LongPress,
    TypeText,
    Swipe,
    Scroll,
    Pinch,
    Zoom,
    Error,
}

impl ActionKind {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "click" => Some(Self::Click),
            "tap" => Some(Self::Tap),
            "double_tap" => Some(Self::DoubleTap),
            "long_press" => Some(Self::LongPress),
            "type_text" => Some(Self::TypeText),
            "swipe" => Some(Self::Swipe),
            "scroll" => Some(Self::Scroll),
            "pinch" => Some(Self::Pinch),
            "zoom" => Some(Self::Zoom),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Tap => "tap",
            Self::DoubleTap => "double_tap",
            Self::LongPress => "long_press",
            Self::TypeText => "type_text",
            Self::Swipe => "swipe",
            Self::Scroll => "scroll",
            Self::Pinch => "pinch",
            Self::Zoom => "zoom",
            Self::Error => "error",
        }
    }
}

/// Percentage-space location from the pure-vision tier, 0..=100 on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentLocation {
    pub x_percent: f64,
    pub y_percent: f64,
}

/// Output of the decision engine for one instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDecision {
    pub action: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    /// Logical coordinates, populated by the coordinate tiers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<LogicalPoint>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub reasoning: String,
    /// Three states: None = the model did not say; Some(0) = parse failure;
    /// Some(x) = explicit. The fallback predicate relies on the distinction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub method: DecisionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<PercentLocation>,
}

impl ActionDecision {
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(|v| v.as_f64())
    }
}

/// A decision plus the snapshot it was made against and the re-resolved
/// target element (always from that same snapshot).
#[derive(Debug, Clone)]
pub struct Decided {
    pub decision: ActionDecision,
    pub snapshot: UIState,
    pub target: Option<UIElement>,
}

pub struct DecisionEngine {
    observer: UiObserver,
    device: Arc<dyn DeviceSession>,
    llm: Arc<dyn LlmProvider>,
    config: AgentConfig,
}

impl DecisionEngine {
    pub fn new(
        device: Arc<dyn DeviceSession>,
        llm: Arc<dyn LlmProvider>,
        config: AgentConfig,
    ) -> Self {
        Self {
            observer: UiObserver::new(device.clone()),
            device,
            llm,
            config,
        }
    }

    pub fn set_config(&mut self, config: AgentConfig) {
        self.config = config;
    }

    /// Decide an action for the instruction. `history` is the short list of
    /// prior `{action}-{reasoning}` strings from this session.
    pub async fn decide(
        &self,
        instruction: &str,
        history: &[String],
    ) -> TapwrightResult<Decided> {
        if self.config.vision.pure_vision_only {
            tracing::info!(instruction, "pure-vision-only mode");
            return self.tier_pure_vision(instruction, history).await;
        }

        let decided = self.tier_hierarchy(instruction, history).await?;
        let vision_enabled = self.config.vision_enabled();

        if !self.should_fallback(&decided) || !vision_enabled {
            if decided.decision.action == ActionKind::Error {
                return Err(TapwrightError::Parse(format!(
                    "hierarchy tier failed and vision fallback is disabled: {}",
                    decided.decision.reasoning
                )));
            }
            return Ok(decided);
        }

        tracing::info!(
            confidence = ?decided.decision.confidence,
            action = decided.decision.action.as_str(),
            "falling back to vision tiers"
        );

        match self.tier_tagged(instruction, history).await {
            Ok(decided) => return Ok(decided),
            Err(e) => {
                tracing::warn!(error = %e, "tagged tier failed, trying grid overlay");
            }
        }

        match self.tier_grid(instruction, history).await {
            Ok(decided) => Ok(decided),
            Err(e) => {
                if self.config.vision.pure_vision.enabled {
                    tracing::warn!(error = %e, "grid tier failed, trying pure vision");
                    self.tier_pure_vision(instruction, history).await
                } else {
                    Err(e)
                }
            }
        }
    }

    /// The gating predicate. Fallback triggers when any of:
    /// always_use_vision is set; the decision names an element that does not
    /// resolve (and that fallback is enabled); explicit confidence is below
    /// threshold (and that fallback is enabled); the decision is an error.
    fn should_fallback(&self, decided: &Decided) -> bool {
        let v = &self.config.vision;
        let decision = &decided.decision;

        if decision.action == ActionKind::Error {
            return true;
        }
        if v.always_use_vision {
            return true;
        }
        if v.fallback_on_element_not_found
            && decision.element_id.is_some()
            && decided.target.is_none()
        {
            return true;
        }
        if v.fallback_on_low_confidence {
            // None means the model did not state a confidence; that alone is
            // not grounds for fallback.
            if let Some(confidence) = decision.confidence {
                if confidence < v.confidence_threshold {
                    return true;
                }
            }
        }
        false
    }

    // ── Tier 1: accessibility hierarchy ────────────────────────────────────

    async fn tier_hierarchy(
        &self,
        instruction: &str,
        history: &[String],
    ) -> TapwrightResult<Decided> {
        let snapshot = self.observer.snapshot(CaptureMode::None, 0).await?;
        let prompt = prompts::hierarchy_prompt(instruction, &snapshot, history);
        let raw = self
            .llm
            .query(&prompt, Some(prompts::DECISION_SYSTEM_PROMPT))
            .await?;

        let decision = parser::parse_decision(&raw, DecisionMethod::Hierarchy);
        let target = decision
            .element_id
            .as_deref()
            .and_then(|id| snapshot.find_element(id))
            .cloned();

        tracing::info!(
            action = decision.action.as_str(),
            element_id = ?decision.element_id,
            confidence = ?decision.confidence,
            resolved = target.is_some(),
            "hierarchy tier decision"
        );

        Ok(Decided {
            decision,
            snapshot,
            target,
        })
    }

    // ── Tier 2: numeric tag overlay ────────────────────────────────────────

    async fn tier_tagged(
        &self,
        instruction: &str,
        history: &[String],
    ) -> TapwrightResult<Decided> {
        let snapshot = self.observer.snapshot(CaptureMode::Tagged, 0).await?;
        let mapping = snapshot
            .tag_mapping
            .as_ref()
            .ok_or_else(|| TapwrightError::Perception("tagged snapshot lacks mapping".into()))?;
        if mapping.is_empty() {
            return Err(TapwrightError::Resolution(
                "no taggable elements on screen".into(),
            ));
        }
        let screenshot = snapshot
            .screenshot_base64
            .as_deref()
            .ok_or_else(|| TapwrightError::Perception("tagged snapshot lacks screenshot".into()))?;

        let prompt = prompts::tagged_prompt(instruction, mapping, history);
        let raw = self
            .llm
            .query_with_vision(&prompt, screenshot, Some(prompts::DECISION_SYSTEM_PROMPT))
            .await?;

        let mut decision = parser::parse_decision(&raw, DecisionMethod::VisionTagging);
        if decision.action == ActionKind::Error {
            return Err(TapwrightError::Parse(decision.reasoning));
        }
        let tag_id = decision
            .tag_id
            .ok_or_else(|| TapwrightError::Parse("response missing tag_id".into()))?;
        let element = mapping
            .get(&tag_id)
            .ok_or_else(|| {
                TapwrightError::Resolution(format!("tag {tag_id} not present in the overlay"))
            })?
            .clone();

        decision.element_id = Some(element.element_id.clone());
        decision.coordinates = element.bounds.map(|b| b.center());
        if decision.confidence.is_none() {
            decision.confidence = Some(0.8);
        }

        tracing::info!(
            tag_id,
            element_id = %element.element_id,
            coordinates = ?decision.coordinates,
            "vision tagging tier decision"
        );

        // Re-resolution happens against this tier's own snapshot.
        let target = snapshot.find_element(&element.element_id).cloned();
        Ok(Decided {
            decision,
            snapshot,
            target,
        })
    }

    // ── Tier 3: grid overlay ───────────────────────────────────────────────

    async fn tier_grid(
        &self,
        instruction: &str,
        history: &[String],
    ) -> TapwrightResult<Decided> {
        let grid_size = self.config.vision.effective_grid_size();
        let snapshot = self.observer.snapshot(CaptureMode::Grid, grid_size).await?;
        let grid_map = snapshot
            .grid_map
            .as_ref()
            .ok_or_else(|| TapwrightError::Perception("grid snapshot lacks map".into()))?;
        let screenshot = snapshot
            .screenshot_base64
            .as_deref()
            .ok_or_else(|| TapwrightError::Perception("grid snapshot lacks screenshot".into()))?;

        let prompt = prompts::grid_prompt(instruction, grid_size, history);
        let raw = self
            .llm
            .query_with_vision(&prompt, screenshot, Some(prompts::DECISION_SYSTEM_PROMPT))
            .await?;

        let mut decision = parser::parse_decision(&raw, DecisionMethod::GridOverlay);
        if decision.action == ActionKind::Error {
            return Err(TapwrightError::Parse(decision.reasoning));
        }
        let label = decision
            .grid_position
            .clone()
            .ok_or_else(|| TapwrightError::Parse("response missing grid_position".into()))?;
        let center = *grid_map.get(&label).ok_or_else(|| {
            TapwrightError::Resolution(format!("grid cell {label} outside the {grid_size}x{grid_size} grid"))
        })?;

        decision.coordinates = Some(center);
        decision.element_id = None;
        if decision.confidence.is_none() {
            decision.confidence = Some(0.7);
        }

        tracing::info!(
            cell = %label,
            x = center.x,
            y = center.y,
            "grid overlay tier decision"
        );

        Ok(Decided {
            decision,
            snapshot,
            target: None,
        })
    }

    // ── Tier 4: pure vision ────────────────────────────────────────────────

    async fn tier_pure_vision(
        &self,
        instruction: &str,
        history: &[String],
    ) -> TapwrightResult<Decided> {
        let snapshot = self.observer.snapshot_screen_only().await?;
        let screenshot = snapshot
            .screenshot_base64
            .as_deref()
            .ok_or_else(|| TapwrightError::Perception("snapshot lacks screenshot".into()))?;
        let window = self.device.get_window_size().await?;

        let prompt = prompts::pure_vision_prompt(instruction, window, history);
        let raw = self
            .llm
            .query_with_vision(&prompt, screenshot, Some(prompts::DECISION_SYSTEM_PROMPT))
            .await?;

        let mut decision = parser::parse_decision(&raw, DecisionMethod::PureVision);
        if decision.action == ActionKind::Error {
            return Err(TapwrightError::Parse(decision.reasoning));
        }
        let location = decision
            .location
            .ok_or_else(|| TapwrightError::Parse("response missing location".into()))?;

        let x = (window.width as f64 * location.x_percent / 100.0).floor() as i32;
        let y = (window.height as f64 * location.y_percent / 100.0).floor() as i32;
        decision.coordinates = Some(LogicalPoint::new(x, y));
        decision.element_id = None;
        if decision.confidence.is_none() {
            decision.confidence = Some(0.7);
        }

        let minimum = self.config.vision.pure_vision.minimum_confidence;
        let confidence = decision.confidence.unwrap_or(0.0);
        if confidence < minimum {
            return Err(TapwrightError::Confidence(format!(
                "pure vision confidence {confidence:.2} below minimum {minimum:.2}"
            )));
        }

        tracing::info!(
            x_percent = location.x_percent,
            y_percent = location.y_percent,
            x,
            y,
            confidence,
            "pure vision tier decision"
        );

        Ok(Decided {
            decision,
            snapshot,
            target: None,
        })
    }
}
