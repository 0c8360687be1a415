//! Gesture execution.
//!
//! The dispatcher turns an `ActionDecision` into device gestures, waits for
//! the UI to settle afterwards, and optionally persists before/after
//! screenshots. All coordinates are logical; when a decision carries explicit
//! coordinates they win over the resolved element's center.

use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine as _;

use crate::device::{DeviceSession, TouchStep, WindowSize};
use crate::engine::decision::{ActionDecision, ActionKind};
use crate::engine::settle::{wait_for_ui_settle, SettleConfig};
use crate::errors::{TapwrightError, TapwrightResult};
use crate::geometry::LogicalPoint;
use crate::perception::types::UIElement;

const DOUBLE_TAP_GAP_MS: u64 = 75;
const LONG_PRESS_MS: u64 = 1000;
const LONG_PRESS_PAUSE_MS: u64 = 500;
const SWIPE_MOVE_MS: u64 = 100;
const PINCH_MOVE_MS: u64 = 250;
const PINCH_OUTER_OFFSET: i32 = 100;
const PINCH_INNER_OFFSET: i32 = 10;
const DEFAULT_SWIPE_DISTANCE: f64 = 0.5;
const SCROLL_DISTANCE: f64 = 0.3;

pub struct ActionDispatcher {
    device: Arc<dyn DeviceSession>,
    settle: SettleConfig,
    artifacts: Option<ArtifactStore>,
}

impl ActionDispatcher {
    pub fn new(device: Arc<dyn DeviceSession>, artifacts_dir: Option<PathBuf>) -> Self {
        let artifacts = artifacts_dir.and_then(|dir| match ArtifactStore::new(dir) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(error = %e, "artifact dir unavailable, persistence disabled");
                None
            }
        });
        Self {
            device,
            settle: SettleConfig::default(),
            artifacts,
        }
    }

    pub fn with_settle_config(mut self, settle: SettleConfig) -> Self {
        self.settle = settle;
        self
    }

    /// Execute one decision. Returns the before/after screenshot paths when
    /// artifact persistence is active.
    pub async fn execute(
        &mut self,
        decision: &ActionDecision,
        target: Option<&UIElement>,
    ) -> TapwrightResult<(Option<PathBuf>, Option<PathBuf>)> {
        if let Some(store) = self.artifacts.as_mut() {
            store.step_counter += 1;
        }
        let before = self.capture_artifact("before").await;

        let result = self.dispatch(decision, target).await;

        let after = self.capture_artifact("after").await;
        result.map(|()| (before, after))
    }

    async fn dispatch(
        &self,
        decision: &ActionDecision,
        target: Option<&UIElement>,
    ) -> TapwrightResult<()> {
        // Explicit coordinates beat the element center when both exist.
        let point = decision
            .coordinates
            .or_else(|| target.and_then(|t| t.bounds).map(|b| b.center()));

        match decision.action {
            ActionKind::Click | ActionKind::Tap => {
                let point = require_point(point, decision.action)?;
                tracing::info!(x = point.x, y = point.y, "tap");
                self.device.tap(point).await?;
                self.settle().await;
            }
            ActionKind::DoubleTap => {
                let point = require_point(point, decision.action)?;
                tracing::info!(x = point.x, y = point.y, "double tap");
                self.device.tap(point).await?;
                self.device.pause(DOUBLE_TAP_GAP_MS).await?;
                self.device.tap(point).await?;
                self.settle().await;
            }
            ActionKind::LongPress => {
                let point = require_point(point, decision.action)?;
                tracing::info!(x = point.x, y = point.y, "long press");
                self.device.long_press(point, LONG_PRESS_MS).await?;
                // Fixed pause instead of a settle wait: context dialogs keep
                // the dump churning while they animate in.
                self.device.pause(LONG_PRESS_PAUSE_MS).await?;
            }
            ActionKind::TypeText => {
                let text = decision.param_str("text").unwrap_or_default().to_string();
                if let Some(point) = point {
                    tracing::info!(x = point.x, y = point.y, "tap to focus before typing");
                    self.device.tap(point).await?;
                    self.settle().await;
                }
                tracing::info!(len = text.len(), "type text");
                let keys: Vec<String> = text.chars().map(|c| c.to_string()).collect();
                self.device.type_keys(&keys).await?;
                self.settle().await;
            }
            ActionKind::Swipe => {
                let direction = decision.param_str("direction").unwrap_or("up").to_string();
                let distance = decision
                    .param_f64("distance")
                    .unwrap_or(DEFAULT_SWIPE_DISTANCE)
                    .clamp(0.0, 1.0);
                self.swipe(&direction, distance).await?;
                self.settle().await;
            }
            ActionKind::Scroll => {
                let direction = decision.param_str("direction").unwrap_or("down").to_string();
                self.swipe(&direction, SCROLL_DISTANCE).await?;
                self.settle().await;
            }
            ActionKind::Pinch => {
                self.two_finger(PINCH_OUTER_OFFSET, PINCH_INNER_OFFSET).await?;
                self.settle().await;
            }
            ActionKind::Zoom => {
                self.two_finger(PINCH_INNER_OFFSET, PINCH_OUTER_OFFSET).await?;
                self.settle().await;
            }
            ActionKind::Error => {
                return Err(TapwrightError::Gesture(
                    "cannot execute an error decision".into(),
                ));
            }
        }
        Ok(())
    }

    async fn swipe(&self, direction: &str, distance: f64) -> TapwrightResult<()> {
        let window = self.device.get_window_size().await?;
        let (start, end) = swipe_endpoints(window, direction, distance)?;
        tracing::info!(
            direction,
            distance,
            start_x = start.x,
            start_y = start.y,
            end_x = end.x,
            end_y = end.y,
            "swipe"
        );
        self.device
            .swipe_gesture(vec![
                TouchStep::Press {
                    x: start.x,
                    y: start.y,
                },
                TouchStep::Wait { ms: SWIPE_MOVE_MS },
                TouchStep::MoveTo { x: end.x, y: end.y },
                TouchStep::Release,
            ])
            .await
    }

    /// Two synchronized fingers moving vertically around the screen center:
    /// outer offset -> inner offset contracts (pinch), reversed it expands
    /// (zoom).
    async fn two_finger(&self, from_offset: i32, to_offset: i32) -> TapwrightResult<()> {
        let window = self.device.get_window_size().await?;
        let cx = window.width as i32 / 2;
        let cy = window.height as i32 / 2;
        tracing::info!(from_offset, to_offset, "two-finger gesture");

        let finger = |sign: i32| {
            vec![
                TouchStep::Press {
                    x: cx,
                    y: cy + sign * from_offset,
                },
                TouchStep::Wait { ms: PINCH_MOVE_MS },
                TouchStep::MoveTo {
                    x: cx,
                    y: cy + sign * to_offset,
                },
                TouchStep::Release,
            ]
        };
        self.device.multi_touch(vec![finger(-1), finger(1)]).await
    }

    async fn settle(&self) {
        wait_for_ui_settle(self.device.as_ref(), &self.settle).await;
    }

    /// Screenshot persistence is best-effort; failures never fail the step.
    async fn capture_artifact(&self, phase: &str) -> Option<PathBuf> {
        let store = self.artifacts.as_ref()?;
        match self.device.take_screenshot().await {
            Ok(b64) => match store.save_step_png(&b64, phase) {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, phase, "artifact write failed");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, phase, "artifact screenshot failed");
                None
            }
        }
    }
}

fn require_point(point: Option<LogicalPoint>, action: ActionKind) -> TapwrightResult<LogicalPoint> {
    point.ok_or_else(|| {
        TapwrightError::Gesture(format!(
            "No element or coordinates to {}",
            action.as_str()
        ))
    })
}

fn swipe_endpoints(
    window: WindowSize,
    direction: &str,
    distance: f64,
) -> TapwrightResult<(LogicalPoint, LogicalPoint)> {
    let cx = window.width as i32 / 2;
    let cy = window.height as i32 / 2;
    let dy = (window.height as f64 * distance / 2.0) as i32;
    let dx = (window.width as f64 * distance / 2.0) as i32;

    let (start, end) = match direction {
        "up" => (
            LogicalPoint::new(cx, cy + dy),
            LogicalPoint::new(cx, cy - dy),
        ),
        "down" => (
            LogicalPoint::new(cx, cy - dy),
            LogicalPoint::new(cx, cy + dy),
        ),
        "left" => (
            LogicalPoint::new(cx + dx, cy),
            LogicalPoint::new(cx - dx, cy),
        ),
        "right" => (
            LogicalPoint::new(cx - dx, cy),
            LogicalPoint::new(cx + dx, cy),
        ),
        other => {
            return Err(TapwrightError::Gesture(format!(
                "unknown swipe direction '{other}'"
            )))
        }
    };
    Ok((start, end))
}

/// Per-session artifact directory with a monotonic step counter.
struct ArtifactStore {
    dir: PathBuf,
    step_counter: u32,
}

impl ArtifactStore {
    fn new(dir: PathBuf) -> TapwrightResult<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            step_counter: 0,
        })
    }

    fn save_step_png(&self, b64: &str, phase: &str) -> TapwrightResult<PathBuf> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64.trim())
            .map_err(|e| TapwrightError::Perception(format!("screenshot decode: {e}")))?;
        let path = self
            .dir
            .join(format!("step_{}_{}.png", self.step_counter, phase));
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}
