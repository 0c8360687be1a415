//! UI observer: turns a live device session into immutable `UIState`
//! snapshots, attaching the overlay the requested capture mode calls for.

use std::sync::Arc;

use base64::Engine as _;

use crate::device::DeviceSession;
use crate::errors::{TapwrightError, TapwrightResult};
use crate::perception::overlay;
use crate::perception::tree;
use crate::perception::types::{CaptureMode, UIState};

pub struct UiObserver {
    device: Arc<dyn DeviceSession>,
}

impl UiObserver {
    pub fn new(device: Arc<dyn DeviceSession>) -> Self {
        Self { device }
    }

    /// Capture one snapshot. Two snapshots taken in the same UI state are
    /// semantically equivalent modulo timestamps.
    pub async fn snapshot(
        &self,
        mode: CaptureMode,
        grid_size: u32,
    ) -> TapwrightResult<UIState> {
        let xml_source = self.device.get_page_source().await?;
        let elements = tree::parse_tree(&xml_source);
        if elements.is_empty() && !xml_source.is_empty() {
            tracing::warn!("accessibility dump produced no elements");
        }

        let activity = match self.device.get_current_activity().await {
            Ok(a) if !a.is_empty() => a,
            Ok(_) => "Unknown".to_string(),
            Err(e) => {
                tracing::debug!(error = %e, "activity query failed");
                "Unknown".to_string()
            }
        };

        let mut state = UIState {
            activity,
            elements,
            xml_source,
            screenshot_base64: None,
            tag_mapping: None,
            grid_map: None,
            device_info: self.device.capabilities(),
            timestamp: chrono::Utc::now(),
        };

        match mode {
            CaptureMode::None => {}
            CaptureMode::Screenshot => {
                state.screenshot_base64 = Some(self.device.take_screenshot().await?);
            }
            CaptureMode::Tagged => {
                let raw = self.capture_png().await?;
                let window = self.device.get_window_size().await?;
                let (overlaid, mapping) =
                    overlay::draw_numeric_tags(&raw, &state.elements, window)?;
                tracing::debug!(tags = mapping.len(), "numeric tag overlay rendered");
                state.screenshot_base64 = Some(encode_b64(&overlaid));
                state.tag_mapping = Some(mapping);
            }
            CaptureMode::Grid => {
                let raw = self.capture_png().await?;
                let window = self.device.get_window_size().await?;
                let (overlaid, grid_map) = overlay::draw_grid(&raw, window, grid_size)?;
                tracing::debug!(cells = grid_map.len(), grid_size, "grid overlay rendered");
                state.screenshot_base64 = Some(encode_b64(&overlaid));
                state.grid_map = Some(grid_map);
            }
        }

        Ok(state)
    }

    /// Screenshot-only observation for the pure-vision tier: one raw capture,
    /// no accessibility tree query.
    pub async fn snapshot_screen_only(&self) -> TapwrightResult<UIState> {
        let screenshot = self.device.take_screenshot().await?;
        Ok(UIState {
            activity: "Unknown".to_string(),
            elements: Vec::new(),
            xml_source: String::new(),
            screenshot_base64: Some(screenshot),
            tag_mapping: None,
            grid_map: None,
            device_info: self.device.capabilities(),
            timestamp: chrono::Utc::now(),
        })
    }

    async fn capture_png(&self) -> TapwrightResult<Vec<u8>> {
        let b64 = self.device.take_screenshot().await?;
        base64::engine::general_purpose::STANDARD
            .decode(b64.trim())
            .map_err(|e| TapwrightError::Perception(format!("screenshot decode: {e}")))
    }
}

fn encode_b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
