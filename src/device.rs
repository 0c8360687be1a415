//! The device capability surface.
//!
//! Everything the engine needs from the outside world is this one trait; the
//! concrete WebDriver/Appium client lives outside the crate and implements it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::TapwrightResult;
use crate::geometry::LogicalPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            platform: "Unknown".to_string(),
            platform_version: None,
            device_name: None,
        }
    }
}

/// One step of a single-finger gesture timeline. Coordinates are logical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TouchStep {
    Press { x: i32, y: i32 },
    Wait { ms: u64 },
    MoveTo { x: i32, y: i32 },
    Release,
}

/// Abstract device session. All coordinates are logical; the implementation
/// owns any further translation the transport needs.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// UTF-8 accessibility dump of the current UI.
    async fn get_page_source(&self) -> TapwrightResult<String>;

    /// Foreground activity identifier. Allowed to fail on platforms that
    /// do not expose one.
    async fn get_current_activity(&self) -> TapwrightResult<String>;

    /// Window size in logical pixels.
    async fn get_window_size(&self) -> TapwrightResult<WindowSize>;

    /// Base64-encoded PNG screenshot.
    async fn take_screenshot(&self) -> TapwrightResult<String>;

    async fn tap(&self, point: LogicalPoint) -> TapwrightResult<()>;

    async fn long_press(&self, point: LogicalPoint, duration_ms: u64) -> TapwrightResult<()>;

    /// Single-finger press/wait/move/release timeline.
    async fn swipe_gesture(&self, steps: Vec<TouchStep>) -> TapwrightResult<()>;

    /// Synchronized multi-finger timelines (pinch/zoom).
    async fn multi_touch(&self, fingers: Vec<Vec<TouchStep>>) -> TapwrightResult<()>;

    /// Inject a sequence of characters into the focused element.
    async fn type_keys(&self, keys: &[String]) -> TapwrightResult<()>;

    async fn pause(&self, ms: u64) -> TapwrightResult<()>;

    fn capabilities(&self) -> DeviceInfo;
}
