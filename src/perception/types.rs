use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::device::DeviceInfo;
use crate::geometry::{Bounds, LogicalPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Button,
    TextView,
    EditText,
    ImageView,
    ListView,
    RecyclerView,
    Webview,
    Dialog,
    Toggle,
    Spinner,
    Unknown,
}

impl ElementType {
    /// Infer the element type from a class name by ordered case-insensitive
    /// substring search. The order matters: more specific names first.
    pub fn from_class_name(class_name: &str) -> Self {
        let lower = class_name.to_lowercase();
        const ORDERED: [(&str, ElementType); 11] = [
            ("button", ElementType::Button),
            ("edittext", ElementType::EditText),
            ("textview", ElementType::TextView),
            ("imageview", ElementType::ImageView),
            ("recyclerview", ElementType::RecyclerView),
            ("listview", ElementType::ListView),
            ("webview", ElementType::Webview),
            ("dialog", ElementType::Dialog),
            ("toggle", ElementType::Toggle),
            ("switch", ElementType::Toggle),
            ("spinner", ElementType::Spinner),
        ];
        for (needle, ty) in ORDERED {
            if lower.contains(needle) {
                return ty;
            }
        }
        ElementType::Unknown
    }
}

/// A single node parsed from the device accessibility tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UIElement {
    /// Sequential depth-first traversal index, unique within one snapshot.
    pub element_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_desc: Option<String>,
    /// Logical-space bounds. Absent bounds means not targetable by coordinate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    pub element_type: ElementType,
    pub clickable: bool,
    pub scrollable: bool,
    pub focusable: bool,
    pub long_clickable: bool,
    pub checked: bool,
    pub enabled: bool,
    pub visible: bool,
}

impl UIElement {
    /// Eligible for the numeric tag overlay: clickable, visible, and bounded.
    pub fn taggable(&self) -> bool {
        self.clickable && self.visible && self.bounds.is_some()
    }

    /// Short human-readable label for prompts: text, then content-desc, then
    /// resource id, then the bare type.
    pub fn label(&self) -> String {
        if !self.text.is_empty() {
            return self.text.clone();
        }
        if let Some(desc) = self.content_desc.as_deref() {
            if !desc.is_empty() {
                return desc.to_string();
            }
        }
        if let Some(rid) = self.resource_id.as_deref() {
            if !rid.is_empty() {
                return rid.to_string();
            }
        }
        format!("{:?}", self.element_type)
    }
}

/// How a snapshot captures the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    None,
    Screenshot,
    Tagged,
    Grid,
}

/// Immutable UI snapshot for one decision cycle. Replaced, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UIState {
    pub activity: String,
    /// Depth-first traversal order; order only disambiguates otherwise
    /// identical elements.
    pub elements: Vec<UIElement>,
    /// Raw accessibility dump, retained for UI-settle comparison.
    pub xml_source: String,
    /// PNG screenshot, base64; raw or overlaid depending on capture mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_base64: Option<String>,
    /// Tag id -> element, present iff captured in tagged mode. Tags are
    /// 1-indexed in traversal order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_mapping: Option<BTreeMap<u32, UIElement>>,
    /// Grid label ("A1".."T20") -> logical cell center, present iff captured
    /// in grid mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_map: Option<BTreeMap<String, LogicalPoint>>,
    pub device_info: DeviceInfo,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl UIState {
    pub fn find_element(&self, element_id: &str) -> Option<&UIElement> {
        self.elements.iter().find(|e| e.element_id == element_id)
    }

    /// Elements a tier-1 prompt should see: clickable and visible.
    pub fn interactive_elements(&self) -> impl Iterator<Item = &UIElement> {
        self.elements.iter().filter(|e| e.clickable && e.visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_inference_order() {
        assert_eq!(
            ElementType::from_class_name("android.widget.Button"),
            ElementType::Button
        );
        // ImageButton matches "button" before "imageview" per the ordered scan
        assert_eq!(
            ElementType::from_class_name("android.widget.ImageButton"),
            ElementType::Button
        );
        assert_eq!(
            ElementType::from_class_name("androidx.appcompat.widget.AppCompatEditText"),
            ElementType::EditText
        );
        assert_eq!(
            ElementType::from_class_name("androidx.recyclerview.widget.RecyclerView"),
            ElementType::RecyclerView
        );
        assert_eq!(
            ElementType::from_class_name("android.widget.Switch"),
            ElementType::Toggle
        );
        assert_eq!(
            ElementType::from_class_name("android.view.ViewGroup"),
            ElementType::Unknown
        );
    }
}
