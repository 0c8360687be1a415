//! Accessibility dump parser.
//!
//! The device returns an XML-like dump whose document order is already a
//! depth-first traversal, so a single forward scan over the element tags
//! yields the elements in the order the engine needs. The scanner is
//! deliberately lenient: anything it cannot make sense of is skipped rather
//! than failing the whole snapshot.

use std::collections::HashMap;

use crate::geometry::Bounds;
use crate::perception::types::{ElementType, UIElement};

/// Parse the raw dump into the element sequence. Never fails; a hopelessly
/// malformed dump just produces fewer (or zero) elements.
pub fn parse_tree(source: &str) -> Vec<UIElement> {
    let mut elements = Vec::new();
    let bytes = source.as_bytes();
    let mut pos = 0usize;
    let mut index = 0usize;

    while let Some(open) = find_byte(bytes, b'<', pos) {
        // Skip closing tags, comments, processing instructions, doctypes.
        let after = open + 1;
        if after >= bytes.len() {
            break;
        }
        match bytes[after] {
            b'/' | b'!' | b'?' => {
                pos = match find_byte(bytes, b'>', after) {
                    Some(close) => close + 1,
                    None => break,
                };
                continue;
            }
            _ => {}
        }

        let Some(close) = find_byte(bytes, b'>', after) else {
            break;
        };
        let tag_body = &source[after..close];
        let tag_body = tag_body.strip_suffix('/').unwrap_or(tag_body);

        let (tag_name, attr_src) = match tag_body.find(char::is_whitespace) {
            Some(split) => (&tag_body[..split], &tag_body[split..]),
            None => (tag_body, ""),
        };

        // The <hierarchy> wrapper is a document root, not a UI node.
        if !tag_name.eq_ignore_ascii_case("hierarchy") {
            let attrs = parse_attributes(attr_src);
            elements.push(element_from_attrs(index, tag_name, &attrs));
            index += 1;
        }

        pos = close + 1;
    }

    elements
}

fn find_byte(haystack: &[u8], needle: u8, from: usize) -> Option<usize> {
    haystack[from..]
        .iter()
        .position(|&b| b == needle)
        .map(|i| i + from)
}

fn element_from_attrs(
    index: usize,
    tag_name: &str,
    attrs: &HashMap<String, String>,
) -> UIElement {
    // Android dumps put the widget class in the "class" attribute; iOS page
    // sources use the tag name itself (XCUIElementTypeButton).
    let class_name = attrs
        .get("class")
        .cloned()
        .or_else(|| (!tag_name.is_empty()).then(|| tag_name.to_string()));

    let element_type = class_name
        .as_deref()
        .map(ElementType::from_class_name)
        .unwrap_or(ElementType::Unknown);

    let bounds = attrs
        .get("bounds")
        .and_then(|b| parse_bounds(b))
        .or_else(|| bounds_from_frame(attrs));

    UIElement {
        element_id: index.to_string(),
        text: attrs
            .get("text")
            .or_else(|| attrs.get("label"))
            .or_else(|| attrs.get("value"))
            .cloned()
            .unwrap_or_default(),
        resource_id: non_empty(attrs.get("resource-id").or_else(|| attrs.get("name"))),
        class_name,
        content_desc: non_empty(attrs.get("content-desc")),
        bounds,
        element_type,
        clickable: flag(attrs, "clickable", false),
        scrollable: flag(attrs, "scrollable", false),
        focusable: flag(attrs, "focusable", false),
        long_clickable: flag(attrs, "long-clickable", false),
        checked: flag(attrs, "checked", false),
        // enabled and visible default to true when the platform omits them
        enabled: flag(attrs, "enabled", true),
        visible: flag(attrs, "visible", true) && flag(attrs, "displayed", true),
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

fn flag(attrs: &HashMap<String, String>, key: &str, default: bool) -> bool {
    match attrs.get(key).map(String::as_str) {
        Some("true") => true,
        Some("false") => false,
        _ => default,
    }
}

/// Parse `key="value"` pairs. Values keep their XML entities decoded.
fn parse_attributes(src: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut rest = src.trim_start();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().to_string();
        let after_eq = rest[eq + 1..].trim_start();
        let Some(stripped) = after_eq.strip_prefix('"') else { break };
        let Some(end) = stripped.find('"') else { break };
        if !key.is_empty() {
            attrs.insert(key, unescape(&stripped[..end]));
        }
        rest = stripped[end + 1..].trim_start();
    }
    attrs
}

fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Android bounds format: `[x1,y1][x2,y2]`.
pub fn parse_bounds(raw: &str) -> Option<Bounds> {
    let inner = raw.strip_prefix('[')?;
    let (first, second) = inner.split_once("][")?;
    let second = second.strip_suffix(']')?;
    let (x1, y1) = first.split_once(',')?;
    let (x2, y2) = second.split_once(',')?;
    Some(Bounds::new(
        x1.trim().parse().ok()?,
        y1.trim().parse().ok()?,
        x2.trim().parse().ok()?,
        y2.trim().parse().ok()?,
    ))
}

/// iOS page sources carry x/y/width/height instead of a bounds string.
fn bounds_from_frame(attrs: &HashMap<String, String>) -> Option<Bounds> {
    let x: i32 = attrs.get("x")?.parse().ok()?;
    let y: i32 = attrs.get("y")?.parse().ok()?;
    let w: i32 = attrs.get("width")?.parse().ok()?;
    let h: i32 = attrs.get("height")?.parse().ok()?;
    Some(Bounds::new(x, y, x + w, y + h))
}
