// Host seams: the DOM, the media element and frame scheduling.
// The engine is generic over these so it runs against web-sys in the browser and fakes in tests.
// See DESIGN.md: Host seams

use std::fmt;

use crate::error::SyncError;
use crate::types::{ComputedStyle, Rect};

/// Attribute carrying a cue id on tagged text nodes.
pub const CUE_ATTRIBUTE: &str = "data-subtitle-id";

/// Read/write access to the document holding the cue-tagged text.
///
/// Queries are scoped to the content container where the implementation has one.
pub trait Dom {
    type Element: Clone + PartialEq + fmt::Debug + 'static;

    fn query_selector(&self, selector: &str) -> Option<Self::Element>;
    fn query_selector_all(&self, selector: &str) -> Vec<Self::Element>;

    /// Whether the element is still part of the document.
    fn is_attached(&self, element: &Self::Element) -> bool;

    fn attribute(&self, element: &Self::Element, name: &str) -> Option<String>;
    fn parent(&self, element: &Self::Element) -> Option<Self::Element>;
    /// Lowercase tag name.
    fn tag_name(&self, element: &Self::Element) -> String;
    fn child_element_count(&self, element: &Self::Element) -> u32;
    /// Length of the element's text content, in chars.
    fn text_len(&self, element: &Self::Element) -> usize;

    fn has_class(&self, element: &Self::Element, class: &str) -> bool;
    fn add_class(&self, element: &Self::Element, class: &str) -> Result<(), SyncError>;
    fn remove_class(&self, element: &Self::Element, class: &str) -> Result<(), SyncError>;

    fn computed_style(&self, element: &Self::Element) -> ComputedStyle;
    fn bounding_rect(&self, element: &Self::Element) -> Rect;
    /// Smooth scroll that centers the element in its scroll container.
    fn scroll_into_view_centered(&self, element: &Self::Element);

    /// Nearest inclusive ancestor matching `predicate`.
    fn closest(
        &self,
        element: &Self::Element,
        predicate: impl Fn(&Self, &Self::Element) -> bool,
    ) -> Option<Self::Element>
    where
        Self: Sized,
    {
        let mut current = Some(element.clone());
        while let Some(el) = current {
            if predicate(self, &el) {
                return Some(el);
            }
            current = self.parent(&el);
        }
        None
    }
}

/// The host media element driving playback.
pub trait MediaElement {
    fn current_time(&self) -> f64;
    fn is_paused(&self) -> bool;
    fn seek(&self, seconds: f64) -> Result<(), SyncError>;
    /// Request playback. A rejection surfaces as `SyncError::Playback`.
    fn play(&self) -> Result<(), SyncError>;
}

/// Opaque id of a scheduled frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(pub u32);

/// Frame and timer scheduling (`requestAnimationFrame` / `setTimeout`).
pub trait FrameScheduler {
    fn request_frame(&self, callback: Box<dyn FnOnce()>) -> FrameHandle;
    /// Cancel a pending frame. The callback is dropped without running.
    fn cancel_frame(&self, handle: FrameHandle);
    fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>);
}

/// Quote a value for use inside a `[attr="..."]` selector.
pub fn css_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\a "),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Escape a value for use as a `#id` selector.
pub fn css_ident(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        let plain = c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii();
        if i == 0 && c.is_ascii_digit() {
            // Identifiers cannot start with a digit.
            out.push_str(&format!("\\{:x} ", c as u32));
        } else if plain {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_string_escapes_quotes() {
        assert_eq!(css_string("12"), "\"12\"");
        assert_eq!(css_string("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }

    #[test]
    fn css_ident_escapes_leading_digit() {
        assert_eq!(css_ident("s12"), "s12");
        assert_eq!(css_ident("1"), "\\31 ");
        assert_eq!(css_ident("a.b"), "a\\.b");
    }
}
