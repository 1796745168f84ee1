// Highlight style decision and CSS state. One current highlight at a time, fade in/out.
// Rule: layout is measured once per element and reused. Stale but cheap beats fresh every tick.
// See DESIGN.md: Highlight Decision & Renderer

use std::collections::HashMap;

use crate::dom::Dom;
use crate::error::SyncError;
use crate::types::{HighlightStyle, LayoutSnapshot};

/// Marker for the element matching the current cue.
pub const CURRENT_CLASS: &str = "audio-highlight";
pub const FADE_IN_CLASS: &str = "highlight-fade-in";
pub const FADE_OUT_CLASS: &str = "highlight-fade-out";

/// A parent with this many child elements counts as dense text.
const DENSE_CHILD_COUNT: u32 = 4;
/// A parent holding more characters than this counts as dense text.
const DENSE_TEXT_LEN: usize = 200;

/// Measure the layout context of `element`.
pub fn measure<D: Dom>(dom: &D, element: &D::Element) -> LayoutSnapshot {
    let style = dom.computed_style(element);
    let bounding_rect = dom.bounding_rect(element);
    let parent = dom.parent(element);

    let parent_width = parent
        .as_ref()
        .map_or(0.0, |p| dom.bounding_rect(p).width);
    let sibling_count = parent.as_ref().map_or(0, |p| dom.child_element_count(p));
    let parent_text_len = parent.as_ref().map_or(0, |p| dom.text_len(p));

    // Floats are blockified whatever their declared display.
    let floated = !(style.float.is_empty() || style.float == "none");
    let is_inline = style.display.starts_with("inline") && !floated;

    LayoutSnapshot {
        bounding_rect,
        parent_width,
        is_inline,
        is_in_paragraph: dom.closest(element, |d, el| d.tag_name(el) == "p").is_some(),
        has_siblings: sibling_count > 1,
        is_dense_text: sibling_count >= DENSE_CHILD_COUNT || parent_text_len > DENSE_TEXT_LEN,
        display: style.display,
        position: style.position,
        float: style.float,
    }
}

/// Decision table, first match wins.
pub fn choose_style(layout: &LayoutSnapshot) -> HighlightStyle {
    if layout.is_dense_text && layout.is_inline && layout.has_siblings {
        HighlightStyle::Minimal
    } else if layout.is_inline && layout.has_siblings {
        HighlightStyle::Medium
    } else if layout.is_in_paragraph && layout.is_wide() {
        HighlightStyle::Advanced
    } else {
        HighlightStyle::Standard
    }
}

/// Applies and removes highlight classes, caching layout per cue.
#[derive(Debug)]
pub struct HighlightRenderer<E> {
    snapshots: HashMap<String, (E, LayoutSnapshot)>,
}

impl<E: Clone + PartialEq> HighlightRenderer<E> {
    pub fn new() -> Self {
        HighlightRenderer {
            snapshots: HashMap::new(),
        }
    }

    /// Cached snapshot for `cue_id`, measured if absent or if the cue now lives on another element.
    pub fn layout<D: Dom<Element = E>>(&mut self, dom: &D, element: &E, cue_id: &str) -> LayoutSnapshot {
        if let Some((cached_for, snapshot)) = self.snapshots.get(cue_id) {
            if cached_for == element {
                return snapshot.clone();
            }
        }
        let snapshot = measure(dom, element);
        self.snapshots
            .insert(cue_id.to_string(), (element.clone(), snapshot.clone()));
        snapshot
    }

    /// Make `element` the highlighted one. Clears every other highlight class on it first.
    pub fn apply<D: Dom<Element = E>>(
        &mut self,
        dom: &D,
        element: &E,
        cue_id: &str,
    ) -> Result<HighlightStyle, SyncError> {
        let style = choose_style(&self.layout(dom, element, cue_id));

        strip(dom, element).map_err(|e| render_error(cue_id, e))?;
        for class in [CURRENT_CLASS, style.class_name(), FADE_IN_CLASS] {
            dom.add_class(element, class)
                .map_err(|e| render_error(cue_id, e))?;
        }
        Ok(style)
    }

    /// Start fading `element` out. The current marker goes immediately;
    /// [`finish_fade_out`](Self::finish_fade_out) strips the rest later.
    pub fn remove<D: Dom<Element = E>>(&self, dom: &D, element: &E) -> Result<(), SyncError> {
        dom.remove_class(element, CURRENT_CLASS)?;
        dom.remove_class(element, FADE_IN_CLASS)?;
        dom.add_class(element, FADE_OUT_CLASS)
    }

    /// Strip all highlight classes unless the element was highlighted again meanwhile.
    /// Returns whether anything was stripped.
    pub fn finish_fade_out<D: Dom<Element = E>>(&self, dom: &D, element: &E) -> Result<bool, SyncError> {
        if !dom.has_class(element, FADE_OUT_CLASS) || dom.has_class(element, CURRENT_CLASS) {
            return Ok(false);
        }
        strip(dom, element)?;
        Ok(true)
    }

    /// Strip everything now, without a fade.
    pub fn clear<D: Dom<Element = E>>(&self, dom: &D, element: &E) -> Result<(), SyncError> {
        strip(dom, element)
    }

    pub fn invalidate(&mut self) {
        self.snapshots.clear();
    }

    pub fn cached_layouts(&self) -> usize {
        self.snapshots.len()
    }
}

impl<E: Clone + PartialEq> Default for HighlightRenderer<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn strip<D: Dom>(dom: &D, element: &D::Element) -> Result<(), SyncError> {
    for class in [CURRENT_CLASS, FADE_IN_CLASS, FADE_OUT_CLASS] {
        dom.remove_class(element, class)?;
    }
    for style in HighlightStyle::ALL {
        dom.remove_class(element, style.class_name())?;
    }
    Ok(())
}

fn render_error(cue_id: &str, err: SyncError) -> SyncError {
    let message = match err {
        SyncError::Render { message, .. } => message,
        other => other.to_string(),
    };
    SyncError::Render {
        cue_id: cue_id.to_string(),
        message,
    }
}
