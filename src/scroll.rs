// Keeps the highlighted element inside the container's comfortable band.
// Rule: never scroll an element that is already visible. No jitter on every tick.
// See DESIGN.md: Scroll Controller

use crate::dom::Dom;
use crate::types::Rect;

/// Whether `element` sits inside `container` with `margin` to spare at top and bottom.
pub fn is_visible(element: &Rect, container: &Rect, margin: f64) -> bool {
    element.top() >= container.top() + margin && element.bottom() <= container.bottom() - margin
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollController {
    margin: f64,
}

impl ScrollController {
    pub fn new(margin: f64) -> Self {
        ScrollController { margin }
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    /// Scroll `element` to the container's center if it is not comfortably visible.
    /// Returns whether a scroll was requested.
    pub fn ensure_visible<D: Dom>(
        &self,
        dom: &D,
        element: &D::Element,
        container: &D::Element,
        autoscroll: bool,
    ) -> bool {
        if !autoscroll {
            return false;
        }
        let element_rect = dom.bounding_rect(element);
        let container_rect = dom.bounding_rect(container);
        if is_visible(&element_rect, &container_rect, self.margin) {
            return false;
        }
        dom.scroll_into_view_centered(element);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDom;

    #[test]
    fn visibility_band() {
        let container = Rect::new(0.0, 100.0, 400.0, 300.0);
        assert!(is_visible(&Rect::new(0.0, 130.0, 10.0, 20.0), &container, 30.0));
        assert!(is_visible(&Rect::new(0.0, 350.0, 10.0, 20.0), &container, 30.0));
        assert!(!is_visible(&Rect::new(0.0, 129.0, 10.0, 20.0), &container, 30.0));
        assert!(!is_visible(&Rect::new(0.0, 360.0, 10.0, 20.0), &container, 30.0));
        assert!(!is_visible(&Rect::new(0.0, 900.0, 10.0, 20.0), &container, 30.0));
    }

    #[test]
    fn scrolls_only_when_needed() {
        let dom = FakeDom::new();
        let container = dom.root();
        dom.set_rect(container, Rect::new(0.0, 0.0, 400.0, 300.0));
        let inside = dom.append(container, "span").rect(Rect::new(0.0, 100.0, 50.0, 20.0)).id();
        let below = dom.append(container, "span").rect(Rect::new(0.0, 500.0, 50.0, 20.0)).id();

        let scroll = ScrollController::new(30.0);
        assert!(!scroll.ensure_visible(&dom, &inside, &container, true));
        assert!(scroll.ensure_visible(&dom, &below, &container, true));
        assert_eq!(dom.scrolls(), vec![below]);
    }

    #[test]
    fn autoscroll_off_is_a_no_op() {
        let dom = FakeDom::new();
        let container = dom.root();
        let below = dom.append(container, "span").rect(Rect::new(0.0, 500.0, 50.0, 20.0)).id();
        assert!(!ScrollController::new(30.0).ensure_visible(&dom, &below, &container, false));
        assert!(dom.scrolls().is_empty());
    }
}
