// Click-to-seek: map a clicked element back to the cue it belongs to.
// See DESIGN.md: Click-to-Seek

use crate::dom::{Dom, CUE_ATTRIBUTE};
use crate::time_index::CueTrack;

/// Clicks inside elements whose class mentions one of these are left alone.
const PASSIVE_MARKERS: [&str; 2] = ["glossary", "tooltip"];

/// What a click did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Not on cue-tagged text, or inside an annotation.
    Ignored,
    /// Already on this cue and playing.
    SameCue(usize),
    /// Seeked to the cue at this index.
    Seeked(usize),
}

fn is_passive<D: Dom>(dom: &D, element: &D::Element) -> bool {
    let class = dom.attribute(element, "class").unwrap_or_default();
    PASSIVE_MARKERS.iter().any(|marker| {
        class.contains(marker) || dom.attribute(element, &format!("data-{}", marker)).is_some()
    })
}

/// Raw cue identifier carried by `element`, if any.
fn carried_id<D: Dom>(dom: &D, element: &D::Element) -> Option<String> {
    if let Some(id) = dom.attribute(element, CUE_ATTRIBUTE) {
        return Some(id);
    }
    let id = dom.attribute(element, "id")?;
    if let Some(rest) = id.strip_prefix("subtitle-") {
        return Some(rest.to_string());
    }
    let digits = id.strip_prefix('s')?;
    (!digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())).then(|| id.clone())
}

/// Cue index for a raw identifier, accepting the `s` prefixed form.
fn normalize(track: &CueTrack, raw: &str) -> Option<usize> {
    track
        .index_of(raw)
        .or_else(|| raw.strip_prefix('s').and_then(|id| track.index_of(id)))
}

/// Cue index the click on `target` refers to.
pub fn find_click_target<D: Dom>(dom: &D, target: &D::Element, track: &CueTrack) -> Option<usize> {
    if dom.closest(target, is_passive).is_some() {
        return None;
    }
    let tagged = dom.closest(target, |d, el| carried_id(d, el).is_some())?;
    let raw = carried_id(dom, &tagged)?;
    normalize(track, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDom;
    use crate::types::{Cue, Timestamp};

    fn track() -> CueTrack {
        CueTrack::new(
            (1..=3)
                .map(|i| Cue::new(i.to_string(), Timestamp::from_millis(i * 1000), Timestamp::from_millis(i * 1000 + 900)))
                .collect(),
        )
    }

    #[test]
    fn click_on_nested_child_finds_tagged_ancestor() {
        let dom = FakeDom::new();
        let span = dom.append(dom.root(), "span").attr(CUE_ATTRIBUTE, "2").id();
        let word = dom.append(span, "em").id();
        assert_eq!(find_click_target(&dom, &word, &track()), Some(1));
    }

    #[test]
    fn prefixed_identifiers_are_normalized() {
        let dom = FakeDom::new();
        let a = dom.append(dom.root(), "span").attr(CUE_ATTRIBUTE, "s3").id();
        let b = dom.append(dom.root(), "span").attr("id", "subtitle-1").id();
        let c = dom.append(dom.root(), "span").attr("id", "s2").id();
        let t = track();
        assert_eq!(find_click_target(&dom, &a, &t), Some(2));
        assert_eq!(find_click_target(&dom, &b, &t), Some(0));
        assert_eq!(find_click_target(&dom, &c, &t), Some(1));
    }

    #[test]
    fn annotations_and_untagged_text_are_ignored() {
        let dom = FakeDom::new();
        let span = dom.append(dom.root(), "span").attr(CUE_ATTRIBUTE, "1").id();
        let term = dom.append(span, "abbr").attr("class", "glossary-term").id();
        let tip = dom.append(span, "div").attr("data-tooltip", "hint").id();
        let plain = dom.append(dom.root(), "p").attr("id", "section").id();
        let stale = dom.append(dom.root(), "span").attr(CUE_ATTRIBUTE, "99").id();
        let t = track();

        assert_eq!(find_click_target(&dom, &term, &t), None);
        assert_eq!(find_click_target(&dom, &tip, &t), None);
        assert_eq!(find_click_target(&dom, &plain, &t), None);
        assert_eq!(find_click_target(&dom, &stale, &t), None);
        assert_eq!(find_click_target(&dom, &span, &t), Some(0));
    }
}
