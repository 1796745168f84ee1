// Cue id -> DOM element, through an ordered strategy table with per-id memoization.
// Rule: cached elements are hints. Always re-validate attachment before use.
// See DESIGN.md: Element Resolver

use std::collections::HashMap;

use log::{debug, trace};

use crate::dom::{css_ident, css_string, Dom, CUE_ATTRIBUTE};

/// One way of locating a cue's element.
#[derive(Debug, Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub selector: fn(&str) -> String,
}

fn attribute_exact(id: &str) -> String {
    format!("[{}={}]", CUE_ATTRIBUTE, css_string(id))
}

fn attribute_prefixed(id: &str) -> String {
    format!("[{}={}]", CUE_ATTRIBUTE, css_string(&format!("s{}", id)))
}

fn id_subtitle(id: &str) -> String {
    format!("#{}", css_ident(&format!("subtitle-{}", id)))
}

fn id_prefixed(id: &str) -> String {
    format!("#{}", css_ident(&format!("s{}", id)))
}

/// Structured strategies, tried in order.
pub const STRATEGIES: [Strategy; 4] = [
    Strategy {
        name: "attribute",
        selector: attribute_exact,
    },
    Strategy {
        name: "attribute-prefixed",
        selector: attribute_prefixed,
    },
    Strategy {
        name: "id-subtitle",
        selector: id_subtitle,
    },
    Strategy {
        name: "id-prefixed",
        selector: id_prefixed,
    },
];

/// Strategy index recorded when only the fuzzy fallback matched.
pub const FUZZY_STRATEGY: usize = STRATEGIES.len();

/// Counters for tests and debug overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolverStats {
    pub cache_hits: u32,
    pub evictions: u32,
    /// Selector queries issued by strategies (structured and fuzzy).
    pub queries: u32,
    pub fuzzy_hits: u32,
    pub misses: u32,
}

/// Resolves cue ids to elements, learning which strategy works per id.
#[derive(Debug)]
pub struct ElementResolver<E> {
    elements: HashMap<String, E>,
    strategy_hits: HashMap<String, usize>,
    stats: ResolverStats,
}

impl<E: Clone + PartialEq> ElementResolver<E> {
    pub fn new() -> Self {
        ElementResolver {
            elements: HashMap::new(),
            strategy_hits: HashMap::new(),
            stats: ResolverStats::default(),
        }
    }

    pub fn resolve<D: Dom<Element = E>>(&mut self, dom: &D, id: &str) -> Option<E> {
        if let Some(cached) = self.elements.get(id) {
            if dom.is_attached(cached) {
                self.stats.cache_hits += 1;
                return Some(cached.clone());
            }
            trace!("cue {} element detached, evicting", id);
            self.elements.remove(id);
            self.stats.evictions += 1;
        }

        let remembered = self.strategy_hits.get(id).copied();
        if let Some(index) = remembered {
            if let Some(element) = self.run_strategy(dom, id, index) {
                return Some(self.remember(id, index, element));
            }
        }

        for index in 0..STRATEGIES.len() {
            if Some(index) == remembered {
                continue;
            }
            if let Some(element) = self.run_strategy(dom, id, index) {
                return Some(self.remember(id, index, element));
            }
        }

        if remembered != Some(FUZZY_STRATEGY) {
            if let Some(element) = self.run_strategy(dom, id, FUZZY_STRATEGY) {
                return Some(self.remember(id, FUZZY_STRATEGY, element));
            }
        }

        debug!("no element found for cue {}", id);
        self.stats.misses += 1;
        None
    }

    fn run_strategy<D: Dom<Element = E>>(&mut self, dom: &D, id: &str, index: usize) -> Option<E> {
        self.stats.queries += 1;
        match STRATEGIES.get(index) {
            Some(strategy) => dom.query_selector(&(strategy.selector)(id)),
            None => self.fuzzy(dom, id),
        }
    }

    /// Substring match on `id`/`class`, then a token check to reject e.g. `s12` for id `2`.
    fn fuzzy<D: Dom<Element = E>>(&mut self, dom: &D, id: &str) -> Option<E> {
        if id.is_empty() {
            return None;
        }
        let needle = css_string(id);
        let selector = format!("[id*={}], [class*={}]", needle, needle);

        let found = dom.query_selector_all(&selector).into_iter().find(|el| {
            let id_attr = dom.attribute(el, "id").unwrap_or_default();
            let class_attr = dom.attribute(el, "class").unwrap_or_default();
            std::iter::once(id_attr.as_str())
                .chain(class_attr.split_whitespace())
                .any(|token| token_matches(token, id))
        });
        if found.is_some() {
            self.stats.fuzzy_hits += 1;
        }
        found
    }

    fn remember(&mut self, id: &str, index: usize, element: E) -> E {
        trace!(
            "cue {} resolved by {}",
            id,
            STRATEGIES.get(index).map_or("fuzzy", |s| s.name)
        );
        self.strategy_hits.insert(id.to_string(), index);
        self.elements.insert(id.to_string(), element.clone());
        element
    }

    pub fn learned_strategy(&self, id: &str) -> Option<usize> {
        self.strategy_hits.get(id).copied()
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    /// Drop cached elements. Learned strategies survive: they stay valid across re-renders.
    pub fn clear_elements(&mut self) {
        self.elements.clear();
    }

    pub fn clear(&mut self) {
        self.elements.clear();
        self.strategy_hits.clear();
    }
}

impl<E: Clone + PartialEq> Default for ElementResolver<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// `token` names cue `id`: equal, or ending in it after a non-digit.
fn token_matches(token: &str, id: &str) -> bool {
    if token == id {
        return true;
    }
    match token.strip_suffix(id) {
        Some(prefix) => prefix.chars().last().is_some_and(|c| !c.is_ascii_digit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDom;

    #[test]
    fn strategy_selectors() {
        assert_eq!(attribute_exact("7"), "[data-subtitle-id=\"7\"]");
        assert_eq!(attribute_prefixed("7"), "[data-subtitle-id=\"s7\"]");
        assert_eq!(id_subtitle("7"), "#subtitle-7");
        assert_eq!(id_prefixed("7"), "#s7");
    }

    #[test]
    fn token_matching() {
        assert!(token_matches("2", "2"));
        assert!(token_matches("cue-2", "2"));
        assert!(token_matches("sentence2", "2"));
        assert!(!token_matches("s12", "2"));
        assert!(!token_matches("2x", "2"));
    }

    #[test]
    fn resolves_in_strategy_order() {
        let dom = FakeDom::new();
        let root = dom.root();
        let by_attr = dom.append(root, "span").attr(CUE_ATTRIBUTE, "1").id();
        let by_prefix = dom.append(root, "span").attr(CUE_ATTRIBUTE, "s2").id();
        let by_id = dom.append(root, "span").attr("id", "subtitle-3").id();
        let by_s_id = dom.append(root, "span").attr("id", "s4").id();

        let mut resolver = ElementResolver::new();
        assert_eq!(resolver.resolve(&dom, "1"), Some(by_attr));
        assert_eq!(resolver.resolve(&dom, "2"), Some(by_prefix));
        assert_eq!(resolver.resolve(&dom, "3"), Some(by_id));
        assert_eq!(resolver.resolve(&dom, "4"), Some(by_s_id));
        assert_eq!(resolver.learned_strategy("1"), Some(0));
        assert_eq!(resolver.learned_strategy("4"), Some(3));
        assert_eq!(resolver.resolve(&dom, "5"), None);
        assert_eq!(resolver.stats().misses, 1);
    }

    #[test]
    fn fuzzy_match_is_cached() {
        let dom = FakeDom::new();
        let root = dom.root();
        let target = dom.append(root, "span").attr("class", "line cue-9").id();
        dom.append(root, "span").attr("class", "cue-19");

        let mut resolver = ElementResolver::new();
        assert_eq!(resolver.resolve(&dom, "9"), Some(target));
        assert_eq!(resolver.learned_strategy("9"), Some(FUZZY_STRATEGY));
        let queries_after_first = dom.query_count();
        assert_eq!(queries_after_first, STRATEGIES.len() + 1);

        for _ in 0..5 {
            assert_eq!(resolver.resolve(&dom, "9"), Some(target));
        }
        assert_eq!(dom.query_count(), queries_after_first);
        assert_eq!(resolver.stats().cache_hits, 5);
        assert_eq!(resolver.stats().fuzzy_hits, 1);
    }

    #[test]
    fn detached_element_is_evicted_and_relocated() {
        let dom = FakeDom::new();
        let root = dom.root();
        let first = dom.append(root, "span").attr(CUE_ATTRIBUTE, "s1").id();

        let mut resolver = ElementResolver::new();
        assert_eq!(resolver.resolve(&dom, "1"), Some(first));

        dom.detach(first);
        let moved = dom.append(root, "span").attr(CUE_ATTRIBUTE, "s1").id();
        let before = dom.query_count();

        assert_eq!(resolver.resolve(&dom, "1"), Some(moved));
        assert_eq!(resolver.stats().evictions, 1);
        // The learned strategy is tried first, so one query suffices.
        assert_eq!(dom.query_count(), before + 1);
    }

    #[test]
    fn misses_are_not_cached() {
        let dom = FakeDom::new();
        let mut resolver = ElementResolver::new();
        assert_eq!(resolver.resolve(&dom, "1"), None);

        let late = dom.append(dom.root(), "span").attr(CUE_ATTRIBUTE, "1").id();
        assert_eq!(resolver.resolve(&dom, "1"), Some(late));
    }
}
