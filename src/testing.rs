// Test doubles for the host seams: an in-memory DOM, a scripted media element,
// a manual frame scheduler and a manual clock.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value;

use crate::dom::{Dom, FrameHandle, FrameScheduler, MediaElement};
use crate::error::SyncError;
use crate::services::{Clock, ErrorBoundary, EventBus, SubscribeOptions, Subscription};
use crate::types::{ComputedStyle, Rect};

pub struct ManualClock {
    now: Cell<f64>,
}

impl ManualClock {
    pub fn new(now: f64) -> Self {
        ManualClock { now: Cell::new(now) }
    }

    pub fn advance(&self, ms: f64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}

// =============================================================================
// DOM
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

struct Node {
    tag: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: Vec<(String, String)>,
    classes: Vec<String>,
    rect: Rect,
    style: ComputedStyle,
    text: String,
    attached: bool,
}

/// Tree of nodes answering the selector shapes the crate generates:
/// `#id`, `[name="v"]`, `[name*="v"]` and comma lists of those.
pub struct FakeDom {
    nodes: RefCell<Vec<Node>>,
    queries: Cell<usize>,
    scrolls: RefCell<Vec<NodeId>>,
    fail_class_ops: Cell<bool>,
}

pub struct NodeBuilder<'a> {
    dom: &'a FakeDom,
    id: NodeId,
}

impl NodeBuilder<'_> {
    pub fn attr(self, name: &str, value: &str) -> Self {
        self.dom.nodes.borrow_mut()[self.id.0]
            .attributes
            .push((name.to_string(), value.to_string()));
        self
    }

    pub fn rect(self, rect: Rect) -> Self {
        self.dom.set_rect(self.id, rect);
        self
    }

    pub fn display(self, display: &str) -> Self {
        self.dom.nodes.borrow_mut()[self.id.0].style.display = display.to_string();
        self
    }

    pub fn float(self, float: &str) -> Self {
        self.dom.nodes.borrow_mut()[self.id.0].style.float = float.to_string();
        self
    }

    pub fn text(self, text: &str) -> Self {
        self.dom.nodes.borrow_mut()[self.id.0].text = text.to_string();
        self
    }

    pub fn id(self) -> NodeId {
        self.id
    }
}

impl FakeDom {
    pub fn new() -> Self {
        let root = Node {
            tag: "main".to_string(),
            parent: None,
            children: Vec::new(),
            attributes: Vec::new(),
            classes: Vec::new(),
            rect: Rect::default(),
            style: default_style("main"),
            text: String::new(),
            attached: true,
        };
        FakeDom {
            nodes: RefCell::new(vec![root]),
            queries: Cell::new(0),
            scrolls: RefCell::new(Vec::new()),
            fail_class_ops: Cell::new(false),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn append(&self, parent: NodeId, tag: &str) -> NodeBuilder<'_> {
        let mut nodes = self.nodes.borrow_mut();
        let id = NodeId(nodes.len());
        nodes.push(Node {
            tag: tag.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            attributes: Vec::new(),
            classes: Vec::new(),
            rect: Rect::default(),
            style: default_style(tag),
            text: String::new(),
            attached: true,
        });
        nodes[parent.0].children.push(id);
        NodeBuilder { dom: self, id }
    }

    pub fn detach(&self, node: NodeId) {
        let mut nodes = self.nodes.borrow_mut();
        nodes[node.0].attached = false;
        if let Some(parent) = nodes[node.0].parent {
            nodes[parent.0].children.retain(|c| *c != node);
        }
    }

    pub fn set_rect(&self, node: NodeId, rect: Rect) {
        self.nodes.borrow_mut()[node.0].rect = rect;
    }

    pub fn classes(&self, node: NodeId) -> Vec<String> {
        self.nodes.borrow()[node.0].classes.clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.get()
    }

    pub fn scrolls(&self) -> Vec<NodeId> {
        self.scrolls.borrow().clone()
    }

    pub fn fail_class_ops(&self, fail: bool) {
        self.fail_class_ops.set(fail);
    }

    /// Nodes holding the current-highlight marker.
    pub fn highlighted(&self) -> Vec<NodeId> {
        let nodes = self.nodes.borrow();
        (0..nodes.len())
            .filter(|&i| nodes[i].classes.iter().any(|c| c == crate::highlight::CURRENT_CLASS))
            .map(NodeId)
            .collect()
    }

    fn attribute_of(node: &Node, name: &str) -> Option<String> {
        if name == "class" {
            return (!node.classes.is_empty() || node.attributes.iter().any(|(n, _)| n == "class"))
                .then(|| class_attribute(node));
        }
        node.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    fn matches(node: &Node, selector: &str) -> bool {
        if let Some(id) = selector.strip_prefix('#') {
            return Self::attribute_of(node, "id").as_deref() == Some(unescape(id).as_str());
        }
        let Some(body) = selector.strip_prefix('[').and_then(|s| s.strip_suffix(']')) else {
            return false;
        };
        let (name, op, value) = if let Some((name, value)) = body.split_once("*=") {
            (name, "*=", value)
        } else if let Some((name, value)) = body.split_once('=') {
            (name, "=", value)
        } else {
            return Self::attribute_of(node, body).is_some();
        };
        let value = unquote(value);
        match Self::attribute_of(node, name) {
            Some(actual) if op == "*=" => actual.contains(&value),
            Some(actual) => actual == value,
            None => false,
        }
    }

    fn attached(&self, node: NodeId) -> bool {
        let nodes = self.nodes.borrow();
        let mut current = Some(node);
        while let Some(id) = current {
            if !nodes[id.0].attached {
                return false;
            }
            current = nodes[id.0].parent;
        }
        true
    }

    fn class_op(&self, node: NodeId, f: impl FnOnce(&mut Vec<String>)) -> Result<(), SyncError> {
        if self.fail_class_ops.get() {
            return Err(SyncError::Render {
                cue_id: String::new(),
                message: "class list unavailable".to_string(),
            });
        }
        f(&mut self.nodes.borrow_mut()[node.0].classes);
        Ok(())
    }
}

fn default_style(tag: &str) -> ComputedStyle {
    let display = match tag {
        "span" | "a" | "em" | "strong" | "b" | "i" => "inline",
        _ => "block",
    };
    ComputedStyle {
        display: display.to_string(),
        position: "static".to_string(),
        float: "none".to_string(),
    }
}

/// Authored `class` attribute plus classes added at runtime.
fn class_attribute(node: &Node) -> String {
    let authored = node
        .attributes
        .iter()
        .find(|(n, _)| n == "class")
        .map(|(_, v)| v.as_str())
        .unwrap_or_default();
    let mut tokens: Vec<&str> = authored.split_whitespace().collect();
    tokens.extend(node.classes.iter().map(String::as_str));
    tokens.join(" ")
}

fn unquote(value: &str) -> String {
    let inner = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    unescape(inner)
}

fn unescape(value: &str) -> String {
    let mut out = String::new();
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

impl Dom for FakeDom {
    type Element = NodeId;

    fn query_selector(&self, selector: &str) -> Option<NodeId> {
        self.query_selector_all(selector).into_iter().next()
    }

    fn query_selector_all(&self, selector: &str) -> Vec<NodeId> {
        self.queries.set(self.queries.get() + 1);
        let parts: Vec<&str> = selector.split(", ").map(str::trim).collect();
        let candidates: Vec<NodeId> = {
            let nodes = self.nodes.borrow();
            (1..nodes.len())
                .filter(|&i| parts.iter().any(|p| Self::matches(&nodes[i], p)))
                .map(NodeId)
                .collect()
        };
        candidates.into_iter().filter(|n| self.attached(*n)).collect()
    }

    fn is_attached(&self, element: &NodeId) -> bool {
        self.attached(*element)
    }

    fn attribute(&self, element: &NodeId, name: &str) -> Option<String> {
        Self::attribute_of(&self.nodes.borrow()[element.0], name)
    }

    fn parent(&self, element: &NodeId) -> Option<NodeId> {
        self.nodes.borrow()[element.0].parent
    }

    fn tag_name(&self, element: &NodeId) -> String {
        self.nodes.borrow()[element.0].tag.clone()
    }

    fn child_element_count(&self, element: &NodeId) -> u32 {
        self.nodes.borrow()[element.0].children.len() as u32
    }

    fn text_len(&self, element: &NodeId) -> usize {
        let children = {
            let nodes = self.nodes.borrow();
            let node = &nodes[element.0];
            if node.children.is_empty() {
                return node.text.chars().count();
            }
            node.children.clone()
        };
        children.iter().map(|c| self.text_len(c)).sum()
    }

    fn has_class(&self, element: &NodeId, class: &str) -> bool {
        self.nodes.borrow()[element.0].classes.iter().any(|c| c == class)
    }

    fn add_class(&self, element: &NodeId, class: &str) -> Result<(), SyncError> {
        self.class_op(*element, |classes| {
            if !classes.iter().any(|c| c == class) {
                classes.push(class.to_string());
            }
        })
    }

    fn remove_class(&self, element: &NodeId, class: &str) -> Result<(), SyncError> {
        self.class_op(*element, |classes| classes.retain(|c| c != class))
    }

    fn computed_style(&self, element: &NodeId) -> ComputedStyle {
        self.nodes.borrow()[element.0].style.clone()
    }

    fn bounding_rect(&self, element: &NodeId) -> Rect {
        self.nodes.borrow()[element.0].rect
    }

    fn scroll_into_view_centered(&self, element: &NodeId) {
        self.scrolls.borrow_mut().push(*element);
    }
}

// =============================================================================
// Media, scheduling, services
// =============================================================================

pub struct FakeMedia {
    pub current_time: Cell<f64>,
    pub paused: Cell<bool>,
    pub seeks: RefCell<Vec<f64>>,
    pub play_requests: Cell<u32>,
    pub reject_play: Cell<bool>,
}

impl FakeMedia {
    pub fn new() -> Self {
        FakeMedia {
            current_time: Cell::new(0.0),
            paused: Cell::new(true),
            seeks: RefCell::new(Vec::new()),
            play_requests: Cell::new(0),
            reject_play: Cell::new(false),
        }
    }
}

impl MediaElement for FakeMedia {
    fn current_time(&self) -> f64 {
        self.current_time.get()
    }

    fn is_paused(&self) -> bool {
        self.paused.get()
    }

    fn seek(&self, seconds: f64) -> Result<(), SyncError> {
        self.seeks.borrow_mut().push(seconds);
        self.current_time.set(seconds);
        Ok(())
    }

    fn play(&self) -> Result<(), SyncError> {
        self.play_requests.set(self.play_requests.get() + 1);
        if self.reject_play.get() {
            return Err(SyncError::Playback("autoplay blocked".to_string()));
        }
        self.paused.set(false);
        Ok(())
    }
}

type Callback = Box<dyn FnOnce()>;

/// Frames and timeouts run only when the test says so.
pub struct ManualScheduler {
    next: Cell<u32>,
    frames: RefCell<Vec<(FrameHandle, Callback)>>,
    timeouts: RefCell<Vec<(u32, Callback)>>,
    pub requested: Cell<u32>,
    pub cancelled: Cell<u32>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        ManualScheduler {
            next: Cell::new(1),
            frames: RefCell::new(Vec::new()),
            timeouts: RefCell::new(Vec::new()),
            requested: Cell::new(0),
            cancelled: Cell::new(0),
        }
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn pending_timeouts(&self) -> usize {
        self.timeouts.borrow().len()
    }

    pub fn run_frames(&self) {
        let frames = std::mem::take(&mut *self.frames.borrow_mut());
        for (_, callback) in frames {
            callback();
        }
    }

    pub fn run_timeouts(&self) {
        let timeouts = std::mem::take(&mut *self.timeouts.borrow_mut());
        for (_, callback) in timeouts {
            callback();
        }
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_frame(&self, callback: Box<dyn FnOnce()>) -> FrameHandle {
        let handle = FrameHandle(self.next.get());
        self.next.set(handle.0 + 1);
        self.requested.set(self.requested.get() + 1);
        self.frames.borrow_mut().push((handle, callback));
        handle
    }

    fn cancel_frame(&self, handle: FrameHandle) {
        let removed = {
            let mut frames = self.frames.borrow_mut();
            let position = frames.iter().position(|(h, _)| *h == handle);
            let removed = position.map(|i| frames.remove(i));
            removed
        };
        // Dropping the callback here releases anything it owns.
        if removed.is_some() {
            self.cancelled.set(self.cancelled.get() + 1);
        }
    }

    fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) {
        self.timeouts.borrow_mut().push((delay_ms, callback));
    }
}

#[derive(Default)]
pub struct RecordingErrors {
    pub errors: RefCell<Vec<(SyncError, String)>>,
}

impl ErrorBoundary for RecordingErrors {
    fn handle(&self, error: &SyncError, context: &str) {
        self.errors
            .borrow_mut()
            .push((error.clone(), context.to_string()));
    }
}

/// Collect every payload published under `name`.
pub fn record(bus: &dyn EventBus, name: &str) -> (Rc<RefCell<Vec<Value>>>, Subscription) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let sub = bus.on(
        name,
        Box::new(move |v: &Value| sink.borrow_mut().push(v.clone())),
        SubscribeOptions::default(),
    );
    (seen, sub)
}
