// Browser implementations of the host seams and services, over web-sys.
// Rule: JS errors become SyncError at this boundary. Nothing here panics on a missing window.
// See DESIGN.md: Web bindings

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::{trace, warn};
use serde::{Deserialize, Serialize};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{
    Element, EventTarget, HtmlMediaElement, ScrollBehavior, ScrollIntoViewOptions,
    ScrollLogicalPosition, Storage,
};

use crate::clock::ClockAdapter;
use crate::dom::{Dom, FrameHandle, FrameScheduler, MediaElement};
use crate::error::SyncError;
use crate::services::{
    CacheSetOptions, CacheTier, Clock, CueCache, EventBus, MemoryCache, TaskDispatcher, TaskFuture,
};
use crate::types::{ComputedStyle, Rect};

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = performance, js_name = "now")]
    fn performance_now() -> f64;

    #[wasm_bindgen(js_name = "requestAnimationFrame")]
    fn request_animation_frame(callback: &JsValue) -> i32;

    #[wasm_bindgen(js_name = "cancelAnimationFrame")]
    fn cancel_animation_frame(id: i32);

    #[wasm_bindgen(js_name = "setTimeout")]
    fn set_timeout(callback: &JsValue, delay_ms: i32) -> i32;
}

fn describe(value: &JsValue) -> String {
    value
        .as_string()
        .or_else(|| {
            value
                .dyn_ref::<js_sys::Error>()
                .map(|e| String::from(e.message()))
        })
        .unwrap_or_else(|| format!("{:?}", value))
}

// =============================================================================
// DOM
// =============================================================================

/// Document access scoped to the reader's content container.
pub struct WebDom {
    container: Element,
}

impl WebDom {
    pub fn new(container: Element) -> Self {
        WebDom { container }
    }

    pub fn container(&self) -> &Element {
        &self.container
    }

    fn class_error(element: &Element, err: JsValue) -> SyncError {
        SyncError::Render {
            cue_id: element.get_attribute(crate::dom::CUE_ATTRIBUTE).unwrap_or_default(),
            message: describe(&err),
        }
    }
}

impl Dom for WebDom {
    type Element = Element;

    fn query_selector(&self, selector: &str) -> Option<Element> {
        match self.container.query_selector(selector) {
            Ok(found) => found,
            Err(err) => {
                warn!("bad selector {}: {}", selector, describe(&err));
                None
            }
        }
    }

    fn query_selector_all(&self, selector: &str) -> Vec<Element> {
        let list = match self.container.query_selector_all(selector) {
            Ok(list) => list,
            Err(err) => {
                warn!("bad selector {}: {}", selector, describe(&err));
                return Vec::new();
            }
        };
        (0..list.length())
            .filter_map(|i| list.item(i))
            .filter_map(|node| node.dyn_into::<Element>().ok())
            .collect()
    }

    fn is_attached(&self, element: &Element) -> bool {
        element.is_connected()
    }

    fn attribute(&self, element: &Element, name: &str) -> Option<String> {
        element.get_attribute(name)
    }

    fn parent(&self, element: &Element) -> Option<Element> {
        element.parent_element()
    }

    fn tag_name(&self, element: &Element) -> String {
        element.tag_name().to_lowercase()
    }

    fn child_element_count(&self, element: &Element) -> u32 {
        element.child_element_count()
    }

    fn text_len(&self, element: &Element) -> usize {
        element.text_content().map_or(0, |t| t.chars().count())
    }

    fn has_class(&self, element: &Element, class: &str) -> bool {
        element.class_list().contains(class)
    }

    fn add_class(&self, element: &Element, class: &str) -> Result<(), SyncError> {
        element
            .class_list()
            .add_1(class)
            .map_err(|e| Self::class_error(element, e))
    }

    fn remove_class(&self, element: &Element, class: &str) -> Result<(), SyncError> {
        element
            .class_list()
            .remove_1(class)
            .map_err(|e| Self::class_error(element, e))
    }

    fn computed_style(&self, element: &Element) -> ComputedStyle {
        let declaration = web_sys::window()
            .and_then(|w| w.get_computed_style(element).ok().flatten());
        let Some(declaration) = declaration else {
            return ComputedStyle::default();
        };
        let property = |name: &str| declaration.get_property_value(name).unwrap_or_default();
        ComputedStyle {
            display: property("display"),
            position: property("position"),
            float: property("float"),
        }
    }

    fn bounding_rect(&self, element: &Element) -> Rect {
        let r = element.get_bounding_client_rect();
        Rect::new(r.x(), r.y(), r.width(), r.height())
    }

    fn scroll_into_view_centered(&self, element: &Element) {
        let options = ScrollIntoViewOptions::new();
        options.set_behavior(ScrollBehavior::Smooth);
        options.set_block(ScrollLogicalPosition::Center);
        element.scroll_into_view_with_scroll_into_view_options(&options);
    }
}

// =============================================================================
// Media
// =============================================================================

pub struct WebMedia {
    element: HtmlMediaElement,
}

impl WebMedia {
    pub fn new(element: HtmlMediaElement) -> Self {
        WebMedia { element }
    }
}

impl MediaElement for WebMedia {
    fn current_time(&self) -> f64 {
        self.element.current_time()
    }

    fn is_paused(&self) -> bool {
        self.element.paused()
    }

    fn seek(&self, seconds: f64) -> Result<(), SyncError> {
        if !seconds.is_finite() {
            return Err(SyncError::Playback(format!("cannot seek to {}", seconds)));
        }
        self.element.set_current_time(seconds);
        Ok(())
    }

    fn play(&self) -> Result<(), SyncError> {
        let promise = self
            .element
            .play()
            .map_err(|e| SyncError::Playback(describe(&e)))?;
        // Autoplay policy rejections arrive later; there is no caller left to return them to.
        spawn_local(async move {
            if let Err(err) = JsFuture::from(promise).await {
                warn!("playback request rejected: {}", describe(&err));
            }
        });
        Ok(())
    }
}

// =============================================================================
// Scheduling
// =============================================================================

type PendingFrame = (i32, Box<dyn FnOnce()>);

/// `requestAnimationFrame` / `setTimeout` scheduler.
///
/// Callbacks live on the Rust side until their frame fires, so cancelling a frame
/// drops its callback immediately.
#[derive(Clone, Default)]
pub struct RafScheduler {
    inner: Rc<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    next: Cell<u32>,
    pending: RefCell<HashMap<u32, PendingFrame>>,
}

impl RafScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.borrow().len()
    }
}

impl FrameScheduler for RafScheduler {
    fn request_frame(&self, callback: Box<dyn FnOnce()>) -> FrameHandle {
        let key = self.inner.next.get();
        self.inner.next.set(key.wrapping_add(1));

        let weak: Weak<SchedulerInner> = Rc::downgrade(&self.inner);
        let fire = Closure::once_into_js(move |_timestamp: f64| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let entry = inner.pending.borrow_mut().remove(&key);
            if let Some((_, callback)) = entry {
                callback();
            }
        });
        let raf_id = request_animation_frame(&fire);
        self.inner
            .pending
            .borrow_mut()
            .insert(key, (raf_id, callback));
        FrameHandle(key)
    }

    fn cancel_frame(&self, handle: FrameHandle) {
        let entry = self.inner.pending.borrow_mut().remove(&handle.0);
        if let Some((raf_id, callback)) = entry {
            cancel_animation_frame(raf_id);
            drop(callback);
        }
    }

    fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) {
        let fire = Closure::once_into_js(move || callback());
        set_timeout(&fire, i32::try_from(delay_ms).unwrap_or(i32::MAX));
    }
}

/// `performance.now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceClock;

impl Clock for PerformanceClock {
    fn now_ms(&self) -> f64 {
        performance_now()
    }
}

/// Samples the media clock every animation frame while playing and feeds
/// the [`ClockAdapter`], which republishes throttled ticks on the bus.
pub struct PlaybackPoller {
    inner: Rc<PollerInner>,
}

struct PollerInner {
    media: HtmlMediaElement,
    events: Rc<dyn EventBus>,
    adapter: RefCell<ClockAdapter>,
    closure: RefCell<Option<Closure<dyn FnMut(f64)>>>,
    running: Cell<bool>,
    raf_id: Cell<i32>,
}

impl PollerInner {
    fn sample(&self) {
        let published = self.adapter.borrow_mut().publish(
            self.events.as_ref(),
            self.media.current_time(),
            self.media.paused(),
            performance_now(),
        );
        if published {
            trace!("tick at {:.3}s", self.media.current_time());
        }
    }
}

impl PlaybackPoller {
    pub fn new(media: HtmlMediaElement, events: Rc<dyn EventBus>) -> Self {
        let inner = Rc::new(PollerInner {
            media,
            events,
            adapter: RefCell::new(ClockAdapter::new()),
            closure: RefCell::new(None),
            running: Cell::new(false),
            raf_id: Cell::new(0),
        });

        let weak = Rc::downgrade(&inner);
        let closure = Closure::wrap(Box::new(move |_timestamp: f64| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.running.get() {
                return;
            }
            inner.sample();
            if inner.media.paused() || inner.media.ended() {
                inner.running.set(false);
                return;
            }
            if let Some(closure) = inner.closure.borrow().as_ref() {
                inner
                    .raf_id
                    .set(request_animation_frame(closure.as_ref().unchecked_ref()));
            };
        }) as Box<dyn FnMut(f64)>);
        *inner.closure.borrow_mut() = Some(closure);

        PlaybackPoller { inner }
    }

    /// Publish one sample now (native `timeupdate`).
    pub fn sample(&self) {
        self.inner.sample();
    }

    /// Forget throttle state, e.g. after a seek.
    pub fn reset(&self) {
        self.inner.adapter.borrow_mut().reset();
    }

    pub fn start(&self) {
        if self.inner.running.replace(true) {
            return;
        }
        if let Some(closure) = self.inner.closure.borrow().as_ref() {
            self.inner
                .raf_id
                .set(request_animation_frame(closure.as_ref().unchecked_ref()));
        }
    }

    pub fn stop(&self) {
        if self.inner.running.replace(false) {
            cancel_animation_frame(self.inner.raf_id.get());
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }
}

impl Drop for PlaybackPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// DOM event listener that removes itself on drop.
pub struct EventListener {
    target: EventTarget,
    name: &'static str,
    closure: Closure<dyn FnMut(web_sys::Event)>,
}

impl EventListener {
    pub fn new(
        target: &EventTarget,
        name: &'static str,
        handler: impl FnMut(web_sys::Event) + 'static,
    ) -> Result<Self, SyncError> {
        let closure = Closure::wrap(Box::new(handler) as Box<dyn FnMut(web_sys::Event)>);
        target
            .add_event_listener_with_callback(name, closure.as_ref().unchecked_ref())
            .map_err(|e| SyncError::InvalidConfig(format!("cannot listen for {}: {}", name, describe(&e))))?;
        Ok(EventListener {
            target: target.clone(),
            name,
            closure,
        })
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        let _ = self
            .target
            .remove_event_listener_with_callback(self.name, self.closure.as_ref().unchecked_ref());
    }
}

// =============================================================================
// Services
// =============================================================================

/// Stored form of a cache entry in Web Storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredEntry {
    value: String,
    expires_at_ms: Option<f64>,
}

impl StoredEntry {
    fn is_fresh(&self, now_ms: f64) -> bool {
        self.expires_at_ms.map_or(true, |at| now_ms < at)
    }
}

/// Memory tier plus `sessionStorage` and `localStorage` tiers.
/// Storage tiers expire on wall-clock time so entries survive reloads.
pub struct WebStorageCache {
    memory: MemoryCache,
    session: Option<Storage>,
    persistent: Option<Storage>,
}

impl WebStorageCache {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        let window = web_sys::window();
        WebStorageCache {
            memory: MemoryCache::new(clock),
            session: window.as_ref().and_then(|w| w.session_storage().ok().flatten()),
            persistent: window.as_ref().and_then(|w| w.local_storage().ok().flatten()),
        }
    }

    fn storage(&self, tier: CacheTier) -> Option<&Storage> {
        match tier {
            CacheTier::Memory => None,
            CacheTier::Session => self.session.as_ref(),
            CacheTier::Persistent => self.persistent.as_ref(),
        }
    }

    fn read(storage: &Storage, key: &str) -> Option<String> {
        let raw = storage.get_item(key).ok().flatten()?;
        match serde_json::from_str::<StoredEntry>(&raw) {
            Ok(entry) if entry.is_fresh(js_sys::Date::now()) => Some(entry.value),
            _ => {
                let _ = storage.remove_item(key);
                None
            }
        }
    }
}

impl CueCache for WebStorageCache {
    fn get(&self, key: &str, tiers: &[CacheTier]) -> Option<String> {
        tiers.iter().find_map(|&tier| match tier {
            CacheTier::Memory => self.memory.get(key, &[CacheTier::Memory]),
            _ => self.storage(tier).and_then(|s| Self::read(s, key)),
        })
    }

    fn set(&self, key: &str, value: &str, options: &CacheSetOptions) {
        self.memory.set(key, value, options);
        let entry = StoredEntry {
            value: value.to_string(),
            expires_at_ms: options
                .ttl_secs
                .map(|ttl| js_sys::Date::now() + ttl as f64 * 1000.0),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("cache entry {} not stored: {}", key, err);
                return;
            }
        };
        for &tier in &options.tiers {
            if let Some(storage) = self.storage(tier) {
                if let Err(err) = storage.set_item(key, &raw) {
                    warn!("cache tier {:?} rejected {}: {}", tier, key, describe(&err));
                }
            }
        }
    }
}

/// Runs tasks through a JS function `(kind, payload, timeoutMs) => Promise<string>`,
/// typically backed by a Web Worker.
pub struct JsTaskDispatcher {
    runner: js_sys::Function,
}

impl JsTaskDispatcher {
    pub fn new(runner: js_sys::Function) -> Self {
        JsTaskDispatcher { runner }
    }
}

fn timeout_promise(timeout_ms: u32) -> js_sys::Promise {
    js_sys::Promise::new(&mut |_resolve, reject| {
        let fire = Closure::once_into_js(move || {
            let _ = reject.call1(&JsValue::NULL, &JsValue::from_str("timed out"));
        });
        set_timeout(&fire, i32::try_from(timeout_ms).unwrap_or(i32::MAX));
    })
}

impl TaskDispatcher for JsTaskDispatcher {
    fn execute_task(&self, kind: &str, payload: String, timeout_ms: u32) -> TaskFuture {
        let started = self.runner.call3(
            &JsValue::NULL,
            &JsValue::from_str(kind),
            &JsValue::from_str(&payload),
            &JsValue::from(timeout_ms),
        );
        Box::pin(async move {
            let result = started.map_err(|e| SyncError::WorkerFailure(describe(&e)))?;
            let race = js_sys::Promise::race(&js_sys::Array::of2(
                &js_sys::Promise::resolve(&result),
                &timeout_promise(timeout_ms),
            ));
            let value = JsFuture::from(race)
                .await
                .map_err(|e| SyncError::WorkerFailure(describe(&e)))?;
            value
                .as_string()
                .ok_or_else(|| SyncError::WorkerFailure("task result is not a string".to_string()))
        })
    }
}
