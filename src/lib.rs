// reader_sync: Rust/WASM audio-to-text sync engine for the English reader.
// See DESIGN.md for architecture. Timing, lookup and highlight decisions live here; JS is plumbing.

mod clock;
mod cue;
mod dom;
mod engine;
mod error;
mod highlight;
mod loader;
mod logging;
mod resolver;
mod scroll;
mod seek;
mod services;
mod time_index;
mod types;
mod web;

#[cfg(test)]
mod testing;

use std::rc::{Rc, Weak};

use log::{debug, info, warn};
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::future_to_promise;
use web_sys::{Element, HtmlElement, HtmlMediaElement};

pub use clock::{ClockAdapter, FRAME_INTERVAL_MS};
pub use cue::{format_timestamp, parse_srt, parse_srt_with_text, parse_timestamp, to_srt};
pub use dom::{Dom, FrameHandle, FrameScheduler, MediaElement, CUE_ATTRIBUTE};
pub use engine::{SyncEngine, SyncPhase};
pub use error::SyncError;
pub use highlight::{choose_style, measure, HighlightRenderer, CURRENT_CLASS, FADE_IN_CLASS, FADE_OUT_CLASS};
pub use loader::{cache_key, CueLoader, PARSE_TASK};
pub use logging::init_logging;
pub use resolver::{ElementResolver, ResolverStats, STRATEGIES};
pub use scroll::{is_visible, ScrollController};
pub use seek::{find_click_target, ClickOutcome};
pub use services::*;
pub use time_index::{CueTrack, TimeIndex, TimeIndexEntry};
pub use types::*;
pub use web::{
    EventListener, JsTaskDispatcher, PerformanceClock, PlaybackPoller, RafScheduler, WebDom,
    WebMedia, WebStorageCache,
};

/// Initialize panic hook and logging for the browser console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
    logging::init_logging(false);
}

/// Parse SRT text into a JSON cue array. Entry point for the background parser.
#[wasm_bindgen]
pub fn parse_srt_json(srt: &str) -> Result<String, JsValue> {
    serde_json::to_string(&parse_srt_with_text(srt))
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// Reader sync exposed to JavaScript: one media element, one content container.
#[wasm_bindgen]
pub struct WasmReaderSync {
    engine: Rc<SyncEngine<WebDom>>,
    events: Rc<dyn EventBus>,
    errors: Rc<dyn ErrorBoundary>,
    config: SyncConfig,
    cache: Rc<dyn CueCache>,
    loader: Rc<CueLoader>,
    poller: Rc<PlaybackPoller>,
    listeners: Vec<EventListener>,
    js_subscriptions: Vec<Subscription>,
}

#[wasm_bindgen]
impl WasmReaderSync {
    #[wasm_bindgen(constructor)]
    pub fn new(
        media: HtmlMediaElement,
        container: HtmlElement,
        config_json: &str,
    ) -> Result<WasmReaderSync, JsValue> {
        let config = SyncConfig::from_json(config_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid config: {}", e)))?;
        logging::init_logging(config.debug);

        let clock: Rc<dyn Clock> = Rc::new(PerformanceClock);
        let events: Rc<dyn EventBus> = Rc::new(LocalEventBus::new(clock.clone()));
        let errors: Rc<dyn ErrorBoundary> = Rc::new(LogErrorBoundary::with_events(events.clone()));
        let cache: Rc<dyn CueCache> = Rc::new(WebStorageCache::new(clock));

        let container: Element = container.into();
        let engine = Rc::new(SyncEngine::new(
            Rc::new(WebDom::new(container.clone())),
            container.clone(),
            Rc::new(WebMedia::new(media.clone())),
            Rc::new(RafScheduler::new()),
            Services {
                events: events.clone(),
                errors: errors.clone(),
            },
            &config,
        ));
        let loader = Rc::new(CueLoader::new(&config, errors.clone()).with_cache(cache.clone()));
        let poller = Rc::new(PlaybackPoller::new(media.clone(), events.clone()));

        let listeners = wire_listeners(&media, &container, &engine, &poller, &events, &errors)
            .map_err(|e| JsValue::from_str(&format!("Listener setup failed: {}", e)))?;

        info!("reader sync attached (offset {}s)", config.offset);
        Ok(WasmReaderSync {
            engine,
            events,
            errors,
            config,
            cache,
            loader,
            poller,
            listeners,
            js_subscriptions: Vec::new(),
        })
    }

    /// Parse (or fetch from cache) and install cues. Resolves to the cue count.
    pub fn load_srt(&self, srt: String) -> js_sys::Promise {
        let loader = self.loader.clone();
        let engine = Rc::downgrade(&self.engine);
        future_to_promise(async move {
            let cues = loader.load(&srt).await;
            let count = cues.len();
            let engine = engine
                .upgrade()
                .ok_or_else(|| JsValue::from_str("reader sync was destroyed"))?;
            engine.set_cues(cues);
            Ok(JsValue::from(count as u32))
        })
    }

    /// Install already parsed cues (JSON array as produced by `cues_json`).
    pub fn load_cues_json(&self, cues_json: &str) -> Result<usize, JsValue> {
        let cues: Vec<Cue> = serde_json::from_str(cues_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid cues: {}", e)))?;
        let count = cues.len();
        self.engine.set_cues(cues);
        Ok(count)
    }

    pub fn cues_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.engine.cues())
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn to_srt(&self) -> String {
        to_srt(&self.engine.cues())
    }

    pub fn set_offset(&self, offset: f64) -> Result<(), JsValue> {
        self.engine.set_offset(offset)?;
        Ok(())
    }

    pub fn set_autoscroll(&self, enabled: bool) {
        self.engine.set_autoscroll(enabled);
    }

    pub fn current_cue_id(&self) -> Option<String> {
        self.engine.current_cue().map(|cue| cue.id)
    }

    pub fn seek_to_cue(&self, id: &str) -> Result<(), JsValue> {
        self.poller.reset();
        self.engine.seek_to_cue(id)?;
        Ok(())
    }

    pub fn invalidate_layout(&self) {
        self.engine.invalidate_layout();
    }

    /// Subscribe `callback` to a bus event. The payload arrives as a plain JS object.
    pub fn on_event(&mut self, name: &str, callback: js_sys::Function) {
        let event = name.to_string();
        let subscription = self.events.on(
            name,
            Box::new(move |payload: &Value| {
                let value = js_sys::JSON::parse(&payload.to_string()).unwrap_or(JsValue::NULL);
                if let Err(err) = callback.call1(&JsValue::NULL, &value) {
                    warn!("{} listener threw: {:?}", event, err);
                }
            }),
            SubscribeOptions::default(),
        );
        self.js_subscriptions.push(subscription);
    }

    /// Route background parsing through `runner(kind, payload, timeoutMs) => Promise<string>`.
    pub fn set_task_runner(&mut self, runner: js_sys::Function) {
        let dispatcher: Rc<dyn TaskDispatcher> = Rc::new(JsTaskDispatcher::new(runner));
        self.loader = Rc::new(
            CueLoader::new(&self.config, self.errors.clone())
                .with_cache(self.cache.clone())
                .with_dispatcher(dispatcher),
        );
    }

    /// Detach every listener and clear the highlight. The instance is inert afterwards.
    pub fn destroy(&mut self) {
        self.poller.stop();
        self.listeners.clear();
        self.engine.destroy();
        self.js_subscriptions.clear();
        debug!("reader sync destroyed");
    }
}

fn wire_listeners(
    media: &HtmlMediaElement,
    container: &Element,
    engine: &Rc<SyncEngine<WebDom>>,
    poller: &Rc<PlaybackPoller>,
    events: &Rc<dyn EventBus>,
    errors: &Rc<dyn ErrorBoundary>,
) -> Result<Vec<EventListener>, SyncError> {
    let mut listeners = Vec::new();

    let p = Rc::downgrade(poller);
    listeners.push(EventListener::new(media, "timeupdate", move |_| {
        if let Some(poller) = p.upgrade() {
            poller.sample();
        }
    })?);

    let p = Rc::downgrade(poller);
    listeners.push(EventListener::new(media, "play", move |_| {
        if let Some(poller) = p.upgrade() {
            poller.start();
        }
    })?);

    let p = Rc::downgrade(poller);
    listeners.push(EventListener::new(media, "pause", move |_| {
        if let Some(poller) = p.upgrade() {
            poller.stop();
        }
    })?);

    let p = Rc::downgrade(poller);
    listeners.push(EventListener::new(media, "seeked", move |_| {
        if let Some(poller) = p.upgrade() {
            poller.reset();
            poller.sample();
        }
    })?);

    let p = Rc::downgrade(poller);
    let bus = Rc::downgrade(events);
    listeners.push(EventListener::new(media, "ended", move |_| {
        if let Some(poller) = p.upgrade() {
            poller.stop();
        }
        if let Some(bus) = bus.upgrade() {
            bus.emit(EVENT_MEDIA_ENDED, &serde_json::json!({}));
        }
    })?);

    let e: Weak<SyncEngine<WebDom>> = Rc::downgrade(engine);
    let errors = errors.clone();
    listeners.push(EventListener::new(container, "click", move |event| {
        let Some(engine) = e.upgrade() else {
            return;
        };
        let Some(target) = event.target().and_then(|t| t.dyn_into::<Element>().ok()) else {
            return;
        };
        match engine.handle_click(&target) {
            Ok(outcome) => debug!("click: {:?}", outcome),
            Err(err) => errors.handle(&err, "click-to-seek"),
        }
    })?);

    if let Some(window) = web_sys::window() {
        let e = Rc::downgrade(engine);
        listeners.push(EventListener::new(&window, "resize", move |_| {
            if let Some(engine) = e.upgrade() {
                engine.invalidate_layout();
            }
        })?);
    }

    Ok(listeners)
}
