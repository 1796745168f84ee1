// Sync engine: clock ticks -> current cue -> one highlight frame.
// Rule: at most one highlight frame in flight. The update guard travels with it.
// See DESIGN.md: Sync Engine

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use log::{debug, trace};
use serde_json::{json, Value};

use crate::dom::{Dom, FrameHandle, FrameScheduler, MediaElement};
use crate::error::SyncError;
use crate::highlight::HighlightRenderer;
use crate::resolver::ElementResolver;
use crate::scroll::ScrollController;
use crate::seek::{find_click_target, ClickOutcome};
use crate::services::{
    Services, SubscribeOptions, Subscription, EVENT_CLOCK_TICK, EVENT_CUES_LOADED,
    EVENT_DESTROYED, EVENT_ENDED, EVENT_HIGHLIGHT, EVENT_MEDIA_ENDED,
};
use crate::time_index::CueTrack;
use crate::types::{Cue, SyncConfig, Tick};

/// Ticks closer together than this (host ms) are dropped.
const MIN_TICK_SPACING_MS: f64 = 16.0;
/// Media time must move at least this far (s) from the last processed time.
const MIN_TIME_DELTA_SECS: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Tracking,
}

/// Scoped "update in progress" flag. Released on drop.
struct UpdateGuard {
    flag: Rc<Cell<bool>>,
}

impl UpdateGuard {
    fn try_acquire(flag: &Rc<Cell<bool>>) -> Option<Self> {
        if flag.replace(true) {
            return None;
        }
        Some(UpdateGuard { flag: flag.clone() })
    }
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

#[derive(Debug)]
struct SyncState<E> {
    current_index: Option<usize>,
    last_element: Option<E>,
    time_offset: f64,
    autoscroll: bool,
    last_update_time: f64,
    last_processed_time: f64,
}

impl<E> SyncState<E> {
    fn reset_tracking(&mut self) {
        self.current_index = None;
        self.last_update_time = f64::NEG_INFINITY;
        self.last_processed_time = f64::NEG_INFINITY;
    }
}

struct EngineInner<D: Dom> {
    dom: Rc<D>,
    container: D::Element,
    media: Rc<dyn MediaElement>,
    scheduler: Rc<dyn FrameScheduler>,
    services: Services,
    track: RefCell<CueTrack>,
    resolver: RefCell<ElementResolver<D::Element>>,
    renderer: RefCell<HighlightRenderer<D::Element>>,
    scroll: ScrollController,
    tolerance: f64,
    fade_out_ms: u32,
    state: RefCell<SyncState<D::Element>>,
    updating: Rc<Cell<bool>>,
    pending_frame: Cell<Option<FrameHandle>>,
    subscriptions: RefCell<Vec<Subscription>>,
    destroyed: Cell<bool>,
}

/// Keeps the highlighted element in step with media playback.
///
/// Constructed with every collaborator it talks to; subscribes to clock ticks and
/// media end on the event bus until [`destroy`](Self::destroy) or drop.
pub struct SyncEngine<D: Dom + 'static> {
    inner: Rc<EngineInner<D>>,
}

impl<D: Dom + 'static> SyncEngine<D> {
    pub fn new(
        dom: Rc<D>,
        container: D::Element,
        media: Rc<dyn MediaElement>,
        scheduler: Rc<dyn FrameScheduler>,
        services: Services,
        config: &SyncConfig,
    ) -> Self {
        let inner = Rc::new(EngineInner {
            dom,
            container,
            media,
            scheduler,
            services,
            track: RefCell::new(CueTrack::default()),
            resolver: RefCell::new(ElementResolver::new()),
            renderer: RefCell::new(HighlightRenderer::new()),
            scroll: ScrollController::new(config.scroll_margin),
            tolerance: config.tolerance,
            fade_out_ms: config.fade_out_ms,
            state: RefCell::new(SyncState {
                current_index: None,
                last_element: None,
                time_offset: config.offset,
                autoscroll: config.autoscroll,
                last_update_time: f64::NEG_INFINITY,
                last_processed_time: f64::NEG_INFINITY,
            }),
            updating: Rc::new(Cell::new(false)),
            pending_frame: Cell::new(None),
            subscriptions: RefCell::new(Vec::new()),
            destroyed: Cell::new(false),
        });
        attach(&inner);
        SyncEngine { inner }
    }

    /// Replace the cue set. Clears the current highlight and every cache keyed by cue.
    pub fn set_cues(&self, cues: Vec<Cue>) {
        let inner = &self.inner;
        inner.cancel_pending();
        inner.clear_now();
        inner.state.borrow_mut().reset_tracking();

        let count = cues.len();
        *inner.track.borrow_mut() = CueTrack::new(cues);
        inner.resolver.borrow_mut().clear();
        inner.renderer.borrow_mut().invalidate();

        debug!("loaded {} cues", count);
        inner
            .services
            .events
            .emit(EVENT_CUES_LOADED, &json!({ "count": count }));
    }

    pub fn cues(&self) -> Vec<Cue> {
        self.inner.track.borrow().cues().to_vec()
    }

    pub fn cue_count(&self) -> usize {
        self.inner.track.borrow().len()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.inner.state.borrow().current_index
    }

    pub fn current_cue(&self) -> Option<Cue> {
        let index = self.current_index()?;
        self.inner.track.borrow().get(index).cloned()
    }

    pub fn phase(&self) -> SyncPhase {
        match self.current_index() {
            Some(_) => SyncPhase::Tracking,
            None => SyncPhase::Idle,
        }
    }

    pub fn is_updating(&self) -> bool {
        self.inner.updating.get()
    }

    /// Seconds added to media time. Takes effect from the next tick.
    pub fn set_offset(&self, offset: f64) -> Result<(), SyncError> {
        if !offset.is_finite() {
            return Err(SyncError::InvalidConfig(format!("offset must be finite, got {}", offset)));
        }
        let mut state = self.inner.state.borrow_mut();
        state.time_offset = offset;
        state.last_processed_time = f64::NEG_INFINITY;
        Ok(())
    }

    pub fn offset(&self) -> f64 {
        self.inner.state.borrow().time_offset
    }

    pub fn set_autoscroll(&self, enabled: bool) {
        self.inner.state.borrow_mut().autoscroll = enabled;
    }

    pub fn autoscroll(&self) -> bool {
        self.inner.state.borrow().autoscroll
    }

    /// Forget measured layouts and cached elements, e.g. after a resize or re-render.
    pub fn invalidate_layout(&self) {
        self.inner.renderer.borrow_mut().invalidate();
        self.inner.resolver.borrow_mut().clear_elements();
    }

    /// Feed one clock sample directly, bypassing the bus.
    pub fn tick(&self, tick: Tick) {
        self.inner.on_tick(tick);
    }

    pub fn handle_click(&self, target: &D::Element) -> Result<ClickOutcome, SyncError> {
        let inner = &self.inner;
        let found = find_click_target(inner.dom.as_ref(), target, &inner.track.borrow());
        let Some(index) = found else {
            return Ok(ClickOutcome::Ignored);
        };
        let current = inner.state.borrow().current_index;
        if current == Some(index) && !inner.media.is_paused() {
            return Ok(ClickOutcome::SameCue(index));
        }
        inner.seek_to_index(index)?;
        Ok(ClickOutcome::Seeked(index))
    }

    pub fn seek_to_cue(&self, id: &str) -> Result<(), SyncError> {
        let index = self
            .inner
            .track
            .borrow()
            .index_of(id)
            .ok_or_else(|| SyncError::UnknownCue(id.to_string()))?;
        self.inner.seek_to_index(index)
    }

    pub fn handle_ended(&self) {
        self.inner.on_ended();
    }

    /// Cancel the pending frame, detach from the bus and clear the highlight.
    /// Safe to call more than once.
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.replace(true) {
            return;
        }
        inner.cancel_pending();
        inner.subscriptions.borrow_mut().clear();
        inner.clear_now();
        inner.state.borrow_mut().reset_tracking();
        inner.services.events.emit(EVENT_DESTROYED, &json!({}));
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }
}

impl<D: Dom + 'static> Drop for SyncEngine<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn attach<D: Dom + 'static>(inner: &Rc<EngineInner<D>>) {
    let events = inner.services.events.clone();

    let weak = Rc::downgrade(inner);
    let ticks = events.on(
        EVENT_CLOCK_TICK,
        Box::new(move |payload: &Value| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match serde_json::from_value::<Tick>(payload.clone()) {
                Ok(tick) => inner.on_tick(tick),
                Err(err) => inner.services.errors.handle(&err.into(), "clock tick"),
            }
        }),
        SubscribeOptions::default(),
    );

    let weak: Weak<EngineInner<D>> = Rc::downgrade(inner);
    let ended = events.on(
        EVENT_MEDIA_ENDED,
        Box::new(move |_: &Value| {
            if let Some(inner) = weak.upgrade() {
                inner.on_ended();
            }
        }),
        SubscribeOptions::default(),
    );

    inner.subscriptions.borrow_mut().extend([ticks, ended]);
}

impl<D: Dom + 'static> EngineInner<D> {
    fn on_tick(self: &Rc<Self>, tick: Tick) {
        if self.destroyed.get() {
            return;
        }
        let Some(guard) = UpdateGuard::try_acquire(&self.updating) else {
            trace!("tick at {:.3}s dropped: highlight pending", tick.current_time);
            return;
        };

        let (adjusted, hint) = {
            let mut state = self.state.borrow_mut();
            if tick.timestamp - state.last_update_time < MIN_TICK_SPACING_MS {
                return;
            }
            state.last_update_time = tick.timestamp;

            let adjusted = tick.current_time + state.time_offset;
            if (adjusted - state.last_processed_time).abs() < MIN_TIME_DELTA_SECS {
                return;
            }
            (adjusted, state.current_index)
        };

        let found = self.track.borrow().lookup(adjusted, self.tolerance, hint);
        {
            let mut state = self.state.borrow_mut();
            if found == state.current_index {
                return;
            }
            state.current_index = found;
            state.last_processed_time = adjusted;
        }
        trace!("cue {:?} -> {:?} at {:.3}s", hint, found, adjusted);
        self.schedule_highlight(found, guard);
    }

    /// Replace any pending frame with one that moves the highlight to `index`.
    fn schedule_highlight(self: &Rc<Self>, index: Option<usize>, guard: UpdateGuard) {
        self.cancel_pending();
        let weak = Rc::downgrade(self);
        let handle = self.scheduler.request_frame(Box::new(move || {
            let _guard = guard;
            if let Some(inner) = weak.upgrade() {
                inner.pending_frame.set(None);
                inner.transition_to(index);
            }
        }));
        self.pending_frame.set(Some(handle));
    }

    fn cancel_pending(&self) {
        if let Some(handle) = self.pending_frame.take() {
            self.scheduler.cancel_frame(handle);
        }
    }

    /// Fade out the old highlight, then apply the new one.
    fn transition_to(self: &Rc<Self>, index: Option<usize>) {
        let previous = self.state.borrow_mut().last_element.take();
        if let Some(element) = previous {
            let removed = self.renderer.borrow().remove(self.dom.as_ref(), &element);
            match removed {
                Ok(()) => self.schedule_fade_out(element),
                Err(err) => self.services.errors.handle(&err, "highlight removal"),
            }
        }

        let cue = index.and_then(|i| self.track.borrow().get(i).cloned());
        if let Some(cue) = &cue {
            self.highlight(cue);
        }

        let id = cue.map(|c| c.id);
        self.services
            .events
            .emit(EVENT_HIGHLIGHT, &json!({ "index": index, "id": id }));
    }

    fn highlight(&self, cue: &Cue) {
        let dom = self.dom.as_ref();
        let found = self.resolver.borrow_mut().resolve(dom, &cue.id);
        let Some(element) = found else {
            debug!("{}", SyncError::ResolutionMiss(cue.id.clone()));
            return;
        };

        let applied = self.renderer.borrow_mut().apply(dom, &element, &cue.id);
        match applied {
            Ok(style) => {
                trace!("cue {} highlighted as {:?}", cue.id, style);
                let autoscroll = {
                    let mut state = self.state.borrow_mut();
                    state.last_element = Some(element.clone());
                    state.autoscroll
                };
                self.scroll
                    .ensure_visible(dom, &element, &self.container, autoscroll);
            }
            Err(err) => {
                self.services.errors.handle(&err, "highlight");
                // Leave nothing half-applied behind.
                let cleared = self.renderer.borrow().clear(dom, &element);
                if let Err(err) = cleared {
                    self.services.errors.handle(&err, "highlight cleanup");
                }
            }
        }
    }

    fn schedule_fade_out(self: &Rc<Self>, element: D::Element) {
        let weak = Rc::downgrade(self);
        self.scheduler.set_timeout(
            self.fade_out_ms,
            Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let finished = inner
                    .renderer
                    .borrow()
                    .finish_fade_out(inner.dom.as_ref(), &element);
                if let Err(err) = finished {
                    inner.services.errors.handle(&err, "highlight fade-out");
                }
            }),
        );
    }

    /// Strip the current highlight without a fade.
    fn clear_now(&self) {
        let previous = self.state.borrow_mut().last_element.take();
        if let Some(element) = previous {
            let cleared = self.renderer.borrow().clear(self.dom.as_ref(), &element);
            if let Err(err) = cleared {
                self.services.errors.handle(&err, "highlight clear");
            }
        }
    }

    fn seek_to_index(self: &Rc<Self>, index: usize) -> Result<(), SyncError> {
        let start = match self.track.borrow().get(index) {
            Some(cue) => cue.start_secs(),
            None => return Err(SyncError::UnknownCue(index.to_string())),
        };
        let offset = self.state.borrow().time_offset;
        let target = (start - offset).max(0.0);

        self.media.seek(target)?;
        let played = self.media.play();

        self.cancel_pending();
        {
            let mut state = self.state.borrow_mut();
            state.current_index = Some(index);
            state.last_processed_time = target + offset;
        }
        self.transition_to(Some(index));
        played
    }

    fn on_ended(self: &Rc<Self>) {
        if self.destroyed.get() {
            return;
        }
        self.cancel_pending();
        self.transition_to(None);
        self.state.borrow_mut().reset_tracking();
        self.services.events.emit(EVENT_ENDED, &json!({}));
    }
}
