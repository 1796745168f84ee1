// Collaborator contracts the sync engine is constructed with, plus small in-memory implementations.
// Rule: no ambient globals. Everything the engine talks to arrives through these traits.
// See DESIGN.md: Services

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};

use log::error;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::SyncError;

/// Clock tick republished by the playback clock adapter.
pub const EVENT_CLOCK_TICK: &str = "clock:tick";
/// Host media reached its end.
pub const EVENT_MEDIA_ENDED: &str = "media:ended";
/// Current cue changed. Payload `{ "index": n|null, "id": s|null }`.
pub const EVENT_HIGHLIGHT: &str = "sync:highlight";
pub const EVENT_CUES_LOADED: &str = "sync:cues-loaded";
pub const EVENT_ENDED: &str = "sync:ended";
pub const EVENT_DESTROYED: &str = "sync:destroyed";
pub const EVENT_ERROR: &str = "sync:error";

/// Monotonic millisecond clock (`performance.now()` in the browser).
pub trait Clock {
    fn now_ms(&self) -> f64;
}

// =============================================================================
// Cache
// =============================================================================

/// Named storage backend, queried in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Memory,
    Session,
    Persistent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSetOptions {
    pub tiers: Vec<CacheTier>,
    pub ttl_secs: Option<u64>,
}

pub trait CueCache {
    /// First hit across `tiers`, in order.
    fn get(&self, key: &str, tiers: &[CacheTier]) -> Option<String>;
    fn set(&self, key: &str, value: &str, options: &CacheSetOptions);
}

struct CacheEntry {
    value: String,
    expires_at_ms: Option<f64>,
}

/// Memory tier with TTL expiry. Other tiers are ignored.
pub struct MemoryCache {
    clock: Rc<dyn Clock>,
    entries: RefCell<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        MemoryCache {
            clock,
            entries: RefCell::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl CueCache for MemoryCache {
    fn get(&self, key: &str, tiers: &[CacheTier]) -> Option<String> {
        if !tiers.contains(&CacheTier::Memory) {
            return None;
        }
        let now = self.clock.now_ms();
        let mut entries = self.entries.borrow_mut();
        let expired = match entries.get(key) {
            Some(entry) => entry.expires_at_ms.is_some_and(|at| now >= at),
            None => return None,
        };
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    fn set(&self, key: &str, value: &str, options: &CacheSetOptions) {
        if !options.tiers.contains(&CacheTier::Memory) {
            return;
        }
        let expires_at_ms = options
            .ttl_secs
            .map(|ttl| self.clock.now_ms() + ttl as f64 * 1000.0);
        self.entries.borrow_mut().insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at_ms,
            },
        );
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.borrow().len())
            .finish()
    }
}

// =============================================================================
// Event bus
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SubscribeOptions {
    /// Minimum spacing between deliveries to this handler.
    pub throttle_ms: Option<f64>,
}

/// Live subscription. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

pub trait EventBus {
    fn emit(&self, name: &str, payload: &Value);
    fn on(
        &self,
        name: &str,
        handler: Box<dyn Fn(&Value)>,
        options: SubscribeOptions,
    ) -> Subscription;
}

struct Listener {
    id: u64,
    handler: Box<dyn Fn(&Value)>,
    throttle_ms: Option<f64>,
    last_delivered_ms: Cell<Option<f64>>,
}

struct BusInner {
    clock: Rc<dyn Clock>,
    next_id: Cell<u64>,
    listeners: RefCell<HashMap<String, Vec<Rc<Listener>>>>,
}

/// Single-threaded pub/sub with per-subscription throttling.
#[derive(Clone)]
pub struct LocalEventBus {
    inner: Rc<BusInner>,
}

impl LocalEventBus {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        LocalEventBus {
            inner: Rc::new(BusInner {
                clock,
                next_id: Cell::new(0),
                listeners: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.inner
            .listeners
            .borrow()
            .get(name)
            .map_or(0, Vec::len)
    }
}

impl EventBus for LocalEventBus {
    fn emit(&self, name: &str, payload: &Value) {
        // Snapshot so handlers may emit or (un)subscribe while we iterate.
        let listeners: Vec<Rc<Listener>> = match self.inner.listeners.borrow().get(name) {
            Some(list) => list.clone(),
            None => return,
        };

        for listener in listeners {
            if let Some(throttle) = listener.throttle_ms {
                let now = self.inner.clock.now_ms();
                if let Some(last) = listener.last_delivered_ms.get() {
                    if now - last < throttle {
                        continue;
                    }
                }
                listener.last_delivered_ms.set(Some(now));
            }
            (listener.handler)(payload);
        }
    }

    fn on(
        &self,
        name: &str,
        handler: Box<dyn Fn(&Value)>,
        options: SubscribeOptions,
    ) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);

        self.inner
            .listeners
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .push(Rc::new(Listener {
                id,
                handler,
                throttle_ms: options.throttle_ms,
                last_delivered_ms: Cell::new(None),
            }));

        let weak: Weak<BusInner> = Rc::downgrade(&self.inner);
        let name = name.to_string();
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Some(list) = inner.listeners.borrow_mut().get_mut(&name) {
                    list.retain(|l| l.id != id);
                }
            }
        })
    }
}

impl fmt::Debug for LocalEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.inner.listeners.borrow();
        f.debug_struct("LocalEventBus")
            .field("events", &listeners.len())
            .field("listeners", &listeners.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

// =============================================================================
// Error boundary
// =============================================================================

pub trait ErrorBoundary {
    fn handle(&self, error: &SyncError, context: &str);
}

/// Logs every error and republishes it on the bus.
pub struct LogErrorBoundary {
    events: Option<Rc<dyn EventBus>>,
}

impl LogErrorBoundary {
    pub fn new() -> Self {
        LogErrorBoundary { events: None }
    }

    pub fn with_events(events: Rc<dyn EventBus>) -> Self {
        LogErrorBoundary {
            events: Some(events),
        }
    }
}

impl Default for LogErrorBoundary {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorBoundary for LogErrorBoundary {
    fn handle(&self, err: &SyncError, context: &str) {
        error!("[{}] {}", context, err);
        if let Some(events) = &self.events {
            events.emit(
                EVENT_ERROR,
                &json!({
                    "kind": err.kind(),
                    "message": err.to_string(),
                    "context": context,
                }),
            );
        }
    }
}

impl fmt::Debug for LogErrorBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogErrorBoundary")
            .field("publishes", &self.events.is_some())
            .finish()
    }
}

// =============================================================================
// Task dispatcher
// =============================================================================

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<String, SyncError>>>>;

/// Offloads heavy, non-interactive work (initial subtitle parsing).
pub trait TaskDispatcher {
    fn execute_task(&self, kind: &str, payload: String, timeout_ms: u32) -> TaskFuture;
}

/// Services handed to the engine at construction.
#[derive(Clone)]
pub struct Services {
    pub events: Rc<dyn EventBus>,
    pub errors: Rc<dyn ErrorBoundary>,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
