// Cue loading: cache, then background parse, then inline parse.
// Rule: loading always yields cues. Every failure degrades to the synchronous parser.
// See DESIGN.md: Cue Loader

use std::fmt;
use std::rc::Rc;

use log::{debug, warn};

use crate::cue::parse_srt_with_text;
use crate::error::SyncError;
use crate::services::{CacheSetOptions, CacheTier, CueCache, ErrorBoundary, TaskDispatcher};
use crate::types::{Cue, SyncConfig};

/// Task kind understood by the background parser.
pub const PARSE_TASK: &str = "parse-srt";

const CACHE_PREFIX: &str = "reader-sync:cues";
const CACHE_TIERS: [CacheTier; 2] = [CacheTier::Memory, CacheTier::Session];

/// Cache key for a subtitle file: content hash plus length.
pub fn cache_key(srt: &str) -> String {
    let mut hasher = md5::Context::new();
    hasher.consume(srt.as_bytes());
    format!("{}:{:x}:{}", CACHE_PREFIX, hasher.compute(), srt.len())
}

pub struct CueLoader {
    cache: Option<Rc<dyn CueCache>>,
    dispatcher: Option<Rc<dyn TaskDispatcher>>,
    errors: Rc<dyn ErrorBoundary>,
    use_worker: bool,
    worker_timeout_ms: u32,
    ttl_secs: u64,
}

impl CueLoader {
    pub fn new(config: &SyncConfig, errors: Rc<dyn ErrorBoundary>) -> Self {
        CueLoader {
            cache: None,
            dispatcher: None,
            errors,
            use_worker: config.enable_worker_parsing,
            worker_timeout_ms: config.worker_timeout_ms,
            ttl_secs: config.cache_ttl_secs,
        }
    }

    pub fn with_cache(mut self, cache: Rc<dyn CueCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Rc<dyn TaskDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Cached cues, or an inline parse.
    pub fn load_sync(&self, srt: &str) -> Vec<Cue> {
        let key = cache_key(srt);
        if let Some(cues) = self.cached(&key) {
            return cues;
        }
        let cues = parse_srt_with_text(srt);
        self.store(&key, &cues);
        cues
    }

    /// Cached cues, or a background parse when enabled, falling back to an inline parse.
    pub async fn load(&self, srt: &str) -> Vec<Cue> {
        let key = cache_key(srt);
        if let Some(cues) = self.cached(&key) {
            return cues;
        }

        let dispatcher = self.dispatcher.clone().filter(|_| self.use_worker);
        let cues = match dispatcher {
            Some(dispatcher) => match self.parse_in_background(dispatcher.as_ref(), srt).await {
                Ok(cues) => cues,
                Err(err) => {
                    warn!("background parse failed, parsing inline: {}", err);
                    self.errors.handle(&err, "cue loading");
                    parse_srt_with_text(srt)
                }
            },
            None => parse_srt_with_text(srt),
        };
        self.store(&key, &cues);
        cues
    }

    async fn parse_in_background(
        &self,
        dispatcher: &dyn TaskDispatcher,
        srt: &str,
    ) -> Result<Vec<Cue>, SyncError> {
        let json = dispatcher
            .execute_task(PARSE_TASK, srt.to_string(), self.worker_timeout_ms)
            .await
            .map_err(|err| match err {
                SyncError::WorkerFailure(_) => err,
                other => SyncError::WorkerFailure(other.to_string()),
            })?;
        serde_json::from_str(&json)
            .map_err(|e| SyncError::WorkerFailure(format!("unreadable result: {}", e)))
    }

    fn cached(&self, key: &str) -> Option<Vec<Cue>> {
        let blob = self.cache.as_ref()?.get(key, &CACHE_TIERS)?;
        match serde_json::from_str(&blob) {
            Ok(cues) => {
                debug!("cue cache hit for {}", key);
                Some(cues)
            }
            Err(err) => {
                self.errors.handle(&SyncError::from(err), "cue cache");
                None
            }
        }
    }

    fn store(&self, key: &str, cues: &[Cue]) {
        let Some(cache) = &self.cache else {
            return;
        };
        match serde_json::to_string(cues) {
            Ok(blob) => cache.set(
                key,
                &blob,
                &CacheSetOptions {
                    tiers: CACHE_TIERS.to_vec(),
                    ttl_secs: Some(self.ttl_secs),
                },
            ),
            Err(err) => self.errors.handle(&SyncError::from(err), "cue cache"),
        }
    }
}

impl fmt::Debug for CueLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CueLoader")
            .field("cached", &self.cache.is_some())
            .field("background", &(self.use_worker && self.dispatcher.is_some()))
            .field("worker_timeout_ms", &self.worker_timeout_ms)
            .finish()
    }
}
