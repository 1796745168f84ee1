// Strong typing over strings. Newtypes for timestamps, value structs for ticks and layout.
// See DESIGN.md: Data model

use serde::{Deserialize, Serialize};

/// Timestamp in microseconds. Newtype for type safety.
/// SRT millisecond precision is exact in this representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_micros(us: u64) -> Self {
        Timestamp(us)
    }

    /// Saturates at `u64::MAX` microseconds.
    pub fn from_millis(ms: u64) -> Self {
        Timestamp(ms.saturating_mul(1000))
    }

    pub fn checked_from_millis(ms: u64) -> Option<Self> {
        ms.checked_mul(1000).map(Timestamp)
    }

    /// Negative and non-finite inputs clamp to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Timestamp(0);
        }
        Timestamp((secs * 1_000_000.0).round() as u64)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn as_millis(&self) -> u64 {
        self.0 / 1000
    }

    pub fn as_secs(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

/// One subtitle entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub id: String,
    pub start: Timestamp,
    pub end: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<String>,
}

impl Cue {
    pub fn new(id: impl Into<String>, start: Timestamp, end: Timestamp) -> Self {
        Cue {
            id: id.into(),
            start,
            end,
            text: None,
            words: Vec::new(),
        }
    }

    pub fn start_secs(&self) -> f64 {
        self.start.as_secs()
    }

    pub fn end_secs(&self) -> f64 {
        self.end.as_secs()
    }
}

/// Derived clock sample handed to the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Media position in seconds (before offset).
    pub current_time: f64,
    pub paused: bool,
    /// Host monotonic time in milliseconds (`performance.now()`).
    pub timestamp: f64,
}

/// Axis-aligned rectangle in CSS pixels, viewport-relative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// The subset of computed style the highlight decision reads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComputedStyle {
    pub display: String,
    pub position: String,
    pub float: String,
}

/// Layout context of a cue element. Measured once, then reused until invalidated.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutSnapshot {
    pub bounding_rect: Rect,
    pub parent_width: f64,
    pub display: String,
    pub position: String,
    pub float: String,
    pub is_inline: bool,
    pub is_in_paragraph: bool,
    pub has_siblings: bool,
    pub is_dense_text: bool,
}

impl LayoutSnapshot {
    /// Element spans most of its parent's width.
    pub fn is_wide(&self) -> bool {
        self.parent_width > 0.0 && self.bounding_rect.width / self.parent_width > WIDE_RATIO
    }
}

/// Width ratio above which an element counts as wide.
pub const WIDE_RATIO: f64 = 0.8;

/// Highlight presentation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightStyle {
    /// Non-intrusive marker for inline runs in dense paragraphs.
    Minimal,
    Medium,
    /// Decorative treatment for wide block-level cues.
    Advanced,
    Standard,
}

impl HighlightStyle {
    pub const ALL: [HighlightStyle; 4] = [
        HighlightStyle::Minimal,
        HighlightStyle::Medium,
        HighlightStyle::Advanced,
        HighlightStyle::Standard,
    ];

    pub fn class_name(&self) -> &'static str {
        match self {
            HighlightStyle::Minimal => "highlight-minimal",
            HighlightStyle::Medium => "highlight-medium",
            HighlightStyle::Advanced => "highlight-advanced",
            HighlightStyle::Standard => "highlight-standard",
        }
    }
}

/// Engine configuration passed from JS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds added to the media clock before every cue comparison.
    #[serde(default)]
    pub offset: f64,
    #[serde(default = "default_true")]
    pub autoscroll: bool,
    #[serde(default, alias = "enableWorkerParsing")]
    pub enable_worker_parsing: bool,
    #[serde(default)]
    pub debug: bool,
    /// Lookup tolerance in seconds.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Visibility margin in CSS pixels.
    #[serde(default = "default_scroll_margin", alias = "scrollMargin")]
    pub scroll_margin: f64,
    #[serde(default = "default_fade_out_ms", alias = "fadeOutMs")]
    pub fade_out_ms: u32,
    #[serde(default = "default_worker_timeout_ms", alias = "workerTimeoutMs")]
    pub worker_timeout_ms: u32,
    #[serde(default = "default_cache_ttl_secs", alias = "cacheTtlSecs")]
    pub cache_ttl_secs: u64,
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self, crate::SyncError> {
        if json.trim().is_empty() {
            return Ok(SyncConfig::default());
        }
        let config: SyncConfig = serde_json::from_str(json)
            .map_err(|e| crate::SyncError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), crate::SyncError> {
        if !self.offset.is_finite() {
            return Err(crate::SyncError::InvalidConfig(
                "offset must be finite".to_string(),
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(crate::SyncError::InvalidConfig(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        if !self.scroll_margin.is_finite() || self.scroll_margin < 0.0 {
            return Err(crate::SyncError::InvalidConfig(format!(
                "scroll_margin must be a non-negative number, got {}",
                self.scroll_margin
            )));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            offset: 0.0,
            autoscroll: true,
            enable_worker_parsing: false,
            debug: false,
            tolerance: default_tolerance(),
            scroll_margin: default_scroll_margin(),
            fade_out_ms: default_fade_out_ms(),
            worker_timeout_ms: default_worker_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_tolerance() -> f64 {
    0.15
}

fn default_scroll_margin() -> f64 {
    30.0
}

fn default_fade_out_ms() -> u32 {
    300
}

fn default_worker_timeout_ms() -> u32 {
    5_000
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}
