// `log` backend writing to the browser console.
// See DESIGN.md: Logging

use log::{Level, LevelFilter, Log, Metadata, Record};
use wasm_bindgen::JsValue;
use web_sys::console;

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[reader_sync] {}", record.args()));
        match record.level() {
            Level::Error => console::error_1(&line),
            Level::Warn => console::warn_1(&line),
            Level::Info => console::info_1(&line),
            Level::Debug | Level::Trace => console::debug_1(&line),
        }
    }

    fn flush(&self) {}
}

/// Maximum level for a given `debug` setting.
pub fn level_for(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    }
}

/// Install the console logger. Later calls only adjust the level.
pub fn init_logging(debug: bool) {
    // Already installed on repeat calls.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level_for(debug));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_picks_level() {
        assert_eq!(level_for(true), LevelFilter::Debug);
        assert_eq!(level_for(false), LevelFilter::Warn);
    }
}
