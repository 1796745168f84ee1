// SRT parsing into timed cues. Pure, synchronous, deterministic.
// Rule: a malformed block is skipped, never fatal. No cues is a valid state.
// See DESIGN.md: Cue Model & Parser

use std::collections::HashSet;

use log::debug;

use crate::error::SyncError;
use crate::types::{Cue, Timestamp};

const ARROW: &str = "-->";

/// Parse SRT text into cues (id and timing only).
pub fn parse_srt(srt: &str) -> Vec<Cue> {
    parse(srt, false)
}

/// Parse SRT text into cues, keeping the cue text and its words.
pub fn parse_srt_with_text(srt: &str) -> Vec<Cue> {
    parse(srt, true)
}

fn parse(srt: &str, keep_text: bool) -> Vec<Cue> {
    let mut cues = Vec::new();
    let mut seen_ids = HashSet::new();

    for (ordinal, block) in split_blocks(srt).iter().enumerate() {
        let ordinal = ordinal + 1;
        match parse_block(block, ordinal, keep_text) {
            Ok(cue) => {
                if !seen_ids.insert(cue.id.clone()) {
                    debug!("skipping subtitle block {}: duplicate cue id {}", ordinal, cue.id);
                    continue;
                }
                cues.push(cue);
            }
            Err(err) => debug!("skipping subtitle block: {}", err),
        }
    }

    cues
}

/// Split into blank-line-delimited blocks of trimmed, non-empty lines.
fn split_blocks(srt: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();

    // `lines()` already strips a trailing '\r'.
    for line in srt.trim_start_matches('\u{feff}').lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}

fn parse_block(lines: &[&str], ordinal: usize, keep_text: bool) -> Result<Cue, SyncError> {
    let malformed = |message: &str| SyncError::Parse {
        block: ordinal,
        message: message.to_string(),
    };

    if lines.len() < 2 {
        return Err(malformed("fewer than 2 lines"));
    }

    // Index line is optional: a block may open directly with its timing line.
    let (id, timing, text_lines) = if lines[0].contains(ARROW) {
        (ordinal.to_string(), lines[0], &lines[1..])
    } else {
        (lines[0].to_string(), lines[1], &lines[2..])
    };

    let (start, end) = timing
        .split_once(ARROW)
        .ok_or_else(|| malformed("missing --> separator"))?;

    // Cue settings may follow the end timestamp.
    let end = end.split_whitespace().next().unwrap_or_default();

    let start = parse_timestamp(start).ok_or_else(|| malformed("bad start timestamp"))?;
    let end = parse_timestamp(end).ok_or_else(|| malformed("bad end timestamp"))?;
    if end < start {
        return Err(malformed("end precedes start"));
    }

    let mut cue = Cue::new(id, start, end);
    if keep_text {
        let text = text_lines.join(" ");
        cue.words = split_words(&text);
        cue.text = Some(text);
    }
    Ok(cue)
}

fn split_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `HH:MM:SS,mmm` (a `.` separator is accepted too).
pub fn parse_timestamp(s: &str) -> Option<Timestamp> {
    let s = s.trim();
    let (hms, millis) = s.rsplit_once(|c: char| c == ',' || c == '.')?;

    let mut fields = hms.split(':');
    let hours = parse_digits(fields.next()?)?;
    let minutes = parse_digits(fields.next()?)?;
    let seconds = parse_digits(fields.next()?)?;
    if fields.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }

    if millis.is_empty() || millis.len() > 3 {
        return None;
    }
    // "5" means 500ms, "05" means 50ms.
    let millis = parse_digits(millis)? * 10u64.pow(3 - millis.len() as u32);

    let total = hours
        .checked_mul(3_600_000)?
        .checked_add(minutes * 60_000 + seconds * 1000 + millis)?;
    Timestamp::checked_from_millis(total)
}

fn parse_digits(field: &str) -> Option<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Format as `HH:MM:SS,mmm`.
pub fn format_timestamp(ts: Timestamp) -> String {
    let total_ms = ts.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// Serialize cues back to SRT.
pub fn to_srt(cues: &[Cue]) -> String {
    let mut out = String::new();
    for cue in cues {
        out.push_str(&cue.id);
        out.push('\n');
        out.push_str(&format_timestamp(cue.start));
        out.push_str(" --> ");
        out.push_str(&format_timestamp(cue.end));
        out.push('\n');
        if let Some(text) = &cue.text {
            out.push_str(text);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}
