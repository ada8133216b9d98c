// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! Event-log scanning. Lines are split on literal LF bytes and carry their
//! absolute byte range in the raw file; slices are never reserialized, so
//! concatenating them with single LFs reproduces the input exactly.

use crate::error::{FlashFreezeError, FlashFreezeResult};
use serde::Deserialize;

pub const EVENTS_FILE_NAME: &str = "events.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Observation,
    SafetyTrigger,
    Other,
}

impl EventKind {
    fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "observation" => Some(EventKind::Observation),
            "safety_trigger" => Some(EventKind::SafetyTrigger),
            "other" => Some(EventKind::Other),
            _ => None,
        }
    }
}

/// One parsed event plus the byte range of its originating line.
/// `byte_end` is the offset of the terminating LF, exclusive of it.
#[derive(Debug, Clone)]
pub struct Event {
    pub frame_id: u64,
    pub t: String,
    pub kind: EventKind,
    pub label: Option<String>,
    pub byte_start: u64,
    pub byte_end: u64,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    frame_id: u64,
    t: String,
    kind: String,
    #[serde(default)]
    label: Option<String>,
}

/// Restartable scanner over the raw event-log bytes.
pub struct EventScanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    last_frame: Option<u64>,
    failed: bool,
}

impl<'a> EventScanner<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            last_frame: None,
            failed: false,
        }
    }

    fn parse_line(&mut self, start: usize, line: &'a [u8]) -> FlashFreezeResult<Event> {
        let wire: WireEvent = serde_json::from_slice(line).map_err(|e| {
            FlashFreezeError::invalid(format!(
                "{EVENTS_FILE_NAME}: bad event at offset {start}: {e}"
            ))
        })?;
        let kind = EventKind::from_wire(&wire.kind).ok_or_else(|| {
            FlashFreezeError::invalid(format!(
                "{EVENTS_FILE_NAME}: unknown event kind {:?} at offset {start}",
                wire.kind
            ))
        })?;

        if let Some(last) = self.last_frame {
            if wire.frame_id < last {
                return Err(FlashFreezeError::OutOfOrder {
                    file: EVENTS_FILE_NAME.to_string(),
                    offset: start as u64,
                    expected: last,
                    found: wire.frame_id,
                });
            }
        }
        self.last_frame = Some(wire.frame_id);

        Ok(Event {
            frame_id: wire.frame_id,
            t: wire.t,
            kind,
            label: wire.label,
            byte_start: start as u64,
            byte_end: (start + line.len()) as u64,
        })
    }
}

impl<'a> Iterator for EventScanner<'a> {
    type Item = FlashFreezeResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.bytes.len() {
            return None;
        }
        let start = self.pos;
        let rest = &self.bytes[start..];
        let (line, advance) = match rest.iter().position(|&b| b == b'\n') {
            Some(idx) => (&rest[..idx], idx + 1),
            None => (rest, rest.len()),
        };
        self.pos = start + advance;

        if line.is_empty() {
            // Only a trailing LF may leave an empty remainder; an empty line
            // anywhere else would break the concatenation invariant.
            if self.pos >= self.bytes.len() {
                return None;
            }
            self.failed = true;
            return Some(Err(FlashFreezeError::invalid(format!(
                "{EVENTS_FILE_NAME}: empty line at offset {start}"
            ))));
        }

        let parsed = self.parse_line(start, line);
        if parsed.is_err() {
            self.failed = true;
        }
        Some(parsed)
    }
}

/// Eagerly scan the full log, failing on the first malformed line.
pub fn scan_events(bytes: &[u8]) -> FlashFreezeResult<Vec<Event>> {
    EventScanner::new(bytes).collect()
}
