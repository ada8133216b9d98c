// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cross-validation of the narrative event stream against the binary
//! records discovered on disk. The join key is `frame_id`; offsets or
//! counts claimed by the narrative are never trusted.

use crate::capsule::Capsule;
use crate::context::{LocalPolicy, ScanLimits, WindowConfig};
use crate::error::{FlashFreezeError, FlashFreezeResult};
use crate::events::{Event, EventKind};
use crate::records::{self, RecordStatus, StreamKind};
use std::collections::{BTreeSet, HashSet};

/// One row of the `streams` evidence table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRow {
    pub frame_id: u64,
    pub stream: StreamKind,
    pub file: &'static str,
    pub offset: u64,
    pub length: u64,
    pub status: RecordStatus,
    pub content_hash: String,
}

#[derive(Debug, Default)]
pub struct JudgeOutcome {
    pub rows: Vec<StreamRow>,
    pub latent_rows: usize,
    pub residual_rows: usize,
    pub resyncs: u64,
    pub skipped_bytes: u64,
}

/// Frames covered by the residual windows of the given triggers, clamped to
/// the session extent known from the narrative.
fn window_frames(triggers: &[u64], windows: WindowConfig, last_frame: u64) -> BTreeSet<u64> {
    let mut frames = BTreeSet::new();
    for &t in triggers {
        let lo = t.saturating_sub(windows.pre_frames);
        let hi = t.saturating_add(windows.post_frames).min(last_frame);
        for f in lo..=hi {
            frames.insert(f);
        }
    }
    frames
}

pub fn judge(
    capsule: &Capsule,
    events: &[Event],
    limits: &ScanLimits,
    windows: WindowConfig,
    policy: &LocalPolicy,
) -> FlashFreezeResult<JudgeOutcome> {
    let mut outcome = JudgeOutcome::default();

    let triggers: Vec<u64> = events
        .iter()
        .filter(|e| e.kind == EventKind::SafetyTrigger)
        .map(|e| e.frame_id)
        .collect();
    let observations: Vec<u64> = events
        .iter()
        .filter(|e| e.kind == EventKind::Observation)
        .map(|e| e.frame_id)
        .collect();
    let last_frame = events.iter().map(|e| e.frame_id).max().unwrap_or(0);

    // Latent coverage: every observation frame needs a usable latent record.
    let latents_path = capsule.latents_path();
    let latent_scan = if latents_path.is_file() {
        records::scan_latents(&latents_path, limits, policy)?
    } else {
        records::ScanOutcome::default()
    };
    let present_latents: HashSet<u64> = latent_scan
        .rows
        .iter()
        .filter(|r| r.status.is_present())
        .map(|r| r.frame_id)
        .collect();
    for &frame_id in &observations {
        if !present_latents.contains(&frame_id) {
            return Err(FlashFreezeError::LatentMissing { frame_id });
        }
    }
    outcome.resyncs += latent_scan.resyncs;
    outcome.skipped_bytes += latent_scan.skipped_bytes;
    outcome.latent_rows = latent_scan.rows.len();
    outcome.rows.extend(latent_scan.rows.into_iter().map(|r| StreamRow {
        frame_id: r.frame_id,
        stream: StreamKind::Latents,
        file: StreamKind::Latents.file_name(),
        offset: r.offset,
        length: r.length,
        status: r.status,
        content_hash: r.content_hash,
    }));

    // Safe run: a session without safety triggers must carry no residuals.
    if triggers.is_empty() {
        if let Some(size) = capsule.residuals_size()? {
            if size > 0 {
                return Err(FlashFreezeError::UnexpectedResidual {
                    reason: format!(
                        "{} holds {size} bytes but the session has no safety_trigger events",
                        records::RESIDUALS_FILE
                    ),
                });
            }
        }
        return Ok(outcome);
    }

    let residuals_path = capsule.residuals_path();
    let residual_scan = if residuals_path.is_file() {
        records::scan_residuals(&residuals_path, limits)?
    } else {
        records::ScanOutcome::default()
    };
    outcome.resyncs += residual_scan.resyncs;
    outcome.skipped_bytes += residual_scan.skipped_bytes;

    let expected = window_frames(&triggers, windows, last_frame);
    for row in &residual_scan.rows {
        if row.status.is_present() && !expected.contains(&row.frame_id) {
            return Err(FlashFreezeError::UnexpectedResidual {
                reason: format!(
                    "residual frame {} at offset {} is outside every trigger window",
                    row.frame_id, row.offset
                ),
            });
        }
    }

    let present_residuals: HashSet<u64> = residual_scan
        .rows
        .iter()
        .filter(|r| r.status.is_present())
        .map(|r| r.frame_id)
        .collect();

    let mut residual_rows: Vec<StreamRow> = residual_scan
        .rows
        .into_iter()
        .map(|r| StreamRow {
            frame_id: r.frame_id,
            stream: StreamKind::Residuals,
            file: StreamKind::Residuals.file_name(),
            offset: r.offset,
            length: r.length,
            status: r.status,
            content_hash: r.content_hash,
        })
        .collect();

    for &frame_id in &expected {
        if !present_residuals.contains(&frame_id) {
            if policy.require_full_residual_windows {
                return Err(FlashFreezeError::UnexpectedResidual {
                    reason: format!("residual window is missing frame {frame_id}"),
                });
            }
            tracing::warn!(frame_id, "residual window gap recorded as missing");
            residual_rows.push(StreamRow {
                frame_id,
                stream: StreamKind::Residuals,
                file: StreamKind::Residuals.file_name(),
                offset: 0,
                length: 0,
                status: RecordStatus::Missing,
                content_hash: String::new(),
            });
        }
    }
    // Scanned rows are frame-sorted already; a stable sort threads the
    // synthesized gaps in without disturbing disk order.
    residual_rows.sort_by_key(|r| r.frame_id);

    outcome.residual_rows = residual_rows.len();
    outcome.rows.extend(residual_rows);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{RECORD_HEADER_LEN, encode_record};
    use std::fs;
    use std::path::Path;

    const LAT_LEN: usize = 16;

    fn limits() -> ScanLimits {
        ScanLimits {
            latent_payload_len: LAT_LEN as u32,
            residual_max_len: 4096,
            resync_window: 65536,
        }
    }

    fn windows(pre: u64, post: u64) -> WindowConfig {
        WindowConfig {
            pre_frames: pre,
            post_frames: post,
        }
    }

    fn event(frame: u64, kind: EventKind) -> Event {
        Event {
            frame_id: frame,
            t: format!("2026-01-01T00:00:{:02}Z", frame % 60),
            kind,
            label: None,
            byte_start: 0,
            byte_end: 0,
        }
    }

    fn write_capsule(dir: &Path) -> Capsule {
        let meta = serde_json::json!({
            "robot_id": "r-1",
            "session_id": "s-1",
            "started_at": "2026-01-01T00:00:00Z",
            "ended_at": "2026-01-01T00:01:00Z",
            "event_log_encoding": "utf-8",
            "event_log_newline": "\n",
        });
        fs::write(dir.join("meta.json"), meta.to_string()).unwrap();
        fs::write(dir.join("events.jsonl"), b"").unwrap();
        Capsule::open(dir).unwrap()
    }

    fn write_latents(dir: &Path, frames: std::ops::Range<u64>) {
        let mut bytes = Vec::new();
        for frame in frames {
            bytes.extend_from_slice(&encode_record(
                StreamKind::Latents,
                frame,
                0,
                &vec![frame as u8; LAT_LEN],
            ));
        }
        fs::write(dir.join(records::LATENTS_FILE), bytes).unwrap();
    }

    fn write_residuals(dir: &Path, frames: &[u64]) {
        let mut bytes = Vec::new();
        for &frame in frames {
            bytes.extend_from_slice(&encode_record(
                StreamKind::Residuals,
                frame,
                0,
                &vec![frame as u8; 32],
            ));
        }
        fs::write(dir.join(records::RESIDUALS_FILE), bytes).unwrap();
    }

    #[test]
    fn safe_run_produces_latent_rows_only() {
        let dir = tempfile::tempdir().unwrap();
        let capsule = write_capsule(dir.path());
        write_latents(dir.path(), 0..10);
        let events: Vec<Event> = (0..10).map(|f| event(f, EventKind::Observation)).collect();

        let outcome = judge(
            &capsule,
            &events,
            &limits(),
            windows(2, 2),
            &LocalPolicy::default(),
        )
        .unwrap();
        assert_eq!(outcome.latent_rows, 10);
        assert_eq!(outcome.residual_rows, 0);
        assert!(outcome.rows.iter().all(|r| r.status == RecordStatus::Ok));
    }

    #[test]
    fn safe_run_with_nonzero_residuals_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let capsule = write_capsule(dir.path());
        write_latents(dir.path(), 0..3);
        write_residuals(dir.path(), &[1]);
        let events: Vec<Event> = (0..3).map(|f| event(f, EventKind::Observation)).collect();

        let err = judge(
            &capsule,
            &events,
            &limits(),
            windows(2, 2),
            &LocalPolicy::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "E_UNEXPECTED_RESIDUAL");
    }

    #[test]
    fn safe_run_with_zero_length_residual_file_passes() {
        let dir = tempfile::tempdir().unwrap();
        let capsule = write_capsule(dir.path());
        write_latents(dir.path(), 0..3);
        fs::write(dir.path().join(records::RESIDUALS_FILE), b"").unwrap();
        let events: Vec<Event> = (0..3).map(|f| event(f, EventKind::Observation)).collect();

        assert!(
            judge(
                &capsule,
                &events,
                &limits(),
                windows(2, 2),
                &LocalPolicy::default(),
            )
            .is_ok()
        );
    }

    #[test]
    fn crash_run_joins_residual_window_rows() {
        let dir = tempfile::tempdir().unwrap();
        let capsule = write_capsule(dir.path());
        write_latents(dir.path(), 0..10);
        write_residuals(dir.path(), &[3, 4, 5, 6, 7]);
        let mut events: Vec<Event> = (0..10).map(|f| event(f, EventKind::Observation)).collect();
        events.insert(6, event(5, EventKind::SafetyTrigger));

        let outcome = judge(
            &capsule,
            &events,
            &limits(),
            windows(2, 2),
            &LocalPolicy::default(),
        )
        .unwrap();
        assert_eq!(outcome.latent_rows, 10);
        assert_eq!(outcome.residual_rows, 5);
        let residual_frames: Vec<u64> = outcome
            .rows
            .iter()
            .filter(|r| r.stream == StreamKind::Residuals)
            .map(|r| r.frame_id)
            .collect();
        assert_eq!(residual_frames, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn residual_outside_every_window_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let capsule = write_capsule(dir.path());
        write_latents(dir.path(), 0..10);
        write_residuals(dir.path(), &[0, 4, 5]);
        let mut events: Vec<Event> = (0..10).map(|f| event(f, EventKind::Observation)).collect();
        events.insert(6, event(5, EventKind::SafetyTrigger));

        let err = judge(
            &capsule,
            &events,
            &limits(),
            windows(2, 2),
            &LocalPolicy::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "E_UNEXPECTED_RESIDUAL");
    }

    #[test]
    fn window_gaps_are_reported_missing_and_escalate_under_policy() {
        let dir = tempfile::tempdir().unwrap();
        let capsule = write_capsule(dir.path());
        write_latents(dir.path(), 0..10);
        write_residuals(dir.path(), &[3, 5, 6, 7]); // frame 4 absent
        let mut events: Vec<Event> = (0..10).map(|f| event(f, EventKind::Observation)).collect();
        events.insert(6, event(5, EventKind::SafetyTrigger));

        let outcome = judge(
            &capsule,
            &events,
            &limits(),
            windows(2, 2),
            &LocalPolicy::default(),
        )
        .unwrap();
        let missing: Vec<u64> = outcome
            .rows
            .iter()
            .filter(|r| r.stream == StreamKind::Residuals && r.status == RecordStatus::Missing)
            .map(|r| r.frame_id)
            .collect();
        assert_eq!(missing, vec![4]);

        let strict = LocalPolicy {
            require_full_residual_windows: true,
            ..LocalPolicy::default()
        };
        let err = judge(&capsule, &events, &limits(), windows(2, 2), &strict).unwrap_err();
        assert_eq!(err.code(), "E_UNEXPECTED_RESIDUAL");
    }

    #[test]
    fn window_is_clamped_to_the_session_extent() {
        let dir = tempfile::tempdir().unwrap();
        let capsule = write_capsule(dir.path());
        write_latents(dir.path(), 0..10);
        write_residuals(dir.path(), &[7, 8, 9]);
        let mut events: Vec<Event> = (0..10).map(|f| event(f, EventKind::Observation)).collect();
        events.push(event(9, EventKind::SafetyTrigger));

        let outcome = judge(
            &capsule,
            &events,
            &limits(),
            windows(2, 5),
            &LocalPolicy::default(),
        )
        .unwrap();
        // No synthesized rows past the narrative's last frame.
        let max_residual = outcome
            .rows
            .iter()
            .filter(|r| r.stream == StreamKind::Residuals)
            .map(|r| r.frame_id)
            .max()
            .unwrap();
        assert_eq!(max_residual, 9);
    }

    #[test]
    fn observation_without_latent_record_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let capsule = write_capsule(dir.path());
        write_latents(dir.path(), 0..9);
        let events: Vec<Event> = (0..10).map(|f| event(f, EventKind::Observation)).collect();

        let err = judge(
            &capsule,
            &events,
            &limits(),
            windows(2, 2),
            &LocalPolicy::default(),
        )
        .unwrap_err();
        match err {
            FlashFreezeError::LatentMissing { frame_id } => assert_eq!(frame_id, 9),
            other => panic!("expected LatentMissing, got {other:?}"),
        }
    }

    #[test]
    fn missing_latent_stream_with_observations_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let capsule = write_capsule(dir.path());
        let events = vec![event(0, EventKind::Observation)];
        let err = judge(
            &capsule,
            &events,
            &limits(),
            windows(2, 2),
            &LocalPolicy::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "E_LATENT_MISSING");
    }

    #[test]
    fn other_events_need_no_latent_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let capsule = write_capsule(dir.path());
        let events = vec![event(0, EventKind::Other)];
        let outcome = judge(
            &capsule,
            &events,
            &limits(),
            windows(2, 2),
            &LocalPolicy::default(),
        )
        .unwrap();
        assert!(outcome.rows.is_empty());
    }

    #[test]
    fn resynced_latents_still_satisfy_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let capsule = write_capsule(dir.path());
        write_latents(dir.path(), 0..5);
        // Corrupt frame 2's payload, then rely on the lenient path.
        let path = dir.path().join(records::LATENTS_FILE);
        let mut bytes = fs::read(&path).unwrap();
        let record_len = RECORD_HEADER_LEN + LAT_LEN;
        bytes[2 * record_len + RECORD_HEADER_LEN] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let lenient = LocalPolicy {
            strict_latents: false,
            ..LocalPolicy::default()
        };
        let events: Vec<Event> = [0u64, 1, 3, 4]
            .iter()
            .map(|&f| event(f, EventKind::Observation))
            .collect();
        let outcome = judge(&capsule, &events, &limits(), windows(2, 2), &lenient).unwrap();
        assert_eq!(outcome.resyncs, 1);
        assert!(
            outcome
                .rows
                .iter()
                .any(|r| r.frame_id == 2 && r.status == RecordStatus::Missing)
        );

        // Frame 2 as an observation now fails coverage.
        let events: Vec<Event> = (0..5).map(|f| event(f, EventKind::Observation)).collect();
        let err = judge(&capsule, &events, &limits(), windows(2, 2), &lenient).unwrap_err();
        assert_eq!(err.code(), "E_LATENT_MISSING");
    }
}
