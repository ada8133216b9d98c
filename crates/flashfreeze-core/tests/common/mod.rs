// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! On-disk capsule fixtures shared by the integration suites.

use flashfreeze_core::context::{BuildContext, FixedClock};
use flashfreeze_core::records::{StreamKind, encode_record};
use std::fs;
use std::path::Path;

pub const LATENT_LEN: usize = 64;
pub const RESIDUAL_LEN: usize = 256;

pub fn test_context() -> BuildContext {
    let mut ctx = BuildContext::new(ed25519_dalek::SigningKey::from_bytes(&[7u8; 32]))
        .with_clock(FixedClock::new("2026-01-01T00:00:00Z"));
    ctx.limits.latent_payload_len = LATENT_LEN as u32;
    ctx
}

pub fn latent_payload(frame: u64) -> Vec<u8> {
    (0..LATENT_LEN)
        .map(|i| (frame as u8).wrapping_mul(31).wrapping_add(i as u8))
        .collect()
}

pub fn residual_payload(frame: u64) -> Vec<u8> {
    (0..RESIDUAL_LEN)
        .map(|i| (frame as u8).wrapping_mul(17).wrapping_add(i as u8))
        .collect()
}

pub struct CapsuleBuilder {
    frames: u64,
    trigger: Option<u64>,
    pre: u64,
    post: u64,
    write_empty_residuals: bool,
}

impl CapsuleBuilder {
    pub fn new(frames: u64) -> Self {
        Self {
            frames,
            trigger: None,
            pre: 5,
            post: 5,
            write_empty_residuals: true,
        }
    }

    pub fn trigger(mut self, frame: u64, pre: u64, post: u64) -> Self {
        self.trigger = Some(frame);
        self.pre = pre;
        self.post = post;
        self
    }

    pub fn without_residual_file(mut self) -> Self {
        self.write_empty_residuals = false;
        self
    }

    pub fn write(&self, dir: &Path) {
        let meta = serde_json::json!({
            "robot_id": "sim-robot-01",
            "session_id": "session-0001",
            "started_at": "2026-01-01T00:00:00Z",
            "ended_at": "2026-01-01T00:10:00Z",
            "event_log_encoding": "utf-8",
            "event_log_newline": "\n",
            "residual_pre_frames": self.pre,
            "residual_post_frames": self.post,
        });
        fs::write(dir.join("meta.json"), meta.to_string()).unwrap();

        let mut events = String::new();
        for frame in 0..self.frames {
            let t = format!("2026-01-01T00:{:02}:{:02}Z", frame / 60, frame % 60);
            events.push_str(&format!(
                "{{\"frame_id\":{frame},\"t\":\"{t}\",\"kind\":\"observation\"}}\n"
            ));
            if self.trigger == Some(frame) {
                events.push_str(&format!(
                    "{{\"frame_id\":{frame},\"t\":\"{t}\",\"kind\":\"safety_trigger\",\"label\":\"wheel_slip\"}}\n"
                ));
            }
        }
        fs::write(dir.join("events.jsonl"), events).unwrap();

        let mut latents = Vec::new();
        for frame in 0..self.frames {
            latents.extend_from_slice(&encode_record(
                StreamKind::Latents,
                frame,
                frame * 100_000_000,
                &latent_payload(frame),
            ));
        }
        fs::write(dir.join("cam_latents.bin"), latents).unwrap();

        match self.trigger {
            Some(trigger) => {
                let lo = trigger.saturating_sub(self.pre);
                let hi = (trigger + self.post).min(self.frames.saturating_sub(1));
                let mut residuals = Vec::new();
                for frame in lo..=hi {
                    residuals.extend_from_slice(&encode_record(
                        StreamKind::Residuals,
                        frame,
                        frame * 100_000_000,
                        &residual_payload(frame),
                    ));
                }
                fs::write(dir.join("cam_residuals.bin"), residuals).unwrap();
            }
            None => {
                if self.write_empty_residuals {
                    fs::write(dir.join("cam_residuals.bin"), b"").unwrap();
                }
            }
        }
    }
}
