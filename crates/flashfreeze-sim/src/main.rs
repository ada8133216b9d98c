// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! Capsule producer: simulates a robot session writing the narrative log,
//! a contiguous latent stream, and a pre/post windowed residual stream.
//! Also carries the one-byte corruption tool used to exercise resync paths.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use flashfreeze_core::records::{StreamKind, encode_record};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

const FRAME_INTERVAL_MS: i64 = 100;

#[derive(Parser)]
#[command(name = "flashfreeze-sim")]
#[command(about = "Flash-Freeze capsule simulator")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a simulated capsule directory.
    Generate {
        out_dir: PathBuf,

        #[arg(long, default_value_t = 100)]
        frames: u64,

        /// Emit a safety trigger mid-session.
        #[arg(long)]
        crash: bool,

        #[arg(long, default_value_t = 50)]
        trigger_frame: u64,

        #[arg(long, default_value_t = 20)]
        pre: u64,

        #[arg(long, default_value_t = 20)]
        post: u64,

        #[arg(long, default_value_t = 256)]
        latent_len: usize,

        #[arg(long, default_value_t = 50 * 1024)]
        residual_len: usize,

        /// Deterministic payloads and timestamps for reproducible capsules.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Flip one byte of a file in place.
    Corrupt {
        file: PathBuf,

        #[arg(long)]
        offset: u64,

        #[arg(long, default_value_t = 0x01)]
        xor: u8,
    },
}

/// Ring buffer holding the pre-window; a trigger flushes the history and
/// opens the post-window for direct writes.
struct ResidualRecorder {
    file: File,
    buffer: VecDeque<Vec<u8>>,
    pre: usize,
    frames_left: u64,
}

impl ResidualRecorder {
    fn new(file: File, pre: u64) -> Self {
        Self {
            file,
            buffer: VecDeque::with_capacity(pre as usize),
            pre: pre as usize,
            frames_left: 0,
        }
    }

    fn push(&mut self, blob: Vec<u8>) -> Result<()> {
        if self.frames_left > 0 {
            self.file.write_all(&blob).context("write residual record")?;
            self.frames_left -= 1;
            if self.frames_left == 0 {
                self.file.sync_data().context("commit residual window")?;
            }
        } else {
            if self.buffer.len() == self.pre && self.pre > 0 {
                self.buffer.pop_front();
            }
            if self.pre > 0 {
                self.buffer.push_back(blob);
            }
        }
        Ok(())
    }

    /// Flush the buffered history and open the post-window. The trigger
    /// frame itself is still ahead of the next push, so the window is
    /// `post + 1` frames wide.
    fn trigger(&mut self, post: u64) -> Result<()> {
        if self.frames_left > 0 {
            return Ok(());
        }
        while let Some(blob) = self.buffer.pop_front() {
            self.file.write_all(&blob).context("flush residual history")?;
        }
        self.file.sync_data().context("commit residual history")?;
        self.frames_left = post + 1;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn generate(
    out_dir: PathBuf,
    frames: u64,
    crash: bool,
    trigger_frame: u64,
    pre: u64,
    post: u64,
    latent_len: usize,
    residual_len: usize,
    seed: Option<u64>,
) -> Result<()> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let started_at: DateTime<Utc> = match seed {
        Some(_) => DateTime::from_timestamp(1_767_225_600, 0)
            .context("fixed session epoch")?,
        None => Utc::now(),
    };

    let session_id = hex::encode(rng.r#gen::<[u8; 8]>());
    let capsule = out_dir.join(format!("capsule-{session_id}"));
    fs::create_dir_all(&capsule).context("create capsule directory")?;
    println!("generating {} (crash={crash})", capsule.display());

    let mut latents = File::create(capsule.join("cam_latents.bin"))?;
    let residuals = File::create(capsule.join("cam_residuals.bin"))?;
    let mut log = File::create(capsule.join("events.jsonl"))?;
    let mut recorder = ResidualRecorder::new(residuals, pre);

    for frame in 0..frames {
        let t = started_at + Duration::milliseconds(frame as i64 * FRAME_INTERVAL_MS);
        let t = t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        let ts_ns = frame * (FRAME_INTERVAL_MS as u64) * 1_000_000;

        let triggered = crash && frame == trigger_frame;
        if triggered {
            // Trigger before the push so the trigger frame lands inside the
            // post-window.
            recorder.trigger(post)?;
        }

        let mut latent_payload = vec![0u8; latent_len];
        rng.fill_bytes(&mut latent_payload);
        latents.write_all(&encode_record(
            StreamKind::Latents,
            frame,
            ts_ns,
            &latent_payload,
        ))?;
        latents.sync_data().context("commit latent record")?;

        let mut residual_payload = vec![0u8; residual_len];
        rng.fill_bytes(&mut residual_payload);
        recorder.push(encode_record(
            StreamKind::Residuals,
            frame,
            ts_ns,
            &residual_payload,
        ))?;

        let mut line = serde_json::json!({
            "frame_id": frame,
            "t": t,
            "kind": "observation",
        })
        .to_string();
        line.push('\n');
        if triggered {
            let mut trigger_line = serde_json::json!({
                "frame_id": frame,
                "t": t,
                "kind": "safety_trigger",
                "label": "wheel_slip",
            })
            .to_string();
            trigger_line.push('\n');
            line.push_str(&trigger_line);
        }
        log.write_all(line.as_bytes())?;
    }

    let ended_at = started_at + Duration::milliseconds(frames as i64 * FRAME_INTERVAL_MS);
    let meta = serde_json::json!({
        "robot_id": "sim-robot-01",
        "session_id": session_id,
        "started_at": started_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        "ended_at": ended_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        "event_log_encoding": "utf-8",
        "event_log_newline": "\n",
        "residual_pre_frames": pre,
        "residual_post_frames": post,
    });
    fs::write(capsule.join("meta.json"), meta.to_string()).context("write meta.json")?;
    println!("capsule complete: {frames} frames");
    Ok(())
}

fn corrupt(file: PathBuf, offset: u64, xor: u8) -> Result<()> {
    let mut bytes = fs::read(&file).with_context(|| format!("read {}", file.display()))?;
    let Some(target) = bytes.get_mut(offset as usize) else {
        bail!("offset {offset} is past the end of {}", file.display());
    };
    let before = *target;
    *target ^= xor;
    fs::write(&file, &bytes).with_context(|| format!("rewrite {}", file.display()))?;
    println!(
        "flipped byte {offset} of {}: {before:#04x} -> {:#04x}",
        file.display(),
        before ^ xor
    );
    Ok(())
}

fn main() -> Result<()> {
    match Cli::parse().cmd {
        Command::Generate {
            out_dir,
            frames,
            crash,
            trigger_frame,
            pre,
            post,
            latent_len,
            residual_len,
            seed,
        } => generate(
            out_dir,
            frames,
            crash,
            trigger_frame,
            pre,
            post,
            latent_len,
            residual_len,
            seed,
        ),
        Command::Corrupt { file, offset, xor } => corrupt(file, offset, xor),
    }
}
