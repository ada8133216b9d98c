// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use clap::{Args, Parser, Subcommand};
use flashfreeze_core::compile::compile_capsule;
use flashfreeze_core::context::{
    BuildContext, FixedClock, LocalPolicy, TrustStore, load_signing_key,
};
use flashfreeze_core::error::{FlashFreezeError, FlashFreezeResult};
use flashfreeze_core::manifest::canonical_json;
use flashfreeze_core::shard::TRUST_STORE_FILE;
use flashfreeze_verifier::{VerifyOptions, verify_shard};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flashfreezectl")]
#[command(about = "Flash-Freeze evidence compiler and verifier")]
struct Cli {
    #[arg(long, default_value = "info")]
    log: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args)]
struct ScanArgs {
    /// Fixed latent payload width in bytes.
    #[arg(long, default_value_t = 256)]
    latent_payload_len: u32,

    /// Cap on a single residual payload in bytes.
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    residual_max_len: u32,

    /// Max bytes to skip while searching for the next record magic.
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    resync_window: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a capsule directory into a sealed shard.
    Compile {
        capsule: PathBuf,
        out: PathBuf,

        /// Hex-encoded 32-byte Ed25519 seed file.
        #[arg(long)]
        signing_key: PathBuf,

        /// Trust store to embed; defaults to the publisher's own key.
        #[arg(long)]
        trust_store: Option<PathBuf>,

        /// Local policy file to embed and enforce.
        #[arg(long)]
        local_policy: Option<PathBuf>,

        /// Fixed `created` timestamp for reproducible builds.
        #[arg(long)]
        created: Option<String>,

        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Verify a shard, optionally re-checking it against its capsule.
    Verify {
        shard: PathBuf,

        #[arg(long)]
        capsule: Option<PathBuf>,

        /// Trust store; defaults to the shard's embedded governance copy.
        #[arg(long)]
        trust_store: Option<PathBuf>,

        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Generate a publisher seed and a matching trust store.
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
}

fn apply_scan_args(scan: &ScanArgs, limits: &mut flashfreeze_core::context::ScanLimits) {
    limits.latent_payload_len = scan.latent_payload_len;
    limits.residual_max_len = scan.residual_max_len;
    limits.resync_window = scan.resync_window;
}

fn run_compile(
    capsule: PathBuf,
    out: PathBuf,
    signing_key: PathBuf,
    trust_store: Option<PathBuf>,
    local_policy: Option<PathBuf>,
    created: Option<String>,
    scan: ScanArgs,
) -> FlashFreezeResult<()> {
    let key = load_signing_key(&signing_key)?;
    let mut ctx = BuildContext::new(key);
    apply_scan_args(&scan, &mut ctx.limits);
    if let Some(path) = trust_store {
        ctx.trust = TrustStore::load(&path)?;
    }
    if let Some(path) = local_policy {
        ctx.policy = LocalPolicy::load(&path)?;
    }
    if let Some(created) = created {
        ctx = ctx.with_clock(FixedClock::new(created));
    }

    let report = compile_capsule(&ctx, &capsule, &out)?;
    println!(
        "{}",
        serde_json::json!({
            "status": "PASS",
            "shard": report.shard_root,
            "merkle_root": report.merkle_root,
            "created": report.created,
            "entities": report.entities,
            "claims": report.claims,
            "spans": report.spans,
            "stream_rows": report.stream_rows,
            "resyncs": report.resyncs,
            "skipped_bytes": report.skipped_bytes,
        })
    );
    Ok(())
}

fn run_verify(
    shard: PathBuf,
    capsule: Option<PathBuf>,
    trust_store: Option<PathBuf>,
    scan: ScanArgs,
) -> FlashFreezeResult<()> {
    let trust = match trust_store {
        Some(path) => TrustStore::load(&path)?,
        None => TrustStore::load(&shard.join(TRUST_STORE_FILE))?,
    };
    let mut opts = VerifyOptions::default();
    apply_scan_args(&scan, &mut opts.limits);

    let report = verify_shard(&shard, &trust, capsule.as_deref(), &opts)?;
    println!(
        "{}",
        serde_json::json!({
            "status": "PASS",
            "merkle_root": report.merkle_root,
            "publisher": report.publisher,
            "files_checked": report.files_checked,
            "spans_checked": report.spans_checked,
            "stream_rows_checked": report.stream_rows_checked,
            "capsule_checked": report.capsule_checked,
        })
    );
    Ok(())
}

fn run_keygen(out_dir: PathBuf) -> FlashFreezeResult<()> {
    fs::create_dir_all(&out_dir).map_err(|e| FlashFreezeError::io(&out_dir, e))?;
    let key_path = out_dir.join("publisher.key");
    if key_path.exists() {
        return Err(FlashFreezeError::InvalidInput {
            reason: format!("{} already exists, refusing to overwrite", key_path.display()),
        });
    }

    let seed: [u8; 32] = rand::random();
    let key = ed25519_dalek::SigningKey::from_bytes(&seed);
    let pubkey_hex = hex::encode(key.verifying_key().to_bytes());

    fs::write(&key_path, format!("{}\n", hex::encode(seed)))
        .map_err(|e| FlashFreezeError::io(&key_path, e))?;
    let store_path = out_dir.join("trust_store.json");
    let store_bytes = canonical_json(&TrustStore::single(&pubkey_hex))?;
    fs::write(&store_path, store_bytes).map_err(|e| FlashFreezeError::io(&store_path, e))?;

    println!(
        "{}",
        serde_json::json!({
            "status": "PASS",
            "publisher": pubkey_hex,
            "signing_key": key_path,
            "trust_store": store_path,
        })
    );
    Ok(())
}

fn run(cli: Cli) -> FlashFreezeResult<()> {
    match cli.cmd {
        Command::Compile {
            capsule,
            out,
            signing_key,
            trust_store,
            local_policy,
            created,
            scan,
        } => run_compile(capsule, out, signing_key, trust_store, local_policy, created, scan),
        Command::Verify {
            shard,
            capsule,
            trust_store,
            scan,
        } => run_verify(shard, capsule, trust_store, scan),
        Command::Keygen { out_dir } => run_keygen(out_dir),
    }
}

fn main() {
    let cli = Cli::parse();
    let filter = EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli) {
        eprintln!("{}: {err}", err.code());
        std::process::exit(err.exit_code());
    }
}
