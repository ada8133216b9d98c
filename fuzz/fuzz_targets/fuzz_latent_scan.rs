#![no_main]

use flashfreeze_core::context::{LocalPolicy, ScanLimits};
use flashfreeze_core::records::scan_latents;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cam_latents.bin");
    std::fs::write(&path, data).expect("write fuzz input");

    let limits = ScanLimits {
        latent_payload_len: 64,
        residual_max_len: 4096,
        resync_window: 8192,
    };
    let _ = scan_latents(&path, &limits, &LocalPolicy::default());
    let lenient = LocalPolicy {
        strict_latents: false,
        ..LocalPolicy::default()
    };
    let _ = scan_latents(&path, &limits, &lenient);
});
