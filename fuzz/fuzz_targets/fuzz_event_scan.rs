#![no_main]

use flashfreeze_core::events::scan_events;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = scan_events(data);
});
