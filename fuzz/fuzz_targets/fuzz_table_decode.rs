#![no_main]

use flashfreeze_core::columnar::Table;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = Table::from_bytes(data);
});
