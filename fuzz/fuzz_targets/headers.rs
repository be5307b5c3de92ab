#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate citcrun;

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = citcrun::loader::headers::parse_headers(data);
});
