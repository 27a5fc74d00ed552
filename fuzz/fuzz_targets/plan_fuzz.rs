//! Fuzz the join-plan parser: arbitrary bytes must either parse into a
//! plan or produce a clean error — never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Write;

fuzz_target!(|data: &[u8]| {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(data).expect("write");
    let _ = oblijoin::plan::JoinPlan::load(file.path());
});
