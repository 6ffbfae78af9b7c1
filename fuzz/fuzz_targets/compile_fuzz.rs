//! Compiler fuzz target: feed arbitrary text to the layout compiler, and when it
//! compiles, decode the same bytes with it. Neither step may panic.
//! Build with: cargo fuzz run compile_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    if let Ok(block) = binlayout::compile(s) {
        let codec = binlayout::Codec::new(block);
        if let Ok(tree) = codec.decode(data) {
            let _ = codec.encode(&tree);
        }
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run compile_fuzz");
}
