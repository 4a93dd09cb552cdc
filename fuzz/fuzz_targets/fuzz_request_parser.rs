#![no_main]
use libfuzzer_sys::fuzz_target;

use bolt_core::auth::RequestAuth;
use bolt_core::http;
use bolt_core::mocks::MemoryNonceStore;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes on the wire must never panic the parser or the
    // classifier; the worst allowed outcome is Unrecognized.
    let mut cursor = std::io::Cursor::new(data);
    let raw = http::read_raw(&mut cursor);
    let mut auth = RequestAuth::new(MemoryNonceStore::default(), "fuzz-secret");
    let _ = http::classify(&raw, &mut auth);
});
