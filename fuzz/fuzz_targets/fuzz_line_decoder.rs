#![no_main]
use libfuzzer_sys::fuzz_target;
use tetra_core::{Frame, LineDecoder, decode_command, decode_status};

fuzz_target!(|data: &[u8]| {
    // Arbitrary chunks through the framer, then each line through both parsers.
    let mut decoder = LineDecoder::new(200);
    for chunk in data.chunks(7) {
        for frame in decoder.feed(chunk) {
            if let Frame::Line(line) = frame {
                assert!(line.chars().count() <= decoder.cap());
                let _ = decode_command(&line);
                let _ = decode_status(&line);
            }
        }
    }
});
