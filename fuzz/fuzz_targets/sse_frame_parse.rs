#![no_main]

use libfuzzer_sys::fuzz_target;
use nexus_agent::{decode_stream_event, SseFrameParser};

fn parse_in_chunks(chunks: &[&[u8]]) -> Option<Vec<String>> {
    let mut parser = SseFrameParser::new();
    let mut payloads = Vec::new();
    for chunk in chunks {
        payloads.extend(parser.push_bytes(chunk).ok()?);
    }
    payloads.extend(parser.finish());
    Some(payloads)
}

fuzz_target!(|data: &[u8]| {
    let split = data.first().map(|byte| usize::from(*byte)).unwrap_or(0) % data.len().max(1);
    let (head, tail) = data.split_at(split);

    let whole = parse_in_chunks(&[data]);
    let split_payloads = parse_in_chunks(&[head, tail]);
    if let (Some(whole), Some(split_payloads)) = (&whole, &split_payloads) {
        assert_eq!(whole, split_payloads);
    }

    for payload in whole.unwrap_or_default() {
        let _ = decode_stream_event(&payload);
    }
});
