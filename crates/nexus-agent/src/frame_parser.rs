use crate::NexusAgentError;

const DATA_FIELD_PREFIX: &str = "data:";

/// Incremental parser for `text/event-stream` bodies.
///
/// Records are separated by a blank line (`\n\n`, `\r\n\r\n` or a mix). Only
/// complete records are emitted; the trailing partial record stays buffered
/// until its delimiter arrives, so the emitted payloads do not depend on how
/// the body was split into chunks.
#[derive(Debug, Default)]
pub struct SseFrameParser {
    buffer: String,
    pending_bytes: Vec<u8>,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends decoded text and returns the payloads of every record completed by it.
    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        self.drain_complete_frames()
    }

    /// Appends raw body bytes. A multi-byte character split across chunks is
    /// held back until the rest of it arrives.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Result<Vec<String>, NexusAgentError> {
        self.pending_bytes.extend_from_slice(chunk);
        let valid_len = match std::str::from_utf8(&self.pending_bytes) {
            Ok(text) => text.len(),
            Err(error) if error.error_len().is_none() => error.valid_up_to(),
            Err(error) => {
                self.pending_bytes.clear();
                return Err(NexusAgentError::InvalidStreamPayload(format!(
                    "invalid UTF-8 in agent stream: {error}"
                )));
            }
        };
        let decoded: Vec<u8> = self.pending_bytes.drain(..valid_len).collect();
        let text = String::from_utf8(decoded).map_err(|error| {
            NexusAgentError::InvalidStreamPayload(format!("invalid UTF-8 in agent stream: {error}"))
        })?;
        Ok(self.push_str(&text))
    }

    /// Flushes the buffered tail at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buffer);
        self.pending_bytes.clear();
        frame_payload(tail.trim_end_matches(['\r', '\n']))
    }

    /// Text received but not yet terminated by a record delimiter.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn drain_complete_frames(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        let mut consumed = 0;
        while let Some((start, end)) = find_frame_delimiter(&self.buffer[consumed..]) {
            if let Some(payload) = frame_payload(&self.buffer[consumed..consumed + start]) {
                payloads.push(payload);
            }
            consumed += end;
        }
        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
        payloads
    }
}

/// Finds the first `\r?\n\r?\n`, returning its start and end byte offsets.
fn find_frame_delimiter(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    for (index, byte) in bytes.iter().enumerate() {
        if *byte != b'\n' {
            continue;
        }
        let mut cursor = index + 1;
        if bytes.get(cursor) == Some(&b'\r') {
            cursor += 1;
        }
        if bytes.get(cursor) == Some(&b'\n') {
            let start = if index > 0 && bytes[index - 1] == b'\r' {
                index - 1
            } else {
                index
            };
            return Some((start, cursor + 1));
        }
    }
    None
}

fn frame_payload(frame: &str) -> Option<String> {
    let lines = frame
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.strip_prefix(DATA_FIELD_PREFIX))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect::<Vec<_>>();
    if lines.is_empty() {
        return None;
    }
    let payload = lines.join("\n");
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::SseFrameParser;

    const STREAM: &str = concat!(
        ": keep-alive comment\n\n",
        "data: {\"type\":\"step\",\"node\":\"plan\"}\n\n",
        "event: message\r\n",
        "data: {\"type\":\"heartbeat\"}\r\n\r\n",
        "data: {\"type\":\"complete\",\n",
        "data:  \"result\":null}\n\r\n",
        "data: {\"type\":\"tail\"}"
    );

    fn parse_in_chunks(input: &str, chunk_len: usize) -> (Vec<String>, String) {
        let mut parser = SseFrameParser::new();
        let mut payloads = Vec::new();
        for chunk in input.as_bytes().chunks(chunk_len) {
            payloads.extend(parser.push_bytes(chunk).expect("valid utf-8"));
        }
        (payloads, parser.pending().to_string())
    }

    #[test]
    fn unit_emits_complete_records_and_retains_the_tail() {
        let mut parser = SseFrameParser::new();
        let payloads = parser.push_str(STREAM);
        assert_eq!(
            payloads,
            vec![
                "{\"type\":\"step\",\"node\":\"plan\"}".to_string(),
                "{\"type\":\"heartbeat\"}".to_string(),
                "{\"type\":\"complete\",\n \"result\":null}".to_string(),
            ]
        );
        assert_eq!(parser.pending(), "data: {\"type\":\"tail\"}");
        assert_eq!(parser.finish().as_deref(), Some("{\"type\":\"tail\"}"));
        assert_eq!(parser.pending(), "");
    }

    #[test]
    fn functional_chunk_boundaries_do_not_change_emitted_records() {
        let (expected, expected_tail) = parse_in_chunks(STREAM, STREAM.len());
        for chunk_len in 1..=STREAM.len() {
            let (payloads, tail) = parse_in_chunks(STREAM, chunk_len);
            assert_eq!(payloads, expected, "chunk_len={chunk_len}");
            assert_eq!(tail, expected_tail, "chunk_len={chunk_len}");
        }
    }

    #[test]
    fn functional_records_are_never_re_emitted() {
        let mut parser = SseFrameParser::new();
        assert_eq!(parser.push_str("data: one\n\n").len(), 1);
        assert!(parser.push_str("data: tw").is_empty());
        assert_eq!(parser.push_str("o\n\n"), vec!["two".to_string()]);
        assert!(parser.push_str("").is_empty());
    }

    #[test]
    fn regression_split_multibyte_character_is_reassembled() {
        let input = "data: {\"label\":\"Swapping ◎\"}\n\n";
        let bytes = input.as_bytes();
        let marker = input.find('◎').expect("marker");
        let mut parser = SseFrameParser::new();
        assert!(parser
            .push_bytes(&bytes[..marker + 1])
            .expect("partial char is buffered")
            .is_empty());
        let payloads = parser.push_bytes(&bytes[marker + 1..]).expect("rest");
        assert_eq!(payloads, vec!["{\"label\":\"Swapping ◎\"}".to_string()]);
    }

    #[test]
    fn regression_invalid_utf8_is_reported() {
        let mut parser = SseFrameParser::new();
        let error = parser
            .push_bytes(&[b'd', 0xff, b'\n'])
            .expect_err("invalid byte should fail");
        assert!(error.to_string().contains("invalid UTF-8"));
    }

    #[test]
    fn unit_only_one_leading_space_is_stripped() {
        let mut parser = SseFrameParser::new();
        assert_eq!(
            parser.push_str("data:   padded\n\n"),
            vec!["  padded".to_string()]
        );
    }
}
