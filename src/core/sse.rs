//! Incremental server-sent-event frame parser
//!
//! The backend streams frames of the form
//!
//! ```text
//! event: message
//! data: {"content":"..."}
//!
//! ```
//!
//! Network chunks do not respect frame boundaries: a chunk may end in the
//! middle of a field name, a data payload, or a multi-byte UTF-8 sequence.
//! The parser therefore buffers raw bytes and only yields frames once the
//! terminating blank line has arrived. Feeding it the same byte stream under
//! any chunking produces the same frame sequence.

/// One parsed frame: optional event name plus the joined data payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
    pending_event: Option<String>,
    pending_data: Vec<String>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk; returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        // Only complete lines are consumed; a trailing partial line (or a
        // split multi-byte character) stays buffered until the next chunk.
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let mut line = String::from_utf8_lossy(&raw[..pos.min(raw.len())]).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                if let Some(frame) = self.take_pending() {
                    frames.push(frame);
                }
            } else {
                self.handle_field(&line);
            }
        }
        frames
    }

    /// Flush the trailing frame on connection close. Backends do not always
    /// terminate the final frame with a blank line.
    pub fn finish(&mut self) -> Option<Frame> {
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let mut line = String::from_utf8_lossy(&raw).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            if !line.is_empty() {
                self.handle_field(&line);
            }
        }
        self.take_pending()
    }

    fn handle_field(&mut self, line: &str) {
        // Comment line.
        if line.starts_with(':') {
            return;
        }

        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            // Field with no value, e.g. a bare "data".
            None => (line, ""),
        };

        match name {
            "event" => self.pending_event = Some(value.to_string()),
            "data" => self.pending_data.push(value.to_string()),
            // id / retry / anything else is irrelevant here.
            _ => {}
        }
    }

    fn take_pending(&mut self) -> Option<Frame> {
        if self.pending_event.is_none() && self.pending_data.is_empty() {
            return None;
        }
        Some(Frame {
            event: self.pending_event.take(),
            data: std::mem::take(&mut self.pending_data).join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut FrameParser, input: &str) -> Vec<Frame> {
        let mut frames = parser.push(input.as_bytes());
        if let Some(last) = parser.finish() {
            frames.push(last);
        }
        frames
    }

    #[test]
    fn parses_plain_data_frame() {
        let mut parser = FrameParser::new();
        let frames = feed_all(&mut parser, "data: hello\n\n");
        assert_eq!(
            frames,
            vec![Frame {
                event: None,
                data: "hello".to_string()
            }]
        );
    }

    #[test]
    fn parses_typed_frame() {
        let mut parser = FrameParser::new();
        let frames = feed_all(&mut parser, "event: done\ndata: \n\n");
        assert_eq!(frames[0].event.as_deref(), Some("done"));
    }

    #[test]
    fn joins_multi_line_data() {
        let mut parser = FrameParser::new();
        let frames = feed_all(&mut parser, "data: first\ndata: second\n\n");
        assert_eq!(frames[0].data, "first\nsecond");
    }

    #[test]
    fn tolerates_crlf() {
        let mut parser = FrameParser::new();
        let frames = feed_all(&mut parser, "event: message\r\ndata: hi\r\n\r\n");
        assert_eq!(frames[0].event.as_deref(), Some("message"));
        assert_eq!(frames[0].data, "hi");
    }

    #[test]
    fn ignores_comments_and_unknown_fields() {
        let mut parser = FrameParser::new();
        let frames = feed_all(&mut parser, ": keep-alive\nid: 7\ndata: x\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn identical_frames_regardless_of_chunking() {
        let input = "event: message\ndata: <think>because\n\ndata: </think>answer\n\ndata: done\n\n";

        let mut whole = FrameParser::new();
        let expected = feed_all(&mut whole, input);

        // Split at every possible byte boundary.
        for split in 1..input.len() {
            let mut parser = FrameParser::new();
            let mut frames = parser.push(&input.as_bytes()[..split]);
            frames.extend(parser.push(&input.as_bytes()[split..]));
            if let Some(last) = parser.finish() {
                frames.push(last);
            }
            assert_eq!(frames, expected, "split at byte {}", split);
        }
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let input = "data: héllo\n\n".as_bytes();
        // Split inside the two-byte 'é'.
        let split = input.iter().position(|&b| b > 0x7f).unwrap() + 1;

        let mut parser = FrameParser::new();
        let mut frames = parser.push(&input[..split]);
        frames.extend(parser.push(&input[split..]));
        assert_eq!(frames[0].data, "héllo");
    }

    #[test]
    fn flushes_unterminated_final_frame() {
        let mut parser = FrameParser::new();
        assert!(parser.push(b"data: tail").is_empty());
        let last = parser.finish().unwrap();
        assert_eq!(last.data, "tail");
    }

    #[test]
    fn blank_lines_without_fields_yield_nothing() {
        let mut parser = FrameParser::new();
        assert!(parser.push(b"\n\n\n").is_empty());
        assert!(parser.finish().is_none());
    }
}
