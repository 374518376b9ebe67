//! Splitting a streamed answer into its reasoning and final segments
//!
//! Models that expose chain-of-thought wrap it in `<think>`/`</think>`
//! markers inline in the answer text. The markers can land anywhere in the
//! byte stream, including split across network frames, so the split is
//! always recomputed over the full accumulated buffer rather than applied
//! per frame. Stored answers keep the raw tagged text; this function runs at
//! render time.

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReasoningSplit<'a> {
    pub reasoning: &'a str,
    pub final_answer: &'a str,
    /// True while the buffer has an opening marker but no closing one yet,
    /// i.e. the reasoning segment is still streaming.
    pub is_reasoning_open: bool,
}

pub fn split(buffer: &str) -> ReasoningSplit<'_> {
    if let Some(close) = buffer.find(THINK_CLOSE) {
        let final_answer = &buffer[close + THINK_CLOSE.len()..];
        // Some backends omit the opening tag; everything before the close
        // is then reasoning.
        let reasoning = match buffer[..close].find(THINK_OPEN) {
            Some(open) => &buffer[open + THINK_OPEN.len()..close],
            None => &buffer[..close],
        };
        return ReasoningSplit {
            reasoning,
            final_answer,
            is_reasoning_open: false,
        };
    }

    if let Some(open) = buffer.find(THINK_OPEN) {
        return ReasoningSplit {
            reasoning: &buffer[open + THINK_OPEN.len()..],
            final_answer: "",
            is_reasoning_open: true,
        };
    }

    ReasoningSplit {
        reasoning: "",
        final_answer: buffer,
        is_reasoning_open: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_all_final_answer() {
        let result = split("just an answer");
        assert_eq!(result.reasoning, "");
        assert_eq!(result.final_answer, "just an answer");
        assert!(!result.is_reasoning_open);
    }

    #[test]
    fn complete_tag_pair_splits_three_ways() {
        let result = split("pre<think>why</think>because");
        assert_eq!(result.reasoning, "why");
        assert_eq!(result.final_answer, "because");
        assert!(!result.is_reasoning_open);
    }

    #[test]
    fn open_tag_only_keeps_reasoning_streaming() {
        let result = split("<think>still thinking");
        assert_eq!(result.reasoning, "still thinking");
        assert_eq!(result.final_answer, "");
        assert!(result.is_reasoning_open);
    }

    #[test]
    fn missing_open_tag_treats_prefix_as_reasoning() {
        let result = split("implicit reasoning</think>the answer");
        assert_eq!(result.reasoning, "implicit reasoning");
        assert_eq!(result.final_answer, "the answer");
        assert!(!result.is_reasoning_open);
    }

    #[test]
    fn empty_buffer() {
        let result = split("");
        assert_eq!(result.reasoning, "");
        assert_eq!(result.final_answer, "");
        assert!(!result.is_reasoning_open);
    }

    #[test]
    fn split_is_stable_under_incremental_accumulation() {
        // Markers land mid-frame; only the final accumulated buffer matters.
        let frames = ["<th", "ink>reasoning", " text</thi", "nk>final", " text"];
        let mut buffer = String::new();
        for frame in frames {
            buffer.push_str(frame);
            // Never panics on a partially-received marker.
            let _ = split(&buffer);
        }
        let result = split(&buffer);
        assert_eq!(result.reasoning, "reasoning text");
        assert_eq!(result.final_answer, "final text");
        assert!(!result.is_reasoning_open);
    }

    #[test]
    fn partial_marker_is_plain_text_until_complete() {
        let result = split("<thin");
        assert_eq!(result.final_answer, "<thin");
        assert!(!result.is_reasoning_open);
    }
}
