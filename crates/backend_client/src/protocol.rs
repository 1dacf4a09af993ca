//! Line protocol spoken by the streaming endpoints.
//!
//! The body is newline-delimited UTF-8. Each non-empty line, after an
//! optional `data:` prefix is stripped, is either a sentinel or an opaque
//! content fragment. The framing is deliberately looser than SSE: the prefix
//! is optional per line and there is no blank-line event separation.

/// In-band marker terminating a stream normally.
pub const DONE_SENTINEL: &str = "[DONE]";

/// In-band marker for a permission rejection on the active conversation.
pub const FORBIDDEN_SENTINEL: &str = "forbidden";

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Opaque text to append to the in-flight message.
    Fragment(String),
    /// Normal end of stream.
    Done,
    /// Permission rejection; the stream ends here.
    Forbidden,
}

impl StreamEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fragment(_))
    }
}

/// Decode one raw line. Blank lines (and a bare `data:` prefix) yield `None`.
pub fn parse_line(raw: &str) -> Option<StreamEvent> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }
    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim(),
        None => line,
    };
    match payload {
        "" => None,
        DONE_SENTINEL => Some(StreamEvent::Done),
        FORBIDDEN_SENTINEL => Some(StreamEvent::Forbidden),
        fragment => Some(StreamEvent::Fragment(fragment.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_prefix_is_optional() {
        assert_eq!(
            parse_line("data: 你"),
            Some(StreamEvent::Fragment("你".to_string()))
        );
        assert_eq!(
            parse_line("你"),
            Some(StreamEvent::Fragment("你".to_string()))
        );
    }

    #[test]
    fn sentinels_are_never_fragments() {
        assert_eq!(parse_line("data: [DONE]"), Some(StreamEvent::Done));
        assert_eq!(parse_line("[DONE]"), Some(StreamEvent::Done));
        assert_eq!(parse_line("data:forbidden"), Some(StreamEvent::Forbidden));
        assert!(parse_line("[DONE]").expect("event").is_terminal());
    }

    #[test]
    fn blank_lines_and_bare_prefixes_are_skipped() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("data:"), None);
        assert_eq!(parse_line("data:   "), None);
    }

    #[test]
    fn whitespace_is_trimmed_including_carriage_returns() {
        assert_eq!(
            parse_line("data: hello \r"),
            Some(StreamEvent::Fragment("hello".to_string()))
        );
    }
}
