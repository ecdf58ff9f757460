//! Server-Sent Events decoding for framed streams.

use super::frame::StreamFrame;

/// A decoded Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type.
    pub event: Option<String>,
    /// Event data, multi-line payloads joined by `\n`.
    pub data: String,
    /// Event ID.
    pub id: Option<String>,
}

#[derive(Debug, Default)]
struct SseEventBuilder {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseEventBuilder {
    fn build(self) -> Option<SseEvent> {
        if self.data.is_empty() {
            return None;
        }

        Some(SseEvent {
            event: self.event,
            data: self.data.join("\n"),
            id: self.id,
        })
    }
}

/// Incremental SSE parser over raw bytes.
///
/// Chunks may split lines, and may split multi-byte characters; bytes are
/// buffered until a full line is available.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    current: SseEventBuilder,
}

impl SseParser {
    /// Creates an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every event it completed.
    pub fn parse(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..pos]);
            if let Some(event) = self.parse_line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }

        events
    }

    fn parse_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return std::mem::take(&mut self.current).build();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.current.event = Some(value.to_string()),
            "data" => self.current.data.push(value.to_string()),
            "id" => self.current.id = Some(value.to_string()),
            _ => {}
        }

        None
    }

    /// Completes whatever is left once the input has ended.
    pub fn flush(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.parse_line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        std::mem::take(&mut self.current).build()
    }
}

/// Turns SSE bytes back into [`StreamFrame`]s.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    parser: SseParser,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every frame it completed.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<StreamFrame>, serde_json::Error> {
        self.parser
            .parse(chunk)
            .iter()
            .map(|event| serde_json::from_str(&event.data))
            .collect()
    }

    /// Decodes a trailing frame that lacked its blank line.
    pub fn finish(mut self) -> Result<Option<StreamFrame>, serde_json::Error> {
        self.parser
            .flush()
            .map(|event| serde_json::from_str(&event.data))
            .transpose()
    }
}

/// Decodes a complete SSE body.
pub fn decode_frames(body: &[u8]) -> Result<Vec<StreamFrame>, serde_json::Error> {
    let mut decoder = FrameDecoder::new();
    let mut frames = decoder.decode(body)?;
    frames.extend(decoder.finish()?);
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete_events() {
        let mut parser = SseParser::new();
        let events = parser.parse(b"data: one\n\nevent: ping\ndata: two\nid: 7\n\n");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].event.as_deref(), Some("ping"));
        assert_eq!(events[1].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_parse_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.parse(b"da").is_empty());
        assert!(parser.parse(b"ta: hel").is_empty());
        let events = parser.parse(b"lo\r\n\r\n");
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn test_split_multibyte_character() {
        let body = "data: caf\u{e9}\n\n".as_bytes();
        let (head, tail) = body.split_at(10);

        let mut parser = SseParser::new();
        assert!(parser.parse(head).is_empty());
        assert_eq!(parser.parse(tail)[0].data, "caf\u{e9}");
    }

    #[test]
    fn test_comments_and_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.parse(b": keep-alive\ndata: a\ndata: b\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn test_flush_without_trailing_blank_line() {
        let mut parser = SseParser::new();
        assert!(parser.parse(b"data: tail").is_empty());
        assert_eq!(parser.flush().unwrap().data, "tail");
        assert!(parser.flush().is_none());
    }

    #[test]
    fn test_decode_frames() {
        let mut body = StreamFrame::start(None).to_sse();
        body.push_str(&StreamFrame::content("hi").to_sse());

        let frames = decode_frames(body.as_bytes()).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], StreamFrame::content("hi"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_frames(b"data: {not json}\n\n").is_err());
    }
}
