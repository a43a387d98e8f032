//! `multipart/x-mixed-replace` framing.
//!
//! Wire layout, one part per frame:
//!
//! ```text
//! --B\r\n                      first part only
//! Content-Type: image/jpeg\r\n
//! \r\n
//! <jpeg bytes>
//! \r\n--B\r\n                  every later part
//! ...
//! \r\n--B--\r\n                close
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;

pub const MIXED_REPLACE: &str = "multipart/x-mixed-replace";
pub const IMAGE_JPEG: &str = "image/jpeg";

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
const BOUNDARY_RANDOM_BYTES: usize = 30;
const MAX_BOUNDARY_LEN: usize = 70;
const MAX_HEADER_BYTES: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum MultipartError {
    #[error("invalid multipart boundary {0:?}")]
    InvalidBoundary(String),
    #[error("part header block exceeds {0} bytes")]
    HeaderTooLarge(usize),
    #[error("part header is not valid UTF-8")]
    InvalidHeader,
}

/// A fresh random boundary token: 60 lowercase hex characters.
pub fn generate_boundary() -> String {
    let mut raw = [0u8; BOUNDARY_RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut raw);
    raw.iter().map(|b| format!("{b:02x}")).collect()
}

/// Boundary characters that are MIME tspecials and force a quoted parameter.
const TSPECIAL_BCHARS: &str = "(),/:=? ";

/// The response `Content-Type` announcing a stream delimited by `boundary`.
pub fn content_type(boundary: &str) -> String {
    if boundary.contains(|c: char| TSPECIAL_BCHARS.contains(c)) {
        format!("{MIXED_REPLACE}; boundary=\"{boundary}\"")
    } else {
        format!("{MIXED_REPLACE}; boundary={boundary}")
    }
}

/// Extract the boundary token from a `multipart/x-mixed-replace` content type.
pub fn boundary_from_content_type(value: &str) -> Option<&str> {
    let (mime, params) = value.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case(MIXED_REPLACE) {
        return None;
    }
    params.split(';').find_map(|param| {
        let (key, val) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let val = val.trim().trim_matches('"');
        (!val.is_empty()).then_some(val)
    })
}

fn validate_boundary(boundary: &str) -> Result<(), MultipartError> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || "'()+_,-./:=? ".contains(c);
    if boundary.is_empty()
        || boundary.len() > MAX_BOUNDARY_LEN
        || boundary.ends_with(' ')
        || !boundary.chars().all(allowed)
    {
        return Err(MultipartError::InvalidBoundary(boundary.to_string()));
    }
    Ok(())
}

/// Serializes parts of one multipart body.
#[derive(Debug)]
pub struct PartWriter {
    boundary: String,
    wrote_part: bool,
}

impl PartWriter {
    pub fn new(boundary: impl Into<String>) -> Result<Self, MultipartError> {
        let boundary = boundary.into();
        validate_boundary(&boundary)?;
        Ok(Self {
            boundary,
            wrote_part: false,
        })
    }

    /// Delimiter, headers and body of the next part.
    pub fn part(&mut self, headers: &[(&str, &str)], body: &[u8]) -> Bytes {
        let header_len: usize = headers.iter().map(|(k, v)| k.len() + v.len() + 4).sum();
        let mut buf =
            BytesMut::with_capacity(self.boundary.len() + header_len + body.len() + 8);

        if self.wrote_part {
            buf.put_slice(CRLF);
        }
        self.wrote_part = true;
        buf.put_slice(b"--");
        buf.put_slice(self.boundary.as_bytes());
        buf.put_slice(CRLF);
        for (name, value) in headers {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(CRLF);
        }
        buf.put_slice(CRLF);
        buf.put_slice(body);
        buf.freeze()
    }

    pub fn jpeg_part(&mut self, jpeg: &[u8]) -> Bytes {
        self.part(&[("Content-Type", IMAGE_JPEG)], jpeg)
    }

    /// The terminating delimiter. Nothing may be written after it.
    pub fn close(&mut self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.boundary.len() + 8);
        if self.wrote_part {
            buf.put_slice(CRLF);
        }
        buf.put_slice(b"--");
        buf.put_slice(self.boundary.as_bytes());
        buf.put_slice(b"--");
        buf.put_slice(CRLF);
        buf.freeze()
    }
}

/// One part recovered by [`MultipartParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Parse state for the incoming multipart body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for `--B` followed by CRLF (next part) or `--` (close).
    SeekingBoundary,
    /// Found boundary, now looking for the blank line that ends the headers.
    SeekingHeaderEnd,
    /// Collecting body bytes until the next `\r\n--B`.
    CollectingBody,
    /// Saw the closing delimiter.
    Closed,
}

/// Incremental parser: feed chunks with [`push`](Self::push), drain parts with
/// [`next_part`](Self::next_part). A part is only complete once the delimiter
/// that follows it has arrived.
pub struct MultipartParser {
    dash_boundary: Vec<u8>,
    delimiter: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    content_type: Option<String>,
    scan_from: usize,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Result<Self, MultipartError> {
        validate_boundary(boundary)?;
        let dash_boundary = [b"--", boundary.as_bytes()].concat();
        let delimiter = [CRLF, dash_boundary.as_slice()].concat();
        Ok(Self {
            dash_boundary,
            delimiter,
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            content_type: None,
            scan_from: 0,
        })
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.state != ParseState::Closed {
            self.buffer.extend_from_slice(chunk);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == ParseState::Closed
    }

    pub fn next_part(&mut self) -> Result<Option<Part>, MultipartError> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    let Some(pos) = find_subsequence(&self.buffer, &self.dash_boundary) else {
                        // Keep the tail in case the boundary spans chunks
                        let keep = self.dash_boundary.len();
                        if self.buffer.len() > keep {
                            let _ = self.buffer.split_to(self.buffer.len() - keep);
                        }
                        return Ok(None);
                    };
                    let _ = self.buffer.split_to(pos);
                    let after = self.dash_boundary.len();
                    if self.buffer.len() < after + 2 {
                        return Ok(None);
                    }
                    let tag = [self.buffer[after], self.buffer[after + 1]];
                    match &tag {
                        b"\r\n" => {
                            let _ = self.buffer.split_to(after + 2);
                            self.state = ParseState::SeekingHeaderEnd;
                        }
                        b"--" => {
                            self.buffer.clear();
                            self.state = ParseState::Closed;
                            return Ok(None);
                        }
                        _ => {
                            // Longer token sharing our prefix, not a delimiter
                            let _ = self.buffer.split_to(after);
                        }
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if self.buffer.len() < CRLF.len() {
                        return Ok(None);
                    }
                    let header_len = if self.buffer.starts_with(CRLF) {
                        0
                    } else {
                        match find_subsequence(&self.buffer, HEADER_END) {
                            Some(pos) => pos + CRLF.len(),
                            None if self.buffer.len() > MAX_HEADER_BYTES => {
                                return Err(MultipartError::HeaderTooLarge(MAX_HEADER_BYTES));
                            }
                            None => return Ok(None),
                        }
                    };
                    let headers = self.buffer.split_to(header_len);
                    let _ = self.buffer.split_to(CRLF.len());
                    self.content_type = parse_content_type(&headers)?;
                    self.scan_from = 0;
                    self.state = ParseState::CollectingBody;
                }
                ParseState::CollectingBody => {
                    let Some(pos) = find_subsequence(&self.buffer[self.scan_from..], &self.delimiter)
                    else {
                        // Avoid re-scanning old data next time
                        self.scan_from = self.buffer.len().saturating_sub(self.delimiter.len());
                        return Ok(None);
                    };
                    let at = self.scan_from + pos;
                    let after = at + self.delimiter.len();
                    if self.buffer.len() < after + 2 {
                        self.scan_from = at;
                        return Ok(None);
                    }
                    let tag = [self.buffer[after], self.buffer[after + 1]];
                    if &tag != b"\r\n" && &tag != b"--" {
                        // Body bytes that only look like a delimiter
                        self.scan_from = at + 1;
                        continue;
                    }
                    let body = self.buffer.split_to(at).freeze();
                    // Buffer now starts at the delimiter's CRLF
                    self.state = ParseState::SeekingBoundary;
                    return Ok(Some(Part {
                        content_type: self.content_type.take(),
                        body,
                    }));
                }
                ParseState::Closed => return Ok(None),
            }
        }
    }
}

fn parse_content_type(headers: &[u8]) -> Result<Option<String>, MultipartError> {
    let text = std::str::from_utf8(headers).map_err(|_| MultipartError::InvalidHeader)?;
    Ok(text.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-type")
            .then(|| value.trim().to_string())
    }))
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_frames_parts_and_close() {
        let mut writer = PartWriter::new("frame").unwrap();
        let first = writer.jpeg_part(b"AB");
        let second = writer.jpeg_part(b"CD");
        let close = writer.close();

        assert_eq!(&first[..], b"--frame\r\nContent-Type: image/jpeg\r\n\r\nAB");
        assert_eq!(&second[..], b"\r\n--frame\r\nContent-Type: image/jpeg\r\n\r\nCD");
        assert_eq!(&close[..], b"\r\n--frame--\r\n");
    }

    #[test]
    fn close_without_parts() {
        let mut writer = PartWriter::new("frame").unwrap();
        assert_eq!(&writer.close()[..], b"--frame--\r\n");
    }

    #[test]
    fn generated_boundaries_are_hex_and_distinct() {
        let a = generate_boundary();
        let b = generate_boundary();
        assert_eq!(a.len(), 60);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert!(PartWriter::new(a).is_ok());
    }

    #[test]
    fn rejects_bad_boundaries() {
        assert!(PartWriter::new("").is_err());
        assert!(PartWriter::new("a".repeat(71)).is_err());
        assert!(PartWriter::new("trailing ").is_err());
        assert!(MultipartParser::new("semi;colon").is_err());
    }

    #[test]
    fn content_type_roundtrips_boundary() {
        let header = content_type("abc123");
        assert_eq!(header, "multipart/x-mixed-replace; boundary=abc123");
        assert_eq!(boundary_from_content_type(&header), Some("abc123"));
    }

    #[test]
    fn content_type_quotes_tspecial_boundaries() {
        let header = content_type("a b:c=d");
        assert_eq!(header, "multipart/x-mixed-replace; boundary=\"a b:c=d\"");
        assert_eq!(boundary_from_content_type(&header), Some("a b:c=d"));
        assert_eq!(
            content_type("plain-token_1.2"),
            "multipart/x-mixed-replace; boundary=plain-token_1.2"
        );
    }

    #[test]
    fn boundary_from_content_type_variants() {
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace;boundary=xyz"),
            Some("xyz")
        );
        assert_eq!(
            boundary_from_content_type("Multipart/X-Mixed-Replace; charset=x; Boundary=\"q\""),
            Some("q")
        );
        assert_eq!(boundary_from_content_type("image/jpeg"), None);
        assert_eq!(boundary_from_content_type("multipart/form-data; boundary=x"), None);
        assert_eq!(boundary_from_content_type("multipart/x-mixed-replace; boundary="), None);
    }

    #[test]
    fn parses_stream_fed_one_byte_at_a_time() {
        let mut writer = PartWriter::new("b0undary").unwrap();
        let mut wire = Vec::new();
        wire.extend_from_slice(&writer.jpeg_part(b"first\r\n-body"));
        wire.extend_from_slice(&writer.jpeg_part(b"second"));
        wire.extend_from_slice(&writer.close());

        let mut parser = MultipartParser::new("b0undary").unwrap();
        let mut parts = Vec::new();
        for byte in wire {
            parser.push(&[byte]);
            while let Some(part) = parser.next_part().unwrap() {
                parts.push(part);
            }
        }

        assert!(parser.is_closed());
        assert_eq!(parts.len(), 2);
        assert_eq!(&parts[0].body[..], b"first\r\n-body");
        assert_eq!(parts[0].content_type.as_deref(), Some(IMAGE_JPEG));
        assert_eq!(&parts[1].body[..], b"second");
    }

    #[test]
    fn part_completes_only_when_next_delimiter_arrives() {
        let mut writer = PartWriter::new("frame").unwrap();
        let mut parser = MultipartParser::new("frame").unwrap();

        parser.push(&writer.jpeg_part(b"one"));
        assert_eq!(parser.next_part().unwrap(), None);

        parser.push(&writer.jpeg_part(b"two"));
        let part = parser.next_part().unwrap().unwrap();
        assert_eq!(&part.body[..], b"one");
        assert_eq!(parser.next_part().unwrap(), None);
        assert!(!parser.is_closed());
    }

    #[test]
    fn skips_preamble_and_handles_empty_headers() {
        let mut parser = MultipartParser::new("frame").unwrap();
        parser.push(b"junk before --frame\r\n\r\npayload\r\n--frame--\r\n");
        let part = parser.next_part().unwrap().unwrap();
        assert_eq!(part.content_type, None);
        assert_eq!(&part.body[..], b"payload");
        assert_eq!(parser.next_part().unwrap(), None);
        assert!(parser.is_closed());
    }

    #[test]
    fn longer_token_with_same_prefix_is_not_a_delimiter() {
        let mut parser = MultipartParser::new("frame").unwrap();
        parser.push(b"--framework\r\n--frame\r\nContent-Type: text/plain\r\n\r\nok\r\n--frame--\r\n");
        let part = parser.next_part().unwrap().unwrap();
        assert_eq!(part.content_type.as_deref(), Some("text/plain"));
        assert_eq!(&part.body[..], b"ok");
    }

    #[test]
    fn body_keeps_delimiter_lookalikes() {
        let mut parser = MultipartParser::new("frame").unwrap();
        parser.push(b"--frame\r\n\r\nhead\r\n--frame");
        assert_eq!(parser.next_part().unwrap(), None);

        parser.push(b"?tail\r\n--frame--\r\n");
        let part = parser.next_part().unwrap().unwrap();
        assert_eq!(&part.body[..], b"head\r\n--frame?tail");
        assert_eq!(parser.next_part().unwrap(), None);
        assert!(parser.is_closed());
    }

    #[test]
    fn oversized_header_block_is_an_error() {
        let mut parser = MultipartParser::new("frame").unwrap();
        parser.push(b"--frame\r\n");
        parser.push(&vec![b'x'; MAX_HEADER_BYTES + 1]);
        assert!(matches!(
            parser.next_part(),
            Err(MultipartError::HeaderTooLarge(_))
        ));
    }
}
