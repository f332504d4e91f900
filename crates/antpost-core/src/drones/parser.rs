//! Incremental HTTP/1.1 response parser.
//!
//! Bytes are fed as they arrive from the socket; [`ResponseParser::try_parse`]
//! yields each response once its framing says it is complete. Only
//! content-length, chunked and read-until-close bodies are understood.

use bytes::{Buf, Bytes, BytesMut};
use memchr::memmem;

use crate::error::ResponseError;

const HEADER_END: &[u8] = b"\r\n\r\n";
const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, PartialEq)]
pub struct AsyncHttpResponse {
    pub status_code: u16,
    pub content: Bytes,
    pub err: Option<ResponseError>,
}

#[derive(Debug)]
enum Framing {
    Length(usize),
    UntilClose,
    Chunked { body: BytesMut, trailers: bool },
}

#[derive(Debug)]
struct Head {
    status_code: u16,
    framing: Framing,
    err: Option<ResponseError>,
}

#[derive(Debug, PartialEq)]
pub enum Parsed {
    Response(AsyncHttpResponse),
    /// More bytes are needed.
    Pending,
    /// Input is over and nothing more can be produced.
    Done,
}

#[derive(Debug, Default)]
pub struct ResponseParser {
    buf: BytesMut,
    head: Option<Head>,
    read_over: bool,
    broken: bool,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Mark end of input. Further `try_parse` calls finalise whatever is
    /// buffered and never return `Pending`.
    pub fn finish(&mut self) {
        self.read_over = true;
    }

    pub fn is_finished(&self) -> bool {
        self.read_over || self.broken
    }

    pub fn try_parse(&mut self) -> Parsed {
        if self.broken {
            return Parsed::Done;
        }

        if self.head.is_none() {
            match memmem::find(&self.buf, HEADER_END) {
                Some(p) => {
                    let header = self.buf.split_to(p + HEADER_END.len());
                    self.head = Some(parse_head(&header));
                }
                None if self.read_over => {
                    // A partial header at end of input cannot become a response.
                    self.buf.clear();
                    return Parsed::Done;
                }
                None => return Parsed::Pending,
            }
        }

        let Some(head) = self.head.as_mut() else {
            return Parsed::Pending;
        };

        let body = match &mut head.framing {
            Framing::Length(n) if self.buf.len() >= *n => Some((self.buf.split_to(*n).freeze(), None)),
            Framing::Length(n) if self.read_over => {
                let received = self.buf.len();
                let err = ResponseError::Truncated {
                    expected: *n,
                    received,
                };
                Some((self.buf.split().freeze(), Some(err)))
            }
            Framing::Length(_) => None,
            Framing::UntilClose if self.read_over => Some((self.buf.split().freeze(), None)),
            Framing::UntilClose => None,
            Framing::Chunked { body, trailers } => match read_chunks(&mut self.buf, body, trailers) {
                Ok(true) => Some((body.split().freeze(), None)),
                Ok(false) if self.read_over => Some((
                    body.split().freeze(),
                    Some(ResponseError::UnfinishedChunked),
                )),
                Ok(false) => None,
                Err(e) => {
                    // The chunk stream is out of sync; nothing after this
                    // point can be framed reliably.
                    self.broken = true;
                    self.buf.clear();
                    Some((body.split().freeze(), Some(e)))
                }
            },
        };

        match body {
            Some((content, err)) => {
                let head = self.head.take();
                let (status_code, head_err) = head.map_or((0, None), |h| (h.status_code, h.err));
                Parsed::Response(AsyncHttpResponse {
                    status_code,
                    content,
                    err: head_err.or(err),
                })
            }
            None => Parsed::Pending,
        }
    }
}

fn parse_head(header: &[u8]) -> Head {
    let text = String::from_utf8_lossy(header);
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();

    let mut err = None;
    let status_code = match parse_status(status_line) {
        Some(code) => code,
        None => {
            err = Some(ResponseError::MalformedStatusLine(status_line.to_string()));
            0
        }
    };

    let mut length = None;
    let mut chunked = false;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };

        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => match value.parse::<usize>() {
                Ok(n) => length = Some(n),
                Err(_) => err = Some(ResponseError::MalformedContentLength(value.to_string())),
            },
            "transfer-encoding" => {
                chunked = value
                    .split(',')
                    .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
            }
            _ => {}
        }
    }

    let framing = if chunked {
        Framing::Chunked {
            body: BytesMut::new(),
            trailers: false,
        }
    } else if matches!(status_code, 204 | 304) {
        Framing::Length(0)
    } else {
        length.map_or(Framing::UntilClose, Framing::Length)
    };

    Head {
        status_code,
        framing,
        err,
    }
}

fn parse_status(line: &str) -> Option<u16> {
    let (version, rest) = line.split_once(' ')?;
    if !version.starts_with("HTTP/") {
        return None;
    }

    rest.trim().split(' ').next()?.parse().ok()
}

/// Move complete chunks from `buf` into `body`. Returns `Ok(true)` once the
/// last chunk and its trailer section have been consumed.
fn read_chunks(
    buf: &mut BytesMut,
    body: &mut BytesMut,
    trailers: &mut bool,
) -> Result<bool, ResponseError> {
    loop {
        if *trailers {
            if buf.starts_with(CRLF) {
                buf.advance(CRLF.len());
                return Ok(true);
            }

            return match memmem::find(buf, HEADER_END) {
                Some(p) => {
                    buf.advance(p + HEADER_END.len());
                    Ok(true)
                }
                None => Ok(false),
            };
        }

        let Some(line_end) = memmem::find(buf, CRLF) else {
            return Ok(false);
        };

        let size = parse_chunk_size(&buf[..line_end])?;
        if size == 0 {
            buf.advance(line_end + CRLF.len());
            *trailers = true;
            continue;
        }

        let needed = (line_end + 2 * CRLF.len()).saturating_add(size);
        if buf.len() < needed {
            return Ok(false);
        }

        buf.advance(line_end + CRLF.len());
        body.extend_from_slice(&buf[..size]);
        buf.advance(size + CRLF.len());
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ResponseError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|l| {
            let size = l.split(';').next().unwrap_or_default().trim();
            usize::from_str_radix(size, 16).ok()
        })
        .ok_or_else(|| ResponseError::MalformedChunk(String::from_utf8_lossy(line).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(parsed: Parsed) -> AsyncHttpResponse {
        match parsed {
            Parsed::Response(r) => r,
            other => panic!("expected a response, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_length_emitted_after_header() {
        let mut p = ResponseParser::new();
        p.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");

        let r = response(p.try_parse());
        assert_eq!(r.status_code, 200);
        assert!(r.content.is_empty());
        assert_eq!(r.err, None);
        assert_eq!(p.try_parse(), Parsed::Pending);
    }

    #[test]
    fn test_chunked_fed_byte_by_byte() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\n\r\n";
        let mut p = ResponseParser::new();
        let mut got = Vec::new();
        for b in raw.iter() {
            p.feed(&[*b]);
            if let Parsed::Response(r) = p.try_parse() {
                got.push(r);
            }
        }

        assert_eq!(got.len(), 1);
        assert_eq!(&got[0].content[..], b"hello world");
        assert_eq!(got[0].err, None);
    }

    #[test]
    fn test_chunked_with_trailers_then_next_response() {
        let mut p = ResponseParser::new();
        p.feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\nX-Sum: 1\r\n\r\n");
        p.feed(b"HTTP/1.1 404 Not Found\r\nContent-Length: 2\r\n\r\nno");

        assert_eq!(&response(p.try_parse()).content[..], b"abc");
        let second = response(p.try_parse());
        assert_eq!(second.status_code, 404);
        assert_eq!(&second.content[..], b"no");
    }

    #[test]
    fn test_pipelined_content_length() {
        let mut p = ResponseParser::new();
        p.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\none");
        p.feed(b"HTTP/1.1 201 Created\r\ncontent-length: 3\r\n\r\ntw");

        assert_eq!(&response(p.try_parse()).content[..], b"one");
        assert_eq!(p.try_parse(), Parsed::Pending);

        p.feed(b"o");
        let r = response(p.try_parse());
        assert_eq!(r.status_code, 201);
        assert_eq!(&r.content[..], b"two");
    }

    #[test]
    fn test_until_close() {
        let mut p = ResponseParser::new();
        p.feed(b"HTTP/1.0 200 OK\r\nServer: x\r\n\r\nbye");
        assert_eq!(p.try_parse(), Parsed::Pending);

        p.finish();
        assert_eq!(&response(p.try_parse()).content[..], b"bye");
        assert_eq!(p.try_parse(), Parsed::Done);
    }

    #[test]
    fn test_truncated_body_at_eof() {
        let mut p = ResponseParser::new();
        p.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc");
        p.finish();

        let r = response(p.try_parse());
        assert_eq!(&r.content[..], b"abc");
        assert_eq!(
            r.err,
            Some(ResponseError::Truncated {
                expected: 10,
                received: 3
            })
        );
        assert_eq!(p.try_parse(), Parsed::Done);
    }

    #[test]
    fn test_malformed_chunk_size_stops_parsing() {
        let mut p = ResponseParser::new();
        p.feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\nzz\r\nmore\r\n");

        let r = response(p.try_parse());
        assert_eq!(&r.content[..], b"ok");
        assert_eq!(r.err, Some(ResponseError::MalformedChunk("zz".to_string())));
        assert!(p.is_finished());
        assert_eq!(p.try_parse(), Parsed::Done);
    }

    #[test]
    fn test_unfinished_chunked_at_eof() {
        let mut p = ResponseParser::new();
        p.feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nhalf\r\n8\r\nmiss");
        assert_eq!(p.try_parse(), Parsed::Pending);
        p.finish();

        let r = response(p.try_parse());
        assert_eq!(&r.content[..], b"half");
        assert_eq!(r.err, Some(ResponseError::UnfinishedChunked));
    }

    #[test]
    fn test_malformed_content_length_falls_back_to_close() {
        let mut p = ResponseParser::new();
        p.feed(b"HTTP/1.1 200 OK\r\nContent-Length: lots\r\n\r\nbody");
        p.finish();

        let r = response(p.try_parse());
        assert_eq!(&r.content[..], b"body");
        assert_eq!(
            r.err,
            Some(ResponseError::MalformedContentLength("lots".to_string()))
        );
    }

    #[test]
    fn test_no_content_status_has_no_body() {
        let mut p = ResponseParser::new();
        p.feed(b"HTTP/1.1 204 No Content\r\n\r\n");
        let r = response(p.try_parse());
        assert_eq!(r.status_code, 204);
        assert!(r.content.is_empty());
    }

    #[test]
    fn test_bad_status_line() {
        let mut p = ResponseParser::new();
        p.feed(b"garbage\r\nContent-Length: 0\r\n\r\n");
        let r = response(p.try_parse());
        assert_eq!(r.status_code, 0);
        assert!(matches!(r.err, Some(ResponseError::MalformedStatusLine(_))));
    }

    #[test]
    fn test_partial_header_at_eof_is_dropped() {
        let mut p = ResponseParser::new();
        p.feed(b"HTTP/1.1 200 OK\r\nContent-");
        p.finish();
        assert_eq!(p.try_parse(), Parsed::Done);
    }
}
