// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The HTTP side of BOSH: a pool of at most two persistent sockets to the
//! bind server, each carrying serialized `POST /jabber` requests and
//! `Content-Length`-delimited responses. Responses may arrive stacked several
//! to a read, and a response may span reads; the per-connection buffer
//! absorbs both.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// BOSH `hold='1'` needs one request parked on the server while a second
/// socket carries fresh sends.
pub const MAX_POOL_SOCKETS: usize = 2;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unable to connect to '{0}': {1}")]
    Connect(String, std::io::Error),
    #[error("unable to send request to '{0}': {1}")]
    Send(String, std::io::Error),
}

#[derive(Debug, Error)]
enum FramingError {
    #[error("response missing Content-Length")]
    MissingContentLength,
    #[error("unparseable Content-Length '{0}'")]
    BadContentLength(String),
}

/// What happened to a body handed to [`HttpPool::post`].
#[derive(Debug, PartialEq, Eq)]
pub enum PostOutcome {
    Sent,
    /// Both sockets have requests in flight; the caller keeps the body at the
    /// head of its queue and retries after the next response frees one.
    Busy,
}

struct HttpConn {
    stream: TcpStream,
    buf: BytesMut,
    /// True once a posted request's response has been fully read and nothing
    /// else is in flight on this socket.
    idle: bool,
}

pub struct HttpPool {
    server: String,
    port: u16,
    conns: Vec<HttpConn>,
}

impl HttpPool {
    pub fn new(server: String, port: u16) -> Self {
        Self {
            server,
            port,
            conns: Vec::new(),
        }
    }

    pub fn has_conns(&self) -> bool {
        !self.conns.is_empty()
    }

    pub fn open_count(&self) -> usize {
        self.conns.len()
    }

    /// True when every open socket is idle. Trivially true with no sockets,
    /// which is what lets the keep-alive open the first one.
    pub fn all_idle(&self) -> bool {
        self.conns.iter().all(|c| c.idle)
    }

    pub fn close_all(&mut self) {
        self.conns.clear();
    }

    /// Post one framed body. Prefers an idle socket; a write failure there
    /// drops the socket and tries the next. With no idle socket and room in
    /// the pool, a fresh connection is opened. Errors on a fresh connection
    /// are the caller's cue to tear the session down.
    pub async fn post(&mut self, body: &str) -> Result<PostOutcome, TransportError> {
        let request = format!(
            "POST /jabber HTTP/1.1\r\nHost: {}\r\nContent-Length: {}\r\n\r\n{}",
            self.server,
            body.len(),
            body
        );

        let mut i = 0;
        while i < self.conns.len() {
            if !self.conns[i].idle {
                i += 1;
                continue;
            }
            self.conns[i].idle = false;
            match self.conns[i].stream.write_all(request.as_bytes()).await {
                Ok(()) => return Ok(PostOutcome::Sent),
                Err(e) => {
                    warn!("dropping pool socket after write failure: {e}");
                    self.conns.remove(i);
                }
            }
        }

        if self.conns.len() < MAX_POOL_SOCKETS {
            let stream = TcpStream::connect((self.server.as_str(), self.port))
                .await
                .map_err(|e| TransportError::Connect(self.server.clone(), e))?;
            let mut conn = HttpConn {
                stream,
                buf: BytesMut::new(),
                idle: false,
            };
            conn.stream
                .write_all(request.as_bytes())
                .await
                .map_err(|e| TransportError::Send(self.server.clone(), e))?;
            self.conns.push(conn);
            return Ok(PostOutcome::Sent);
        }

        Ok(PostOutcome::Busy)
    }

    /// Wait until any pooled socket is readable, pull bytes off it, and
    /// return every complete response payload stacked in its buffer. Socket
    /// errors and EOF quietly shrink the pool; the session's inactivity
    /// timer covers the case where the whole pool dies.
    ///
    /// Pends forever when the pool is empty; callers gate on [`has_conns`].
    ///
    /// [`has_conns`]: HttpPool::has_conns
    pub async fn recv(&mut self) -> Vec<Vec<u8>> {
        if self.conns.is_empty() {
            std::future::pending::<()>().await;
            unreachable!()
        }

        let reads: Vec<_> = self
            .conns
            .iter_mut()
            .enumerate()
            .map(|(i, conn)| {
                let HttpConn { stream, buf, .. } = conn;
                Box::pin(async move { (i, stream.read_buf(buf).await) })
            })
            .collect();
        let ((idx, result), _, _) = futures_util::future::select_all(reads).await;

        match result {
            Ok(0) => {
                debug!("server closed pooled connection");
                self.conns.remove(idx);
                Vec::new()
            }
            Ok(_) => {
                let conn = &mut self.conns[idx];
                match drain_responses(&mut conn.buf) {
                    Ok(payloads) => {
                        if !payloads.is_empty() && conn.buf.is_empty() {
                            conn.idle = true;
                        }
                        payloads
                    }
                    Err(e) => {
                        warn!("dropping pool socket after framing error: {e}");
                        self.conns.remove(idx);
                        Vec::new()
                    }
                }
            }
            Err(e) => {
                warn!("dropping pool socket after read failure: {e}");
                self.conns.remove(idx);
                Vec::new()
            }
        }
    }
}

/// Parse every complete `Content-Length`-framed response at the front of
/// `buf`, consuming what is parsed and leaving any partial tail in place.
fn drain_responses(buf: &mut BytesMut) -> Result<Vec<Vec<u8>>, FramingError> {
    let mut out = Vec::new();
    loop {
        let Some(header_end) = find_blank_line(buf) else {
            break;
        };
        let content_len = content_length(&buf[..header_end])?;
        let total = header_end + 4 + content_len;
        if buf.len() < total {
            break;
        }
        out.push(buf[header_end + 4..total].to_vec());
        buf.advance(total);
    }
    Ok(out)
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(header: &[u8]) -> Result<usize, FramingError> {
    let header = String::from_utf8_lossy(header);
    for line in header.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.eq_ignore_ascii_case("content-length") {
            let value = value.trim();
            return value
                .parse()
                .map_err(|_| FramingError::BadContentLength(value.to_string()));
        }
    }
    Err(FramingError::MissingContentLength)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
    }

    #[test]
    fn single_response() {
        let mut buf = BytesMut::from(response("<body/>").as_bytes());
        let payloads = drain_responses(&mut buf).unwrap();
        assert_eq!(payloads, vec![b"<body/>".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn stacked_responses_in_one_read() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(response("<body sid='a'/>").as_bytes());
        buf.extend_from_slice(response("<body><iq/></body>").as_bytes());
        buf.extend_from_slice(response("<body/>").as_bytes());
        let payloads = drain_responses(&mut buf).unwrap();
        assert_eq!(
            payloads,
            vec![
                b"<body sid='a'/>".to_vec(),
                b"<body><iq/></body>".to_vec(),
                b"<body/>".to_vec(),
            ]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn zero_length_response_is_valid() {
        let mut buf = BytesMut::from("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".as_bytes());
        let payloads = drain_responses(&mut buf).unwrap();
        assert_eq!(payloads, vec![Vec::<u8>::new()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_response_is_left_in_place() {
        let full = response("<body>0123456789</body>");
        let (head, tail) = full.split_at(full.len() - 5);

        let mut buf = BytesMut::from(head.as_bytes());
        assert!(drain_responses(&mut buf).unwrap().is_empty());
        assert_eq!(buf.len(), head.len());

        buf.extend_from_slice(tail.as_bytes());
        let payloads = drain_responses(&mut buf).unwrap();
        assert_eq!(payloads, vec![b"<body>0123456789</body>".to_vec()]);
    }

    #[test]
    fn header_split_across_reads() {
        let mut buf = BytesMut::from("HTTP/1.1 200 OK\r\nContent-Le".as_bytes());
        assert!(drain_responses(&mut buf).unwrap().is_empty());
        buf.extend_from_slice(b"ngth: 3\r\n\r\nabc");
        let payloads = drain_responses(&mut buf).unwrap();
        assert_eq!(payloads, vec![b"abc".to_vec()]);
    }

    #[test]
    fn content_length_is_case_insensitive() {
        let mut buf = BytesMut::from("HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nhi".as_bytes());
        let payloads = drain_responses(&mut buf).unwrap();
        assert_eq!(payloads, vec![b"hi".to_vec()]);
    }

    #[test]
    fn missing_content_length_is_an_error() {
        let mut buf = BytesMut::from("HTTP/1.1 200 OK\r\nServer: x\r\n\r\n<body/>".as_bytes());
        assert!(matches!(
            drain_responses(&mut buf),
            Err(FramingError::MissingContentLength)
        ));
    }

    #[test]
    fn bad_content_length_is_an_error() {
        let mut buf = BytesMut::from("HTTP/1.1 200 OK\r\nContent-Length: lots\r\n\r\n".as_bytes());
        assert!(matches!(
            drain_responses(&mut buf),
            Err(FramingError::BadContentLength(_))
        ));
    }
}
