//! Pipelined HTTP/1.1 over a single TCP connection.
//!
//! [`AsyncHttp::connect`] splits the socket between a writer task, fed from a
//! mutex-protected queue and woken once per request, and a reader task that
//! runs the incremental parser and delivers responses in arrival order.

use bytes::{BufMut, Bytes, BytesMut};
use reqwest::header::HeaderMap;
use reqwest::Method;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};
use url::{Position, Url};

use crate::context::{Context, DroneResult, DroneStep};
use crate::drone::Drone;
use crate::drones::parser::{AsyncHttpResponse, Parsed, ResponseParser};
use crate::error::HttpError;

const READ_CHUNK: usize = 2048;

#[derive(Debug, Clone)]
pub struct AsyncHttpRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub data: Bytes,
    pub keep_alive: bool,
}

impl AsyncHttpRequest {
    pub fn get(url: impl Into<String>, keep_alive: bool) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: HeaderMap::new(),
            data: Bytes::new(),
            keep_alive,
        }
    }

    pub fn post(url: impl Into<String>, data: impl Into<Bytes>, keep_alive: bool) -> Self {
        Self {
            url: url.into(),
            method: Method::POST,
            headers: HeaderMap::new(),
            data: data.into(),
            keep_alive,
        }
    }

    /// Serialize as a minimal HTTP/1.1 request.
    pub fn encode(&self) -> Result<Bytes, HttpError> {
        let url = Url::parse(&self.url).map_err(|source| HttpError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| HttpError::MissingHost(self.url.clone()))?;
        let path = &url[Position::BeforePath..Position::AfterQuery];
        let path = if path.is_empty() { "/" } else { path };

        let mut buf = BytesMut::with_capacity(128 + self.data.len());
        buf.put_slice(format!("{} {} HTTP/1.1\r\n", self.method, path).as_bytes());
        match url.port() {
            Some(port) => buf.put_slice(format!("Host: {}:{}\r\n", host, port).as_bytes()),
            None => buf.put_slice(format!("Host: {}\r\n", host).as_bytes()),
        }
        buf.put_slice(format!("Content-Length: {}\r\n", self.data.len()).as_bytes());
        if self.keep_alive {
            buf.put_slice(b"Connection: keep-alive\r\n");
        } else {
            buf.put_slice(b"Connection: close\r\n");
        }

        for (name, value) in &self.headers {
            buf.put_slice(name.as_str().as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }

        buf.put_slice(b"\r\n");
        buf.put_slice(&self.data);
        Ok(buf.freeze())
    }
}

/// Sending side of a pipelined connection. Responses arrive on the receiver
/// returned by [`AsyncHttp::connect`], which closes once the server closes the
/// connection.
pub struct AsyncHttp {
    queue: Arc<Mutex<VecDeque<Bytes>>>,
    wake: Option<mpsc::Sender<oneshot::Sender<()>>>,
}

impl AsyncHttp {
    /// Connect to `host` (`host[:port]`, port 80 by default).
    pub async fn connect(
        host: &str,
    ) -> Result<(AsyncHttp, mpsc::Receiver<AsyncHttpResponse>), HttpError> {
        let addr = host_port(host)?;
        let stream = TcpStream::connect(&addr).await?;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        Ok(Self::spawn_io(reader, writer, addr))
    }

    fn spawn_io<R, W>(
        reader: R,
        writer: W,
        addr: String,
    ) -> (AsyncHttp, mpsc::Receiver<AsyncHttpResponse>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let (response_tx, response_rx) = mpsc::channel(1);

        tokio::spawn(write_loop(writer, Arc::clone(&queue), wake_rx));
        tokio::spawn(read_loop(reader, response_tx, addr));

        (
            AsyncHttp {
                queue,
                wake: Some(wake_tx),
            },
            response_rx,
        )
    }

    /// Hand `req` to the writer. Returns once the writer has taken it off the
    /// queue, so a following [`AsyncHttp::shutdown`] cannot drop it.
    pub async fn request(&self, req: AsyncHttpRequest) -> Result<(), HttpError> {
        let wake = self.wake.as_ref().ok_or(HttpError::WriterClosed)?;
        let encoded = req.encode()?;

        self.queue.lock().await.push_back(encoded);
        let (taken_tx, taken_rx) = oneshot::channel();
        wake.send(taken_tx)
            .await
            .map_err(|_| HttpError::WriterClosed)?;
        taken_rx.await.map_err(|_| HttpError::WriterClosed)
    }

    pub async fn get(&self, url: &str, keep_alive: bool) -> Result<(), HttpError> {
        self.request(AsyncHttpRequest::get(url, keep_alive)).await
    }

    pub async fn post(
        &self,
        url: &str,
        data: impl Into<Bytes>,
        keep_alive: bool,
    ) -> Result<(), HttpError> {
        self.request(AsyncHttpRequest::post(url, data, keep_alive))
            .await
    }

    /// Drop every request not yet taken by the writer and close the write half
    /// once the writer is idle. Responses already on the wire are still
    /// delivered.
    pub async fn shutdown(&mut self) {
        self.queue.lock().await.clear();
        self.wake = None;
    }
}

async fn write_loop<W>(
    mut writer: W,
    queue: Arc<Mutex<VecDeque<Bytes>>>,
    mut wake: mpsc::Receiver<oneshot::Sender<()>>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(taken) = wake.recv().await {
        let req = queue.lock().await.pop_front();
        let _ = taken.send(());
        let Some(req) = req else {
            continue;
        };

        if let Err(e) = writer.write_all(&req).await {
            warn!("Write failed, closing writer: {}", e);
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Write half shutdown failed: {}", e);
    }
}

async fn read_loop<R>(mut reader: R, responses: mpsc::Sender<AsyncHttpResponse>, addr: String)
where
    R: AsyncRead + Unpin,
{
    let mut parser = ResponseParser::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => parser.finish(),
            Ok(n) => parser.feed(&chunk[..n]),
            Err(e) => {
                warn!("Read from {} failed: {}", addr, e);
                return;
            }
        }

        loop {
            match parser.try_parse() {
                Parsed::Response(r) => {
                    if let Some(err) = &r.err {
                        debug!("Response from {} carries error: {}", addr, err);
                    }
                    if responses.send(r).await.is_err() {
                        return;
                    }
                }
                Parsed::Pending => break,
                Parsed::Done => return,
            }
        }

        if parser.is_finished() {
            return;
        }
    }
}

fn host_port(host: &str) -> Result<String, HttpError> {
    let host = host.trim();
    let invalid = || HttpError::InvalidHost(host.to_string());
    if host.is_empty() {
        return Err(invalid());
    }

    let (name, port) = if let Some(rest) = host.strip_prefix('[') {
        let (v6, tail) = rest.split_once(']').ok_or_else(invalid)?;
        (format!("[{}]", v6), tail.strip_prefix(':').unwrap_or(tail))
    } else {
        match host.rsplit_once(':') {
            Some((name, _)) if name.contains(':') => (format!("[{}]", host), ""),
            Some((name, port)) => (name.to_string(), port),
            None => (host.to_string(), ""),
        }
    };

    let port = if port.is_empty() { "80" } else { port };
    port.parse::<u16>().map_err(|_| invalid())?;
    Ok(format!("{}:{}", name, port))
}

/// A pipelined session: where to connect and who drives it.
pub struct AsyncHttpSession {
    pub host: String,
    pub operator: Box<dyn AsyncOperator>,
}

/// Drives one session of an [`AsyncHttpDrone`].
pub trait AsyncOperator: Send {
    /// Requests to send during this session, taken once when the session
    /// starts. Closing the channel ends the session; every request received
    /// before that is still written.
    fn requests(&mut self) -> mpsc::Receiver<AsyncHttpRequest>;

    /// Called for every response, in arrival order.
    fn response(&mut self, context: &mut Context, response: AsyncHttpResponse);

    /// The session to run after this one, `None` to end the chain.
    fn next_session(&mut self) -> Option<AsyncHttpSession>;
}

/// Runs a whole pipelined session as one attempt.
pub struct AsyncHttpDrone {
    session: AsyncHttpSession,
}

impl AsyncHttpDrone {
    pub fn new(session: AsyncHttpSession) -> Self {
        Self { session }
    }
}

impl Drone for AsyncHttpDrone {
    fn run<'a>(
        &'a mut self,
        context: &'a mut Context,
    ) -> Pin<Box<dyn Future<Output = DroneResult> + Send + 'a>> {
        Box::pin(async move {
            let connected = AsyncHttp::connect(&self.session.host).await;
            context.step(DroneStep::Connected);
            let (mut conn, mut responses) = match connected {
                Ok(c) => c,
                Err(e) => {
                    debug!("Connect to {} failed: {}", self.session.host, e);
                    return DroneResult::ConnectFail;
                }
            };

            let operator = &mut self.session.operator;
            let mut requests = operator.requests();
            let mut broken = false;
            let mut closed = false;

            loop {
                tokio::select! {
                    req = requests.recv() => match req {
                        Some(req) => {
                            if let Err(e) = conn.request(req).await {
                                warn!("Request to {} not sent: {}", self.session.host, e);
                                broken = true;
                                break;
                            }
                        }
                        None => break,
                    },
                    resp = responses.recv() => match resp {
                        Some(resp) => {
                            broken |= resp.err.is_some();
                            operator.response(context, resp);
                        }
                        None => {
                            closed = true;
                            break;
                        }
                    },
                }
            }

            conn.shutdown().await;
            if !closed {
                while let Some(resp) = responses.recv().await {
                    broken |= resp.err.is_some();
                    operator.response(context, resp);
                }
            }

            context.step(DroneStep::Responsed);
            if broken {
                DroneResult::ResponseBroken
            } else {
                DroneResult::Ok
            }
        })
    }

    fn next(&mut self) -> Option<Box<dyn Drone>> {
        self.session
            .operator
            .next_session()
            .map(|s| Box::new(AsyncHttpDrone::new(s)) as Box<dyn Drone>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drones::testserver::{spawn_server, Reply};

    #[test]
    fn test_encode_request() {
        let mut req = AsyncHttpRequest::post("http://example.com:8080/a/b?x=1#frag", "hi", false);
        req.headers.insert("x-trace", "7".parse().unwrap());

        let encoded = req.encode().unwrap();
        assert_eq!(
            &encoded[..],
            &b"POST /a/b?x=1 HTTP/1.1\r\nHost: example.com:8080\r\nContent-Length: 2\r\nConnection: close\r\nx-trace: 7\r\n\r\nhi"[..]
        );

        let get = AsyncHttpRequest::get("http://example.com", true).encode().unwrap();
        assert!(get.starts_with(b"GET / HTTP/1.1\r\nHost: example.com\r\nContent-Length: 0\r\nConnection: keep-alive\r\n"));

        assert!(matches!(
            AsyncHttpRequest::get("not a url", true).encode(),
            Err(HttpError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_host_port() {
        assert_eq!(host_port("localhost").unwrap(), "localhost:80");
        assert_eq!(host_port("localhost:8848").unwrap(), "localhost:8848");
        assert_eq!(host_port("127.0.0.1:").unwrap(), "127.0.0.1:80");
        assert_eq!(host_port("[::1]:9000").unwrap(), "[::1]:9000");
        assert_eq!(host_port("::1").unwrap(), "[::1]:80");
        assert!(host_port("host:http").is_err());
        assert!(host_port("").is_err());
    }

    #[tokio::test]
    async fn test_zero_length_response() {
        let addr = spawn_server(|_| Reply::Raw(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec())).await;
        let (conn, mut responses) = AsyncHttp::connect(&addr).await.unwrap();

        conn.get(&format!("http://{}/empty", addr), true).await.unwrap();
        let r = responses.recv().await.unwrap();
        assert_eq!(r.status_code, 200);
        assert!(r.content.is_empty());
        assert_eq!(r.err, None);
    }

    #[tokio::test]
    async fn test_chunked_response() {
        let addr = spawn_server(|_| {
            Reply::Raw(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n".to_vec())
        })
        .await;
        let (conn, mut responses) = AsyncHttp::connect(&addr).await.unwrap();

        conn.get(&format!("http://{}/", addr), true).await.unwrap();
        let r = responses.recv().await.unwrap();
        assert_eq!(&r.content[..], b"hello");
    }

    #[tokio::test]
    async fn test_pipelined_requests_keep_order() {
        let addr = spawn_server(Reply::echo).await;
        let (conn, mut responses) = AsyncHttp::connect(&addr).await.unwrap();
        let base = format!("http://{}", addr);

        conn.get(&format!("{}/first", base), true).await.unwrap();
        let first = responses.recv().await.unwrap();
        assert_eq!(first.status_code, 200);
        assert_eq!(&first.content[..], b"/first");

        conn.get(&format!("{}/second", base), true).await.unwrap();
        conn.post(&format!("{}/", base), "third", false).await.unwrap();

        assert_eq!(&responses.recv().await.unwrap().content[..], b"/second");
        assert_eq!(&responses.recv().await.unwrap().content[..], b"third");
        // `Connection: close` on the last request makes the server hang up.
        assert!(responses.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_still_delivers_in_flight() {
        let addr = spawn_server(Reply::echo).await;
        let (mut conn, mut responses) = AsyncHttp::connect(&addr).await.unwrap();

        conn.get(&format!("http://{}/late", addr), true).await.unwrap();
        conn.shutdown().await;

        assert!(matches!(
            conn.get(&format!("http://{}/never", addr), true).await,
            Err(HttpError::WriterClosed)
        ));

        // The writer took `/late` before shutdown, so it still goes out.
        let r = responses.recv().await.unwrap();
        assert_eq!(&r.content[..], b"/late");
        assert!(responses.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_write_error_keeps_reader_alive() {
        let (reader, mut server_out) = tokio::io::duplex(1024);
        let (writer, server_in) = tokio::io::duplex(1024);
        drop(server_in);

        let (conn, mut responses) = AsyncHttp::spawn_io(reader, writer, "duplex".to_string());

        // Taken by the writer, then the write fails and the writer stops.
        conn.get("http://example.com/lost", true).await.unwrap();
        assert!(matches!(
            conn.get("http://example.com/after", true).await,
            Err(HttpError::WriterClosed)
        ));

        server_out
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();
        drop(server_out);

        let r = responses.recv().await.unwrap();
        assert_eq!(r.status_code, 200);
        assert_eq!(&r.content[..], b"ok");
        assert!(responses.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_read_until_close() {
        let addr = spawn_server(|_| Reply::RawThenClose(b"HTTP/1.0 200 OK\r\n\r\nbye".to_vec())).await;
        let (conn, mut responses) = AsyncHttp::connect(&addr).await.unwrap();

        conn.get(&format!("http://{}/", addr), true).await.unwrap();
        let r = responses.recv().await.unwrap();
        assert_eq!(&r.content[..], b"bye");
        assert!(responses.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(matches!(
            AsyncHttp::connect(&addr).await,
            Err(HttpError::Io(_))
        ));
    }
}
