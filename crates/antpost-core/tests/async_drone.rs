use antpost_core::{
    run, AsyncHttpDrone, AsyncHttpRequest, AsyncHttpResponse, AsyncHttpSession, AsyncOperator,
    Context,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const REPLY: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

/// Answers every bodyless request with `ok` until the client hangs up.
async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut pending = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let n = match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    pending.extend_from_slice(&chunk[..n]);

                    while let Some(end) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
                        pending.drain(..end + 4);
                        if stream.write_all(REPLY).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Queues `batch` GETs and closes its request channel straight away.
struct BatchOperator {
    host: String,
    batch: usize,
}

fn session(host: &str, batch: usize) -> AsyncHttpSession {
    AsyncHttpSession {
        host: host.to_string(),
        operator: Box::new(BatchOperator {
            host: host.to_string(),
            batch,
        }),
    }
}

impl AsyncOperator for BatchOperator {
    fn requests(&mut self) -> mpsc::Receiver<AsyncHttpRequest> {
        let (tx, rx) = mpsc::channel(self.batch);
        for i in 0..self.batch {
            let url = format!("http://{}/item/{}", self.host, i);
            tx.try_send(AsyncHttpRequest::get(url, true)).unwrap();
        }
        rx
    }

    fn response(&mut self, context: &mut Context, response: AsyncHttpResponse) {
        assert_eq!(&response.content[..], b"ok");
        context
            .stat()
            .nominal("status", &response.status_code.to_string());
    }

    fn next_session(&mut self) -> Option<AsyncHttpSession> {
        Some(session(&self.host, self.batch))
    }
}

#[tokio::test]
async fn test_pipelined_sessions_through_scheduler() {
    let addr = spawn_server().await;
    let mut template = AsyncHttpDrone::new(session(&addr, 3));

    let context = run(&mut template, 2, 2, Duration::ZERO).await.unwrap();
    assert_eq!(context.history().len(), 4);

    let report = context.report().unwrap();
    assert_eq!(report.results.ok, 4);
    assert_eq!(report.results.connect_fail, 0);

    let status = &report.stat.nominals["status"];
    assert_eq!(status.items.len(), 1);
    assert_eq!(status.items[0].name, "200");
    assert_eq!(status.items[0].n, 12);
}

#[tokio::test]
async fn test_closed_request_channel_still_sends_every_request() {
    let addr = spawn_server().await;
    let mut template = AsyncHttpDrone::new(session(&addr, 3));

    let context = run(&mut template, 1, 10, Duration::ZERO).await.unwrap();
    let report = context.report().unwrap();
    assert_eq!(report.results.ok, 10);
    assert_eq!(report.stat.nominals["status"].items[0].n, 30);
}

#[tokio::test]
async fn test_unreachable_host_counts_connect_failures() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let mut template = AsyncHttpDrone::new(session(&addr, 1));
    let context = run(&mut template, 1, 3, Duration::ZERO).await.unwrap();

    let report = context.report().unwrap();
    assert_eq!(report.results.connect_fail, 3);
    assert_eq!(report.results.ok, 0);
}
