use anyhow::Result;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Method;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::context::{Context, DroneResult, DroneStep};
use crate::drone::Drone;

/// Decides the request that follows a finished one, from
/// `(request, ok, status, headers, body)`. `None` ends the chain.
pub type NextHttp =
    Arc<dyn Fn(&HttpReq, bool, u16, &HeaderMap, &[u8]) -> Option<HttpReq> + Send + Sync>;

#[derive(Clone)]
pub struct HttpReq {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub data: Bytes,
    pub next: Option<NextHttp>,
}

impl HttpReq {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: HeaderMap::new(),
            data: Bytes::new(),
            next: None,
        }
    }

    pub fn post(url: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            method: Method::POST,
            ..Self::get(url)
        }
    }

    pub fn with_next(mut self, next: NextHttp) -> Self {
        self.next = Some(next);
        self
    }
}

/// One request per attempt over a pooled reqwest client.
///
/// Without a continuation the same request repeats forever.
pub struct HttpDrone {
    client: reqwest::Client,
    req: HttpReq,
    ran: bool,
    pending: Option<HttpReq>,
}

impl HttpDrone {
    pub fn new(req: HttpReq, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;

        Ok(Self::with_client(client, req))
    }

    pub fn with_client(client: reqwest::Client, req: HttpReq) -> Self {
        Self {
            client,
            req,
            ran: false,
            pending: None,
        }
    }

    fn follow(&mut self, ok: bool, status: u16, headers: &HeaderMap, body: &[u8]) {
        self.ran = true;
        if let Some(next) = &self.req.next {
            self.pending = next(&self.req, ok, status, headers, body);
        }
    }
}

impl Drone for HttpDrone {
    fn run<'a>(
        &'a mut self,
        context: &'a mut Context,
    ) -> Pin<Box<dyn Future<Output = DroneResult> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(self.req.method.clone(), &self.req.url)
                .headers(self.req.headers.clone());
            if !self.req.data.is_empty() {
                builder = builder.body(self.req.data.clone());
            }

            let sent = builder.send().await;
            context.step(DroneStep::Connected);

            let response = match sent {
                Ok(r) => r,
                Err(e) => {
                    debug!("{} {} failed: {}", self.req.method, self.req.url, e);
                    context.bool("conn", false);
                    self.follow(false, 0, &HeaderMap::new(), &[]);
                    return DroneResult::ConnectFail;
                }
            };

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await;
            context.step(DroneStep::Responsed);
            context.bool("conn", true);

            match body {
                Ok(body) => {
                    context.stat().nominal("status", &status.to_string());
                    self.follow(true, status, &headers, &body);
                    DroneResult::Ok
                }
                Err(e) => {
                    debug!("Body of {} broken: {}", self.req.url, e);
                    self.follow(false, status, &headers, &[]);
                    DroneResult::ResponseBroken
                }
            }
        })
    }

    fn next(&mut self) -> Option<Box<dyn Drone>> {
        let req = if !self.ran || self.req.next.is_none() {
            self.req.clone()
        } else {
            self.pending.take()?
        };

        Some(Box::new(HttpDrone::with_client(self.client.clone(), req)))
    }
}
