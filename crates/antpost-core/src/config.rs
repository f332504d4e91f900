use anyhow::Context as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use url::Url;

use crate::drones::{AsyncHttpRequest, HttpReq};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub target: TargetConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Absolute http:// URL every attempt hits
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Request body, sent as-is
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub keep_alive: bool,
    /// Client timeout of the request-per-attempt drone
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl TargetConfig {
    /// `host:port` to open pipelined connections to.
    pub fn host(&self) -> anyhow::Result<String> {
        let url = Url::parse(&self.url).with_context(|| format!("invalid url {}", self.url))?;
        let host = url
            .host_str()
            .with_context(|| format!("url {} has no host", self.url))?;
        let port = url.port_or_known_default().unwrap_or(80);
        Ok(format!("{}:{}", host, port))
    }

    pub fn to_http_req(&self) -> anyhow::Result<HttpReq> {
        Ok(HttpReq {
            url: self.url.clone(),
            method: self.method()?,
            headers: self.header_map()?,
            data: self.body.clone().unwrap_or_default().into(),
            next: None,
        })
    }

    pub fn to_async_request(&self) -> anyhow::Result<AsyncHttpRequest> {
        Ok(AsyncHttpRequest {
            url: self.url.clone(),
            method: self.method()?,
            headers: self.header_map()?,
            data: self.body.clone().unwrap_or_default().into(),
            keep_alive: self.keep_alive,
        })
    }

    fn method(&self) -> anyhow::Result<Method> {
        Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("invalid method {}", self.method))
    }

    fn header_map(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name {}", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header {}", name))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Concurrency levels, run one after another
    #[serde(default = "default_concurrency")]
    pub concurrency: Vec<usize>,
    /// Attempts per worker, 0 for unlimited
    #[serde(default)]
    pub count: u64,
    /// Time budget per level in milliseconds, 0 for unlimited
    #[serde(default)]
    pub duration_ms: u64,
    /// Pause between levels in milliseconds
    #[serde(default)]
    pub pause_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            count: 0,
            duration_ms: 0,
            pause_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for per-level JSON results
    pub results_dir: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_concurrency() -> Vec<usize> {
    vec![1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serde() {
        let config_str = r#"
[target]
url = "http://localhost:8080/api?q=1"
method = "post"
body = "{}"
keep_alive = false
timeout_ms = 1500

[target.headers]
content-type = "application/json"

[run]
concurrency = [1, 10, 100]
count = 1000
pause_ms = 2000

[output]
results_dir = "results"
        "#;

        let config: Config = toml::from_str(config_str).unwrap();
        assert_eq!(config.run.concurrency, vec![1, 10, 100]);
        assert_eq!(config.run.count, 1000);
        assert_eq!(config.run.duration_ms, 0);
        assert_eq!(config.output.results_dir.as_deref(), Some("results"));
        assert_eq!(config.target.host().unwrap(), "localhost:8080");

        let req = config.target.to_http_req().unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(&req.data[..], b"{}");
        assert_eq!(req.headers["content-type"], "application/json");

        let areq = config.target.to_async_request().unwrap();
        assert!(!areq.keep_alive);
        assert_eq!(areq.url, "http://localhost:8080/api?q=1");
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = toml::from_str("[target]\nurl = \"http://example.com\"\n").unwrap();
        assert_eq!(config.target.method, "GET");
        assert!(config.target.keep_alive);
        assert_eq!(config.target.timeout_ms, 5_000);
        assert_eq!(config.run.concurrency, vec![1]);
        assert!(config.output.results_dir.is_none());
        assert_eq!(config.target.host().unwrap(), "example.com:80");
    }

    #[test]
    fn test_bad_header_rejected() {
        let mut config: Config = toml::from_str("[target]\nurl = \"http://example.com\"\n").unwrap();
        config
            .target
            .headers
            .insert("bad header".to_string(), "x".to_string());
        assert!(config.target.to_http_req().is_err());
    }
}
