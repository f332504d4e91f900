use anyhow::{Context as _, Result};
use antpost_core::{
    run, AsyncHttpDrone, AsyncHttpRequest, AsyncHttpResponse, AsyncHttpSession, AsyncOperator,
    Config, Context, Drone, HttpDrone, Report,
};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "runner")]
#[command(about = "antpost load runner - hammers an HTTP target at rising concurrency")]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config/example.local.toml")]
    config: PathBuf,

    /// Drone mode: sync (one request per attempt) or async (pipelined sessions)
    #[arg(long, default_value = "sync")]
    mode: String,

    /// Requests pipelined per session in async mode
    #[arg(long, default_value = "100")]
    requests_per_session: usize,
}

#[derive(Debug, Serialize)]
struct LevelResult<'a> {
    level: usize,
    timestamp: String,
    report: &'a Report,
}

/// Pipelines the configured request `per_session` times per connection, then
/// moves on to a fresh connection.
struct RepeatOperator {
    host: String,
    req: AsyncHttpRequest,
    per_session: usize,
}

impl RepeatOperator {
    fn session(host: String, req: AsyncHttpRequest, per_session: usize) -> AsyncHttpSession {
        AsyncHttpSession {
            host: host.clone(),
            operator: Box::new(RepeatOperator {
                host,
                req,
                per_session,
            }),
        }
    }
}

impl AsyncOperator for RepeatOperator {
    fn requests(&mut self) -> mpsc::Receiver<AsyncHttpRequest> {
        let (tx, rx) = mpsc::channel(self.per_session.max(1));
        for _ in 0..self.per_session {
            if tx.try_send(self.req.clone()).is_err() {
                break;
            }
        }
        rx
    }

    fn response(&mut self, context: &mut Context, response: AsyncHttpResponse) {
        context.bool("ok", response.err.is_none());
        context
            .stat()
            .nominal("status", &response.status_code.to_string());
        context.stat().ratio("body_bytes", response.content.len() as f64);
    }

    fn next_session(&mut self) -> Option<AsyncHttpSession> {
        Some(RepeatOperator::session(
            self.host.clone(),
            self.req.clone(),
            self.per_session,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    info!(
        "Target {} {} in {} mode",
        config.target.method, config.target.url, args.mode
    );

    let count = config.run.count;
    let duration = Duration::from_millis(config.run.duration_ms);
    for (idx, &level) in config.run.concurrency.iter().enumerate() {
        if idx > 0 && config.run.pause_ms > 0 {
            sleep(Duration::from_millis(config.run.pause_ms)).await;
        }

        let mut drone = build_drone(&args, &config)?;
        info!("Concurrency level {}", level);

        let Some(context) = run(drone.as_mut(), level, count, duration).await else {
            warn!("Skipping concurrency level 0");
            continue;
        };

        let Some(report) = context.report() else {
            warn!("Level {} finished without attempts", level);
            continue;
        };

        println!("\n=== Concurrency {} ===", level);
        println!("{}", report);

        if let Some(dir) = &config.output.results_dir {
            let path = write_result(Path::new(dir), level, &report)?;
            info!("Results written to {}", path.display());
        }
    }

    Ok(())
}

fn build_drone(args: &Args, config: &Config) -> Result<Box<dyn Drone>> {
    match args.mode.as_str() {
        "sync" => {
            let req = config.target.to_http_req()?;
            let drone = HttpDrone::new(req, config.target.timeout_ms)
                .context("Failed to create HTTP client")?;
            Ok(Box::new(drone))
        }
        "async" => {
            let host = config.target.host()?;
            let req = config.target.to_async_request()?;
            let session = RepeatOperator::session(host, req, args.requests_per_session);
            Ok(Box::new(AsyncHttpDrone::new(session)))
        }
        _ => anyhow::bail!("Invalid mode: {}, must be 'sync' or 'async'", args.mode),
    }
}

fn write_result(dir: &Path, level: usize, report: &Report) -> Result<PathBuf> {
    let now = chrono::Utc::now();
    let path = dir.join(format!("level_{}_{}.json", level, now.format("%Y%m%d_%H%M%S")));

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create results dir {}", dir.display()))?;
    let result = LevelResult {
        level,
        timestamp: now.to_rfc3339(),
        report,
    };
    std::fs::write(&path, serde_json::to_string_pretty(&result)?)?;
    Ok(path)
}
