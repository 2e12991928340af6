mod handlers;

use crate::bundle::EngineProvider;
use crate::config::Config;
use crate::context::QueryContext;
use crate::db::{SqliteReaderSource, SqliteStore};
use crate::error::Error;
use crate::git_commits::GitCommitUpdater;
use crate::observe::{MetricsRegistry, Observed, Observer};
use crate::resolver::{CodeIntelApi, CrossIndexResolver};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

/// Where the server reads its data from.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub store_path: PathBuf,
    pub bundle_dir: PathBuf,
    /// Local clones used to sync commit graphs, by repository ID.
    pub repositories: HashMap<i64, PathBuf>,
}

pub fn serve(options: &ServeOptions, config: &Config) -> Result<()> {
    let app = App::open(options, config)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(value) => value,
            Err(err) => {
                warn!("stdin error: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = app.handle_line(&line);
        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    Ok(())
}

pub fn call(
    options: &ServeOptions,
    config: &Config,
    method: String,
    params_raw: &str,
    id_raw: &str,
) -> Result<String> {
    let params: Value = serde_json::from_str(params_raw).with_context(|| "parse params JSON")?;
    let id = parse_value(id_raw);
    let app = App::open(options, config)?;
    let request = RpcRequest { id, method, params };
    let response = app.handle_request(request);
    Ok(serde_json::to_string(&response)?)
}

pub struct App {
    api: Arc<dyn CodeIntelApi>,
    metrics: Arc<MetricsRegistry>,
    reference_page_limit: usize,
    slow_threshold: Duration,
}

impl App {
    /// Wires the SQLite store, bundle directory and git updater together.
    pub fn open(options: &ServeOptions, config: &Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&options.store_path, config)?);
        for (repository_id, path) in &options.repositories {
            store.add_repository(*repository_id, Some(&path.to_string_lossy()))?;
        }

        let metrics = Arc::new(MetricsRegistry::new());
        let threshold = config.slow_query_threshold();
        let source =
            Arc::new(SqliteReaderSource::new(&options.bundle_dir).with_pool_size(config.pool_size));
        let bundles = Arc::new(
            EngineProvider::new(source, config.cache_sizes())
                .with_observer(Arc::clone(&metrics), threshold),
        );
        let updater = Arc::new(GitCommitUpdater::new(
            Arc::clone(&store),
            options.repositories.clone(),
            config.git_log_max_commits,
        ));
        let resolver: Arc<dyn CodeIntelApi> = Arc::new(CrossIndexResolver::new(
            store,
            bundles,
            updater,
            config.remote_dump_limit,
        ));
        let api = Arc::new(Observed::new(
            resolver,
            Observer::new("api", Arc::clone(&metrics), threshold),
        ));
        info!(
            store = %options.store_path.display(),
            bundles = %options.bundle_dir.display(),
            "codenav ready"
        );
        Ok(Self::new(api, metrics, config))
    }

    pub fn new(api: Arc<dyn CodeIntelApi>, metrics: Arc<MetricsRegistry>, config: &Config) -> Self {
        Self {
            api,
            metrics,
            reference_page_limit: config.reference_page_limit.max(1),
            slow_threshold: config.slow_query_threshold(),
        }
    }

    pub fn handle_line(&self, line: &str) -> RpcResponse {
        match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => self.handle_request(request),
            Err(err) => error_response(Value::Null, &format!("invalid request: {err}"), None),
        }
    }

    pub fn handle_request(&self, req: RpcRequest) -> RpcResponse {
        let id = req.id.clone();
        match self.handle_method(&req.method, req.params) {
            Ok(value) => RpcResponse {
                id,
                result: Some(value),
                error: None,
            },
            Err(err) => {
                let code = err.downcast_ref::<Error>().map(Error::code);
                error_response(id, &format!("{err:#}"), code)
            }
        }
    }

    pub fn handle_method(&self, method: &str, params: Value) -> Result<Value> {
        let start = Instant::now();
        let ctx = request_context(&params);
        let value = match method {
            "help" => handlers::method_help(),
            "metrics" => serde_json::to_value(self.metrics.snapshot())?,
            "find_closest_dumps" => handlers::handle_find_closest_dumps(self, &ctx, params)?,
            "ranges" => handlers::handle_ranges(self, &ctx, params)?,
            "definitions" => handlers::handle_definitions(self, &ctx, params)?,
            "references" => handlers::handle_references(self, &ctx, params)?,
            "hover" => handlers::handle_hover(self, &ctx, params)?,
            "diagnostics" => handlers::handle_diagnostics(self, &ctx, params)?,
            "dependencies" => handlers::handle_dependencies(self, &ctx, params)?,
            other => {
                return Err(anyhow::anyhow!("unknown method: {other}"));
            }
        };

        // Log slow queries
        let elapsed = start.elapsed();
        if elapsed >= self.slow_threshold {
            info!("Slow query: {} took {:?}", method, elapsed);
        }
        Ok(value)
    }
}

/// A fresh cancellation token per request, bounded by `timeout_ms` if given.
fn request_context(params: &Value) -> QueryContext {
    match params.get("timeout_ms").and_then(Value::as_u64) {
        Some(ms) => QueryContext::with_deadline(Instant::now() + Duration::from_millis(ms)),
        None => QueryContext::new(),
    }
}

fn error_response(id: Value, message: &str, code: Option<&'static str>) -> RpcResponse {
    RpcResponse {
        id,
        result: None,
        error: Some(RpcError {
            message: message.to_string(),
            code,
        }),
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
