//! Handler functions for RPC methods.
//! Each function corresponds to a match arm in `App::handle_method`.

use super::App;
use crate::context::QueryContext;
use anyhow::Result;
use serde::Deserialize;
use serde_json::{Value, json};

const MAX_DIAGNOSTICS_PAGE: usize = 1000;

#[derive(Deserialize)]
struct FindClosestDumpsParams {
    repository_id: i64,
    commit: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    exact_path: bool,
    indexer: Option<String>,
}

#[derive(Deserialize)]
struct RangesParams {
    dump_id: i64,
    path: String,
    start_line: u32,
    end_line: u32,
}

#[derive(Deserialize)]
struct PositionParams {
    dump_id: i64,
    path: String,
    line: u32,
    character: u32,
}

#[derive(Deserialize)]
struct ReferencesParams {
    repository_id: i64,
    commit: String,
    dump_id: i64,
    #[serde(default)]
    path: String,
    #[serde(default)]
    line: u32,
    #[serde(default)]
    character: u32,
    limit: Option<usize>,
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct DiagnosticsParams {
    dump_id: i64,
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    skip: usize,
    take: Option<usize>,
}

pub(super) fn handle_find_closest_dumps(app: &App, ctx: &QueryContext, params: Value) -> Result<Value> {
    let params: FindClosestDumpsParams = serde_json::from_value(params)?;
    let dumps = app.api.find_closest_dumps(
        ctx,
        params.repository_id,
        &params.commit,
        &params.path,
        params.exact_path,
        params.indexer.as_deref(),
    )?;
    Ok(json!(dumps))
}

pub(super) fn handle_ranges(app: &App, ctx: &QueryContext, params: Value) -> Result<Value> {
    let params: RangesParams = serde_json::from_value(params)?;
    if params.end_line < params.start_line {
        anyhow::bail!("ranges requires start_line <= end_line");
    }
    let ranges = app.api.ranges(
        ctx,
        &params.path,
        params.start_line,
        params.end_line,
        params.dump_id,
    )?;
    Ok(json!(ranges))
}

pub(super) fn handle_definitions(app: &App, ctx: &QueryContext, params: Value) -> Result<Value> {
    let params: PositionParams = serde_json::from_value(params)?;
    let locations = app.api.definitions(
        ctx,
        &params.path,
        params.line,
        params.character,
        params.dump_id,
    )?;
    Ok(json!(locations))
}

pub(super) fn handle_references(app: &App, ctx: &QueryContext, params: Value) -> Result<Value> {
    let params: ReferencesParams = serde_json::from_value(params)?;
    let cursor = app.api.decode_or_create_cursor(
        ctx,
        &params.path,
        params.line,
        params.character,
        params.dump_id,
        params.cursor.as_deref(),
    )?;
    let limit = params
        .limit
        .unwrap_or(app.reference_page_limit)
        .clamp(1, app.reference_page_limit);
    let page = app
        .api
        .references(ctx, params.repository_id, &params.commit, limit, cursor)?;
    Ok(json!({
        "locations": page.locations,
        "cursor": page.next_cursor(),
    }))
}

pub(super) fn handle_hover(app: &App, ctx: &QueryContext, params: Value) -> Result<Value> {
    let params: PositionParams = serde_json::from_value(params)?;
    let hover = app.api.hover(
        ctx,
        &params.path,
        params.line,
        params.character,
        params.dump_id,
    )?;
    Ok(json!(hover))
}

pub(super) fn handle_diagnostics(app: &App, ctx: &QueryContext, params: Value) -> Result<Value> {
    let params: DiagnosticsParams = serde_json::from_value(params)?;
    let take = params.take.unwrap_or(100).min(MAX_DIAGNOSTICS_PAGE);
    let (diagnostics, total) =
        app.api
            .diagnostics(ctx, &params.prefix, params.dump_id, params.skip, take)?;
    Ok(json!({
        "diagnostics": diagnostics,
        "total": total,
    }))
}

pub(super) fn handle_dependencies(app: &App, ctx: &QueryContext, params: Value) -> Result<Value> {
    let params: PositionParams = serde_json::from_value(params)?;
    let groups = app.api.dependencies(
        ctx,
        &params.path,
        params.line,
        params.character,
        params.dump_id,
    )?;
    Ok(json!(groups))
}

pub(super) fn method_help() -> Value {
    json!({
        "summary": "codenav answers code intelligence queries against precomputed dumps over JSONL RPC on stdin/stdout.",
        "global_params": {
            "timeout_ms": "Optional: cancel the request once this many milliseconds have passed",
        },
        "methods": {
            "find_closest_dumps": "{repository_id, commit, path, exact_path?, indexer?} -> dumps that can answer queries for path at commit",
            "ranges": "{dump_id, path, start_line, end_line} -> ranges with definitions, file-local references and hover text",
            "definitions": "{dump_id, path, line, character} -> definition locations, following monikers into other dumps",
            "references": "{repository_id, commit, dump_id, path, line, character, limit?, cursor?} -> {locations, cursor}; pass cursor back for the next page",
            "hover": "{dump_id, path, line, character} -> {dump, text, range} or null",
            "diagnostics": "{dump_id, prefix?, skip?, take?} -> {diagnostics, total}",
            "dependencies": "{dump_id, path, line, character} -> moniker groups with package information",
            "metrics": "{} -> per-operation call, error and latency counters",
            "help": "{} -> this message",
        },
    })
}
