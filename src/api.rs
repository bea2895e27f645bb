//! HTTP API handlers: thin request-to-query mapping over the engine.
//!
//! Every endpoint parses parameters, calls one query-engine or indexer
//! primitive, and serializes JSON. Missing required parameters and
//! malformed regexes map to 400; store failures map to 500; reads stay
//! available while a build is running.

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::query::{GrepOptions, QueryEngine, QueryError, DEFAULT_MAX_RESULTS};
use crate::scan::Indexer;
use crate::store::{QueryFilters, Store, Table};
use crate::types::{IndexState, Language, MemberKind, TypeKind};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<Store>,
    pub config: Arc<AppConfig>,
    pub engine: Arc<QueryEngine>,
    pub indexer: Arc<Indexer>,
    pub start_time: Instant,
}

/// The full route table. Transport layers (trace, CORS) are added by the
/// binary.
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(api_health))
        .route("/status", get(api_status))
        .route("/stats", get(api_stats))
        .route("/summary", get(api_summary))
        .route("/find-type", get(api_find_type))
        .route("/find-children", get(api_find_children))
        .route("/browse-module", get(api_browse_module))
        .route("/find-file", get(api_find_file))
        .route("/find-member", get(api_find_member))
        .route("/list-modules", get(api_list_modules))
        .route("/grep", get(api_grep))
        .route("/refresh", post(api_refresh))
        .route("/internal/ingest", post(api_internal_ingest))
        .with_state(ctx)
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message.into() })))
}

fn internal_error(err: impl std::fmt::Display) -> ApiError {
    warn!(error = %err, "Request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": err.to_string() })))
}

fn map_query_error(err: QueryError) -> ApiError {
    match err {
        QueryError::InvalidRegex(msg) => bad_request(format!("invalid regex: {msg}")),
        QueryError::Store(err) => internal_error(err),
    }
}

// ---------------------------------------------------------------------------
// Lenient parameter parsing (query strings arrive as text)
// ---------------------------------------------------------------------------

fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value {
        Some(v) => matches!(v, "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn parse_language(value: Option<&str>) -> Result<Option<Language>, ApiError> {
    match value {
        None | Some("") => Ok(None),
        Some(v) => Language::parse(v)
            .map(Some)
            .ok_or_else(|| bad_request(format!("unknown language '{v}'"))),
    }
}

fn parse_kind(value: Option<&str>) -> Result<Option<TypeKind>, ApiError> {
    match value {
        None | Some("") => Ok(None),
        Some(v) => TypeKind::parse(v)
            .map(Some)
            .ok_or_else(|| bad_request(format!("unknown kind '{v}'"))),
    }
}

fn parse_member_kind(value: Option<&str>) -> Result<Option<MemberKind>, ApiError> {
    match value {
        None | Some("") => Ok(None),
        Some(v) => MemberKind::parse(v)
            .map(Some)
            .ok_or_else(|| bad_request(format!("unknown memberKind '{v}'"))),
    }
}

fn filters(project: Option<String>, language: Option<&str>) -> Result<QueryFilters, ApiError> {
    Ok(QueryFilters {
        project: project.filter(|p| !p.is_empty()),
        language: parse_language(language)?,
    })
}

fn max_results(value: Option<usize>) -> usize {
    value.unwrap_or(DEFAULT_MAX_RESULTS).clamp(1, 1000)
}

// ---------------------------------------------------------------------------
// Health, status, stats, summary
// ---------------------------------------------------------------------------

pub async fn api_health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSeconds": ctx.start_time.elapsed().as_secs(),
        "memoryMB": resident_memory_mb(),
        "projects": ctx.config.projects.len(),
    }))
}

/// Resident set size in MiB; 0 where the platform gives no cheap answer.
fn resident_memory_mb() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    let kb: u64 = rest
                        .trim()
                        .trim_end_matches("kB")
                        .trim()
                        .parse()
                        .unwrap_or(0);
                    return kb / 1024;
                }
            }
        }
    }
    0
}

pub async fn api_status(State(ctx): State<AppContext>) -> Result<impl IntoResponse, ApiError> {
    let rows = ctx.store.get_all_index_status().map_err(internal_error)?;
    let mut by_language = serde_json::Map::new();
    for language in ctx.config.languages() {
        let row = rows.iter().find(|r| r.language == language.as_str());
        let entry = match row {
            Some(row) => {
                let percent = if row.progress_total > 0 {
                    (row.progress_current as f64 / row.progress_total as f64 * 100.0).round()
                } else if row.state == IndexState::Ready {
                    100.0
                } else {
                    0.0
                };
                serde_json::json!({
                    "state": row.state,
                    "progress": { "current": row.progress_current, "total": row.progress_total },
                    "progressPercent": percent,
                    "error": row.error_message.clone(),
                    "lastUpdated": row.last_updated,
                })
            }
            None => serde_json::json!({
                "state": IndexState::Empty,
                "progress": { "current": 0, "total": 0 },
                "progressPercent": 0.0,
                "error": null,
                "lastUpdated": null,
            }),
        };
        by_language.insert(language.as_str().to_string(), entry);
    }
    Ok(Json(serde_json::Value::Object(by_language)))
}

fn gather_stats(ctx: &AppContext) -> Result<serde_json::Value, ApiError> {
    let files = ctx.store.count_rows(Table::Files).map_err(internal_error)?;
    let types = ctx.store.count_rows(Table::Types).map_err(internal_error)?;
    let members = ctx.store.count_rows(Table::Members).map_err(internal_error)?;
    let assets = ctx.store.count_rows(Table::Assets).map_err(internal_error)?;
    let content_rows = ctx.store.count_rows(Table::FileContent).map_err(internal_error)?;
    let trigram_rows = ctx.store.count_rows(Table::Trigrams).map_err(internal_error)?;
    let distinct_trigrams = ctx.store.count_distinct_trigrams().map_err(internal_error)?;

    let mut per_language = serde_json::Map::new();
    for language in ctx.config.languages() {
        if language == Language::Content {
            per_language.insert("content".to_string(), serde_json::json!(assets));
        } else {
            let count = ctx.store.count_files(Some(language)).map_err(internal_error)?;
            per_language.insert(language.as_str().to_string(), serde_json::json!(count));
        }
    }

    Ok(serde_json::json!({
        "files": files,
        "types": types,
        "members": members,
        "assets": assets,
        "contentRows": content_rows,
        "trigramRows": trigram_rows,
        "distinctTrigrams": distinct_trigrams,
        "filesByLanguage": per_language,
    }))
}

pub async fn api_stats(State(ctx): State<AppContext>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(gather_stats(&ctx)?))
}

pub async fn api_summary(State(ctx): State<AppContext>) -> Result<impl IntoResponse, ApiError> {
    let stats = gather_stats(&ctx)?;
    let status = ctx.store.get_all_index_status().map_err(internal_error)?;
    let projects: Vec<serde_json::Value> = ctx
        .config
        .projects
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name,
                "language": p.language,
                "paths": p.paths.iter().map(|path| path.display().to_string()).collect::<Vec<_>>(),
            })
        })
        .collect();
    let languages: Vec<&str> =
        ctx.config.languages().iter().map(|l| l.as_str()).collect();

    let mut build_time_ms: u64 = 0;
    for language in ctx.config.languages() {
        if let Some(meta) =
            ctx.store.get_meta(&format!("lastBuild.{language}")).map_err(internal_error)?
        {
            build_time_ms += meta["buildTimeMs"].as_u64().unwrap_or(0);
        }
    }

    Ok(Json(serde_json::json!({
        "generatedAt": crate::types::now_ms(),
        "stats": stats,
        "projects": projects,
        "languages": languages,
        "buildTimeMs": build_time_ms,
        "indexStatus": status,
    })))
}

// ---------------------------------------------------------------------------
// Symbol lookup
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct FindTypeQuery {
    name: Option<String>,
    fuzzy: Option<String>,
    project: Option<String>,
    language: Option<String>,
    kind: Option<String>,
    #[serde(rename = "maxResults")]
    max_results: Option<usize>,
}

pub async fn api_find_type(
    State(ctx): State<AppContext>,
    Query(q): Query<FindTypeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let name = q.name.filter(|n| !n.is_empty()).ok_or_else(|| bad_request("missing required parameter 'name'"))?;
    let fuzzy = parse_bool(q.fuzzy.as_deref(), false);
    let kind = parse_kind(q.kind.as_deref())?;
    let filters = filters(q.project, q.language.as_deref())?;
    let limit = max_results(q.max_results);

    let engine = Arc::clone(&ctx.engine);
    let response = tokio::task::spawn_blocking(move || {
        engine.find_type(&name, fuzzy, kind, &filters, limit)
    })
    .await
    .map_err(internal_error)?
    .map_err(map_query_error)?;
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct FindChildrenQuery {
    parent: Option<String>,
    recursive: Option<String>,
    project: Option<String>,
    language: Option<String>,
    #[serde(rename = "maxResults")]
    max_results: Option<usize>,
}

pub async fn api_find_children(
    State(ctx): State<AppContext>,
    Query(q): Query<FindChildrenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let parent = q
        .parent
        .filter(|p| !p.is_empty())
        .ok_or_else(|| bad_request("missing required parameter 'parent'"))?;
    let recursive = parse_bool(q.recursive.as_deref(), true);
    let filters = filters(q.project, q.language.as_deref())?;
    let limit = max_results(q.max_results);

    let engine = Arc::clone(&ctx.engine);
    let response = tokio::task::spawn_blocking(move || {
        engine.find_children(&parent, recursive, &filters, limit)
    })
    .await
    .map_err(internal_error)?
    .map_err(map_query_error)?;
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct BrowseModuleQuery {
    module: Option<String>,
    project: Option<String>,
    language: Option<String>,
    #[serde(rename = "maxResults")]
    max_results: Option<usize>,
}

pub async fn api_browse_module(
    State(ctx): State<AppContext>,
    Query(q): Query<BrowseModuleQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let module = q
        .module
        .filter(|m| !m.is_empty())
        .ok_or_else(|| bad_request("missing required parameter 'module'"))?;
    let filters = filters(q.project, q.language.as_deref())?;
    let limit = max_results(q.max_results);

    let engine = Arc::clone(&ctx.engine);
    let response =
        tokio::task::spawn_blocking(move || engine.browse_module(&module, &filters, limit))
            .await
            .map_err(internal_error)?
            .map_err(map_query_error)?;
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct FindFileQuery {
    filename: Option<String>,
    project: Option<String>,
    language: Option<String>,
    #[serde(rename = "maxResults")]
    max_results: Option<usize>,
}

pub async fn api_find_file(
    State(ctx): State<AppContext>,
    Query(q): Query<FindFileQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filename = q
        .filename
        .filter(|f| !f.is_empty())
        .ok_or_else(|| bad_request("missing required parameter 'filename'"))?;
    let filters = filters(q.project, q.language.as_deref())?;
    let limit = max_results(q.max_results);

    let engine = Arc::clone(&ctx.engine);
    let response =
        tokio::task::spawn_blocking(move || engine.find_file(&filename, &filters, limit))
            .await
            .map_err(internal_error)?
            .map_err(map_query_error)?;
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct FindMemberQuery {
    name: Option<String>,
    fuzzy: Option<String>,
    #[serde(rename = "containingType")]
    containing_type: Option<String>,
    #[serde(rename = "memberKind")]
    member_kind: Option<String>,
    project: Option<String>,
    language: Option<String>,
    #[serde(rename = "maxResults")]
    max_results: Option<usize>,
}

pub async fn api_find_member(
    State(ctx): State<AppContext>,
    Query(q): Query<FindMemberQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let name = q
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| bad_request("missing required parameter 'name'"))?;
    let fuzzy = parse_bool(q.fuzzy.as_deref(), false);
    let member_kind = parse_member_kind(q.member_kind.as_deref())?;
    let containing_type = q.containing_type.filter(|t| !t.is_empty());
    let filters = filters(q.project, q.language.as_deref())?;
    let limit = max_results(q.max_results);

    let engine = Arc::clone(&ctx.engine);
    let response = tokio::task::spawn_blocking(move || {
        engine.find_member(&name, fuzzy, containing_type.as_deref(), member_kind, &filters, limit)
    })
    .await
    .map_err(internal_error)?
    .map_err(map_query_error)?;
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct ListModulesQuery {
    parent: Option<String>,
    project: Option<String>,
    language: Option<String>,
    depth: Option<usize>,
}

pub async fn api_list_modules(
    State(ctx): State<AppContext>,
    Query(q): Query<ListModulesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let parent = q.parent.filter(|p| !p.is_empty());
    let depth = q.depth.unwrap_or(1).clamp(1, 16);
    let filters = filters(q.project, q.language.as_deref())?;

    let engine = Arc::clone(&ctx.engine);
    let response = tokio::task::spawn_blocking(move || {
        engine.list_modules(parent.as_deref(), depth, &filters)
    })
    .await
    .map_err(internal_error)?
    .map_err(map_query_error)?;
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Grep
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct GrepQuery {
    pattern: Option<String>,
    #[serde(rename = "maxResults")]
    max_results: Option<usize>,
    #[serde(rename = "caseSensitive")]
    case_sensitive: Option<String>,
    #[serde(rename = "contextLines")]
    context_lines: Option<usize>,
    language: Option<String>,
    project: Option<String>,
    grouped: Option<String>,
}

pub async fn api_grep(
    State(ctx): State<AppContext>,
    Query(q): Query<GrepQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pattern = q
        .pattern
        .filter(|p| !p.is_empty())
        .ok_or_else(|| bad_request("missing required parameter 'pattern'"))?;
    let options = GrepOptions {
        max_results: max_results(q.max_results),
        case_sensitive: parse_bool(q.case_sensitive.as_deref(), false),
        context_lines: q.context_lines.unwrap_or(0).min(10),
        grouped: parse_bool(q.grouped.as_deref(), false),
        filters: filters(q.project, q.language.as_deref())?,
    };

    // heavy decompress/regex work off the async runtime
    let engine = Arc::clone(&ctx.engine);
    let response = tokio::task::spawn_blocking(move || engine.grep(&pattern, &options))
        .await
        .map_err(internal_error)?
        .map_err(map_query_error)?;
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Refresh and remote ingest
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RefreshQuery {
    language: Option<String>,
}

pub async fn api_refresh(
    State(ctx): State<AppContext>,
    Query(q): Query<RefreshQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let languages = match parse_language(q.language.as_deref())? {
        Some(language) => vec![language],
        None => ctx.config.languages(),
    };

    let indexer = Arc::clone(&ctx.indexer);
    let spawn_languages = languages.clone();
    std::thread::Builder::new()
        .name("refresh".to_string())
        .spawn(move || {
            for language in spawn_languages {
                info!(language = language.as_str(), "Refresh requested");
                if let Err(err) = indexer.refresh(language) {
                    warn!(language = language.as_str(), error = %err, "Refresh failed");
                }
            }
        })
        .map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "status": "refreshing",
        "languages": languages.iter().map(|l| l.as_str()).collect::<Vec<_>>(),
    })))
}

#[derive(Deserialize)]
pub struct IngestEntry {
    path: String,
}

#[derive(Deserialize, Default)]
pub struct IngestRequest {
    #[serde(default)]
    files: Vec<IngestEntry>,
    #[serde(default)]
    assets: Vec<IngestEntry>,
    #[serde(default)]
    deletes: Vec<String>,
}

/// Remote-watcher push: stat/parse/ingest the named paths through the same
/// primitives the local watcher uses. Per-entry failures are reported, not
/// fatal.
pub async fn api_internal_ingest(
    State(ctx): State<AppContext>,
    Json(body): Json<IngestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let indexer = Arc::clone(&ctx.indexer);
    let response = tokio::task::spawn_blocking(move || {
        let mut ingested = 0usize;
        let mut deleted = 0usize;
        let mut errors: Vec<serde_json::Value> = Vec::new();

        for entry in body.files.iter().chain(body.assets.iter()) {
            match indexer.ingest_file_event(&PathBuf::from(&entry.path)) {
                Ok(true) => ingested += 1,
                Ok(false) => errors.push(serde_json::json!({
                    "path": entry.path,
                    "error": "skipped (outside projects, excluded, or unchanged)",
                })),
                Err(err) => errors.push(serde_json::json!({
                    "path": entry.path,
                    "error": err.to_string(),
                })),
            }
        }
        for path in &body.deletes {
            match indexer.delete_path(&PathBuf::from(path)) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(err) => errors.push(serde_json::json!({
                    "path": path,
                    "error": err.to_string(),
                })),
            }
        }

        serde_json::json!({ "ingested": ingested, "deleted": deleted, "errors": errors })
    })
    .await
    .map_err(internal_error)?;
    Ok(Json(response))
}
