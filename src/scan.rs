//! The indexer pipeline: directory walk, exclusion filtering,
//! worker-parallel parsing, and batched transactional ingest.
//!
//! A language is built by a **full scan** when its tables are empty and
//! **reconciled** against on-disk mtimes otherwise. Parse work fans out on a
//! bounded rayon pool; the single writer ingests results in transactions of
//! [`INGEST_BATCH_SIZE`] files, updating per-language status between
//! batches so readers can watch progress.

use dashmap::DashMap;
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::asset_parser::read_asset_header;
use crate::config::{AppConfig, ProjectConfig};
use crate::cpp_parser::CppParser;
use crate::script_parser::ScriptParser;
use crate::store::{Store, StoreResult};
use crate::types::{
    mtime_ms, normalize_path, AssetRecord, IndexState, Language, ParsedFile, INGEST_BATCH_SIZE,
};

/// Worker pool bound: parse work is CPU-bound, cap the fan-out.
pub fn worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).min(8)
}

// ---------------------------------------------------------------------------
// Walk results
// ---------------------------------------------------------------------------

/// A file discovered on disk, before parsing.
#[derive(Clone, Debug)]
pub struct ScannedSource {
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub mtime_ms: i64,
    pub project: String,
    pub module: String,
    pub language: Language,
}

/// Dotted module path: project name plus the directory segments of the
/// relative path, filename dropped.
pub fn derive_module(project_name: &str, rel_path: &str) -> String {
    let without_ext = rel_path.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(rel_path);
    let mut segments: Vec<&str> = without_ext.split('/').collect();
    segments.pop(); // the filename
    let mut parts = Vec::with_capacity(segments.len() + 1);
    parts.push(project_name);
    parts.extend(segments.into_iter().filter(|s| !s.is_empty()));
    parts.join(".")
}

/// Walk one project root, honoring exclusion globs and the extension set.
fn walk_project_root(
    project: &ProjectConfig,
    root: &Path,
    config: &AppConfig,
) -> Vec<ScannedSource> {
    if !root.exists() {
        warn!(project = project.name.as_str(), path = %root.display(), "Configured path not found");
        return Vec::new();
    }

    let extensions = project.extension_set();
    let results: Mutex<Vec<ScannedSource>> = Mutex::new(Vec::new());

    WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .threads(worker_count())
        .build_parallel()
        .run(|| {
            Box::new(|entry| {
                let entry = match entry {
                    Ok(e) => e,
                    Err(_) => return ignore::WalkState::Continue,
                };
                let path = entry.path();
                let normalized = normalize_path(path);
                if config.exclude.is_excluded(&normalized) {
                    if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                        return ignore::WalkState::Skip;
                    }
                    return ignore::WalkState::Continue;
                }
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    return ignore::WalkState::Continue;
                }

                let ext = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_ascii_lowercase())
                    .unwrap_or_default();
                if !extensions.contains(&ext) {
                    return ignore::WalkState::Continue;
                }

                let Ok(meta) = entry.metadata() else {
                    return ignore::WalkState::Continue;
                };
                let rel_path = path
                    .strip_prefix(root)
                    .map(normalize_path)
                    .unwrap_or_else(|_| normalized.clone());

                results.lock().unwrap().push(ScannedSource {
                    abs_path: path.to_path_buf(),
                    module: derive_module(&project.name, &rel_path),
                    rel_path,
                    mtime_ms: mtime_ms(&meta),
                    project: project.name.clone(),
                    language: project.language,
                });
                ignore::WalkState::Continue
            })
        });

    results.into_inner().unwrap()
}

/// All on-disk files for a language across its projects.
pub fn walk_language(config: &AppConfig, language: Language) -> Vec<ScannedSource> {
    let mut files = Vec::new();
    for project in config.projects_for(language) {
        for root in &project.paths {
            files.extend(walk_project_root(project, root, config));
        }
    }
    files.sort_by(|a, b| a.abs_path.cmp(&b.abs_path));
    files.dedup_by(|a, b| a.abs_path == b.abs_path);
    files
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parsers are compiled once and shared across the worker pool.
pub struct Parsers {
    pub script: ScriptParser,
    pub cpp: CppParser,
}

impl Default for Parsers {
    fn default() -> Self {
        Parsers { script: ScriptParser::new(), cpp: CppParser::new() }
    }
}

impl Parsers {
    /// Parse one text file into its ingest shape. Read failures are soft:
    /// the file is skipped and the pipeline moves on.
    pub fn parse_source(&self, source: &ScannedSource) -> Option<ParsedFile> {
        let abs_path = normalize_path(&source.abs_path);
        match source.language {
            Language::Config => Some(ParsedFile {
                abs_path,
                project: source.project.clone(),
                module: source.module.clone(),
                language: source.language,
                mtime_ms: source.mtime_ms,
                types: Vec::new(),
                members: Vec::new(),
                content: None,
            }),
            Language::Script | Language::Cpp => {
                let content = match std::fs::read_to_string(&source.abs_path) {
                    Ok(c) => c,
                    Err(err) => {
                        debug!(path = abs_path.as_str(), error = %err, "Skipping unreadable file");
                        return None;
                    }
                };
                let (types, members) = if source.language == Language::Script {
                    self.script.parse(&content)
                } else {
                    self.cpp.parse(&content)
                };
                Some(ParsedFile {
                    abs_path,
                    project: source.project.clone(),
                    module: source.module.clone(),
                    language: source.language,
                    mtime_ms: source.mtime_ms,
                    types,
                    members,
                    content: Some(content),
                })
            }
            Language::Content => None,
        }
    }
}

/// Decode one asset package into its row.
pub fn parse_asset(
    project: &ProjectConfig,
    source: &ScannedSource,
) -> AssetRecord {
    let header = read_asset_header(&source.abs_path);
    let abs_path = normalize_path(&source.abs_path);
    let (content_path, folder) = asset_content_path(project, &source.abs_path);
    let name = source
        .abs_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let extension = source
        .abs_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    AssetRecord {
        abs_path,
        name,
        content_path,
        folder,
        project: source.project.clone(),
        extension,
        mtime_ms: source.mtime_ms,
        asset_class: header.asset_class,
        parent_class: header.parent_class,
    }
}

/// Virtual `/Game/...` path (extension stripped) and its folder.
fn asset_content_path(project: &ProjectConfig, abs_path: &Path) -> (String, String) {
    let rel = project
        .effective_content_root()
        .and_then(|root| abs_path.strip_prefix(root).ok())
        .map(normalize_path)
        .unwrap_or_else(|| {
            abs_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
        });
    let without_ext = rel.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(&rel);
    let content_path = format!("/Game/{without_ext}");
    let folder = content_path
        .rsplit_once('/')
        .map(|(dir, _)| dir.to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| "/Game".to_string());
    (content_path, folder)
}

// ---------------------------------------------------------------------------
// Indexer
// ---------------------------------------------------------------------------

/// Owns the parse pool and drives full scans, reconciles, and single-file
/// ingest for the watcher. One instance per process, shared by the HTTP
/// layer and the watcher.
pub struct Indexer {
    store: Arc<Store>,
    config: Arc<AppConfig>,
    parsers: Parsers,
    pool: rayon::ThreadPool,
    abort_flags: DashMap<Language, Arc<AtomicBool>>,
}

impl Indexer {
    pub fn new(store: Arc<Store>, config: Arc<AppConfig>) -> Indexer {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count())
            .thread_name(|i| format!("parse-{i}"))
            .build()
            .expect("failed to build parse pool");
        Indexer {
            store,
            config,
            parsers: Parsers::default(),
            pool,
            abort_flags: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    fn abort_flag(&self, language: Language) -> Arc<AtomicBool> {
        self.abort_flags
            .entry(language)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    /// Request cancellation of a running scan for a language. In-flight
    /// batches finish; no further chunks are dispatched.
    pub fn abort_scan(&self, language: Language) {
        if let Some(flag) = self.abort_flags.get(&language) {
            flag.store(true, Ordering::Release);
        }
    }

    /// Cold-start entry: full-scan empty languages, reconcile populated
    /// ones, then repair any missing content/trigram rows.
    pub fn startup(&self) -> StoreResult<()> {
        for language in self.config.languages() {
            let populated = match language {
                Language::Content => {
                    self.store.count_rows(crate::store::Table::Assets)? > 0
                }
                _ => self.store.count_files(Some(language))? > 0,
            };
            if populated {
                info!(language = language.as_str(), "Index populated, reconciling");
                self.reconcile(language)?;
                self.store.set_index_status(language, IndexState::Ready, 0, 0, None)?;
            } else {
                self.full_scan(language)?;
            }
        }
        self.repair_trigrams()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Full scan
    // -----------------------------------------------------------------------

    pub fn full_scan(&self, language: Language) -> StoreResult<()> {
        let start = Instant::now();
        let flag = self.abort_flag(language);
        flag.store(false, Ordering::Release);

        self.store.set_index_status(language, IndexState::Indexing, 0, 0, None)?;
        if matches!(language, Language::Script | Language::Cpp) {
            // cleared again once every text file holds a content row
            self.store.set_meta("trigramBuildNeeded", &serde_json::Value::Bool(true))?;
        }
        let files = walk_language(&self.config, language);
        let total = files.len() as i64;
        self.store.set_index_status(language, IndexState::Indexing, 0, total, None)?;
        info!(language = language.as_str(), files = files.len(), "Full scan starting");

        let result = if language == Language::Content {
            self.ingest_assets(&files, language, &flag)
        } else {
            self.ingest_sources(&files, language, &flag)
        };

        match result {
            Ok(done) => {
                if flag.load(Ordering::Acquire) {
                    self.store.set_index_status(
                        language,
                        IndexState::Error,
                        done,
                        total,
                        Some("scan aborted"),
                    )?;
                    warn!(language = language.as_str(), "Full scan aborted");
                } else {
                    self.store.set_index_status(language, IndexState::Ready, total, total, None)?;
                    let elapsed = start.elapsed().as_millis() as u64;
                    self.store.set_meta(
                        &format!("lastBuild.{language}"),
                        &serde_json::json!({ "files": total, "buildTimeMs": elapsed }),
                    )?;
                    if matches!(language, Language::Script | Language::Cpp) {
                        self.repair_trigrams()?;
                    }
                    info!(
                        language = language.as_str(),
                        files = total,
                        time_ms = elapsed,
                        "Full scan complete"
                    );
                }
                Ok(())
            }
            Err(err) => {
                self.store.set_index_status(
                    language,
                    IndexState::Error,
                    0,
                    total,
                    Some(&err.to_string()),
                )?;
                Err(err)
            }
        }
    }

    /// Parse and ingest text files in batches: one transaction per batch,
    /// status row updated between batches, one retry per failing batch.
    fn ingest_sources(
        &self,
        files: &[ScannedSource],
        language: Language,
        abort: &AtomicBool,
    ) -> StoreResult<i64> {
        let mut done: i64 = 0;
        for batch in files.chunks(INGEST_BATCH_SIZE) {
            if abort.load(Ordering::Acquire) {
                return Ok(done);
            }
            let parsed: Vec<ParsedFile> = self.pool.install(|| {
                batch.par_iter().filter_map(|s| self.parsers.parse_source(s)).collect()
            });
            self.ingest_batch_with_retry(&parsed)?;
            done += batch.len() as i64;
            self.store.set_index_status(
                language,
                IndexState::Indexing,
                done,
                files.len() as i64,
                None,
            )?;
            std::thread::yield_now();
        }
        Ok(done)
    }

    fn ingest_assets(
        &self,
        files: &[ScannedSource],
        language: Language,
        abort: &AtomicBool,
    ) -> StoreResult<i64> {
        let mut done: i64 = 0;
        for batch in files.chunks(INGEST_BATCH_SIZE) {
            if abort.load(Ordering::Acquire) {
                return Ok(done);
            }
            let records: Vec<AssetRecord> = self.pool.install(|| {
                batch
                    .par_iter()
                    .filter_map(|s| {
                        let project = self
                            .config
                            .projects_for(Language::Content)
                            .find(|p| p.name == s.project)?;
                        Some(parse_asset(project, s))
                    })
                    .collect()
            });
            let attempt = self.store.transaction(|tx| tx.upsert_asset_batch(&records));
            if attempt.is_err() {
                self.store.transaction(|tx| tx.upsert_asset_batch(&records))?;
            }
            done += batch.len() as i64;
            self.store.set_index_status(
                language,
                IndexState::Indexing,
                done,
                files.len() as i64,
                None,
            )?;
            std::thread::yield_now();
        }
        Ok(done)
    }

    fn ingest_batch_with_retry(&self, parsed: &[ParsedFile]) -> StoreResult<()> {
        let attempt = self.store.transaction(|tx| {
            for file in parsed {
                tx.ingest_parsed_file(file)?;
            }
            Ok(())
        });
        match attempt {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "Ingest batch failed, retrying once");
                self.store.transaction(|tx| {
                    for file in parsed {
                        tx.ingest_parsed_file(file)?;
                    }
                    Ok(())
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reconcile
    // -----------------------------------------------------------------------

    /// Diff on-disk mtimes against stored ones; delete rows whose file is
    /// gone, re-ingest anything new or drifted.
    pub fn reconcile(&self, language: Language) -> StoreResult<()> {
        let disk = walk_language(&self.config, language);
        let mut changed: Vec<ScannedSource> = Vec::new();
        let mut deleted: Vec<String> = Vec::new();

        for project in self.config.projects_for(language) {
            let stored = match language {
                Language::Content => self.store.get_all_asset_mtimes(&project.name)?,
                _ => self.store.get_all_file_mtimes(language, &project.name)?,
            };
            let mut seen: HashSet<String> = HashSet::new();
            for source in disk.iter().filter(|s| s.project == project.name) {
                let key = normalize_path(&source.abs_path);
                let drifted = stored.get(&key).map(|m| *m != source.mtime_ms).unwrap_or(true);
                if drifted {
                    changed.push(source.clone());
                }
                seen.insert(key);
            }
            for path in stored.keys() {
                if !seen.contains(path) {
                    deleted.push(path.clone());
                }
            }
        }

        if changed.is_empty() && deleted.is_empty() {
            debug!(language = language.as_str(), "Reconcile found no drift");
            return Ok(());
        }
        info!(
            language = language.as_str(),
            changed = changed.len(),
            deleted = deleted.len(),
            "Reconcile applying drift"
        );

        for path in &deleted {
            if language == Language::Content {
                self.store.delete_asset(path)?;
            } else {
                self.store.delete_file(path)?;
            }
        }

        let flag = self.abort_flag(language);
        flag.store(false, Ordering::Release);
        if language == Language::Content {
            self.ingest_assets(&changed, language, &flag)?;
        } else {
            self.ingest_sources(&changed, language, &flag)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Single-file ingest (watcher, /internal/ingest)
    // -----------------------------------------------------------------------

    /// Ingest one path after an add/change event. Returns false when the
    /// path is outside every project, excluded, filtered, or already
    /// current (mtime match).
    pub fn ingest_file_event(&self, abs_path: &Path) -> StoreResult<bool> {
        let normalized = normalize_path(abs_path);
        if self.config.exclude.is_excluded(&normalized) {
            return Ok(false);
        }
        let Some((project, root)) = self.config.project_for_path(abs_path) else {
            return Ok(false);
        };
        let ext = abs_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !project.extension_set().contains(&ext) {
            return Ok(false);
        }
        let Ok(meta) = std::fs::metadata(abs_path) else {
            return Ok(false);
        };
        if !meta.is_file() {
            return Ok(false);
        }
        let mtime = mtime_ms(&meta);

        // re-emission dedup: unchanged mtime means nothing to do
        let stored_mtime = if project.language == Language::Content {
            self.store.get_asset_mtime(&normalized)?
        } else {
            self.store.get_file_by_path(&normalized)?.map(|f| f.mtime_ms)
        };
        if stored_mtime == Some(mtime) {
            return Ok(false);
        }

        let rel_path = abs_path
            .strip_prefix(root)
            .map(normalize_path)
            .unwrap_or_else(|_| normalized.clone());
        let source = ScannedSource {
            abs_path: abs_path.to_path_buf(),
            module: derive_module(&project.name, &rel_path),
            rel_path,
            mtime_ms: mtime,
            project: project.name.clone(),
            language: project.language,
        };

        if project.language == Language::Content {
            let record = parse_asset(project, &source);
            self.store.transaction(|tx| tx.upsert_asset_batch(std::slice::from_ref(&record)))?;
            return Ok(true);
        }
        let Some(parsed) = self.parsers.parse_source(&source) else {
            return Ok(false);
        };
        self.store.transaction(|tx| tx.ingest_parsed_file(&parsed).map(|_| ()))?;
        Ok(true)
    }

    /// Remove a path after an unlink event. Tries both tables; the path can
    /// only ever exist in one.
    pub fn delete_path(&self, abs_path: &Path) -> StoreResult<bool> {
        let normalized = normalize_path(abs_path);
        let from_files = self.store.delete_file(&normalized)?;
        let from_assets = self.store.delete_asset(&normalized)?;
        Ok(from_files || from_assets)
    }

    // -----------------------------------------------------------------------
    // Trigram repair
    // -----------------------------------------------------------------------

    /// Re-derive content and trigram rows for text files that lack them
    /// (recoverable inconsistency per the data model).
    pub fn repair_trigrams(&self) -> StoreResult<usize> {
        let missing = self.store.files_without_content()?;
        if missing.is_empty() {
            self.store.set_meta("trigramBuildNeeded", &serde_json::Value::Bool(false))?;
            return Ok(0);
        }
        info!(files = missing.len(), "Rebuilding missing content rows");
        let mut repaired = 0usize;
        for row in &missing {
            let Ok(raw) = std::fs::read(&row.abs_path) else {
                continue;
            };
            let compressed = crate::trigram::compress_content(&raw)?;
            let hash = crate::trigram::content_hash(&raw);
            let trigrams = crate::trigram::extract_trigrams(&raw);
            self.store.transaction(|tx| {
                tx.upsert_file_content(row.id, &compressed, &hash)?;
                tx.clear_trigrams_for_file(row.id)?;
                tx.insert_trigrams(row.id, &trigrams)
            })?;
            repaired += 1;
        }
        self.store.set_meta("trigramBuildNeeded", &serde_json::Value::Bool(false))?;
        Ok(repaired)
    }

    /// Full rebuild for `/refresh`: abort any running scan, clear the
    /// language, scan again.
    pub fn refresh(&self, language: Language) -> StoreResult<()> {
        self.abort_scan(language);
        self.store.clear_language(language)?;
        self.full_scan(language)
    }
}
