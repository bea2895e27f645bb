//! The query engine: every operation is a pure read against the store.
//!
//! Symbol lookup (exact + fuzzy ladder), transitive child traversal,
//! module browsing, filename and member search, and trigram-filtered regex
//! grep with ranking. Responses are wire-shaped; the HTTP layer only maps
//! parameters in and JSON out.

use rayon::prelude::*;
use regex::RegexBuilder;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::config::AppConfig;
use crate::fuzzy::{prefix_alternatives, rank_candidates};
use crate::store::{QueryFilters, Store, StoreError, TypeHit};
use crate::trigram::{case_variants, decompress_content, required_trigrams};
use crate::types::{is_definition_file, AssetRecord, Language, MemberKind, TypeKind};

pub const DEFAULT_MAX_RESULTS: usize = 50;
const BROWSE_FILE_CAP: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid regex: {0}")]
    InvalidRegex(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type QueryResult<T> = Result<T, QueryError>;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize, Clone, Debug)]
pub struct TypeResult {
    pub name: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub line: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub specifiers: Vec<String>,
    pub file: String,
    pub module: String,
    pub project: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl TypeResult {
    fn from_hit(hit: TypeHit, score: Option<f64>) -> TypeResult {
        TypeResult {
            name: hit.name,
            kind: hit.kind.as_str(),
            parent: hit.parent,
            line: hit.line,
            specifiers: hit.specifiers,
            file: hit.file_path,
            module: hit.module,
            project: hit.project,
            language: hit.language.as_str().to_string(),
            score,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct FindTypeResponse {
    pub results: Vec<TypeResult>,
    #[serde(rename = "partialIndex", skip_serializing_if = "std::ops::Not::not")]
    pub partial_index: bool,
}

#[derive(Serialize, Clone, Debug)]
pub struct ChildResult {
    pub name: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub project: String,
    pub language: String,
    #[serde(rename = "assetClass", skip_serializing_if = "Option::is_none")]
    pub asset_class: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct FindChildrenResponse {
    pub results: Vec<ChildResult>,
    pub truncated: bool,
    #[serde(rename = "totalChildren")]
    pub total_children: usize,
    #[serde(rename = "partialIndex", skip_serializing_if = "std::ops::Not::not")]
    pub partial_index: bool,
}

#[derive(Serialize, Debug)]
pub struct BrowseModuleResponse {
    pub module: String,
    pub files: Vec<String>,
    pub types: Vec<TypeResult>,
    pub truncated: bool,
    #[serde(rename = "totalFiles")]
    pub total_files: i64,
}

#[derive(Serialize, Debug)]
pub struct FileResult {
    pub file: String,
    pub name: String,
    pub module: String,
    pub project: String,
    pub language: String,
}

#[derive(Serialize, Debug)]
pub struct FindFileResponse {
    pub results: Vec<FileResult>,
}

#[derive(Serialize, Debug)]
pub struct MemberResult {
    pub name: String,
    pub kind: &'static str,
    pub line: i64,
    #[serde(rename = "isStatic")]
    pub is_static: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub specifiers: Vec<String>,
    #[serde(rename = "containingType", skip_serializing_if = "Option::is_none")]
    pub containing_type: Option<String>,
    pub file: String,
    pub module: String,
    pub project: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Serialize, Debug)]
pub struct FindMemberResponse {
    pub results: Vec<MemberResult>,
}

#[derive(Serialize, Debug)]
pub struct ModuleEntry {
    pub module: String,
    #[serde(rename = "fileCount")]
    pub file_count: i64,
}

#[derive(Serialize, Debug)]
pub struct ListModulesResponse {
    pub results: Vec<ModuleEntry>,
}

#[derive(Serialize, Clone, Debug)]
pub struct GrepMatch {
    pub file: String,
    pub line: usize,
    #[serde(rename = "match")]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<String>>,
}

#[derive(Serialize, Debug)]
pub struct GrepFileGroup {
    pub file: String,
    pub matches: Vec<GrepMatch>,
    #[serde(rename = "matchCount")]
    pub match_count: usize,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
pub enum GrepResults {
    Flat(Vec<GrepMatch>),
    Grouped(Vec<GrepFileGroup>),
}

#[derive(Serialize, Debug)]
pub struct AssetMatch {
    #[serde(flatten)]
    pub asset: AssetRecord,
    #[serde(rename = "matchedFields")]
    pub matched_fields: usize,
}

#[derive(Serialize, Debug)]
pub struct GrepResponse {
    pub results: GrepResults,
    pub assets: Vec<AssetMatch>,
    #[serde(rename = "totalMatches")]
    pub total_matches: usize,
    #[serde(rename = "filesSearched")]
    pub files_searched: usize,
    pub truncated: bool,
    #[serde(rename = "searchEngine")]
    pub search_engine: &'static str,
    #[serde(rename = "partialIndex", skip_serializing_if = "std::ops::Not::not")]
    pub partial_index: bool,
}

#[derive(Clone, Debug, Default)]
pub struct GrepOptions {
    pub max_results: usize,
    pub case_sensitive: bool,
    pub context_lines: usize,
    pub grouped: bool,
    pub filters: QueryFilters,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct NameCache {
    generation: u64,
    names: Arc<Vec<String>>,
}

pub struct QueryEngine {
    store: Arc<Store>,
    config: Arc<AppConfig>,
    type_names: Mutex<Option<NameCache>>,
    member_names: Mutex<Option<NameCache>>,
}

impl QueryEngine {
    pub fn new(store: Arc<Store>, config: Arc<AppConfig>) -> QueryEngine {
        QueryEngine {
            store,
            config,
            type_names: Mutex::new(None),
            member_names: Mutex::new(None),
        }
    }

    /// The fuzzy ladder's candidate set, reloaded when the store has seen a
    /// write since the cache was filled.
    fn cached_type_names(&self) -> QueryResult<Arc<Vec<String>>> {
        let generation = self.store.generation();
        let mut slot = self.type_names.lock().unwrap();
        if let Some(cache) = slot.as_ref() {
            if cache.generation == generation {
                return Ok(Arc::clone(&cache.names));
            }
        }
        let names = Arc::new(self.store.all_type_names()?);
        *slot = Some(NameCache { generation, names: Arc::clone(&names) });
        Ok(names)
    }

    /// True while any configured language is still empty, building, or
    /// errored; the caller sees whatever is committed plus this flag.
    fn index_incomplete(&self) -> bool {
        let Ok(rows) = self.store.get_all_index_status() else {
            return false;
        };
        self.config.languages().iter().any(|language| {
            rows.iter()
                .find(|r| r.language == language.as_str())
                .map(|r| r.state != crate::types::IndexState::Ready)
                .unwrap_or(true)
        })
    }

    fn cached_member_names(&self) -> QueryResult<Arc<Vec<String>>> {
        let generation = self.store.generation();
        let mut slot = self.member_names.lock().unwrap();
        if let Some(cache) = slot.as_ref() {
            if cache.generation == generation {
                return Ok(Arc::clone(&cache.names));
            }
        }
        let names = Arc::new(self.store.all_member_names()?);
        *slot = Some(NameCache { generation, names: Arc::clone(&names) });
        Ok(names)
    }

    // -----------------------------------------------------------------------
    // Symbol lookup
    // -----------------------------------------------------------------------

    pub fn find_type(
        &self,
        name: &str,
        fuzzy: bool,
        kind: Option<TypeKind>,
        filters: &QueryFilters,
        max_results: usize,
    ) -> QueryResult<FindTypeResponse> {
        if !fuzzy {
            let mut hits = self.store.find_types_exact(name, kind, filters, max_results)?;
            if hits.is_empty() {
                // same stripped tail, other conventional prefixes
                for alternative in prefix_alternatives(name) {
                    hits = self.store.find_types_exact(&alternative, kind, filters, max_results)?;
                    if !hits.is_empty() {
                        break;
                    }
                }
            }
            return Ok(FindTypeResponse {
                results: hits.into_iter().map(|h| TypeResult::from_hit(h, None)).collect(),
                partial_index: self.index_incomplete(),
            });
        }

        let names = self.cached_type_names()?;
        let ranked = rank_candidates(name, names.iter().map(|n| n.as_str()), max_results);
        let scores: HashMap<&str, f64> =
            ranked.iter().map(|(n, s)| (n.as_str(), *s)).collect();
        let batch: Vec<String> = ranked.iter().map(|(n, _)| n.clone()).collect();
        let hits = self.store.find_types_by_names(&batch, kind, filters)?;

        let mut results: Vec<TypeResult> = hits
            .into_iter()
            .map(|hit| {
                let score = scores.get(hit.name.as_str()).copied();
                TypeResult::from_hit(hit, score)
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.file.cmp(&b.file))
        });
        results.truncate(max_results);
        Ok(FindTypeResponse { results, partial_index: self.index_incomplete() })
    }

    // -----------------------------------------------------------------------
    // Child traversal
    // -----------------------------------------------------------------------

    /// Breadth-first over the name-keyed parent edges. Duplicate names are
    /// visited once; assets join by their decoded parent class.
    pub fn find_children(
        &self,
        parent: &str,
        recursive: bool,
        filters: &QueryFilters,
        max_results: usize,
    ) -> QueryResult<FindChildrenResponse> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(parent.to_string());
        let mut traversed: Vec<String> = vec![parent.to_string()];
        let mut frontier: Vec<String> = vec![parent.to_string()];
        let mut children: Vec<TypeHit> = Vec::new();

        loop {
            let rows = self.store.find_children_of(&frontier, filters)?;
            let mut next: Vec<String> = Vec::new();
            for row in rows {
                if visited.insert(row.name.clone()) {
                    next.push(row.name.clone());
                    traversed.push(row.name.clone());
                    children.push(row);
                }
            }
            if !recursive || next.is_empty() {
                break;
            }
            frontier = next;
        }

        // assets attach anywhere along the traversed chain
        let include_assets =
            filters.language.is_none() || filters.language == Some(Language::Content);
        let assets = if include_assets {
            self.store.assets_with_parent_in(&traversed, filters.project.as_deref())?
        } else {
            Vec::new()
        };

        let total_children = children.len() + assets.len();
        let mut results: Vec<ChildResult> = children
            .into_iter()
            .map(|hit| ChildResult {
                name: hit.name,
                kind: hit.kind.as_str(),
                parent: hit.parent,
                file: hit.file_path,
                line: Some(hit.line),
                module: Some(hit.module),
                project: hit.project,
                language: hit.language.as_str().to_string(),
                asset_class: None,
            })
            .collect();
        results.extend(assets.into_iter().map(|asset| ChildResult {
            name: asset.name,
            kind: "asset",
            parent: asset.parent_class,
            file: asset.abs_path,
            line: None,
            module: None,
            project: asset.project,
            language: Language::Content.as_str().to_string(),
            asset_class: asset.asset_class,
        }));

        let truncated = results.len() > max_results;
        results.truncate(max_results);
        Ok(FindChildrenResponse {
            results,
            truncated,
            total_children,
            partial_index: self.index_incomplete(),
        })
    }

    // -----------------------------------------------------------------------
    // Module browsing
    // -----------------------------------------------------------------------

    pub fn browse_module(
        &self,
        module: &str,
        filters: &QueryFilters,
        max_results: usize,
    ) -> QueryResult<BrowseModuleResponse> {
        let (files, total_files) =
            self.store.files_in_module(module, filters, BROWSE_FILE_CAP)?;
        let hits = self.store.types_in_module(module, filters, max_results * 4)?;

        // one entry per type name within the module
        let mut seen: HashSet<String> = HashSet::new();
        let mut types: Vec<TypeResult> = Vec::new();
        for hit in hits {
            if seen.insert(hit.name.clone()) {
                types.push(TypeResult::from_hit(hit, None));
            }
        }
        let truncated = types.len() > max_results || total_files > files.len() as i64;
        types.truncate(max_results);

        Ok(BrowseModuleResponse {
            module: module.to_string(),
            files: files.into_iter().map(|f| f.abs_path).collect(),
            types,
            truncated,
            total_files,
        })
    }

    pub fn list_modules(
        &self,
        parent: Option<&str>,
        depth: usize,
        filters: &QueryFilters,
    ) -> QueryResult<ListModulesResponse> {
        let rows = self.store.list_modules(parent, filters)?;
        let depth = depth.max(1);

        // collapse to `depth` segments below the parent
        let mut aggregated: HashMap<String, i64> = HashMap::new();
        for (module, count) in rows {
            let collapsed = collapse_module(&module, parent, depth);
            *aggregated.entry(collapsed).or_insert(0) += count;
        }
        let mut results: Vec<ModuleEntry> = aggregated
            .into_iter()
            .map(|(module, file_count)| ModuleEntry { module, file_count })
            .collect();
        results.sort_by(|a, b| a.module.cmp(&b.module));
        Ok(ListModulesResponse { results })
    }

    // -----------------------------------------------------------------------
    // File and member search
    // -----------------------------------------------------------------------

    pub fn find_file(
        &self,
        filename: &str,
        filters: &QueryFilters,
        max_results: usize,
    ) -> QueryResult<FindFileResponse> {
        let rows = self.store.find_files_by_name(filename, filters, max_results * 4)?;
        let needle = filename.to_lowercase();
        let mut ranked: Vec<(usize, FileResult)> = rows
            .into_iter()
            .map(|row| {
                let hay = row.name.to_lowercase();
                let rank = if hay == needle {
                    0
                } else if hay.starts_with(&needle) {
                    1
                } else {
                    2 + hay.find(&needle).unwrap_or(usize::MAX - 2)
                };
                (
                    rank,
                    FileResult {
                        file: row.abs_path,
                        name: row.name,
                        module: row.module,
                        project: row.project,
                        language: row.language.as_str().to_string(),
                    },
                )
            })
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.file.cmp(&b.1.file)));
        let results = ranked.into_iter().map(|(_, r)| r).take(max_results).collect();
        Ok(FindFileResponse { results })
    }

    pub fn find_member(
        &self,
        name: &str,
        fuzzy: bool,
        containing_type: Option<&str>,
        member_kind: Option<MemberKind>,
        filters: &QueryFilters,
        max_results: usize,
    ) -> QueryResult<FindMemberResponse> {
        let (batch, scores): (Vec<String>, HashMap<String, f64>) = if fuzzy {
            let names = self.cached_member_names()?;
            let ranked = rank_candidates(name, names.iter().map(|n| n.as_str()), max_results);
            let scores = ranked.iter().cloned().collect();
            (ranked.into_iter().map(|(n, _)| n).collect(), scores)
        } else {
            (vec![name.to_string()], HashMap::new())
        };

        let hits =
            self.store.find_members(&batch, containing_type, member_kind, filters, max_results)?;
        let mut results: Vec<MemberResult> = hits
            .into_iter()
            .map(|hit| MemberResult {
                score: if fuzzy { scores.get(&hit.name).copied() } else { None },
                name: hit.name,
                kind: hit.kind.as_str(),
                line: hit.line,
                is_static: hit.is_static,
                specifiers: hit.specifiers,
                containing_type: hit.owner,
                file: hit.file_path,
                module: hit.module,
                project: hit.project,
                language: hit.language.as_str().to_string(),
            })
            .collect();
        if fuzzy {
            results.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.name.cmp(&b.name))
            });
        }
        results.truncate(max_results);
        Ok(FindMemberResponse { results })
    }

    // -----------------------------------------------------------------------
    // Grep
    // -----------------------------------------------------------------------

    pub fn grep(&self, pattern: &str, options: &GrepOptions) -> QueryResult<GrepResponse> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(!options.case_sensitive)
            .build()
            .map_err(|err| QueryError::InvalidRegex(err.to_string()))?;

        // candidate selection
        let (candidates, search_engine) = match required_trigrams(pattern) {
            Some(trigrams) => {
                (self.intersect_postings(&trigrams, options.case_sensitive)?, "trigram")
            }
            None => (self.store.text_file_ids(&options.filters)?, "scan"),
        };

        // verification
        let contents = self.store.file_contents(&candidates, &options.filters)?;
        let files_searched = contents.len();
        let mut per_file: Vec<(String, Vec<GrepMatch>)> = contents
            .par_iter()
            .filter_map(|(row, compressed)| {
                let raw = decompress_content(compressed).ok()?;
                let text = String::from_utf8_lossy(&raw);
                let lines: Vec<&str> = text.lines().collect();
                let mut matches = Vec::new();
                for (i, line) in lines.iter().enumerate() {
                    if !regex.is_match(line) {
                        continue;
                    }
                    let context = if options.context_lines > 0 {
                        let lo = i.saturating_sub(options.context_lines);
                        let hi = (i + options.context_lines + 1).min(lines.len());
                        Some(lines[lo..hi].iter().map(|l| l.to_string()).collect())
                    } else {
                        None
                    };
                    matches.push(GrepMatch {
                        file: row.abs_path.clone(),
                        line: i + 1,
                        text: line.to_string(),
                        context,
                    });
                }
                if matches.is_empty() {
                    None
                } else {
                    Some((row.abs_path.clone(), matches))
                }
            })
            .collect();

        // ranking: headers outrank implementations, then match count,
        // shorter paths break ties
        per_file.sort_by(|a, b| {
            header_rank(&a.0)
                .cmp(&header_rank(&b.0))
                .then_with(|| b.1.len().cmp(&a.1.len()))
                .then_with(|| a.0.len().cmp(&b.0.len()))
                .then_with(|| a.0.cmp(&b.0))
        });

        let total_matches: usize = per_file.iter().map(|(_, m)| m.len()).sum();
        let truncated = total_matches > options.max_results;

        // global truncation, preserving per-file line order
        let mut budget = options.max_results;
        let mut kept: Vec<(String, Vec<GrepMatch>)> = Vec::new();
        for (file, mut matches) in per_file {
            if budget == 0 {
                break;
            }
            if matches.len() > budget {
                matches.truncate(budget);
            }
            budget -= matches.len();
            kept.push((file, matches));
        }

        let assets = self.grep_assets(&regex, &options.filters)?;

        let results = if options.grouped {
            GrepResults::Grouped(
                kept.into_iter()
                    .map(|(file, matches)| GrepFileGroup {
                        file,
                        match_count: matches.len(),
                        matches,
                    })
                    .collect(),
            )
        } else {
            GrepResults::Flat(kept.into_iter().flat_map(|(_, m)| m).collect())
        };

        Ok(GrepResponse {
            results,
            assets,
            total_matches,
            files_searched,
            truncated,
            search_engine,
            partial_index: self.index_incomplete(),
        })
    }

    /// Intersect the posting lists of the mandatory trigrams. For
    /// case-insensitive queries each trigram's postings are the union over
    /// its case foldings, keeping the filter sound.
    fn intersect_postings(
        &self,
        trigrams: &[u32],
        case_sensitive: bool,
    ) -> QueryResult<Vec<i64>> {
        let mut current: Option<HashSet<i64>> = None;
        for trigram in trigrams {
            let mut postings: HashSet<i64> = HashSet::new();
            if case_sensitive {
                postings.extend(self.store.trigram_file_ids(*trigram)?);
            } else {
                for variant in case_variants(*trigram) {
                    postings.extend(self.store.trigram_file_ids(variant)?);
                }
            }
            current = Some(match current {
                None => postings,
                Some(acc) => acc.intersection(&postings).copied().collect(),
            });
            if current.as_ref().is_some_and(|s| s.is_empty()) {
                return Ok(Vec::new());
            }
        }
        let mut ids: Vec<i64> = current.unwrap_or_default().into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Asset search rides along when the language filter does not exclude
    /// content. The regex runs over name, content path, and folder.
    fn grep_assets(
        &self,
        regex: &regex::Regex,
        filters: &QueryFilters,
    ) -> QueryResult<Vec<AssetMatch>> {
        let in_scope = filters.language.is_none() || filters.language == Some(Language::Content);
        if !in_scope {
            return Ok(Vec::new());
        }
        let assets = self.store.all_assets(filters.project.as_deref())?;
        let mut matches: Vec<AssetMatch> = assets
            .into_iter()
            .filter_map(|asset| {
                let matched_fields = [&asset.name, &asset.content_path, &asset.folder]
                    .iter()
                    .filter(|field| regex.is_match(field))
                    .count();
                if matched_fields > 0 {
                    Some(AssetMatch { asset, matched_fields })
                } else {
                    None
                }
            })
            .collect();
        matches.sort_by(|a, b| {
            b.matched_fields
                .cmp(&a.matched_fields)
                .then_with(|| a.asset.content_path.cmp(&b.asset.content_path))
        });
        Ok(matches)
    }
}

/// Headers sort ahead of implementation files.
fn header_rank(path: &str) -> u8 {
    let ext = path.rsplit('.').next().unwrap_or("");
    if is_definition_file(ext) {
        0
    } else {
        1
    }
}

/// `Game.A.B.C` below parent `Game` at depth 1 collapses to `Game.A`.
fn collapse_module(module: &str, parent: Option<&str>, depth: usize) -> String {
    match parent {
        Some(parent) if module.starts_with(parent) => {
            let rest = module[parent.len()..].trim_start_matches('.');
            if rest.is_empty() {
                return module.to_string();
            }
            let kept: Vec<&str> = rest.split('.').take(depth).collect();
            format!("{parent}.{}", kept.join("."))
        }
        _ => {
            let kept: Vec<&str> = module.split('.').take(depth).collect();
            kept.join(".")
        }
    }
}
