//! Configuration loading and validation.
//!
//! The service reads a single `config.json` (UTF-8, BOM tolerated) naming the
//! HTTP bind address, watcher timings, the project table, and exclusion
//! globs. Configuration is immutable once loaded; every subsystem receives a
//! shared reference.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::types::Language;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found or unreadable: {0}")]
    Read(#[from] std::io::Error),
    #[error("config file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config declares no projects")]
    NoProjects,
    #[error("project '{0}' declares no paths")]
    NoPaths(String),
    #[error("invalid exclusion pattern '{0}'")]
    BadExclude(String),
}

// ---------------------------------------------------------------------------
// Wire shape (serde): raw JSON before validation
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    service: ServiceConfig,
    #[serde(default)]
    watcher: WatcherConfig,
    #[serde(default)]
    projects: Vec<ProjectConfig>,
    #[serde(default)]
    exclude: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3847
}

#[derive(Clone, Debug, Deserialize)]
pub struct WatcherConfig {
    #[serde(rename = "debounceMs", default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(rename = "reconcileIntervalMinutes", default = "default_reconcile_minutes")]
    pub reconcile_interval_minutes: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            reconcile_interval_minutes: default_reconcile_minutes(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_reconcile_minutes() -> u64 {
    10
}

/// One configured source corpus. Immutable at runtime.
#[derive(Clone, Debug, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub language: Language,
    pub paths: Vec<PathBuf>,
    /// Extension overrides; falls back to the language defaults.
    pub extensions: Option<Vec<String>>,
    /// Root for deriving `/Game/...` content paths (content projects).
    #[serde(rename = "contentRoot")]
    pub content_root: Option<PathBuf>,
}

impl ProjectConfig {
    /// Effective extension set, lowercase, no leading dots.
    pub fn extension_set(&self) -> HashSet<String> {
        match &self.extensions {
            Some(exts) => exts
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            None => self
                .language
                .default_extensions()
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }

    /// Root used to derive asset content paths: `contentRoot`, else the
    /// first configured path.
    pub fn effective_content_root(&self) -> Option<&Path> {
        self.content_root
            .as_deref()
            .or_else(|| self.paths.first().map(|p| p.as_path()))
    }
}

// ---------------------------------------------------------------------------
// Exclusion globs
// ---------------------------------------------------------------------------

/// Compiled exclusion patterns. `**` spans directories, `*` stops at `/`.
#[derive(Debug, Default)]
pub struct ExcludeSet {
    patterns: Vec<Regex>,
}

impl ExcludeSet {
    pub fn compile(globs: &[String]) -> Result<ExcludeSet, ConfigError> {
        let mut patterns = Vec::with_capacity(globs.len());
        for glob in globs {
            let re = glob_to_regex(glob);
            let compiled =
                Regex::new(&re).map_err(|_| ConfigError::BadExclude(glob.clone()))?;
            patterns.push(compiled);
        }
        Ok(ExcludeSet { patterns })
    }

    /// Test a normalized (forward-slash) path against every pattern.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(path))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out.push('$');
    out
}

// ---------------------------------------------------------------------------
// Loaded configuration
// ---------------------------------------------------------------------------

pub struct AppConfig {
    pub service: ServiceConfig,
    pub watcher: WatcherConfig,
    pub projects: Vec<ProjectConfig>,
    pub exclude: ExcludeSet,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);
        let parsed: RawConfig = serde_json::from_str(raw)?;

        if parsed.projects.is_empty() {
            return Err(ConfigError::NoProjects);
        }
        for project in &parsed.projects {
            if project.paths.is_empty() {
                return Err(ConfigError::NoPaths(project.name.clone()));
            }
        }

        Ok(AppConfig {
            service: parsed.service,
            watcher: parsed.watcher,
            projects: parsed.projects,
            exclude: ExcludeSet::compile(&parsed.exclude)?,
        })
    }

    /// Projects for a given language.
    pub fn projects_for(&self, language: Language) -> impl Iterator<Item = &ProjectConfig> {
        self.projects.iter().filter(move |p| p.language == language)
    }

    /// Distinct languages in configuration order.
    pub fn languages(&self) -> Vec<Language> {
        let mut seen = Vec::new();
        for p in &self.projects {
            if !seen.contains(&p.language) {
                seen.push(p.language);
            }
        }
        seen
    }

    /// Find the project owning an absolute path (longest configured path
    /// prefix wins), together with the matched root.
    pub fn project_for_path<'a>(
        &'a self,
        abs_path: &Path,
    ) -> Option<(&'a ProjectConfig, &'a Path)> {
        let mut best: Option<(&ProjectConfig, &Path)> = None;
        for project in &self.projects {
            for root in &project.paths {
                if abs_path.starts_with(root) {
                    let longer = best
                        .map(|(_, b)| root.components().count() > b.components().count())
                        .unwrap_or(true);
                    if longer {
                        best = Some((project, root.as_path()));
                    }
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("config.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{ "projects": [ { "name": "Game", "language": "script", "paths": ["/tmp/game"] } ] }"#,
        );
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.service.port, 3847);
        assert_eq!(config.watcher.debounce_ms, 100);
        assert_eq!(config.projects.len(), 1);
        assert!(config.projects[0].extension_set().contains("as"));
    }

    #[test]
    fn tolerates_utf8_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "\u{feff}{ \"projects\": [ { \"name\": \"G\", \"language\": \"cpp\", \"paths\": [\"/tmp/g\"] } ] }",
        );
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.projects[0].language, Language::Cpp);
    }

    #[test]
    fn rejects_empty_project_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), r#"{ "projects": [] }"#);
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::NoProjects)));
    }

    #[test]
    fn extension_overrides_drop_leading_dots() {
        let project = ProjectConfig {
            name: "G".to_string(),
            language: Language::Cpp,
            paths: vec![PathBuf::from("/tmp/g")],
            extensions: Some(vec![".H".to_string(), "inl".to_string()]),
            content_root: None,
        };
        let set = project.extension_set();
        assert!(set.contains("h"));
        assert!(set.contains("inl"));
        assert!(!set.contains("cpp"));
    }

    #[test]
    fn project_for_path_prefers_longest_prefix() {
        let make = |name: &str, path: &str| ProjectConfig {
            name: name.to_string(),
            language: Language::Script,
            paths: vec![PathBuf::from(path)],
            extensions: None,
            content_root: None,
        };
        let config = AppConfig {
            service: ServiceConfig::default(),
            watcher: WatcherConfig::default(),
            projects: vec![make("Outer", "/src"), make("Inner", "/src/game/plugin")],
            exclude: ExcludeSet::default(),
        };

        let (project, root) =
            config.project_for_path(Path::new("/src/game/plugin/Foo.as")).unwrap();
        assert_eq!(project.name, "Inner");
        assert_eq!(root, Path::new("/src/game/plugin"));

        let (project, _) = config.project_for_path(Path::new("/src/other/Bar.as")).unwrap();
        assert_eq!(project.name, "Outer");

        assert!(config.project_for_path(Path::new("/elsewhere/Baz.as")).is_none());
    }

    #[test]
    fn languages_preserve_configuration_order() {
        let mut projects = Vec::new();
        for (name, language) in
            [("A", Language::Cpp), ("B", Language::Script), ("C", Language::Cpp)]
        {
            projects.push(ProjectConfig {
                name: name.to_string(),
                language,
                paths: vec![PathBuf::from("/tmp")],
                extensions: None,
                content_root: None,
            });
        }
        let config = AppConfig {
            service: ServiceConfig::default(),
            watcher: WatcherConfig::default(),
            projects,
            exclude: ExcludeSet::default(),
        };
        assert_eq!(config.languages(), vec![Language::Cpp, Language::Script]);
    }

    #[test]
    fn exclude_globs_translate() {
        let set = ExcludeSet::compile(&[
            "**/Intermediate/**".to_string(),
            "*.tmp".to_string(),
        ])
        .unwrap();
        assert!(set.is_excluded("/proj/Intermediate/Build/x.cpp"));
        assert!(set.is_excluded("scratch.tmp"));
        // single star must not cross a separator
        assert!(!set.is_excluded("dir/scratch.tmp"));
        assert!(!set.is_excluded("/proj/Source/Player.cpp"));
    }
}
