//! Test harness for pipeline and query integration tests.
//!
//! Builds a three-project fixture tree (script, cpp, content) in a temp
//! dir, opens a store beside it, and exposes the indexer and query engine
//! directly; no HTTP, no subprocess.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use uescope::config::{AppConfig, ExcludeSet, ProjectConfig, ServiceConfig, WatcherConfig};
use uescope::query::QueryEngine;
use uescope::scan::Indexer;
use uescope::store::Store;
use uescope::types::Language;

pub struct TestHarness {
    pub root: TempDir,
    pub store: Arc<Store>,
    pub config: Arc<AppConfig>,
    pub indexer: Arc<Indexer>,
    pub engine: QueryEngine,
}

impl TestHarness {
    pub fn new() -> TestHarness {
        let root = TempDir::new().expect("temp dir");
        for sub in ["Script", "Cpp", "Content", "data"] {
            std::fs::create_dir_all(root.path().join(sub)).expect("fixture dirs");
        }

        let projects = vec![
            ProjectConfig {
                name: "Game".to_string(),
                language: Language::Script,
                paths: vec![root.path().join("Script")],
                extensions: None,
                content_root: None,
            },
            ProjectConfig {
                name: "Engine".to_string(),
                language: Language::Cpp,
                paths: vec![root.path().join("Cpp")],
                extensions: None,
                content_root: None,
            },
            ProjectConfig {
                name: "GameContent".to_string(),
                language: Language::Content,
                paths: vec![root.path().join("Content")],
                extensions: None,
                content_root: Some(root.path().join("Content")),
            },
        ];
        let config = Arc::new(AppConfig {
            service: ServiceConfig::default(),
            watcher: WatcherConfig::default(),
            projects,
            exclude: ExcludeSet::compile(&["**/Intermediate/**".to_string()]).unwrap(),
        });

        let store = Arc::new(Store::open(&root.path().join("data")).expect("store open"));
        let indexer = Arc::new(Indexer::new(Arc::clone(&store), Arc::clone(&config)));
        let engine = QueryEngine::new(Arc::clone(&store), Arc::clone(&config));

        TestHarness { root, store, config, indexer, engine }
    }

    /// Write a fixture file below the temp root; returns its absolute path.
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        self.write_bytes(rel, content.as_bytes())
    }

    pub fn write_bytes(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.root.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("fixture parent dirs");
        }
        std::fs::write(&path, content).expect("fixture write");
        path
    }

    pub fn remove(&self, rel: &str) {
        let _ = std::fs::remove_file(self.root.path().join(rel));
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    /// Full scan of every configured language.
    pub fn scan_all(&self) {
        for language in self.config.languages() {
            self.indexer.full_scan(language).expect("full scan");
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Synthetic asset packages
// ---------------------------------------------------------------------------

/// Assemble a minimal package whose header decodes to the given blueprint
/// class and parent: legacy -7 summary, four names, two imports, one
/// export.
pub fn blueprint_package(asset_class: &str, parent_class: &str) -> Vec<u8> {
    let names = [b"CoreUObject".as_slice(), b"Class", asset_class.as_bytes(), parent_class.as_bytes()];

    let mut name_table = Vec::new();
    for name in names {
        name_table.extend_from_slice(&(name.len() as i32 + 1).to_le_bytes());
        name_table.extend_from_slice(name);
        name_table.push(0);
        name_table.extend_from_slice(&[0u8; 4]);
    }

    // import 0: Class / <asset_class>; import 1: Class / <parent_class>
    let mut import_table = Vec::new();
    for (class_name_idx, object_name_idx) in [(1i32, 2i32), (1, 3)] {
        let mut entry = [0u8; 28];
        entry[8..12].copy_from_slice(&class_name_idx.to_le_bytes());
        entry[20..24].copy_from_slice(&object_name_idx.to_le_bytes());
        import_table.extend_from_slice(&entry);
    }

    // one export: class = import 0, super = import 1
    let mut export_table = [0u8; 56];
    export_table[0..4].copy_from_slice(&(-1i32).to_le_bytes());
    export_table[4..8].copy_from_slice(&(-2i32).to_le_bytes());

    let folder = b"None\0";
    let summary_len = 4 + 4 + 4 + 4 + 4 + 4 + 4 + (4 + folder.len()) + 4 + 8 + 20;
    let name_offset = summary_len;
    let import_offset = name_offset + name_table.len();
    let export_offset = import_offset + import_table.len();
    let depends_offset = export_offset + export_table.len();

    let mut buf = Vec::new();
    buf.extend_from_slice(&0x9E2A_83C1u32.to_le_bytes());
    buf.extend_from_slice(&(-7i32).to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes()); // UE3 version
    buf.extend_from_slice(&400i32.to_le_bytes()); // UE4 version
    buf.extend_from_slice(&0i32.to_le_bytes()); // licensee
    buf.extend_from_slice(&0i32.to_le_bytes()); // custom versions
    buf.extend_from_slice(&(depends_offset as i32).to_le_bytes());
    buf.extend_from_slice(&(folder.len() as i32).to_le_bytes());
    buf.extend_from_slice(folder);
    buf.extend_from_slice(&0i32.to_le_bytes()); // flags
    buf.extend_from_slice(&(names.len() as i32).to_le_bytes());
    buf.extend_from_slice(&(name_offset as i32).to_le_bytes());
    buf.extend_from_slice(&1i32.to_le_bytes()); // export count
    buf.extend_from_slice(&(export_offset as i32).to_le_bytes());
    buf.extend_from_slice(&2i32.to_le_bytes()); // import count
    buf.extend_from_slice(&(import_offset as i32).to_le_bytes());
    buf.extend_from_slice(&(depends_offset as i32).to_le_bytes());
    assert_eq!(buf.len(), summary_len);

    buf.extend_from_slice(&name_table);
    buf.extend_from_slice(&import_table);
    buf.extend_from_slice(&export_table);
    buf
}
