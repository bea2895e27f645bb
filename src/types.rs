use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// How many bytes of a `.uasset` package are read for header decoding.
pub const ASSET_HEADER_READ: usize = 256 * 1024;

/// Files are ingested in transactions of this many rows at a time.
pub const INGEST_BATCH_SIZE: usize = 500;

// ---------------------------------------------------------------------------
// Languages
// ---------------------------------------------------------------------------

/// Source corpus a project belongs to. `Content` projects hold binary asset
/// packages and never produce file/type/member rows.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Script,
    Cpp,
    Config,
    Content,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Script => "script",
            Language::Cpp => "cpp",
            Language::Config => "config",
            Language::Content => "content",
        }
    }

    pub fn parse(s: &str) -> Option<Language> {
        match s {
            "script" => Some(Language::Script),
            "cpp" => Some(Language::Cpp),
            "config" => Some(Language::Config),
            "content" => Some(Language::Content),
            _ => None,
        }
    }

    /// Default extension set when the project config does not override it.
    pub fn default_extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Script => &["as"],
            Language::Cpp => &["h", "cpp"],
            Language::Config => &["ini"],
            Language::Content => &["uasset", "umap"],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Parsed symbols
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Class,
    Struct,
    Interface,
    Enum,
    Event,
    Delegate,
    Namespace,
}

impl TypeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeKind::Class => "class",
            TypeKind::Struct => "struct",
            TypeKind::Interface => "interface",
            TypeKind::Enum => "enum",
            TypeKind::Event => "event",
            TypeKind::Delegate => "delegate",
            TypeKind::Namespace => "namespace",
        }
    }

    pub fn parse(s: &str) -> Option<TypeKind> {
        match s {
            "class" => Some(TypeKind::Class),
            "struct" => Some(TypeKind::Struct),
            "interface" => Some(TypeKind::Interface),
            "enum" => Some(TypeKind::Enum),
            "event" => Some(TypeKind::Event),
            "delegate" => Some(TypeKind::Delegate),
            "namespace" => Some(TypeKind::Namespace),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Function,
    Property,
    EnumValue,
}

impl MemberKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberKind::Function => "function",
            MemberKind::Property => "property",
            MemberKind::EnumValue => "enum_value",
        }
    }

    pub fn parse(s: &str) -> Option<MemberKind> {
        match s {
            "function" => Some(MemberKind::Function),
            "property" => Some(MemberKind::Property),
            "enum_value" => Some(MemberKind::EnumValue),
            _ => None,
        }
    }
}

/// A type declaration extracted by one of the source parsers.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedType {
    pub name: String,
    pub kind: TypeKind,
    pub parent: Option<String>,
    pub line: usize,
    /// Comma-split contents of the reflection macro parenthesis, if any.
    pub specifiers: Vec<String>,
}

/// A member declaration extracted by one of the source parsers.
/// `owner_name` is resolved to a type row at ingest time; a member whose
/// owner was never emitted keeps a NULL type id.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedMember {
    pub name: String,
    pub kind: MemberKind,
    pub line: usize,
    pub is_static: bool,
    pub specifiers: Vec<String>,
    pub owner_name: Option<String>,
}

/// Everything a parse worker returns for one text file.
#[derive(Clone, Debug)]
pub struct ParsedFile {
    pub abs_path: String,
    pub project: String,
    pub module: String,
    pub language: Language,
    pub mtime_ms: i64,
    pub types: Vec<ParsedType>,
    pub members: Vec<ParsedMember>,
    /// Raw file content, fed to the trigram builder. `None` for config files.
    pub content: Option<String>,
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

/// One `.uasset`/`.umap` package row.
#[derive(Clone, Debug, Serialize)]
pub struct AssetRecord {
    #[serde(rename = "absolutePath")]
    pub abs_path: String,
    pub name: String,
    #[serde(rename = "contentPath")]
    pub content_path: String,
    pub folder: String,
    pub project: String,
    pub extension: String,
    #[serde(rename = "mtimeMs")]
    pub mtime_ms: i64,
    #[serde(rename = "assetClass")]
    pub asset_class: Option<String>,
    #[serde(rename = "parentClass")]
    pub parent_class: Option<String>,
}

// ---------------------------------------------------------------------------
// Index status
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Empty,
    Indexing,
    Ready,
    Error,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Empty => "empty",
            IndexState::Indexing => "indexing",
            IndexState::Ready => "ready",
            IndexState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<IndexState> {
        match s {
            "empty" => Some(IndexState::Empty),
            "indexing" => Some(IndexState::Indexing),
            "ready" => Some(IndexState::Ready),
            "error" => Some(IndexState::Error),
            _ => None,
        }
    }
}

/// Per-language build status, readable mid-build.
#[derive(Clone, Debug, Serialize)]
pub struct IndexStatusRow {
    pub language: String,
    pub state: IndexState,
    #[serde(rename = "progressCurrent")]
    pub progress_current: i64,
    #[serde(rename = "progressTotal")]
    pub progress_total: i64,
    #[serde(rename = "lastUpdated")]
    pub last_updated: i64,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// File mtime in milliseconds, 0 when the platform withholds it.
pub fn mtime_ms(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Normalize a path to forward slashes for storage and comparison.
pub fn normalize_path(path: &std::path::Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Final path segment of a normalized path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Check if a file extension indicates a definition/header file.
pub fn is_definition_file(ext: &str) -> bool {
    matches!(ext, "h" | "hpp" | "hxx")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_round_trips() {
        for lang in [Language::Script, Language::Cpp, Language::Config, Language::Content] {
            assert_eq!(Language::parse(lang.as_str()), Some(lang));
        }
        assert_eq!(Language::parse("blueprint"), None);
    }

    #[test]
    fn member_kind_wire_names() {
        assert_eq!(MemberKind::EnumValue.as_str(), "enum_value");
        assert_eq!(MemberKind::parse("enum_value"), Some(MemberKind::EnumValue));
    }

    #[test]
    fn file_name_takes_last_segment() {
        assert_eq!(file_name("a/b/Player.cpp"), "Player.cpp");
        assert_eq!(file_name("Player.cpp"), "Player.cpp");
    }
}
