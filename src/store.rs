//! SQLite persistence layer: one write connection behind a mutex, a small
//! pool of read-only connections, WAL mode throughout.
//!
//! All ingest goes through [`Store::transaction`]; the closure receives a
//! [`WriteTx`] whose batch helpers keep a file's types, members, content,
//! and trigram rows atomic. Status and metadata writes use the writer
//! connection in autocommit so readers observe progress mid-build. Every
//! query primitive is a pure read through [`Store::with_reader`].

use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::types::{
    now_ms, AssetRecord, IndexState, IndexStatusRow, Language, MemberKind, ParsedFile,
    ParsedMember, ParsedType, TypeKind,
};

const READ_POOL_SIZE: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Row types returned by query primitives
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct FileRow {
    pub id: i64,
    pub abs_path: String,
    pub name: String,
    pub project: String,
    pub module: String,
    pub language: Language,
    pub mtime_ms: i64,
}

/// A type row joined with its defining file.
#[derive(Clone, Debug)]
pub struct TypeHit {
    pub id: i64,
    pub name: String,
    pub kind: TypeKind,
    pub parent: Option<String>,
    pub line: i64,
    pub specifiers: Vec<String>,
    pub file_path: String,
    pub module: String,
    pub project: String,
    pub language: Language,
}

/// A member row joined with its owner type (when resolved) and file.
#[derive(Clone, Debug)]
pub struct MemberHit {
    pub name: String,
    pub kind: MemberKind,
    pub line: i64,
    pub is_static: bool,
    pub specifiers: Vec<String>,
    pub owner: Option<String>,
    pub file_path: String,
    pub module: String,
    pub project: String,
    pub language: Language,
}

/// Project/language narrowing shared by the query primitives.
#[derive(Clone, Debug, Default)]
pub struct QueryFilters {
    pub project: Option<String>,
    pub language: Option<Language>,
}

impl QueryFilters {
    fn where_clause(&self, out: &mut String, args: &mut Vec<Box<dyn rusqlite::ToSql>>) {
        if let Some(project) = &self.project {
            out.push_str(" AND f.project = ?");
            args.push(Box::new(project.clone()));
        }
        if let Some(language) = self.language {
            out.push_str(" AND f.language = ?");
            args.push(Box::new(language.as_str().to_string()));
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    /// Bumped on every committed write transaction; caches key off it.
    generation: AtomicU64,
    path: PathBuf,
}

impl Store {
    /// Open (creating if necessary) the store file under `data_dir`.
    pub fn open(data_dir: &Path) -> StoreResult<Store> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("index.db");

        let writer = Connection::open(&path)?;
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "synchronous", "NORMAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        writer.busy_timeout(std::time::Duration::from_secs(30))?;
        apply_schema(&writer)?;

        let mut readers = Vec::with_capacity(READ_POOL_SIZE);
        for _ in 0..READ_POOL_SIZE {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(std::time::Duration::from_secs(30))?;
            readers.push(Mutex::new(conn));
        }

        Ok(Store {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Monotonic write counter; readers use it to invalidate caches.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Run `f` on a pooled read-only connection.
    pub fn with_reader<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx].lock().expect("reader lock poisoned");
        f(&conn)
    }

    /// Run `f` inside a single write transaction. The whole closure commits
    /// or rolls back as a unit; batch helpers on [`WriteTx`] never begin
    /// their own transactions, so nesting is lexical and collapses.
    pub fn transaction<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&WriteTx<'_>) -> StoreResult<T>,
    {
        let conn = self.writer.lock().expect("writer lock poisoned");
        conn.execute_batch("BEGIN IMMEDIATE")?;
        let tx = WriteTx { conn: &conn };
        match f(&tx) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                self.generation.fetch_add(1, Ordering::Release);
                Ok(value)
            }
            Err(err) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Single-row writes (autocommit on the writer connection)
    // -----------------------------------------------------------------------

    /// Delete a file row and, by cascade, its types, members, content, and
    /// trigrams. Returns whether a row existed.
    pub fn delete_file(&self, abs_path: &str) -> StoreResult<bool> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        let n = conn.execute("DELETE FROM files WHERE abs_path = ?1", params![abs_path])?;
        if n > 0 {
            self.generation.fetch_add(1, Ordering::Release);
        }
        Ok(n > 0)
    }

    pub fn delete_asset(&self, abs_path: &str) -> StoreResult<bool> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        let n = conn.execute("DELETE FROM assets WHERE abs_path = ?1", params![abs_path])?;
        if n > 0 {
            self.generation.fetch_add(1, Ordering::Release);
        }
        Ok(n > 0)
    }

    /// Drop every row belonging to a language (used by `/refresh`).
    pub fn clear_language(&self, language: Language) -> StoreResult<()> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        if language == Language::Content {
            conn.execute("DELETE FROM assets", [])?;
        } else {
            conn.execute("DELETE FROM files WHERE language = ?1", params![language.as_str()])?;
        }
        self.generation.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Status writes are never part of an ingest transaction: progress must
    /// be observable by readers mid-build.
    pub fn set_index_status(
        &self,
        language: Language,
        state: IndexState,
        current: i64,
        total: i64,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        conn.execute(
            "INSERT INTO index_status (language, state, progress_current, progress_total, last_updated, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(language) DO UPDATE SET
               state = excluded.state,
               progress_current = excluded.progress_current,
               progress_total = excluded.progress_total,
               last_updated = excluded.last_updated,
               error_message = excluded.error_message",
            params![language.as_str(), state.as_str(), current, total, now_ms(), error_message],
        )?;
        Ok(())
    }

    pub fn get_all_index_status(&self) -> StoreResult<Vec<IndexStatusRow>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT language, state, progress_current, progress_total, last_updated, error_message
                 FROM index_status ORDER BY language",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(IndexStatusRow {
                    language: row.get(0)?,
                    state: IndexState::parse(&row.get::<_, String>(1)?)
                        .unwrap_or(IndexState::Empty),
                    progress_current: row.get(2)?,
                    progress_total: row.get(3)?,
                    last_updated: row.get(4)?,
                    error_message: row.get(5)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn set_meta(&self, key: &str, value: &serde_json::Value) -> StoreResult<()> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value.to_string()],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = ?1")?;
            let mut rows = stmt.query(params![key])?;
            match rows.next()? {
                Some(row) => {
                    let text: String = row.get(0)?;
                    Ok(serde_json::from_str(&text).ok())
                }
                None => Ok(None),
            }
        })
    }

    // -----------------------------------------------------------------------
    // File reads
    // -----------------------------------------------------------------------

    pub fn get_file_by_path(&self, abs_path: &str) -> StoreResult<Option<FileRow>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, abs_path, name, project, module, language, mtime_ms
                 FROM files WHERE abs_path = ?1",
            )?;
            let mut rows = stmt.query(params![abs_path])?;
            match rows.next()? {
                Some(row) => Ok(Some(file_row(row)?)),
                None => Ok(None),
            }
        })
    }

    /// `{absolutePath: mtime_ms}` for reconciliation.
    pub fn get_all_file_mtimes(
        &self,
        language: Language,
        project: &str,
    ) -> StoreResult<HashMap<String, i64>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT abs_path, mtime_ms FROM files WHERE language = ?1 AND project = ?2",
            )?;
            let rows = stmt.query_map(params![language.as_str(), project], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            Ok(rows.collect::<Result<HashMap<_, _>, _>>()?)
        })
    }

    pub fn get_asset_mtime(&self, abs_path: &str) -> StoreResult<Option<i64>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare("SELECT mtime_ms FROM assets WHERE abs_path = ?1")?;
            let mut rows = stmt.query(params![abs_path])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }

    pub fn get_all_asset_mtimes(&self, project: &str) -> StoreResult<HashMap<String, i64>> {
        self.with_reader(|conn| {
            let mut stmt =
                conn.prepare("SELECT abs_path, mtime_ms FROM assets WHERE project = ?1")?;
            let rows = stmt.query_map(params![project], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            Ok(rows.collect::<Result<HashMap<_, _>, _>>()?)
        })
    }

    pub fn count_files(&self, language: Option<Language>) -> StoreResult<i64> {
        self.with_reader(|conn| {
            let count = match language {
                Some(lang) => conn.query_row(
                    "SELECT COUNT(*) FROM files WHERE language = ?1",
                    params![lang.as_str()],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?,
            };
            Ok(count)
        })
    }

    pub fn count_rows(&self, table: Table) -> StoreResult<i64> {
        self.with_reader(|conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.name()), [], |row| {
                row.get(0)
            })?)
        })
    }

    pub fn count_distinct_trigrams(&self) -> StoreResult<i64> {
        self.with_reader(|conn| {
            Ok(conn.query_row("SELECT COUNT(DISTINCT trigram) FROM trigrams", [], |row| {
                row.get(0)
            })?)
        })
    }

    /// Text files lacking a content row: the background trigram builder's
    /// work list.
    pub fn files_without_content(&self) -> StoreResult<Vec<FileRow>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT f.id, f.abs_path, f.name, f.project, f.module, f.language, f.mtime_ms
                 FROM files f LEFT JOIN file_content c ON c.file_id = f.id
                 WHERE c.file_id IS NULL AND f.language IN ('script', 'cpp')",
            )?;
            let rows = stmt.query_map([], file_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    // -----------------------------------------------------------------------
    // Symbol reads
    // -----------------------------------------------------------------------

    /// Exact name match, joined with the defining file. Never deduplicates:
    /// the same name declared in several files yields several rows.
    pub fn find_types_exact(
        &self,
        name: &str,
        kind: Option<TypeKind>,
        filters: &QueryFilters,
        limit: usize,
    ) -> StoreResult<Vec<TypeHit>> {
        let mut sql = String::from(
            "SELECT t.id, t.name, t.kind, t.parent, t.line, t.specifiers,
                    f.abs_path, f.module, f.project, f.language
             FROM types t JOIN files f ON f.id = t.file_id
             WHERE t.name = ?",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(name.to_string())];
        if let Some(kind) = kind {
            sql.push_str(" AND t.kind = ?");
            args.push(Box::new(kind.as_str().to_string()));
        }
        filters.where_clause(&mut sql, &mut args);
        sql.push_str(" ORDER BY f.abs_path, t.line LIMIT ?");
        args.push(Box::new(limit as i64));
        self.query_type_hits(&sql, &args)
    }

    /// Rows for a batch of names (fuzzy results), preserving no particular
    /// order; the caller re-ranks.
    pub fn find_types_by_names(
        &self,
        names: &[String],
        kind: Option<TypeKind>,
        filters: &QueryFilters,
    ) -> StoreResult<Vec<TypeHit>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; names.len()].join(", ");
        let mut sql = format!(
            "SELECT t.id, t.name, t.kind, t.parent, t.line, t.specifiers,
                    f.abs_path, f.module, f.project, f.language
             FROM types t JOIN files f ON f.id = t.file_id
             WHERE t.name IN ({placeholders})",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> =
            names.iter().map(|n| Box::new(n.clone()) as Box<dyn rusqlite::ToSql>).collect();
        if let Some(kind) = kind {
            sql.push_str(" AND t.kind = ?");
            args.push(Box::new(kind.as_str().to_string()));
        }
        filters.where_clause(&mut sql, &mut args);
        self.query_type_hits(&sql, &args)
    }

    /// Direct children: types whose `parent` is any of `parents`. The join
    /// is by name only; the parent type need not exist.
    pub fn find_children_of(
        &self,
        parents: &[String],
        filters: &QueryFilters,
    ) -> StoreResult<Vec<TypeHit>> {
        if parents.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; parents.len()].join(", ");
        let mut sql = format!(
            "SELECT t.id, t.name, t.kind, t.parent, t.line, t.specifiers,
                    f.abs_path, f.module, f.project, f.language
             FROM types t JOIN files f ON f.id = t.file_id
             WHERE t.parent IN ({placeholders})",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> =
            parents.iter().map(|n| Box::new(n.clone()) as Box<dyn rusqlite::ToSql>).collect();
        filters.where_clause(&mut sql, &mut args);
        sql.push_str(" ORDER BY t.name, f.abs_path");
        self.query_type_hits(&sql, &args)
    }

    /// All distinct type names, the fuzzy ladder's candidate set.
    pub fn all_type_names(&self) -> StoreResult<Vec<String>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT name FROM types ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn all_member_names(&self) -> StoreResult<Vec<String>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT name FROM members ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Types whose file's module equals `module` or lives beneath it.
    pub fn types_in_module(
        &self,
        module: &str,
        filters: &QueryFilters,
        limit: usize,
    ) -> StoreResult<Vec<TypeHit>> {
        let mut sql = String::from(
            "SELECT t.id, t.name, t.kind, t.parent, t.line, t.specifiers,
                    f.abs_path, f.module, f.project, f.language
             FROM types t JOIN files f ON f.id = t.file_id
             WHERE (f.module = ? OR f.module LIKE ? ESCAPE '\\')",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(module.to_string()),
            Box::new(format!("{}.%", like_escape(module))),
        ];
        filters.where_clause(&mut sql, &mut args);
        sql.push_str(" ORDER BY t.name LIMIT ?");
        args.push(Box::new(limit as i64));
        self.query_type_hits(&sql, &args)
    }

    pub fn files_in_module(
        &self,
        module: &str,
        filters: &QueryFilters,
        limit: usize,
    ) -> StoreResult<(Vec<FileRow>, i64)> {
        let mut count_sql = String::from(
            "SELECT COUNT(*) FROM files f WHERE (f.module = ? OR f.module LIKE ? ESCAPE '\\')",
        );
        let mut sql = String::from(
            "SELECT f.id, f.abs_path, f.name, f.project, f.module, f.language, f.mtime_ms
             FROM files f WHERE (f.module = ? OR f.module LIKE ? ESCAPE '\\')",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(module.to_string()),
            Box::new(format!("{}.%", like_escape(module))),
        ];
        filters.where_clause(&mut count_sql, &mut args);
        let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let total = self.with_reader(|conn| {
            Ok(conn.query_row(&count_sql, arg_refs.as_slice(), |row| row.get::<_, i64>(0))?)
        })?;

        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(module.to_string()),
            Box::new(format!("{}.%", like_escape(module))),
        ];
        filters.where_clause(&mut sql, &mut args);
        sql.push_str(" ORDER BY f.abs_path LIMIT ?");
        args.push(Box::new(limit as i64));
        let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let rows = self.with_reader(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(arg_refs.as_slice(), file_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })?;
        Ok((rows, total))
    }

    /// Distinct module paths with file counts, optionally below a parent.
    pub fn list_modules(
        &self,
        parent: Option<&str>,
        filters: &QueryFilters,
    ) -> StoreResult<Vec<(String, i64)>> {
        let mut sql = String::from(
            "SELECT f.module, COUNT(*) FROM files f WHERE f.module <> ''",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(parent) = parent {
            sql.push_str(" AND (f.module = ? OR f.module LIKE ? ESCAPE '\\')");
            args.push(Box::new(parent.to_string()));
            args.push(Box::new(format!("{}.%", like_escape(parent))));
        }
        filters.where_clause(&mut sql, &mut args);
        sql.push_str(" GROUP BY f.module ORDER BY f.module");
        let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(arg_refs.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Files by stored name (final path segment), case-insensitive, exact
    /// or substring.
    pub fn find_files_by_name(
        &self,
        filename: &str,
        filters: &QueryFilters,
        limit: usize,
    ) -> StoreResult<Vec<FileRow>> {
        let mut sql = String::from(
            "SELECT f.id, f.abs_path, f.name, f.project, f.module, f.language, f.mtime_ms
             FROM files f WHERE f.name LIKE ? ESCAPE '\\'",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(format!("%{}%", like_escape(filename)))];
        filters.where_clause(&mut sql, &mut args);
        sql.push_str(" ORDER BY LENGTH(f.name), f.abs_path LIMIT ?");
        args.push(Box::new(limit as i64));
        let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(arg_refs.as_slice(), file_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Member rows by name (exact or a batch of fuzzy names).
    pub fn find_members(
        &self,
        names: &[String],
        containing_type: Option<&str>,
        member_kind: Option<MemberKind>,
        filters: &QueryFilters,
        limit: usize,
    ) -> StoreResult<Vec<MemberHit>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; names.len()].join(", ");
        let mut sql = format!(
            "SELECT m.name, m.member_kind, m.line, m.is_static, m.specifiers,
                    t.name, f.abs_path, f.module, f.project, f.language
             FROM members m
             JOIN files f ON f.id = m.file_id
             LEFT JOIN types t ON t.id = m.type_id
             WHERE m.name IN ({placeholders})",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> =
            names.iter().map(|n| Box::new(n.clone()) as Box<dyn rusqlite::ToSql>).collect();
        if let Some(owner) = containing_type {
            sql.push_str(" AND t.name = ?");
            args.push(Box::new(owner.to_string()));
        }
        if let Some(kind) = member_kind {
            sql.push_str(" AND m.member_kind = ?");
            args.push(Box::new(kind.as_str().to_string()));
        }
        filters.where_clause(&mut sql, &mut args);
        sql.push_str(" ORDER BY m.name, f.abs_path, m.line LIMIT ?");
        args.push(Box::new(limit as i64));
        let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(arg_refs.as_slice(), |row| {
                Ok(MemberHit {
                    name: row.get(0)?,
                    kind: MemberKind::parse(&row.get::<_, String>(1)?)
                        .unwrap_or(MemberKind::Property),
                    line: row.get(2)?,
                    is_static: row.get::<_, i64>(3)? != 0,
                    specifiers: parse_specifiers(row.get::<_, Option<String>>(4)?),
                    owner: row.get(5)?,
                    file_path: row.get(6)?,
                    module: row.get(7)?,
                    project: row.get(8)?,
                    language: Language::parse(&row.get::<_, String>(9)?)
                        .unwrap_or(Language::Script),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    // -----------------------------------------------------------------------
    // Asset reads
    // -----------------------------------------------------------------------

    /// Assets whose decoded parent class is any of `parents`.
    pub fn assets_with_parent_in(
        &self,
        parents: &[String],
        project: Option<&str>,
    ) -> StoreResult<Vec<AssetRecord>> {
        if parents.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; parents.len()].join(", ");
        let mut sql = format!(
            "SELECT abs_path, name, content_path, folder, project, extension, mtime_ms,
                    asset_class, parent_class
             FROM assets WHERE parent_class IN ({placeholders})",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> =
            parents.iter().map(|n| Box::new(n.clone()) as Box<dyn rusqlite::ToSql>).collect();
        if let Some(project) = project {
            sql.push_str(" AND project = ?");
            args.push(Box::new(project.to_string()));
        }
        sql.push_str(" ORDER BY content_path");
        let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(arg_refs.as_slice(), asset_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Every asset row, optionally narrowed to a project. The grep asset
    /// search regex-matches in process; there is no SQL-side pattern
    /// matching.
    pub fn all_assets(&self, project: Option<&str>) -> StoreResult<Vec<AssetRecord>> {
        let mut sql = String::from(
            "SELECT abs_path, name, content_path, folder, project, extension, mtime_ms,
                    asset_class, parent_class
             FROM assets",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(project) = project {
            sql.push_str(" WHERE project = ?");
            args.push(Box::new(project.to_string()));
        }
        sql.push_str(" ORDER BY content_path");
        let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(arg_refs.as_slice(), asset_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    // -----------------------------------------------------------------------
    // Grep reads
    // -----------------------------------------------------------------------

    /// File ids holding a trigram.
    pub fn trigram_file_ids(&self, trigram: u32) -> StoreResult<Vec<i64>> {
        self.with_reader(|conn| {
            let mut stmt =
                conn.prepare("SELECT file_id FROM trigrams WHERE trigram = ?1")?;
            let rows = stmt.query_map(params![trigram as i64], |row| row.get::<_, i64>(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Ids of every text file matching the filters: grep's fallback
    /// candidate set when the pattern yields no mandatory trigrams.
    pub fn text_file_ids(&self, filters: &QueryFilters) -> StoreResult<Vec<i64>> {
        let mut sql =
            String::from("SELECT f.id FROM files f WHERE f.language IN ('script', 'cpp')");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        filters.where_clause(&mut sql, &mut args);
        let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(arg_refs.as_slice(), |row| row.get::<_, i64>(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Compressed content plus file coordinates for grep verification,
    /// filtered to the candidate ids.
    pub fn file_contents(
        &self,
        file_ids: &[i64],
        filters: &QueryFilters,
    ) -> StoreResult<Vec<(FileRow, Vec<u8>)>> {
        if file_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        // chunk the id list to keep statements bounded
        for chunk in file_ids.chunks(500) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut sql = format!(
                "SELECT f.id, f.abs_path, f.name, f.project, f.module, f.language, f.mtime_ms,
                        c.compressed
                 FROM files f JOIN file_content c ON c.file_id = f.id
                 WHERE f.id IN ({placeholders})",
            );
            let mut args: Vec<Box<dyn rusqlite::ToSql>> =
                chunk.iter().map(|id| Box::new(*id) as Box<dyn rusqlite::ToSql>).collect();
            filters.where_clause(&mut sql, &mut args);
            let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
            let mut rows = self.with_reader(|conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(arg_refs.as_slice(), |row| {
                    Ok((file_row(row)?, row.get::<_, Vec<u8>>(7)?))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })?;
            out.append(&mut rows);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn query_type_hits(
        &self,
        sql: &str,
        args: &[Box<dyn rusqlite::ToSql>],
    ) -> StoreResult<Vec<TypeHit>> {
        let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(arg_refs.as_slice(), |row| {
                Ok(TypeHit {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    kind: TypeKind::parse(&row.get::<_, String>(2)?).unwrap_or(TypeKind::Class),
                    parent: row.get(3)?,
                    line: row.get(4)?,
                    specifiers: parse_specifiers(row.get::<_, Option<String>>(5)?),
                    file_path: row.get(6)?,
                    module: row.get(7)?,
                    project: row.get(8)?,
                    language: Language::parse(&row.get::<_, String>(9)?)
                        .unwrap_or(Language::Script),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

// ---------------------------------------------------------------------------
// Write transaction handle
// ---------------------------------------------------------------------------

/// Borrow of the locked writer connection inside a transaction. All batch
/// ingest helpers live here so they can only run transactionally.
pub struct WriteTx<'a> {
    conn: &'a Connection,
}

impl WriteTx<'_> {
    /// Insert or update the file row keyed by `abs_path`; returns the
    /// stable file id.
    pub fn upsert_file(
        &self,
        abs_path: &str,
        project: &str,
        module: &str,
        language: Language,
        mtime_ms: i64,
    ) -> StoreResult<i64> {
        let name = crate::types::file_name(abs_path).to_string();
        self.conn.execute(
            "INSERT INTO files (abs_path, name, project, module, language, mtime_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(abs_path) DO UPDATE SET
               name = excluded.name,
               project = excluded.project,
               module = excluded.module,
               language = excluded.language,
               mtime_ms = excluded.mtime_ms",
            params![abs_path, name, project, module, language.as_str(), mtime_ms],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM files WHERE abs_path = ?1",
            params![abs_path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn clear_types_for_file(&self, file_id: i64) -> StoreResult<()> {
        // members cascade from types only via type_id NULL-ing; delete both
        self.conn.execute("DELETE FROM members WHERE file_id = ?1", params![file_id])?;
        self.conn.execute("DELETE FROM types WHERE file_id = ?1", params![file_id])?;
        Ok(())
    }

    /// Insert type rows; returns `name -> id` for member owner resolution.
    pub fn insert_types(
        &self,
        file_id: i64,
        types: &[ParsedType],
    ) -> StoreResult<HashMap<String, i64>> {
        let mut ids = HashMap::with_capacity(types.len());
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO types (file_id, name, kind, parent, line, specifiers)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for ty in types {
            stmt.execute(params![
                file_id,
                ty.name,
                ty.kind.as_str(),
                ty.parent,
                ty.line as i64,
                encode_specifiers(&ty.specifiers),
            ])?;
            ids.entry(ty.name.clone()).or_insert(self.conn.last_insert_rowid());
        }
        Ok(ids)
    }

    /// Insert member rows, resolving owners against the types just inserted
    /// for this file. Unresolvable owners stay NULL.
    pub fn insert_members(
        &self,
        file_id: i64,
        members: &[ParsedMember],
        type_ids: &HashMap<String, i64>,
    ) -> StoreResult<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO members (file_id, type_id, name, member_kind, line, is_static, specifiers)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for member in members {
            let type_id =
                member.owner_name.as_ref().and_then(|owner| type_ids.get(owner)).copied();
            stmt.execute(params![
                file_id,
                type_id,
                member.name,
                member.kind.as_str(),
                member.line as i64,
                member.is_static as i64,
                encode_specifiers(&member.specifiers),
            ])?;
        }
        Ok(())
    }

    pub fn upsert_file_content(
        &self,
        file_id: i64,
        compressed: &[u8],
        content_hash: &str,
    ) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO file_content (file_id, compressed, content_hash)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(file_id) DO UPDATE SET
               compressed = excluded.compressed,
               content_hash = excluded.content_hash",
            params![file_id, compressed, content_hash],
        )?;
        Ok(())
    }

    pub fn clear_trigrams_for_file(&self, file_id: i64) -> StoreResult<()> {
        self.conn.execute("DELETE FROM trigrams WHERE file_id = ?1", params![file_id])?;
        Ok(())
    }

    pub fn insert_trigrams(&self, file_id: i64, trigrams: &[u32]) -> StoreResult<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO trigrams (trigram, file_id) VALUES (?1, ?2)",
        )?;
        for trigram in trigrams {
            stmt.execute(params![*trigram as i64, file_id])?;
        }
        Ok(())
    }

    /// The full per-file ingest shape: file row, symbol rows, content row,
    /// trigram rows, replaced together.
    pub fn ingest_parsed_file(&self, parsed: &ParsedFile) -> StoreResult<i64> {
        let file_id = self.upsert_file(
            &parsed.abs_path,
            &parsed.project,
            &parsed.module,
            parsed.language,
            parsed.mtime_ms,
        )?;
        self.clear_types_for_file(file_id)?;
        let type_ids = self.insert_types(file_id, &parsed.types)?;
        self.insert_members(file_id, &parsed.members, &type_ids)?;
        if let Some(content) = &parsed.content {
            let raw = content.as_bytes();
            let compressed = crate::trigram::compress_content(raw)?;
            self.upsert_file_content(file_id, &compressed, &crate::trigram::content_hash(raw))?;
            self.clear_trigrams_for_file(file_id)?;
            self.insert_trigrams(file_id, &crate::trigram::extract_trigrams(raw))?;
        }
        Ok(file_id)
    }

    pub fn upsert_asset_batch(&self, assets: &[AssetRecord]) -> StoreResult<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO assets (abs_path, name, content_path, folder, project, extension, mtime_ms, asset_class, parent_class)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(abs_path) DO UPDATE SET
               name = excluded.name,
               content_path = excluded.content_path,
               folder = excluded.folder,
               project = excluded.project,
               extension = excluded.extension,
               mtime_ms = excluded.mtime_ms,
               asset_class = excluded.asset_class,
               parent_class = excluded.parent_class",
        )?;
        for asset in assets {
            stmt.execute(params![
                asset.abs_path,
                asset.name,
                asset.content_path,
                asset.folder,
                asset.project,
                asset.extension,
                asset.mtime_ms,
                asset.asset_class,
                asset.parent_class,
            ])?;
        }
        Ok(())
    }

}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

fn apply_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY,
            abs_path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            project TEXT NOT NULL,
            module TEXT NOT NULL,
            language TEXT NOT NULL,
            mtime_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_files_name ON files(name);
        CREATE INDEX IF NOT EXISTS idx_files_language ON files(language, project);
        CREATE INDEX IF NOT EXISTS idx_files_module ON files(module);

        CREATE TABLE IF NOT EXISTS types (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            parent TEXT,
            line INTEGER NOT NULL,
            specifiers TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_types_name ON types(name);
        CREATE INDEX IF NOT EXISTS idx_types_parent ON types(parent);
        CREATE INDEX IF NOT EXISTS idx_types_file ON types(file_id);

        CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            type_id INTEGER REFERENCES types(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            member_kind TEXT NOT NULL,
            line INTEGER NOT NULL,
            is_static INTEGER NOT NULL DEFAULT 0,
            specifiers TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_members_name ON members(name);
        CREATE INDEX IF NOT EXISTS idx_members_file ON members(file_id);

        CREATE TABLE IF NOT EXISTS assets (
            abs_path TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            content_path TEXT NOT NULL,
            folder TEXT NOT NULL,
            project TEXT NOT NULL,
            extension TEXT NOT NULL,
            mtime_ms INTEGER NOT NULL,
            asset_class TEXT,
            parent_class TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_assets_content_path ON assets(content_path);
        CREATE INDEX IF NOT EXISTS idx_assets_parent_class ON assets(parent_class);
        CREATE INDEX IF NOT EXISTS idx_assets_name ON assets(name);

        CREATE TABLE IF NOT EXISTS file_content (
            file_id INTEGER PRIMARY KEY REFERENCES files(id) ON DELETE CASCADE,
            compressed BLOB NOT NULL,
            content_hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS trigrams (
            trigram INTEGER NOT NULL,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            PRIMARY KEY (trigram, file_id)
        ) WITHOUT ROWID;
        CREATE INDEX IF NOT EXISTS idx_trigrams_file ON trigrams(file_id);

        CREATE TABLE IF NOT EXISTS index_status (
            language TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            progress_current INTEGER NOT NULL DEFAULT 0,
            progress_total INTEGER NOT NULL DEFAULT 0,
            last_updated INTEGER NOT NULL,
            error_message TEXT
        );

        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

pub enum Table {
    Files,
    Types,
    Members,
    Assets,
    Trigrams,
    FileContent,
}

impl Table {
    fn name(&self) -> &'static str {
        match self {
            Table::Files => "files",
            Table::Types => "types",
            Table::Members => "members",
            Table::Assets => "assets",
            Table::Trigrams => "trigrams",
            Table::FileContent => "file_content",
        }
    }
}

fn file_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRow> {
    Ok(FileRow {
        id: row.get(0)?,
        abs_path: row.get(1)?,
        name: row.get(2)?,
        project: row.get(3)?,
        module: row.get(4)?,
        language: Language::parse(&row.get::<_, String>(5)?).unwrap_or(Language::Script),
        mtime_ms: row.get(6)?,
    })
}

fn asset_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssetRecord> {
    Ok(AssetRecord {
        abs_path: row.get(0)?,
        name: row.get(1)?,
        content_path: row.get(2)?,
        folder: row.get(3)?,
        project: row.get(4)?,
        extension: row.get(5)?,
        mtime_ms: row.get(6)?,
        asset_class: row.get(7)?,
        parent_class: row.get(8)?,
    })
}

fn encode_specifiers(specifiers: &[String]) -> Option<String> {
    if specifiers.is_empty() {
        None
    } else {
        serde_json::to_string(specifiers).ok()
    }
}

fn parse_specifiers(raw: Option<String>) -> Vec<String> {
    raw.and_then(|text| serde_json::from_str(&text).ok()).unwrap_or_default()
}

/// Escape LIKE wildcards in user-supplied fragments.
fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    fn sample_file(path: &str, types: Vec<ParsedType>, members: Vec<ParsedMember>) -> ParsedFile {
        ParsedFile {
            abs_path: path.to_string(),
            project: "Game".to_string(),
            module: "Game.Characters".to_string(),
            language: Language::Script,
            mtime_ms: 1000,
            types,
            members,
            content: Some("class AFoo : ABar {}\n".to_string()),
        }
    }

    fn class(name: &str, parent: Option<&str>) -> ParsedType {
        ParsedType {
            name: name.to_string(),
            kind: TypeKind::Class,
            parent: parent.map(|p| p.to_string()),
            line: 1,
            specifiers: vec!["Blueprintable".to_string()],
        }
    }

    #[test]
    fn ingest_and_lookup_round_trip() {
        let (_dir, store) = open_store();
        let parsed = sample_file(
            "/game/Characters/Foo.as",
            vec![class("AFoo", Some("ABar"))],
            vec![ParsedMember {
                name: "Health".to_string(),
                kind: MemberKind::Property,
                line: 3,
                is_static: false,
                specifiers: vec!["UPROPERTY".to_string()],
                owner_name: Some("AFoo".to_string()),
            }],
        );
        store.transaction(|tx| tx.ingest_parsed_file(&parsed).map(|_| ())).unwrap();

        let hits = store
            .find_types_exact("AFoo", None, &QueryFilters::default(), 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].parent.as_deref(), Some("ABar"));
        assert_eq!(hits[0].specifiers, vec!["Blueprintable"]);
        assert_eq!(hits[0].module, "Game.Characters");

        let members = store
            .find_members(
                &["Health".to_string()],
                None,
                None,
                &QueryFilters::default(),
                10,
            )
            .unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].owner.as_deref(), Some("AFoo"));
    }

    #[test]
    fn reingest_replaces_symbols_atomically() {
        let (_dir, store) = open_store();
        let first = sample_file("/game/Foo.as", vec![class("AFoo", None)], vec![]);
        store.transaction(|tx| tx.ingest_parsed_file(&first).map(|_| ())).unwrap();

        let mut second = sample_file("/game/Foo.as", vec![class("ARenamed", None)], vec![]);
        second.mtime_ms = 2000;
        store.transaction(|tx| tx.ingest_parsed_file(&second).map(|_| ())).unwrap();

        assert!(store
            .find_types_exact("AFoo", None, &QueryFilters::default(), 10)
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .find_types_exact("ARenamed", None, &QueryFilters::default(), 10)
                .unwrap()
                .len(),
            1
        );
        let row = store.get_file_by_path("/game/Foo.as").unwrap().unwrap();
        assert_eq!(row.mtime_ms, 2000);
        // file id stayed stable across re-ingest
        assert_eq!(store.count_rows(Table::Files).unwrap(), 1);
    }

    #[test]
    fn rolled_back_transaction_leaves_no_rows() {
        let (_dir, store) = open_store();
        let parsed = sample_file("/game/Foo.as", vec![class("AFoo", None)], vec![]);
        let result: StoreResult<()> = store.transaction(|tx| {
            tx.ingest_parsed_file(&parsed)?;
            Err(StoreError::Io(std::io::Error::other("boom")))
        });
        assert!(result.is_err());
        assert_eq!(store.count_rows(Table::Files).unwrap(), 0);
        assert_eq!(store.count_rows(Table::Types).unwrap(), 0);
    }

    #[test]
    fn delete_file_cascades() {
        let (_dir, store) = open_store();
        let parsed = sample_file(
            "/game/Foo.as",
            vec![class("AFoo", None)],
            vec![ParsedMember {
                name: "X".to_string(),
                kind: MemberKind::Property,
                line: 2,
                is_static: false,
                specifiers: vec![],
                owner_name: Some("AFoo".to_string()),
            }],
        );
        store.transaction(|tx| tx.ingest_parsed_file(&parsed).map(|_| ())).unwrap();
        assert!(store.count_rows(Table::Trigrams).unwrap() > 0);

        assert!(store.delete_file("/game/Foo.as").unwrap());
        for table in [Table::Files, Table::Types, Table::Members, Table::Trigrams, Table::FileContent] {
            assert_eq!(store.count_rows(table).unwrap(), 0);
        }
        assert!(!store.delete_file("/game/Foo.as").unwrap());
    }

    #[test]
    fn trigram_rows_match_content() {
        let (_dir, store) = open_store();
        let mut parsed = sample_file("/game/Foo.as", vec![], vec![]);
        parsed.content = Some("abcd".to_string());
        let file_id = store.transaction(|tx| tx.ingest_parsed_file(&parsed)).unwrap();

        let expected = crate::trigram::extract_trigrams(b"abcd");
        for trigram in &expected {
            assert_eq!(store.trigram_file_ids(*trigram).unwrap(), vec![file_id]);
        }
        assert_eq!(store.count_rows(Table::Trigrams).unwrap(), expected.len() as i64);
    }

    #[test]
    fn status_rows_upsert() {
        let (_dir, store) = open_store();
        store
            .set_index_status(Language::Script, IndexState::Indexing, 10, 100, None)
            .unwrap();
        store
            .set_index_status(Language::Script, IndexState::Ready, 100, 100, None)
            .unwrap();
        let all = store.get_all_index_status().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, IndexState::Ready);
        assert_eq!(all[0].progress_current, 100);
    }

    #[test]
    fn metadata_round_trips() {
        let (_dir, store) = open_store();
        store
            .set_meta("lastBuild", &serde_json::json!({ "ms": 1234 }))
            .unwrap();
        let value = store.get_meta("lastBuild").unwrap().unwrap();
        assert_eq!(value["ms"], 1234);
        assert!(store.get_meta("missing").unwrap().is_none());
    }

    #[test]
    fn asset_upsert_and_parent_query() {
        let (_dir, store) = open_store();
        let asset = AssetRecord {
            abs_path: "/game/Content/BP_Door.uasset".to_string(),
            name: "BP_Door".to_string(),
            content_path: "/Game/BP_Door".to_string(),
            folder: "/Game".to_string(),
            project: "GameContent".to_string(),
            extension: "uasset".to_string(),
            mtime_ms: 1,
            asset_class: Some("BlueprintGeneratedClass".to_string()),
            parent_class: Some("AInteractable".to_string()),
        };
        store.transaction(|tx| tx.upsert_asset_batch(std::slice::from_ref(&asset))).unwrap();

        let found = store
            .assets_with_parent_in(&["AInteractable".to_string()], None)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "BP_Door");

        assert!(store.delete_asset("/game/Content/BP_Door.uasset").unwrap());
        assert_eq!(store.count_rows(Table::Assets).unwrap(), 0);
    }

    #[test]
    fn duplicate_type_names_return_every_row() {
        let (_dir, store) = open_store();
        for path in ["/game/A.as", "/game/B.as"] {
            let parsed = sample_file(path, vec![class("AFoo", None)], vec![]);
            store.transaction(|tx| tx.ingest_parsed_file(&parsed).map(|_| ())).unwrap();
        }
        let hits = store
            .find_types_exact("AFoo", None, &QueryFilters::default(), 10)
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn generation_bumps_on_writes() {
        let (_dir, store) = open_store();
        let g0 = store.generation();
        let parsed = sample_file("/game/Foo.as", vec![], vec![]);
        store.transaction(|tx| tx.ingest_parsed_file(&parsed).map(|_| ())).unwrap();
        assert!(store.generation() > g0);
    }

    #[test]
    fn files_without_content_lists_gaps() {
        let (_dir, store) = open_store();
        let mut parsed = sample_file("/game/Foo.as", vec![], vec![]);
        parsed.content = None;
        store.transaction(|tx| tx.ingest_parsed_file(&parsed).map(|_| ())).unwrap();
        let missing = store.files_without_content().unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].abs_path, "/game/Foo.as");
    }
}
