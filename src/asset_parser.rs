//! `.uasset`/`.umap` package-header decoder.
//!
//! Reads the summary, name table, and import/export tables from the first
//! 256 KiB of a package and recovers the asset's blueprint class and parent
//! class. Every structural problem (bad magic, counts out of range,
//! offsets past the buffer) yields `{None, None}`; a package this decoder
//! cannot read is not an error, just an asset without class info.

use std::io::Read;
use std::path::Path;

use crate::types::ASSET_HEADER_READ;

const PACKAGE_MAGIC: u32 = 0x9E2A_83C1;

/// Blueprint class markers recognized in import tables.
const BLUEPRINT_CLASS_NAMES: &[&str] = &[
    "BlueprintGeneratedClass",
    "WidgetBlueprintGeneratedClass",
    "AnimBlueprintGeneratedClass",
    "GameplayAbilityBlueprintGeneratedClass",
];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssetHeader {
    pub asset_class: Option<String>,
    pub parent_class: Option<String>,
}

/// Read and decode a package header from disk. I/O errors decode as empty.
pub fn read_asset_header(path: &Path) -> AssetHeader {
    let mut buf = Vec::with_capacity(64 * 1024);
    let Ok(file) = std::fs::File::open(path) else {
        return AssetHeader::default();
    };
    let mut limited = file.take(ASSET_HEADER_READ as u64);
    if limited.read_to_end(&mut buf).is_err() {
        return AssetHeader::default();
    }
    parse_asset_header(&buf)
}

/// Decode a package header from an in-memory buffer.
pub fn parse_asset_header(buf: &[u8]) -> AssetHeader {
    decode(buf).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Cursor over the header buffer
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Cursor<'a> {
        Cursor { buf, pos: 0 }
    }

    fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.buf.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32(&mut self) -> Option<i32> {
        self.read_u32().map(|v| v as i32)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        if self.pos.checked_add(n)? > self.buf.len() {
            return None;
        }
        self.pos += n;
        Some(())
    }

    /// Skip a serialized FString: `length` UTF-8 bytes, or UTF-16 code units
    /// when the length is negative.
    fn skip_fstring(&mut self) -> Option<()> {
        let len = self.read_i32()?;
        if len >= 0 {
            self.skip(len as usize)
        } else {
            self.skip(len.unsigned_abs() as usize * 2)
        }
    }
}

/// Read one i32 at an absolute offset without moving a cursor.
fn i32_at(buf: &[u8], offset: usize) -> Option<i32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

struct ImportEntry {
    class_name: Option<String>,
    object_name: Option<String>,
}

fn decode(buf: &[u8]) -> Option<AssetHeader> {
    let mut cur = Cursor::new(buf);

    if cur.read_u32()? != PACKAGE_MAGIC {
        return None;
    }
    let legacy_version = cur.read_i32()?;
    if !matches!(legacy_version, -6 | -7 | -8) {
        return None;
    }
    cur.skip(4)?; // LegacyUE3Version
    let file_version_ue4 = cur.read_i32()?;
    let file_version_ue5 = if legacy_version <= -8 { cur.read_i32()? } else { 0 };
    cur.skip(4)?; // FileVersionLicenseeUE

    let custom_version_count = cur.read_i32()?;
    if !(0..=1000).contains(&custom_version_count) {
        return None;
    }
    cur.skip(custom_version_count as usize * 20)?;

    cur.skip(4)?; // TotalHeaderSize
    cur.skip_fstring()?; // FolderName
    cur.skip(4)?; // PackageFlags

    let name_count = cur.read_i32()?;
    let name_offset = cur.read_i32()?;
    if !(0..=500_000).contains(&name_count) {
        return None;
    }

    if file_version_ue5 > 0 {
        cur.skip(8)?; // SoftObjectPaths count + offset
    }
    if file_version_ue4 >= 516 {
        cur.skip_fstring()?; // LocalizationId
        cur.skip(8)?; // GatherableTextData count + offset
    }

    let export_count = cur.read_i32()?;
    let export_offset = cur.read_i32()?;
    let import_count = cur.read_i32()?;
    let import_offset = cur.read_i32()?;
    let depends_offset = cur.read_i32()?;

    for count in [export_count, import_count] {
        if !(0..=100_000).contains(&count) {
            return None;
        }
    }
    for offset in [name_offset, export_offset, import_offset, depends_offset] {
        if offset < 0 || offset as usize > buf.len() {
            return None;
        }
    }

    let names = read_name_table(buf, name_offset as usize, name_count as usize)?;

    let import_entry_size = if import_count > 0 {
        let size = (export_offset - import_offset) / import_count;
        if !(28..=64).contains(&size) {
            return None;
        }
        size as usize
    } else {
        0
    };
    let export_entry_size = if export_count > 0 {
        let size = (depends_offset - export_offset) / export_count;
        if !(56..=200).contains(&size) {
            return None;
        }
        size as usize
    } else {
        0
    };

    let imports = read_import_table(
        buf,
        import_offset as usize,
        import_count as usize,
        import_entry_size,
        &names,
    )?;

    // First import declaring one of the blueprint generated-class markers.
    let blueprint_import = imports.iter().enumerate().find(|(_, imp)| {
        imp.class_name.as_deref() == Some("Class")
            && imp
                .object_name
                .as_deref()
                .is_some_and(|n| BLUEPRINT_CLASS_NAMES.contains(&n))
    });

    if let Some((import_index, imp)) = blueprint_import {
        let target_class_index = -(import_index as i32 + 1);
        for i in 0..export_count as usize {
            let base = (export_offset as usize) + i * export_entry_size;
            let class_index = i32_at(buf, base)?;
            if class_index != target_class_index {
                continue;
            }
            let super_index = i32_at(buf, base + 4)?;
            let parent_class = if super_index < 0 {
                imports
                    .get((-super_index - 1) as usize)
                    .and_then(|p| p.object_name.clone())
            } else {
                None
            };
            return Some(AssetHeader { asset_class: imp.object_name.clone(), parent_class });
        }
    }

    // Fallback: class of the first export, resolved through the imports.
    if export_count > 0 {
        let class_index = i32_at(buf, export_offset as usize)?;
        if class_index < 0 {
            let asset_class = imports
                .get((-class_index - 1) as usize)
                .and_then(|imp| imp.object_name.clone());
            return Some(AssetHeader { asset_class, parent_class: None });
        }
    }

    Some(AssetHeader::default())
}

/// Name table: `length`-prefixed strings (negative length = UTF-16LE code
/// units), each followed by 4 bytes of precomputed hashes.
fn read_name_table(buf: &[u8], offset: usize, count: usize) -> Option<Vec<String>> {
    let mut cur = Cursor::new(buf);
    cur.pos = offset;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        let len = cur.read_i32()?;
        let name = if len >= 0 {
            let len = len as usize;
            let bytes = buf.get(cur.pos..cur.pos + len)?;
            cur.skip(len)?;
            let trimmed = bytes.strip_suffix(&[0]).unwrap_or(bytes);
            String::from_utf8_lossy(trimmed).into_owned()
        } else {
            let units = len.unsigned_abs() as usize;
            let bytes = buf.get(cur.pos..cur.pos + units * 2)?;
            cur.skip(units * 2)?;
            let wide: Vec<u16> = bytes
                .chunks_exact(2)
                .take(units.saturating_sub(1))
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&wide)
        };
        cur.skip(4)?; // name hashes
        names.push(name);
    }
    Some(names)
}

/// Import table: fixed-size entries; only the first 28 bytes are decoded.
fn read_import_table(
    buf: &[u8],
    offset: usize,
    count: usize,
    entry_size: usize,
    names: &[String],
) -> Option<Vec<ImportEntry>> {
    let mut imports = Vec::with_capacity(count);
    for i in 0..count {
        let base = offset + i * entry_size;
        let class_name_idx = i32_at(buf, base + 8)?;
        let object_name_idx = i32_at(buf, base + 20)?;
        imports.push(ImportEntry {
            class_name: resolve_name(names, class_name_idx),
            object_name: resolve_name(names, object_name_idx),
        });
    }
    Some(imports)
}

fn resolve_name(names: &[String], index: i32) -> Option<String> {
    if index < 0 {
        return None;
    }
    names.get(index as usize).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assembles a minimal legacy -7 package: summary, name table, import
    /// table (28-byte entries), export table (56-byte entries).
    struct PackageBuilder {
        names: Vec<&'static str>,
        /// (class_name_idx, object_name_idx)
        imports: Vec<(i32, i32)>,
        /// (class_index, super_index)
        exports: Vec<(i32, i32)>,
        magic: u32,
        legacy_version: i32,
        file_version_ue4: i32,
        file_version_ue5: i32,
    }

    impl PackageBuilder {
        fn new() -> PackageBuilder {
            PackageBuilder {
                names: Vec::new(),
                imports: Vec::new(),
                exports: Vec::new(),
                magic: PACKAGE_MAGIC,
                legacy_version: -7,
                file_version_ue4: 400,
                file_version_ue5: 0,
            }
        }

        fn build(&self) -> Vec<u8> {
            let mut name_table = Vec::new();
            for name in &self.names {
                let bytes = name.as_bytes();
                name_table.extend_from_slice(&(bytes.len() as i32 + 1).to_le_bytes());
                name_table.extend_from_slice(bytes);
                name_table.push(0);
                name_table.extend_from_slice(&[0u8; 4]); // hashes
            }

            let mut import_table = Vec::new();
            for (class_name_idx, object_name_idx) in &self.imports {
                let mut entry = [0u8; 28];
                entry[8..12].copy_from_slice(&class_name_idx.to_le_bytes());
                entry[20..24].copy_from_slice(&object_name_idx.to_le_bytes());
                import_table.extend_from_slice(&entry);
            }

            let mut export_table = Vec::new();
            for (class_index, super_index) in &self.exports {
                let mut entry = [0u8; 56];
                entry[0..4].copy_from_slice(&class_index.to_le_bytes());
                entry[4..8].copy_from_slice(&super_index.to_le_bytes());
                export_table.extend_from_slice(&entry);
            }

            let folder = b"None\0";
            let localization = b"None\0";
            // summary size up to the five table fields
            let mut summary_len = 4 // magic
                + 4 // legacy
                + 4 // ue3
                + 4 // ue4
                + 4 // licensee
                + 4 // custom version count
                + 4 // total header size
                + 4 + folder.len() // folder FString
                + 4 // package flags
                + 4 + 4 // name count + offset
                + 5 * 4; // export/import/depends fields
            if self.legacy_version <= -8 {
                summary_len += 4; // ue5 version
            }
            if self.file_version_ue5 > 0 {
                summary_len += 8; // soft object paths count + offset
            }
            if self.file_version_ue4 >= 516 {
                summary_len += 4 + localization.len() + 8;
            }
            let name_offset = summary_len;
            let import_offset = name_offset + name_table.len();
            let export_offset = import_offset + import_table.len();
            let depends_offset = export_offset + export_table.len();

            let mut buf = Vec::new();
            buf.extend_from_slice(&self.magic.to_le_bytes());
            buf.extend_from_slice(&self.legacy_version.to_le_bytes());
            buf.extend_from_slice(&0i32.to_le_bytes()); // ue3
            buf.extend_from_slice(&self.file_version_ue4.to_le_bytes());
            if self.legacy_version <= -8 {
                buf.extend_from_slice(&self.file_version_ue5.to_le_bytes());
            }
            buf.extend_from_slice(&0i32.to_le_bytes()); // licensee
            buf.extend_from_slice(&0i32.to_le_bytes()); // custom versions
            buf.extend_from_slice(&(depends_offset as i32).to_le_bytes()); // header size
            buf.extend_from_slice(&(folder.len() as i32).to_le_bytes());
            buf.extend_from_slice(folder);
            buf.extend_from_slice(&0i32.to_le_bytes()); // flags
            buf.extend_from_slice(&(self.names.len() as i32).to_le_bytes());
            buf.extend_from_slice(&(name_offset as i32).to_le_bytes());
            if self.file_version_ue5 > 0 {
                buf.extend_from_slice(&[0u8; 8]); // soft object paths
            }
            if self.file_version_ue4 >= 516 {
                buf.extend_from_slice(&(localization.len() as i32).to_le_bytes());
                buf.extend_from_slice(localization);
                buf.extend_from_slice(&[0u8; 8]); // gatherable text data
            }
            buf.extend_from_slice(&(self.exports.len() as i32).to_le_bytes());
            buf.extend_from_slice(&(export_offset as i32).to_le_bytes());
            buf.extend_from_slice(&(self.imports.len() as i32).to_le_bytes());
            buf.extend_from_slice(&(import_offset as i32).to_le_bytes());
            buf.extend_from_slice(&(depends_offset as i32).to_le_bytes());
            assert_eq!(buf.len(), summary_len);

            buf.extend_from_slice(&name_table);
            buf.extend_from_slice(&import_table);
            buf.extend_from_slice(&export_table);
            buf
        }
    }

    #[test]
    fn blueprint_export_resolves_class_and_parent() {
        let mut pkg = PackageBuilder::new();
        pkg.names = vec!["CoreUObject", "Class", "BlueprintGeneratedClass", "Character", "Engine"];
        pkg.imports = vec![
            (0, 0),
            (0, 4),
            (1, 2), // import index 2: Class / BlueprintGeneratedClass
            (0, 0),
            (1, 3), // import index 4: Character
        ];
        pkg.exports = vec![(-3, -5)];
        let header = parse_asset_header(&pkg.build());
        assert_eq!(header.asset_class.as_deref(), Some("BlueprintGeneratedClass"));
        assert_eq!(header.parent_class.as_deref(), Some("Character"));
    }

    #[test]
    fn fallback_uses_first_export_class() {
        let mut pkg = PackageBuilder::new();
        pkg.names = vec!["CoreUObject", "Class", "Texture2D"];
        pkg.imports = vec![(1, 2)];
        pkg.exports = vec![(-1, 0)];
        let header = parse_asset_header(&pkg.build());
        assert_eq!(header.asset_class.as_deref(), Some("Texture2D"));
        assert_eq!(header.parent_class, None);
    }

    #[test]
    fn bad_magic_yields_empty() {
        let mut pkg = PackageBuilder::new();
        pkg.magic = 0xDEAD_BEEF;
        pkg.names = vec!["Class"];
        assert_eq!(parse_asset_header(&pkg.build()), AssetHeader::default());
    }

    #[test]
    fn unknown_legacy_version_yields_empty() {
        let mut pkg = PackageBuilder::new();
        pkg.legacy_version = -4;
        assert_eq!(parse_asset_header(&pkg.build()), AssetHeader::default());
    }

    #[test]
    fn ue5_summary_with_soft_object_paths_decodes() {
        let mut pkg = PackageBuilder::new();
        pkg.legacy_version = -8;
        pkg.file_version_ue5 = 1002;
        pkg.names = vec!["CoreUObject", "Class", "BlueprintGeneratedClass", "Pawn"];
        pkg.imports = vec![(1, 2), (1, 3)];
        pkg.exports = vec![(-1, -2)];
        let header = parse_asset_header(&pkg.build());
        assert_eq!(header.asset_class.as_deref(), Some("BlueprintGeneratedClass"));
        assert_eq!(header.parent_class.as_deref(), Some("Pawn"));
    }

    #[test]
    fn localization_id_summary_decodes() {
        let mut pkg = PackageBuilder::new();
        pkg.file_version_ue4 = 522;
        pkg.names = vec!["CoreUObject", "Class", "AnimBlueprintGeneratedClass", "AnimInstance"];
        pkg.imports = vec![(1, 2), (1, 3)];
        pkg.exports = vec![(-1, -2)];
        let header = parse_asset_header(&pkg.build());
        assert_eq!(header.asset_class.as_deref(), Some("AnimBlueprintGeneratedClass"));
        assert_eq!(header.parent_class.as_deref(), Some("AnimInstance"));
    }

    #[test]
    fn positive_super_index_leaves_parent_unset() {
        let mut pkg = PackageBuilder::new();
        pkg.names = vec!["CoreUObject", "Class", "BlueprintGeneratedClass"];
        pkg.imports = vec![(1, 2)];
        pkg.exports = vec![(-1, 3)];
        let header = parse_asset_header(&pkg.build());
        assert_eq!(header.asset_class.as_deref(), Some("BlueprintGeneratedClass"));
        assert_eq!(header.parent_class, None);
    }

    #[test]
    fn oversized_custom_version_count_rejected() {
        let mut pkg = PackageBuilder::new();
        pkg.names = vec!["Class"];
        let mut buf = pkg.build();
        // custom version count sits after magic+legacy+ue3+ue4+licensee
        buf[20..24].copy_from_slice(&5000i32.to_le_bytes());
        assert_eq!(parse_asset_header(&buf), AssetHeader::default());
    }

    #[test]
    fn truncated_buffer_yields_empty() {
        let mut pkg = PackageBuilder::new();
        pkg.names = vec!["CoreUObject", "Class", "BlueprintGeneratedClass"];
        pkg.imports = vec![(1, 2)];
        pkg.exports = vec![(-1, 0)];
        let full = pkg.build();
        for cut in [3, 9, 24, full.len() / 2] {
            assert_eq!(parse_asset_header(&full[..cut]), AssetHeader::default());
        }
    }

    #[test]
    fn empty_tables_yield_empty() {
        let pkg = PackageBuilder::new();
        assert_eq!(parse_asset_header(&pkg.build()), AssetHeader::default());
    }

    #[test]
    fn wide_names_decode() {
        // hand-build a name table with one UTF-16 entry
        let mut buf = Vec::new();
        let text: Vec<u16> = "Wide\0".encode_utf16().collect();
        buf.extend_from_slice(&(-(text.len() as i32)).to_le_bytes());
        for unit in &text {
            buf.extend_from_slice(&unit.to_le_bytes());
        }
        buf.extend_from_slice(&[0u8; 4]);
        let names = read_name_table(&buf, 0, 1).unwrap();
        assert_eq!(names, vec!["Wide".to_string()]);
    }
}
