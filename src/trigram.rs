//! Trigram extraction and content-row helpers backing the grep index.
//!
//! A trigram is a 3-byte sliding-window substring of a file's raw bytes,
//! packed big-endian into the low 24 bits of a `u32`. The store keeps one
//! posting row per `(trigram, file)` pair; grep intersects postings to pick
//! candidate files, then verifies candidates against their compressed
//! content rows.

use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Packing
// ---------------------------------------------------------------------------

#[inline]
pub fn pack_trigram(b0: u8, b1: u8, b2: u8) -> u32 {
    ((b0 as u32) << 16) | ((b1 as u32) << 8) | (b2 as u32)
}

#[inline]
pub fn unpack_trigram(t: u32) -> [u8; 3] {
    [(t >> 16) as u8, (t >> 8) as u8, t as u8]
}

/// Distinct trigrams of a byte stream, sorted. Arbitrary bytes are fine;
/// the window slides over raw bytes, not characters.
pub fn extract_trigrams(content: &[u8]) -> Vec<u32> {
    if content.len() < 3 {
        return Vec::new();
    }
    let mut set = BTreeSet::new();
    for w in content.windows(3) {
        set.insert(pack_trigram(w[0], w[1], w[2]));
    }
    set.into_iter().collect()
}

/// All case foldings of a packed trigram (up to 8 for three ASCII letters).
/// Used to keep case-insensitive grep sound against the byte-exact index.
pub fn case_variants(t: u32) -> Vec<u32> {
    let [b0, b1, b2] = unpack_trigram(t);
    let mut out = Vec::with_capacity(8);
    for v0 in byte_cases(b0) {
        for v1 in byte_cases(b1) {
            for v2 in byte_cases(b2) {
                out.push(pack_trigram(v0, v1, v2));
            }
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

fn byte_cases(b: u8) -> impl Iterator<Item = u8> {
    let lower = b.to_ascii_lowercase();
    let upper = b.to_ascii_uppercase();
    let second = if upper != lower { Some(upper) } else { None };
    std::iter::once(lower).chain(second)
}

// ---------------------------------------------------------------------------
// Mandatory trigrams of a search pattern
// ---------------------------------------------------------------------------

/// Conservatively extract the trigrams a regex pattern requires in any
/// match. Literal runs are broken at metacharacters; alternation anywhere
/// defeats extraction entirely. `None` means the caller must scan every
/// file.
pub fn required_trigrams(pattern: &str) -> Option<Vec<u32>> {
    if pattern.contains('|') {
        return None;
    }

    let mut runs: Vec<Vec<u8>> = Vec::new();
    let mut run: Vec<u8> = Vec::new();
    let mut chars = pattern.chars().peekable();

    macro_rules! break_run {
        () => {
            if !run.is_empty() {
                runs.push(std::mem::take(&mut run));
            }
        };
    }

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                // escaped metacharacter is a literal byte
                Some(esc)
                    if matches!(
                        esc,
                        '.' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$'
                            | '\\' | '/' | '-'
                    ) =>
                {
                    push_char(&mut run, esc);
                }
                // character classes and anchors break the run
                _ => break_run!(),
            },
            '[' => {
                // skip the class body, honoring escapes
                break_run!();
                let mut escaped = false;
                for inner in chars.by_ref() {
                    if escaped {
                        escaped = false;
                    } else if inner == '\\' {
                        escaped = true;
                    } else if inner == ']' {
                        break;
                    }
                }
            }
            '*' | '?' => {
                // previous literal became optional
                run.pop();
                break_run!();
            }
            '{' => {
                run.pop();
                break_run!();
                for inner in chars.by_ref() {
                    if inner == '}' {
                        break;
                    }
                }
            }
            '+' => {
                // previous literal repeats: mandatory, but adjacency ends
                break_run!();
            }
            '(' | ')' | '.' | '^' | '$' => break_run!(),
            other => push_char(&mut run, other),
        }
    }
    break_run!();

    let mut trigrams = BTreeSet::new();
    for r in &runs {
        if r.len() < 3 {
            continue;
        }
        for w in r.windows(3) {
            trigrams.insert(pack_trigram(w[0], w[1], w[2]));
        }
    }
    if trigrams.is_empty() {
        None
    } else {
        Some(trigrams.into_iter().collect())
    }
}

fn push_char(run: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    run.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

// ---------------------------------------------------------------------------
// Content rows
// ---------------------------------------------------------------------------

const ZSTD_LEVEL: i32 = 3;

pub fn compress_content(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    zstd::stream::encode_all(raw, ZSTD_LEVEL)
}

pub fn decompress_content(compressed: &[u8]) -> std::io::Result<Vec<u8>> {
    zstd::stream::decode_all(compressed)
}

/// xxh3 of the raw bytes, hex-encoded.
pub fn content_hash(raw: &[u8]) -> String {
    format!("{:016x}", xxhash_rust::xxh3::xxh3_64(raw))
}
