//! Primitives shared by the script and C++ parsers: literal-aware brace
//! counting, the pending reflection-marker buffer, and member
//! classification over a stripped declaration line.

use crate::types::{MemberKind, ParsedMember};

/// Reserved words that can never be a member identifier or the first token
/// of a return/property type.
const KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "return", "switch", "case", "break", "new", "delete", "cast",
    "import", "from", "class", "struct", "enum", "event", "delegate", "namespace", "mixin",
    "access", "override", "property", "settings", "private", "protected", "public", "UCLASS",
    "USTRUCT", "UENUM", "UFUNCTION", "UPROPERTY",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

// ---------------------------------------------------------------------------
// Brace counting
// ---------------------------------------------------------------------------

/// Net `{` minus `}` on a line, ignoring braces inside string/char literals
/// and anything after a `//` comment.
pub fn count_braces(line: &str) -> i32 {
    let mut net = 0i32;
    let mut in_string: Option<char> = None;
    let mut escaped = false;
    let bytes: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match c {
            '/' if i + 1 < bytes.len() && bytes[i + 1] == '/' => break,
            '"' | '\'' => in_string = Some(c),
            '{' => net += 1,
            '}' => net -= 1,
            _ => {}
        }
        i += 1;
    }
    net
}

// ---------------------------------------------------------------------------
// Pending reflection markers
// ---------------------------------------------------------------------------

/// A reflection macro seen on an earlier line, waiting for the declaration
/// it decorates. One-slot buffer; cleared on blank lines, depth changes,
/// and after it attaches.
#[derive(Clone, Debug)]
pub struct PendingMarker {
    pub macro_name: &'static str,
    pub specifiers: Vec<String>,
    pub line: usize,
}

/// Split the parenthesized payload of a reflection macro into trimmed,
/// non-empty specifier strings.
pub fn split_specifiers(payload: &str) -> Vec<String> {
    payload
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Match a line against one of the reflection macros and capture its
/// payload. Returns the macro name and comma-split specifiers.
pub fn match_reflection_macro(line: &str) -> Option<(&'static str, Vec<String>)> {
    for name in ["UCLASS", "USTRUCT", "UENUM", "UFUNCTION", "UPROPERTY"] {
        if let Some(rest) = line.strip_prefix(name) {
            let rest = rest.trim_start();
            if let Some(inner) = rest.strip_prefix('(') {
                let payload = inner.split(')').next().unwrap_or("");
                return Some((name, split_specifiers(payload)));
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Member classification
// ---------------------------------------------------------------------------

/// Strip leading visibility keywords and `static` from a declaration line.
/// Returns the remainder and whether `static` was seen.
pub fn strip_visibility_and_static(line: &str) -> (&str, bool) {
    let mut rest = line.trim_start();
    let mut is_static = false;
    loop {
        let mut stripped = false;
        for vis in ["private", "protected", "public"] {
            if let Some(after) = rest.strip_prefix(vis) {
                if after.starts_with(char::is_whitespace) || after.starts_with(':') {
                    rest = after.trim_start_matches(':').trim_start();
                    stripped = true;
                }
            }
        }
        if let Some(after) = rest.strip_prefix("static") {
            if after.starts_with(char::is_whitespace) {
                rest = after.trim_start();
                is_static = true;
                stripped = true;
            }
        }
        if !stripped {
            break;
        }
    }
    (rest, is_static)
}

/// Classify a declaration at direct-member depth as a function or property.
///
/// A function looks like `<Type tokens> <Ident> (`; a property looks like
/// `<Type tokens> <Ident> [=;]`. Neither the identifier nor the first type
/// token may be a reserved keyword. Lines that fit neither shape yield
/// `None` and are skipped.
pub fn classify_member(
    line: &str,
    current_line: usize,
    owner: Option<&str>,
    pending: Option<&PendingMarker>,
) -> Option<ParsedMember> {
    let (rest, is_static) = strip_visibility_and_static(line);
    if rest.is_empty() {
        return None;
    }

    let (kind, name) = match_function(rest).or_else(|| match_property(rest))?;

    let specifiers = match pending {
        Some(marker) => {
            let mut specs = Vec::with_capacity(marker.specifiers.len() + 1);
            specs.push(marker.macro_name.to_string());
            specs.extend(marker.specifiers.iter().cloned());
            specs
        }
        None => Vec::new(),
    };

    Some(ParsedMember {
        name,
        kind,
        line: current_line,
        is_static,
        specifiers,
        owner_name: owner.map(|o| o.to_string()),
    })
}

/// `<Type tokens> <Ident> (`: the identifier directly precedes the open
/// parenthesis and at least one type token precedes the identifier.
fn match_function(rest: &str) -> Option<(MemberKind, String)> {
    let open = rest.find('(')?;
    let before = rest[..open].trim_end();
    let (type_part, ident) = split_trailing_ident(before)?;
    if !valid_type_tokens(type_part) || is_keyword(ident) {
        return None;
    }
    Some((MemberKind::Function, ident.to_string()))
}

/// `<Type tokens> <Ident> [=;]`.
fn match_property(rest: &str) -> Option<(MemberKind, String)> {
    let stop = rest.find(['=', ';'])?;
    let before = rest[..stop].trim_end();
    let (type_part, ident) = split_trailing_ident(before)?;
    if !valid_type_tokens(type_part) || is_keyword(ident) {
        return None;
    }
    Some((MemberKind::Property, ident.to_string()))
}

/// Split `FVector Location` into (`FVector`, `Location`). The identifier is
/// the trailing run of word characters; everything before it must be
/// non-empty.
fn split_trailing_ident(s: &str) -> Option<(&str, &str)> {
    let idx = s
        .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .map(|i| i + s[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1))?;
    let ident = &s[idx..];
    let type_part = s[..idx].trim_end();
    if ident.is_empty() || type_part.is_empty() {
        return None;
    }
    if !ident.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') {
        return None;
    }
    Some((type_part, ident))
}

/// The first token of the type must be identifier-like and not a keyword.
fn valid_type_tokens(type_part: &str) -> bool {
    let first = type_part
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .find(|t| !t.is_empty());
    match first {
        Some(token) => {
            token.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && !is_keyword(token)
        }
        None => false,
    }
}

/// First identifier on an enum-body line, cut at `,`, `=`, `}`, or EOL.
pub fn enum_value_name(line: &str) -> Option<String> {
    let cut = line.find([',', '=', '}']).map(|i| &line[..i]).unwrap_or(line);
    let word: String = cut
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if word.is_empty() || !word.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    {
        return None;
    }
    Some(word)
}
