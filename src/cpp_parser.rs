//! Line-oriented parser for C++ headers and translation units.
//!
//! Shares the script parser's skeleton: brace-depth tracking, anchored
//! regexes, pending reflection markers. Differences: `_API` export
//! decorations and `final`, access-specified inheritance, forward
//! declarations skipped, the delegate macro family at top level, and the
//! rule that a member row requires a preceding `UFUNCTION`/`UPROPERTY`
//! marker (only the reflected surface is indexed for C++).

use regex::Regex;

use crate::parse_common::{
    classify_member, count_braces, enum_value_name, match_reflection_macro, PendingMarker,
};
use crate::types::{MemberKind, ParsedMember, ParsedType, TypeKind};

const MARKER_WINDOW: usize = 2;

pub struct CppParser {
    re_class: Regex,
    re_struct: Regex,
    re_enum: Regex,
    re_delegate: Regex,
    re_event: Regex,
}

struct OpenType {
    name: String,
    start_depth: i32,
    entered: bool,
    is_enum: bool,
}

impl Default for CppParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CppParser {
    pub fn new() -> CppParser {
        CppParser {
            re_class: Regex::new(
                r"^class\s+(?:[A-Z]\w*_API\s+)?([A-Za-z_]\w*)(?:\s+final)?(?:\s*:\s*(?:public|private|protected)\s+([A-Za-z_][\w:]*))?",
            )
            .unwrap(),
            re_struct: Regex::new(
                r"^struct\s+(?:[A-Z]\w*_API\s+)?([A-Za-z_]\w*)(?:\s+final)?(?:\s*:\s*(?:public|private|protected)\s+([A-Za-z_][\w:]*))?",
            )
            .unwrap(),
            re_enum: Regex::new(r"^enum\s+(?:class\s+|struct\s+)?([A-Za-z_]\w*)").unwrap(),
            re_delegate: Regex::new(
                r"^(DECLARE_(?:DYNAMIC_)?(?:MULTICAST_)?DELEGATE(?:_RetVal)?(?:_[A-Za-z]\w*)?)\s*\(([^)]*)\)",
            )
            .unwrap(),
            re_event: Regex::new(r"^DECLARE_EVENT(?:_[A-Za-z]\w*)?\s*\(([^)]*)\)").unwrap(),
        }
    }

    pub fn parse(&self, content: &str) -> (Vec<ParsedType>, Vec<ParsedMember>) {
        let mut types: Vec<ParsedType> = Vec::new();
        let mut members: Vec<ParsedMember> = Vec::new();

        let mut depth: i32 = 0;
        let mut current: Option<OpenType> = None;
        let mut pending_type: Option<PendingMarker> = None;
        let mut pending_member: Option<PendingMarker> = None;

        for (idx, raw_line) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();

            if line.is_empty() {
                pending_type = None;
                pending_member = None;
                continue;
            }
            if line.starts_with("//") || line.starts_with("/*") || line.starts_with('*') {
                continue;
            }
            if line.starts_with('#') {
                continue;
            }

            if let Some((macro_name, specifiers)) = match_reflection_macro(line) {
                let marker = PendingMarker { macro_name, specifiers, line: line_no };
                match macro_name {
                    "UFUNCTION" | "UPROPERTY" => pending_member = Some(marker),
                    _ => pending_type = Some(marker),
                }
                depth += count_braces(line);
                continue;
            }

            if depth == 0 {
                if let Some(ty) = self.match_delegate_macro(line, line_no) {
                    types.push(ty);
                    continue;
                }
                if let Some((ty, is_enum)) =
                    self.match_type_decl(line, line_no, &mut pending_type)
                {
                    if let Some(ty) = ty {
                        current = Some(OpenType {
                            name: ty.name.clone(),
                            start_depth: depth,
                            entered: false,
                            is_enum,
                        });
                        types.push(ty);
                    }
                    let net = count_braces(line);
                    depth += net;
                    if let Some(open) = current.as_mut() {
                        if depth > open.start_depth {
                            open.entered = true;
                        }
                    }
                    continue;
                }
            } else if let Some(open) = current.as_ref() {
                if open.is_enum {
                    let skip = line.starts_with("UMETA") || line.starts_with("GENERATED");
                    if !skip && !matches!(line, "{" | "}" | "};") {
                        if let Some(name) = enum_value_name(line) {
                            members.push(ParsedMember {
                                name,
                                kind: MemberKind::EnumValue,
                                line: line_no,
                                is_static: false,
                                specifiers: Vec::new(),
                                owner_name: Some(open.name.clone()),
                            });
                        }
                    }
                } else if depth == open.start_depth + 1 {
                    // only the reflected surface: no marker, no member
                    if let Some(marker) = pending_member.as_ref() {
                        if let Some(member) = classify_member(
                            line,
                            line_no,
                            Some(open.name.as_str()),
                            Some(marker),
                        ) {
                            members.push(member);
                        }
                    }
                    pending_member = None;
                }
            }

            let net = count_braces(line);
            if net != 0 {
                depth += net;
                pending_type = None;
                pending_member = None;
                if let Some(open) = current.as_mut() {
                    if depth > open.start_depth {
                        open.entered = true;
                    } else if open.entered && depth <= open.start_depth {
                        current = None;
                    }
                }
            }
        }

        (types, members)
    }

    /// Class/struct/enum recognition at top level. Returns
    /// `Some((None, _))` when the line is a declaration to consume without
    /// emitting (forward declaration).
    #[allow(clippy::type_complexity)]
    fn match_type_decl(
        &self,
        line: &str,
        line_no: usize,
        pending_type: &mut Option<PendingMarker>,
    ) -> Option<(Option<ParsedType>, bool)> {
        if let Some(caps) = self.re_class.captures(line) {
            if is_forward_declaration(line) {
                return Some((None, false));
            }
            let name = caps[1].to_string();
            let reflected = take_marker(pending_type, "UCLASS", line_no);
            if reflected.is_none() && !name.starts_with(['U', 'A', 'F', 'I']) {
                return Some((None, false));
            }
            let kind = if name.starts_with('I') { TypeKind::Interface } else { TypeKind::Class };
            return Some((
                Some(ParsedType {
                    name,
                    kind,
                    parent: caps.get(2).map(|m| m.as_str().to_string()),
                    line: line_no,
                    specifiers: reflected.unwrap_or_default(),
                }),
                false,
            ));
        }

        if let Some(caps) = self.re_struct.captures(line) {
            if is_forward_declaration(line) {
                return Some((None, false));
            }
            let name = caps[1].to_string();
            let reflected = take_marker(pending_type, "USTRUCT", line_no);
            if reflected.is_none() && !name.starts_with('F') {
                return Some((None, false));
            }
            return Some((
                Some(ParsedType {
                    name,
                    kind: TypeKind::Struct,
                    parent: caps.get(2).map(|m| m.as_str().to_string()),
                    line: line_no,
                    specifiers: reflected.unwrap_or_default(),
                }),
                false,
            ));
        }

        if let Some(caps) = self.re_enum.captures(line) {
            if is_forward_declaration(line) {
                return Some((None, false));
            }
            let name = caps[1].to_string();
            let reflected = take_marker(pending_type, "UENUM", line_no);
            if reflected.is_none() && !name.starts_with('E') {
                return Some((None, false));
            }
            return Some((
                Some(ParsedType {
                    name,
                    kind: TypeKind::Enum,
                    parent: None,
                    line: line_no,
                    specifiers: reflected.unwrap_or_default(),
                }),
                true,
            ));
        }

        None
    }

    /// The `DECLARE_*DELEGATE*` / `DECLARE_EVENT*` macro family. Single-line
    /// only; a macro spanning physical lines is not recognized.
    fn match_delegate_macro(&self, line: &str, line_no: usize) -> Option<ParsedType> {
        if let Some(caps) = self.re_delegate.captures(line) {
            let head = &caps[1];
            let args: Vec<&str> = caps[2].split(',').map(|a| a.trim()).collect();
            // RetVal variants carry the return type first, then the name
            let name = if head.contains("_RetVal") { args.get(1) } else { args.first() };
            let name = name.copied().unwrap_or("");
            if name.starts_with('F') && name.chars().skip(1).all(|c| c.is_alphanumeric() || c == '_')
            {
                return Some(ParsedType {
                    name: name.to_string(),
                    kind: TypeKind::Delegate,
                    parent: None,
                    line: line_no,
                    specifiers: Vec::new(),
                });
            }
            return None;
        }

        if let Some(caps) = self.re_event.captures(line) {
            let args: Vec<&str> = caps[1].split(',').map(|a| a.trim()).collect();
            let name = args.get(1).copied().unwrap_or("");
            if name.starts_with('F') && name.chars().skip(1).all(|c| c.is_alphanumeric() || c == '_')
            {
                return Some(ParsedType {
                    name: name.to_string(),
                    kind: TypeKind::Event,
                    parent: None,
                    line: line_no,
                    specifiers: Vec::new(),
                });
            }
        }

        None
    }
}

/// `class UFoo;` style line: ends with `;`, never opens a body.
fn is_forward_declaration(line: &str) -> bool {
    line.trim_end().ends_with(';') && !line.contains('{')
}

/// Consume a pending type marker of the expected macro within the window.
/// `Some(specs)` means the declaration is reflected (even with an empty
/// specifier list).
fn take_marker(
    pending: &mut Option<PendingMarker>,
    expect: &str,
    line_no: usize,
) -> Option<Vec<String>> {
    let specs = match pending.as_ref() {
        Some(m) if m.macro_name == expect && line_no.saturating_sub(m.line) <= MARKER_WINDOW => {
            Some(m.specifiers.clone())
        }
        _ => None,
    };
    *pending = None;
    specs
}
