//! Line-oriented parser for the scripting language (`.as`).
//!
//! Brace-depth tracking plus anchored regexes; no AST. Malformed lines are
//! skipped, never fatal. Type declarations are only recognized at depth 0;
//! members only at the depth directly inside the enclosing type body.

use regex::Regex;
use std::collections::HashSet;

use crate::parse_common::{
    classify_member, count_braces, enum_value_name, match_reflection_macro, PendingMarker,
};
use crate::types::{MemberKind, ParsedMember, ParsedType, TypeKind};

/// How many lines a pending `UCLASS`/`USTRUCT`/`UENUM` marker stays valid
/// before the declaration it decorates.
const MARKER_WINDOW: usize = 2;

pub struct ScriptParser {
    re_class: Regex,
    re_struct: Regex,
    re_enum: Regex,
    re_standalone: Regex,
    re_namespace: Regex,
}

struct OpenType {
    name: String,
    start_depth: i32,
    entered: bool,
    is_enum: bool,
}

impl Default for ScriptParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptParser {
    pub fn new() -> ScriptParser {
        ScriptParser {
            re_class: Regex::new(r"^class\s+([A-Za-z_]\w*)(?:\s*:\s*([A-Za-z_][\w:]*))?")
                .unwrap(),
            re_struct: Regex::new(r"^struct\s+(F\w*)(?:\s*:\s*([A-Za-z_][\w:]*))?").unwrap(),
            re_enum: Regex::new(r"^enum\s+(E\w*)").unwrap(),
            re_standalone: Regex::new(r"^(event|delegate)\s+[\w<>:,&*\s]+?\s+(F\w+)\s*\(")
                .unwrap(),
            re_namespace: Regex::new(r"^namespace\s+([A-Za-z_]\w*)").unwrap(),
        }
    }

    pub fn parse(&self, content: &str) -> (Vec<ParsedType>, Vec<ParsedMember>) {
        let mut types: Vec<ParsedType> = Vec::new();
        let mut members: Vec<ParsedMember> = Vec::new();

        let mut depth: i32 = 0;
        let mut current: Option<OpenType> = None;
        let mut pending_type: Option<PendingMarker> = None;
        let mut pending_member: Option<PendingMarker> = None;
        let mut seen_namespaces: HashSet<String> = HashSet::new();

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
                if let Some(parsed) = self.match_top_level(
                    line,
                    line_no,
                    &mut pending_type,
                    &mut seen_namespaces,
                ) {
                    match parsed {
                        TopLevel::Open { ty, is_enum, emit } => {
                            current = Some(OpenType {
                                name: ty.name.clone(),
                                start_depth: depth,
                                entered: false,
                                is_enum,
                            });
                            if emit {
                                types.push(ty);
                            }
                        }
                        TopLevel::Standalone(ty) => types.push(ty),
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
                    if !matches!(line, "{" | "}" | "};") {
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
                    if let Some(member) = classify_member(
                        line,
                        line_no,
                        Some(open.name.as_str()),
                        pending_member.as_ref(),
                    ) {
                        members.push(member);
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

    fn match_top_level(
        &self,
        line: &str,
        line_no: usize,
        pending_type: &mut Option<PendingMarker>,
        seen_namespaces: &mut HashSet<String>,
    ) -> Option<TopLevel> {
        if let Some(caps) = self.re_class.captures(line) {
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            if name.starts_with(['U', 'A', 'I', 'F']) {
                let kind =
                    if name.starts_with('I') { TypeKind::Interface } else { TypeKind::Class };
                let specifiers = take_marker(pending_type, "UCLASS", line_no);
                return Some(TopLevel::Open {
                    ty: ParsedType {
                        name: name.to_string(),
                        kind,
                        parent: caps.get(2).map(|m| m.as_str().to_string()),
                        line: line_no,
                        specifiers,
                    },
                    is_enum: false,
                    emit: true,
                });
            }
        }

        if let Some(caps) = self.re_struct.captures(line) {
            let specifiers = take_marker(pending_type, "USTRUCT", line_no);
            return Some(TopLevel::Open {
                ty: ParsedType {
                    name: caps[1].to_string(),
                    kind: TypeKind::Struct,
                    parent: caps.get(2).map(|m| m.as_str().to_string()),
                    line: line_no,
                    specifiers,
                },
                is_enum: false,
                emit: true,
            });
        }

        if let Some(caps) = self.re_enum.captures(line) {
            let specifiers = take_marker(pending_type, "UENUM", line_no);
            return Some(TopLevel::Open {
                ty: ParsedType {
                    name: caps[1].to_string(),
                    kind: TypeKind::Enum,
                    parent: None,
                    line: line_no,
                    specifiers,
                },
                is_enum: true,
                emit: true,
            });
        }

        if let Some(caps) = self.re_standalone.captures(line) {
            let kind =
                if &caps[1] == "event" { TypeKind::Event } else { TypeKind::Delegate };
            return Some(TopLevel::Standalone(ParsedType {
                name: caps[2].to_string(),
                kind,
                parent: None,
                line: line_no,
                specifiers: Vec::new(),
            }));
        }

        if let Some(caps) = self.re_namespace.captures(line) {
            let name = caps[1].to_string();
            let emit = seen_namespaces.insert(name.clone());
            // repeated namespace: still enter the body, emit no second row
            return Some(TopLevel::Open {
                ty: ParsedType {
                    name,
                    kind: TypeKind::Namespace,
                    parent: None,
                    line: line_no,
                    specifiers: Vec::new(),
                },
                is_enum: false,
                emit,
            });
        }

        None
    }
}

enum TopLevel {
    Open { ty: ParsedType, is_enum: bool, emit: bool },
    Standalone(ParsedType),
}

/// Consume a pending type marker when it matches the expected macro and sits
/// within the marker window; stale or mismatched markers are dropped.
fn take_marker(
    pending: &mut Option<PendingMarker>,
    expect: &str,
    line_no: usize,
) -> Vec<String> {
    let specs = match pending.as_ref() {
        Some(m) if m.macro_name == expect && line_no.saturating_sub(m.line) <= MARKER_WINDOW => {
            m.specifiers.clone()
        }
        _ => Vec::new(),
    };
    *pending = None;
    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (Vec<ParsedType>, Vec<ParsedMember>) {
        ScriptParser::new().parse(src)
    }

    #[test]
    fn reflected_class_with_members() {
        let src = "UCLASS(Blueprintable)\n\
                   class ADiscoveryPlayerController : ADiscoveryPlayerControllerBase\n\
                   {\n\
                   \tUFUNCTION()\n\
                   \tvoid BeginPlay()\n\
                   \t{\n\
                   \t}\n\
                   \tUPROPERTY()\n\
                   \tint32 Health;\n\
                   }\n";
        let (types, members) = parse(src);
        assert_eq!(types.len(), 1);
        let ty = &types[0];
        assert_eq!(ty.name, "ADiscoveryPlayerController");
        assert_eq!(ty.kind, TypeKind::Class);
        assert_eq!(ty.parent.as_deref(), Some("ADiscoveryPlayerControllerBase"));
        assert_eq!(ty.specifiers, vec!["Blueprintable"]);

        assert_eq!(members.len(), 2);
        assert_eq!(members[0].name, "BeginPlay");
        assert_eq!(members[0].kind, MemberKind::Function);
        assert_eq!(members[0].specifiers, vec!["UFUNCTION"]);
        assert_eq!(members[1].name, "Health");
        assert_eq!(members[1].kind, MemberKind::Property);
        assert_eq!(members[1].specifiers, vec!["UPROPERTY"]);
        assert_eq!(members[1].owner_name.as_deref(), Some("ADiscoveryPlayerController"));
    }

    #[test]
    fn interface_prefix_switches_kind() {
        let (types, _) = parse("class IDamageable\n{\n}\n");
        assert_eq!(types[0].kind, TypeKind::Interface);
    }

    #[test]
    fn unprefixed_class_is_skipped() {
        let (types, _) = parse("class Widget\n{\n}\n");
        assert!(types.is_empty());
    }

    #[test]
    fn struct_and_enum_declarations() {
        let src = "struct FHitInfo\n{\n\tfloat Damage;\n}\n\nenum EWeaponState\n{\n\tIdle,\n\tFiring = 1,\n\tReloading\n}\n";
        let (types, members) = parse(src);
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].name, "FHitInfo");
        assert_eq!(types[0].kind, TypeKind::Struct);
        assert_eq!(types[1].name, "EWeaponState");
        assert_eq!(types[1].kind, TypeKind::Enum);

        let values: Vec<&str> = members
            .iter()
            .filter(|m| m.kind == MemberKind::EnumValue)
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(values, vec!["Idle", "Firing", "Reloading"]);
        assert!(members.iter().any(|m| m.name == "Damage" && m.kind == MemberKind::Property));
    }

    #[test]
    fn script_enum_does_not_skip_umeta_lines() {
        // Deliberate asymmetry with the C++ parser: a UMETA line inside a
        // script enum body parses as a value named UMETA.
        let src = "enum EState\n{\n\tAlive,\n\tUMETA(Hidden)\n}\n";
        let (_, members) = parse(src);
        let values: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(values, vec!["Alive", "UMETA"]);
    }

    #[test]
    fn event_and_delegate_are_standalone() {
        let src = "event void FOnDied(AActor Victim)\ndelegate bool FCanFire(int32 Ammo)\n";
        let (types, _) = parse(src);
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].name, "FOnDied");
        assert_eq!(types[0].kind, TypeKind::Event);
        assert_eq!(types[1].name, "FCanFire");
        assert_eq!(types[1].kind, TypeKind::Delegate);
    }

    #[test]
    fn namespace_emitted_once_per_name() {
        let src = "namespace Math\n{\n\tfloat Lerp(float A, float B)\n\t{\n\t}\n}\n\nnamespace Math\n{\n\tfloat Clamp(float V)\n\t{\n\t}\n}\n";
        let (types, members) = parse(src);
        let namespaces: Vec<&ParsedType> =
            types.iter().filter(|t| t.kind == TypeKind::Namespace).collect();
        assert_eq!(namespaces.len(), 1);
        assert_eq!(namespaces[0].name, "Math");
        // members from both bodies still parse
        assert!(members.iter().any(|m| m.name == "Lerp"));
        assert!(members.iter().any(|m| m.name == "Clamp"));
    }

    #[test]
    fn stale_marker_does_not_attach() {
        let src = "UCLASS(Abstract)\n\n\nclass AFoo\n{\n}\n";
        let (types, _) = parse(src);
        // blank line cleared the marker
        assert!(types[0].specifiers.is_empty());
    }

    #[test]
    fn members_nested_below_direct_depth_are_ignored() {
        let src = "class AFoo\n{\n\tvoid Tick()\n\t{\n\t\tint32 LocalVar = 0;\n\t}\n}\n";
        let (_, members) = parse(src);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "Tick");
    }

    #[test]
    fn braces_inside_strings_do_not_change_depth() {
        let src = "class AFoo\n{\n\tvoid Log()\n\t{\n\t\tPrint(\"{\");\n\t}\n\tint32 After;\n}\n";
        let (_, members) = parse(src);
        assert!(members.iter().any(|m| m.name == "After"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let src = "class\n@@@ not code\nclass AOk\n{\n}\n";
        let (types, _) = parse(src);
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].name, "AOk");
    }

    #[test]
    fn static_and_visibility_members() {
        let src = "class AFoo\n{\n\tprivate static FVector GetOrigin()\n\t{\n\t}\n\tprotected float Speed = 3.0;\n}\n";
        let (_, members) = parse(src);
        assert_eq!(members.len(), 2);
        assert!(members[0].is_static);
        assert_eq!(members[0].name, "GetOrigin");
        assert_eq!(members[0].kind, MemberKind::Function);
        assert!(!members[1].is_static);
        assert_eq!(members[1].name, "Speed");
        assert_eq!(members[1].kind, MemberKind::Property);
    }

    #[test]
    fn members_attach_to_their_own_type() {
        let src = "class AFirst\n{\n\tint32 A;\n}\n\nclass ASecond\n{\n\tint32 B;\n}\n";
        let (types, members) = parse(src);
        assert_eq!(types.len(), 2);
        assert_eq!(members[0].owner_name.as_deref(), Some("AFirst"));
        assert_eq!(members[1].owner_name.as_deref(), Some("ASecond"));
    }

    #[test]
    fn uenum_specifiers_attach() {
        let src = "UENUM(BlueprintType)\nenum EMode\n{\n\tOn,\n\tOff\n}\n";
        let (types, _) = parse(src);
        assert_eq!(types[0].specifiers, vec!["BlueprintType"]);
        assert_eq!(types[0].kind, TypeKind::Enum);
    }

    #[test]
    fn marker_cleared_by_depth_change() {
        // the UPROPERTY pending state must not survive into the nested
        // block
        let src = "class AFoo\n{\n\tUPROPERTY(EditAnywhere)\n\tvoid Weird()\n\t{\n\t\tint32 Inner = 0;\n\t}\n\tint32 Plain;\n}\n";
        let (_, members) = parse(src);
        let plain = members.iter().find(|m| m.name == "Plain").unwrap();
        assert!(plain.specifiers.is_empty());
    }
}
