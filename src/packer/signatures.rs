//! Signature summaries for files packed below the full-content tier.
//!
//! When AST information exists for a file the summary lists its exported
//! surface; otherwise the first non-blank lines of the file stand in. Both
//! forms are deterministic for identical inputs.

use crate::analysis::snapshot::{ClassSig, FileAst, FunctionSig};

/// Number of leading non-blank lines used by the non-AST fallback.
const FALLBACK_LINE_COUNT: usize = 20;

/// Stable marker separating signature sections for oversized files.
pub const SECTION_MARKER: &str = "---- section ----";

/// Build the signature summary for a file.
pub fn signature_summary(path: &str, content: &str, ast: Option<&FileAst>) -> String {
    match ast {
        Some(ast) if has_exports(ast) => ast_summary(path, ast),
        _ => fallback_summary(path, content),
    }
}

fn has_exports(ast: &FileAst) -> bool {
    !ast.functions.is_empty() || !ast.classes.is_empty() || !ast.constants.is_empty()
}

/// Summary from exported AST symbols: functions, classes, constants, and an
/// import count line. Non-exported symbols never appear here.
fn ast_summary(path: &str, ast: &FileAst) -> String {
    let mut lines = vec![format!("// signatures: {path}")];

    for func in &ast.functions {
        lines.push(format_function(func, "fn"));
    }

    for class in &ast.classes {
        lines.push(format_class(class));
        for method in &class.methods {
            lines.push(format!("  {}", format_function(method, "method")));
        }
    }

    for constant in &ast.constants {
        let type_part = constant
            .type_name
            .as_deref()
            .map(|t| format!(": {t}"))
            .unwrap_or_default();
        let value_part = if constant.has_value { " = ..." } else { "" };
        lines.push(format!("const {}{}{}", constant.name, type_part, value_part));
    }

    let package_count = ast
        .imports
        .iter()
        .map(|i| i.module.as_str())
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    lines.push(format!(
        "imports: {} from {} packages",
        ast.imports.len(),
        package_count
    ));

    lines.join("\n")
}

fn format_function(func: &FunctionSig, keyword: &str) -> String {
    let params = func
        .params
        .iter()
        .map(|p| match &p.type_name {
            Some(t) => format!("{}: {}", p.name, t),
            None => p.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ");
    let ret = func
        .return_type
        .as_deref()
        .map(|t| format!(" -> {t}"))
        .unwrap_or_default();
    let asyncness = if func.is_async { "async " } else { "" };
    format!("{asyncness}{keyword} {}({params}){ret}", func.name)
}

fn format_class(class: &ClassSig) -> String {
    let generics = class.generics.as_deref().unwrap_or_default();
    let mut header = format!("class {}{}", class.name, generics);
    if let Some(base) = &class.extends {
        header.push_str(&format!(" extends {base}"));
    }
    if !class.implements.is_empty() {
        header.push_str(&format!(" implements {}", class.implements.join(", ")));
    }
    header
}

/// Fallback summary when no AST is available: the file's first non-blank
/// lines under the same header format.
fn fallback_summary(path: &str, content: &str) -> String {
    let mut lines = vec![format!("// signatures: {path}")];
    lines.extend(
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .take(FALLBACK_LINE_COUNT)
            .map(|l| l.to_string()),
    );
    lines.join("\n")
}

/// Join summary chunks for an oversized file with the stable section marker.
pub fn join_sections(sections: &[String]) -> String {
    sections.join(&format!("\n{SECTION_MARKER}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::snapshot::{ImportRecord, ParamSig};

    fn ast_with_function() -> FileAst {
        FileAst {
            functions: vec![FunctionSig {
                name: "load".to_string(),
                params: vec![ParamSig {
                    name: "path".to_string(),
                    type_name: Some("string".to_string()),
                }],
                return_type: Some("Config".to_string()),
                is_async: true,
            }],
            imports: vec![
                ImportRecord {
                    module: "fs".to_string(),
                    symbols: vec!["readFile".to_string()],
                },
                ImportRecord {
                    module: "fs".to_string(),
                    symbols: vec!["writeFile".to_string()],
                },
                ImportRecord {
                    module: "yaml".to_string(),
                    symbols: vec!["parse".to_string()],
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_ast_summary_lists_exports_and_import_counts() {
        let summary = signature_summary("src/config.ts", "ignored", Some(&ast_with_function()));
        assert!(summary.starts_with("// signatures: src/config.ts"));
        assert!(summary.contains("async fn load(path: string) -> Config"));
        assert!(summary.contains("imports: 3 from 2 packages"));
    }

    #[test]
    fn test_fallback_uses_first_non_blank_lines() {
        let content = "\n\nline one\nline two\n\nline three\n";
        let summary = signature_summary("src/raw.txt", content, None);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[0], "// signatures: src/raw.txt");
        assert_eq!(lines[1], "line one");
        assert_eq!(lines[3], "line three");
    }

    #[test]
    fn test_fallback_caps_line_count() {
        let content = (0..100).map(|i| format!("line {i}\n")).collect::<String>();
        let summary = signature_summary("big.txt", &content, None);
        assert_eq!(summary.lines().count(), FALLBACK_LINE_COUNT + 1);
    }

    #[test]
    fn test_determinism() {
        let ast = ast_with_function();
        let a = signature_summary("src/config.ts", "x", Some(&ast));
        let b = signature_summary("src/config.ts", "x", Some(&ast));
        assert_eq!(a, b);
    }
}
