//! Built-in code-analysis tools used by the reviewer and coder agents.
//!
//! All three are pure in-memory analyzers: `check_syntax` (bracket
//! balance), `extract_todos` (marker scan), `estimate_complexity`
//! (branch/loop count).

use serde_json::{json, Value};

use super::registry::{FnHandler, ToolError, ToolRegistry};
use super::spec::{ParamType, ToolParameter, ToolSpec};

const CATEGORY: &str = "code_analysis";

fn code_argument(params: &Value) -> Result<String, ToolError> {
    params
        .get("code")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments("code must be a string".to_string()))
}

/// Bracket/paren/brace balance check, ignoring string and char literals
/// and line comments. Good enough to catch truncated generations.
fn check_syntax(code: &str) -> Value {
    let mut stack: Vec<(char, usize)> = Vec::new();
    for (line_no, line) in code.lines().enumerate() {
        let mut chars = line.chars().peekable();
        let mut in_string = false;
        let mut in_char = false;
        while let Some(c) = chars.next() {
            if in_string {
                match c {
                    '\\' => {
                        chars.next();
                    }
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            if in_char {
                match c {
                    '\\' => {
                        chars.next();
                    }
                    '\'' => in_char = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '/' if chars.peek() == Some(&'/') => break,
                '"' => in_string = true,
                '\'' => {
                    // Lifetimes ('a) have no closing quote; only treat as a
                    // char literal when one plausibly closes on this line.
                    let rest: String = chars.clone().collect();
                    if rest.contains('\'') {
                        in_char = true;
                    }
                }
                '(' | '[' | '{' => stack.push((c, line_no + 1)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        _ => {
                            return json!({
                                "valid": false,
                                "error": format!("unbalanced '{}' at line {}", c, line_no + 1),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
    }
    match stack.last() {
        Some((open, line)) => json!({
            "valid": false,
            "error": format!("unclosed '{}' opened at line {}", open, line),
        }),
        None => json!({ "valid": true }),
    }
}

/// Lines containing TODO/FIXME/XXX markers.
fn extract_todos(code: &str) -> Value {
    let todos: Vec<Value> = code
        .lines()
        .enumerate()
        .filter(|(_, line)| ["TODO", "FIXME", "XXX"].iter().any(|marker| line.contains(marker)))
        .map(|(i, line)| json!({ "line": i + 1, "text": line.trim() }))
        .collect();
    json!(todos)
}

/// Rough branch/loop count as a complexity signal.
fn estimate_complexity(code: &str) -> Value {
    const BRANCH_KEYWORDS: [&str; 7] = ["if ", "else", "match ", "for ", "while ", "loop ", "loop{"];
    let mut branches = 0usize;
    for line in code.lines() {
        let line = line.trim();
        if line.starts_with("//") {
            continue;
        }
        branches += BRANCH_KEYWORDS.iter().filter(|kw| line.contains(*kw)).count();
        branches += line.matches("&&").count() + line.matches("||").count();
    }
    let lines = code.lines().filter(|l| !l.trim().is_empty()).count();
    json!({
        "branches": branches,
        "lines": lines,
        // Cyclomatic-style score: decision points + 1.
        "score": branches + 1,
    })
}

/// Registers the built-in analyzers with `registry`.
pub fn register_builtin_tools(registry: &ToolRegistry) {
    let code_param = || ToolParameter::required("code", ParamType::String, "Source code to analyze");

    registry.register(
        ToolSpec::new("check_syntax", "Check source code for balanced brackets and braces")
            .category(CATEGORY)
            .parameter(code_param()),
        FnHandler::new(|params| async move { Ok(check_syntax(&code_argument(&params)?)) }),
    );

    registry.register(
        ToolSpec::new("extract_todos", "List TODO/FIXME/XXX markers with line numbers")
            .category(CATEGORY)
            .parameter(code_param()),
        FnHandler::new(|params| async move { Ok(extract_todos(&code_argument(&params)?)) }),
    );

    registry.register(
        ToolSpec::new("estimate_complexity", "Estimate branching complexity of source code")
            .category(CATEGORY)
            .parameter(code_param()),
        FnHandler::new(|params| async move { Ok(estimate_complexity(&code_argument(&params)?)) }),
    );
}
