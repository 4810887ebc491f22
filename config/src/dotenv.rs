//! Read a project `.env` file into a key-value map. Nothing is exported
//! here; the lib decides what wins against the process environment.
//!
//! Accepted syntax, line by line: `NAME=value`, `#` comments on their own
//! line, values optionally wrapped in single or double quotes (double
//! quotes honor `\"`). No multiline values, no `export` prefix.

use std::collections::HashMap;
use std::path::Path;

/// Strips one layer of surrounding quotes. Double quotes unescape `\"`;
/// single quotes are taken literally; anything else passes through.
fn unquote(raw: &str) -> String {
    let bytes = raw.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(b'"'), Some(b'"')) if raw.len() >= 2 => {
            raw[1..raw.len() - 1].replace("\\\"", "\"")
        }
        (Some(b'\''), Some(b'\'')) if raw.len() >= 2 => raw[1..raw.len() - 1].to_string(),
        _ => raw.to_string(),
    }
}

/// Loads `.env` from `override_dir` (or the current directory) into a
/// map. A missing file is not an error; it reads as no variables.
pub fn load_env_map(override_dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    let folder = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => match std::env::current_dir() {
            Ok(cwd) => cwd,
            Err(_) => return Ok(HashMap::new()),
        },
    };
    let file = folder.join(".env");
    if !file.is_file() {
        return Ok(HashMap::new());
    }

    let mut vars = HashMap::new();
    for line in std::fs::read_to_string(&file)?.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((lhs, rhs)) = line.split_once('=') else {
            continue;
        };
        let name = lhs.trim();
        if name.is_empty() {
            continue;
        }
        vars.insert(name.to_string(), unquote(rhs.trim()));
    }
    Ok(vars)
}
