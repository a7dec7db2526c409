//! Filename normalization for archive-safe payload paths.
//!
//! Rules follow the "fixing unix/linux filenames" catalogue: shell-hostile
//! and control characters become `_`, leading `-`/`~`/whitespace runs and
//! trailing whitespace are trimmed, each path component independently.
//! The transform is deterministic and idempotent; the builder records a
//! rename only when the result differs from the input.

use once_cell::sync::Lazy;
use regex::Regex;

/// Control bytes plus the shell/HTML-hostile set `*?:[]"<>|(){}&'!;`.
static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\x00-\x1F\x7F*?:\[\]"<>|(){}&'!;]"#).expect("static regex"));

/// Leading `-`, `~`, whitespace runs and trailing whitespace.
static TRIM_EDGES: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s\-~]*(.*?)\s*$").expect("static regex"));

/// Normalizes a slash-separated path component-wise.
///
/// A leading `/` survives; empty components (and components that trim to
/// nothing) collapse away. Input is `&str`, so UTF-8 coercion has already
/// happened at the filesystem boundary.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');

    let mut parts: Vec<String> = Vec::new();
    for component in path.split('/') {
        if component.is_empty() {
            continue;
        }
        let cleaned = UNSAFE_CHARS.replace_all(component, "_");
        let trimmed = TRIM_EDGES.replace(cleaned.as_ref(), "$1").into_owned();
        if trimmed.is_empty() {
            continue;
        }
        parts.push(trimmed);
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}
