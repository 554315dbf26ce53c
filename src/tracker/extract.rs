//! Best-effort extraction of file paths from model output.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Most affected files reported from an analysis.
pub const MAX_AFFECTED_FILES: usize = 5;

pub const ANALYSIS_FILES_PLACEHOLDER: &str = "See analysis for details";
pub const PATCH_FILES_PLACEHOLDER: &str = "See patch for details";

static SOURCE_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\w/-]+\.(?:rs|py|tsx?|jsx?|css|html)\b").expect("valid source file regex")
});

static DIFF_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:---|\+\+\+)[ \t]+[ab]/(\S+)").expect("valid diff header regex")
});

static FENCE_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z]*\r?\n").expect("valid fence regex"));

/// Keep the first occurrence of each item, preserving order.
fn dedup_in_order(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Source file paths mentioned in free-text analysis, deduplicated and
/// capped at [`MAX_AFFECTED_FILES`]. Returns a single placeholder entry
/// when nothing matches.
pub fn affected_files(analysis: &str) -> Vec<String> {
    let mut files = dedup_in_order(
        SOURCE_FILE_RE
            .find_iter(analysis)
            .map(|m| m.as_str().to_string()),
    );
    files.truncate(MAX_AFFECTED_FILES);
    if files.is_empty() {
        files.push(ANALYSIS_FILES_PLACEHOLDER.to_string());
    }
    files
}

/// Remove markdown code fences around a patch and trim surrounding
/// whitespace. Text without fences is only trimmed.
pub fn strip_code_fences(text: &str) -> String {
    if !text.contains("```") {
        return text.trim().to_string();
    }
    FENCE_OPEN_RE
        .replace_all(text, "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Paths named in `--- a/…` / `+++ b/…` headers of a unified diff,
/// deduplicated in order of first appearance.
pub fn patch_files(patch: &str) -> Vec<String> {
    dedup_in_order(
        DIFF_HEADER_RE
            .captures_iter(patch)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string()),
    )
}

/// `patch_files`, or a placeholder when the diff has no headers.
pub fn files_modified(patch: &str) -> Vec<String> {
    let files = patch_files(patch);
    if files.is_empty() {
        vec![PATCH_FILES_PLACEHOLDER.to_string()]
    } else {
        files
    }
}
