//! Report file names

use super::types::ReportTarget;
use crate::types::{FilenameConvention, ReportFormat};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Longest file name most filesystems accept, in bytes
pub const MAX_FILE_NAME_BYTES: usize = 255;

/// Longest full report path, directory included, in bytes
pub const MAX_PATH_BYTES: usize = 250;

/// Names never shrink below this, however deep the directory
const MIN_FILE_NAME_BYTES: usize = 32;

/// Spaced separators (`a / b`, `a // b`) or any single character a
/// filesystem rejects
static UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#" /+ |[/\\:*?"<>|%\s\p{Cc}]"#).unwrap());

/// Replace separators, whitespace, `%` and reserved characters with `-`
pub fn sanitize_name(name: &str) -> String {
    UNSAFE.replace_all(name, "-").into_owned()
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char
pub fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// File stem for a target, before de-duplication
pub fn base_name(target: &ReportTarget, convention: FilenameConvention) -> String {
    match convention {
        FilenameConvention::InspectionId => target.audit_id.clone(),
        FilenameConvention::InspectionTitle => {
            let name = sanitize_name(&target.name);
            if name.trim_matches('-').trim().is_empty() {
                target.audit_id.clone()
            } else {
                name
            }
        }
    }
}

/// Bytes left for a file name once `dir` and its separator are counted
pub fn name_budget(dir: &Path) -> usize {
    MAX_PATH_BYTES
        .saturating_sub(dir.as_os_str().len() + 1)
        .clamp(MIN_FILE_NAME_BYTES, MAX_FILE_NAME_BYTES)
}

/// `{stem}.{ext}` or `{stem} ({n}).{ext}`, cut to fit `max_bytes`
pub fn file_name(stem: &str, format: ReportFormat, duplicate: usize, max_bytes: usize) -> String {
    let suffix = if duplicate > 0 {
        format!(" ({duplicate})")
    } else {
        String::new()
    };
    let ext = format.extension();
    let room = max_bytes
        .min(MAX_FILE_NAME_BYTES)
        .saturating_sub(suffix.len() + ext.len() + 1)
        .max(1);
    format!("{}{suffix}.{ext}", truncate_bytes(stem, room))
}

/// First name for `stem` not already taken in `dir`, short enough that the
/// joined path stays within [`MAX_PATH_BYTES`]
pub fn unique_file_name(dir: &Path, stem: &str, format: ReportFormat) -> String {
    let budget = name_budget(dir);
    let mut duplicate = 0;
    loop {
        let name = file_name(stem, format, duplicate, budget);
        if !dir.join(&name).exists() {
            return name;
        }
        duplicate += 1;
    }
}
