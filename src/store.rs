use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::parser::ProfileRecord;

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());

const FALLBACK_NAME: &str = "profile_unknown";

/// File-system safe base name for a profile URL: the last path segment
/// (ignoring one trailing slash) with reserved characters turned into `_`.
pub fn sanitize_filename(url: &str) -> String {
    let trimmed = url.strip_suffix('/').unwrap_or(url);
    let candidate = trimmed.rsplit('/').next().unwrap_or("");

    let safe = UNSAFE_CHARS.replace_all(candidate, "_");
    if safe.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        safe.into_owned()
    }
}

pub fn profile_path(dir: &Path, url: &str) -> PathBuf {
    dir.join(format!("{}.json", sanitize_filename(url)))
}

/// Write a profile as pretty-printed UTF-8 JSON. Existing files are replaced.
pub fn write_profile(dir: &Path, url: &str, record: &ProfileRecord) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    let path = profile_path(dir, url);
    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(path)
}

/// Load previously written profiles, ordered by file name.
pub fn read_profiles(dir: &Path) -> Result<Vec<(PathBuf, ProfileRecord)>> {
    let mut paths = files_with_ext(dir, "json")?;
    paths.sort();

    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        let text =
            std::fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
        let record: ProfileRecord =
            serde_json::from_str(&text).with_context(|| format!("Failed to parse {:?}", path))?;
        out.push((path, record));
    }
    Ok(out)
}

/// Count files with the given extension; a missing directory counts as zero.
pub fn count_files(dir: &Path, ext: &str) -> Result<usize> {
    Ok(files_with_ext(dir, ext)?.len())
}

fn files_with_ext(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ext) {
            paths.push(path);
        }
    }
    Ok(paths)
}
