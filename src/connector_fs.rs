//! Filesystem source: turn files and directories into [`SourceItem`]s.
//!
//! A file argument is read as-is. A directory is walked recursively and
//! filtered with include globs (default `**/*.md`, `**/*.txt`); `.git`,
//! `target`, and `node_modules` are always skipped.

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::models::SourceItem;

pub const DEFAULT_INCLUDE_GLOBS: &[&str] = &["**/*.md", "**/*.txt"];

pub fn scan_path(path: &Path, include_globs: &[String]) -> Result<Vec<SourceItem>> {
    if !path.exists() {
        bail!("Path does not exist: {}", path.display());
    }

    if path.is_file() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        return Ok(vec![file_to_source_item(path, &name)?]);
    }

    let include_set = build_globset(include_globs)?;
    let exclude_set = build_globset(&[
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ])?;

    let mut items = Vec::new();
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let file = entry.path();
        let relative = file.strip_prefix(path).unwrap_or(file);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        items.push(file_to_source_item(file, &rel_str)?);
    }

    // Sort for deterministic ordering
    items.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    Ok(items)
}

fn file_to_source_item(path: &Path, relative_path: &str) -> Result<SourceItem> {
    let metadata = std::fs::metadata(path)?;
    let modified_secs = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} as UTF-8 text", path.display()))?;

    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string());

    let canonical = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string();

    Ok(SourceItem {
        source: "filesystem".to_string(),
        source_id: canonical,
        title: title.or_else(|| Some(relative_path.to_string())),
        updated_at: Utc
            .timestamp_opt(modified_secs, 0)
            .single()
            .unwrap_or_else(Utc::now),
        body,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn default_globs() -> Vec<String> {
        DEFAULT_INCLUDE_GLOBS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_scan_single_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("sky.txt");
        fs::write(&file, "The sky is blue.").unwrap();

        let items = scan_path(&file, &default_globs()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.as_deref(), Some("sky"));
        assert_eq!(items[0].body, "The sky is blue.");
    }

    #[test]
    fn test_scan_directory_filters() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("nested")).unwrap();
        fs::create_dir_all(tmp.path().join("node_modules")).unwrap();
        fs::write(tmp.path().join("a.md"), "alpha").unwrap();
        fs::write(tmp.path().join("nested/b.txt"), "beta").unwrap();
        fs::write(tmp.path().join("c.json"), "{}").unwrap();
        fs::write(tmp.path().join("node_modules/d.md"), "delta").unwrap();

        let items = scan_path(tmp.path(), &default_globs()).unwrap();
        let bodies: Vec<&str> = items.iter().map(|i| i.body.as_str()).collect();
        assert_eq!(items.len(), 2);
        assert!(bodies.contains(&"alpha"));
        assert!(bodies.contains(&"beta"));
    }

    #[test]
    fn test_scan_missing_path() {
        assert!(scan_path(Path::new("/definitely/not/here"), &default_globs()).is_err());
    }
}
