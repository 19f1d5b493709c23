//! Directory scanning: the ordered list of candidate files for a run.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ScanConfig;

/// Walk `root` and return every regular file passing the include/exclude
/// globs, sorted by relative path for a deterministic scan order.
pub fn scan_directory(root: &Path, scan: &ScanConfig) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Data directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&scan.include_globs)?;

    let mut default_excludes = vec!["**/.*".to_string(), "**/.*/**".to_string()];
    default_excludes.extend(scan.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files: Vec<(String, PathBuf)> = Vec::new();

    let walker = WalkDir::new(root).follow_links(scan.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        files.push((rel_str, path.to_path_buf()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files.into_iter().map(|(_, p)| p).collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn sorted_filtered_and_hidden_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("S2")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join("S2/Bhv002.m4v"), b"b").unwrap();
        fs::write(root.join("Bhv001.m4v"), b"a").unwrap();
        fs::write(root.join(".DS_Store"), b"x").unwrap();
        fs::write(root.join(".cache/Bhv003.m4v"), b"c").unwrap();
        fs::write(root.join("notes.tmp"), b"n").unwrap();

        let scan = ScanConfig {
            exclude_globs: vec!["**/*.tmp".to_string()],
            ..ScanConfig::default()
        };
        let files = scan_directory(root, &scan).unwrap();
        let rel: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(rel, vec!["Bhv001.m4v", "S2/Bhv002.m4v"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let scan = ScanConfig::default();
        assert!(scan_directory(Path::new("/no/such/dir"), &scan).is_err());
    }
}
