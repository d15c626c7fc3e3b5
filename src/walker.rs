use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

/// A discovered document file.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the directory that was walked.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

/// Supported file extensions for document discovery.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "md"];

/// Compile `--glob` patterns. No patterns means no filter.
pub fn build_filter(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::Config(format!("invalid glob pattern: {e}"))
        })?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| Error::Config(format!("invalid glob pattern: {e}")))?;
    Ok(Some(set))
}

/// Recursively walk a directory and discover eligible document files.
///
/// Skips hidden files/directories (names starting with `.`) and only
/// returns files with supported extensions. When `filter` is given, the
/// path relative to `root` must match it.
pub fn discover_files(
    root: &Path,
    filter: Option<&GlobSet>,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    if let Some(filter) = filter {
        results.retain(|f| filter.is_match(&f.relative_path));
    }
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

/// Expand command line inputs into files to ingest.
///
/// Files are taken as given, even with an unknown extension, so that
/// ingestion can report them. Directories are walked.
pub fn collect_inputs(
    inputs: &[PathBuf],
    filter: Option<&GlobSet>,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            files.extend(
                discover_files(input, filter)?
                    .into_iter()
                    .map(|f| f.absolute_path),
            );
        } else if input.exists() {
            files.push(input.canonicalize()?);
        } else {
            return Err(Error::Ingest {
                path: input.clone(),
                reason: "file not found".to_string(),
            });
        }
    }
    // A file named directly and found again in a walked directory is
    // ingested once, at its first position.
    let mut seen = HashSet::new();
    files.retain(|f| seen.insert(f.clone()));
    Ok(files)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        // Skip hidden files and directories.
        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &entry.path(), results)?;
        } else if file_type.is_symlink() {
            let resolved = match entry.path().canonicalize() {
                Ok(p) => p,
                Err(_) => continue, // Skip broken symlinks
            };
            // Directory symlinks are not followed (cycle prevention).
            if resolved.is_file() && is_supported(&resolved) {
                results.push(make_discovered(root, &entry.path(), &resolved));
            }
        } else if file_type.is_file() && is_supported(&entry.path()) {
            let abs = entry.path().canonicalize()?;
            results.push(make_discovered(root, &entry.path(), &abs));
        }
    }

    Ok(())
}

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        })
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
) -> DiscoveredFile {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();

    DiscoveredFile {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[DiscoveredFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn discovers_pdf_md_and_txt() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("note.md"), "# Hello").unwrap();
        std::fs::write(tmp.path().join("readme.txt"), "Hello").unwrap();
        std::fs::write(tmp.path().join("paper.PDF"), "%PDF").unwrap();
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let files = discover_files(tmp.path(), None).unwrap();
        assert_eq!(names(&files), vec!["note.md", "paper.PDF", "readme.txt"]);
    }

    #[test]
    fn skips_hidden_files_and_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".git");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("config.md"), "git config").unwrap();
        std::fs::write(tmp.path().join(".hidden.md"), "secret").unwrap();
        std::fs::write(tmp.path().join("visible.md"), "hello").unwrap();

        let files = discover_files(tmp.path(), None).unwrap();
        assert_eq!(names(&files), vec!["visible.md"]);
    }

    #[test]
    fn recurses_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("subdir");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.md"), "deep").unwrap();
        std::fs::write(tmp.path().join("top.md"), "top").unwrap();

        let files = discover_files(tmp.path(), None).unwrap();
        assert_eq!(names(&files), vec!["subdir/deep.md", "top.md"]);
    }

    #[test]
    fn glob_filter_applies_to_relative_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("manuals");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("pump.pdf"), "%PDF").unwrap();
        std::fs::write(sub.join("pump.md"), "notes").unwrap();
        std::fs::write(tmp.path().join("todo.md"), "todo").unwrap();

        let filter = build_filter(&["manuals/*.pdf".to_string()]).unwrap();
        let files = discover_files(tmp.path(), filter.as_ref()).unwrap();
        assert_eq!(names(&files), vec!["manuals/pump.pdf"]);
    }

    #[test]
    fn invalid_glob_is_a_config_error() {
        assert!(build_filter(&[]).unwrap().is_none());
        assert!(matches!(
            build_filter(&["a[".to_string()]).unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn collect_inputs_mixes_files_and_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("docs");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("a.txt"), "a").unwrap();
        let single = tmp.path().join("single.md");
        std::fs::write(&single, "b").unwrap();

        let files =
            collect_inputs(&[dir.clone(), single.clone()], None).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("docs/a.txt"));
        assert!(files[1].ends_with("single.md"));

        let missing = tmp.path().join("missing.pdf");
        assert!(matches!(
            collect_inputs(&[missing], None).unwrap_err(),
            Error::Ingest { .. }
        ));
    }

    #[test]
    fn collect_inputs_drops_repeated_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("docs");
        std::fs::create_dir(&dir).unwrap();
        let inner = dir.join("a.txt");
        std::fs::write(&inner, "a").unwrap();
        std::fs::write(dir.join("b.txt"), "b").unwrap();

        let files =
            collect_inputs(&[inner.clone(), dir.clone(), inner.clone()], None)
                .unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("docs/a.txt"));
        assert!(files[1].ends_with("docs/b.txt"));
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_files(tmp.path(), None).unwrap().is_empty());
    }
}
