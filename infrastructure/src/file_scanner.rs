use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use domain::models::Document;
use memmap2::Mmap;
use rayon::prelude::*;
use regex::Regex;
use shared::types::{RagError, Result};
use shared::utils::is_markdown_file;
use tracing::{debug, warn};

/// Reads the markdown document store produced by the PDF converter.
pub struct FileScanner {
    root_path: PathBuf,
    max_file_bytes: u64,
}

/// A loaded document plus the digest of its content.
#[derive(Debug, Clone)]
pub struct FileScanResult {
    pub document: Document,
    pub hash: String,
}

fn image_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"!\[[^\]]*\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"]*")?\s*\)|<img[^>]*\bsrc\s*=\s*["']([^"']+)["']"#)
            .expect("image reference pattern is valid")
    })
}

/// Image targets referenced from markdown text, in order of appearance.
pub fn extract_image_refs(text: &str) -> Vec<String> {
    image_pattern()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

impl FileScanner {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            // Converted lecture scripts can be large, but anything past this is
            // almost certainly not prose.
            max_file_bytes: 32 * 1024 * 1024,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// All markdown files below the root, sorted by path. Hidden directories
    /// are skipped.
    pub fn collect_files(&self) -> Result<Vec<PathBuf>> {
        if !self.root_path.is_dir() {
            return Err(RagError::EmptyDocumentStore(self.root_path.clone()));
        }
        let mut files = Vec::new();
        self.collect_files_recursive(&self.root_path, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn collect_files_recursive(&self, dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden {
                continue;
            }
            // Symlinked directories are not followed.
            if entry.file_type()?.is_dir() {
                self.collect_files_recursive(&path, files)?;
            } else if is_markdown_file(&path) {
                files.push(path);
            }
        }
        Ok(())
    }

    /// Load every document in the store. Fails with `EmptyDocumentStore` if
    /// there is nothing to load.
    pub fn scan_documents(&self) -> Result<Vec<FileScanResult>> {
        let files = self.collect_files()?;
        let results = self.scan_paths(&files)?;
        if results.is_empty() {
            return Err(RagError::EmptyDocumentStore(self.root_path.clone()));
        }
        Ok(results)
    }

    pub fn scan_paths(&self, paths: &[PathBuf]) -> Result<Vec<FileScanResult>> {
        let results: Vec<Result<Option<FileScanResult>>> =
            paths.par_iter().map(|path| self.load_file(path)).collect();
        let mut loaded = Vec::with_capacity(paths.len());
        for res in results {
            if let Some(scan) = res? {
                loaded.push(scan);
            }
        }
        debug!(documents = loaded.len(), root = %self.root_path.display(), "scanned document store");
        Ok(loaded)
    }

    /// Digest over every document's identity and content hash. Changes
    /// whenever a document is added, removed, or edited.
    pub fn fingerprint(scans: &[FileScanResult]) -> String {
        let mut ctx = md5::Context::new();
        for scan in scans {
            ctx.consume(scan.document.id.as_bytes());
            ctx.consume([0u8]);
            ctx.consume(scan.hash.as_bytes());
            ctx.consume([0u8]);
        }
        format!("{:x}", ctx.compute())
    }

    fn load_file(&self, path: &Path) -> Result<Option<FileScanResult>> {
        let meta = path.metadata()?;
        if meta.len() > self.max_file_bytes {
            warn!(path = %path.display(), bytes = meta.len(), "skipping oversized document");
            return Ok(None);
        }
        let content = if meta.len() == 0 {
            String::new()
        } else {
            let file = File::open(path)?;
            // SAFETY: the store is read-only input; a concurrent writer would at
            // worst yield garbled text, which the lossy decode tolerates.
            let mmap = unsafe { Mmap::map(&file)? };
            String::from_utf8_lossy(&mmap).into_owned()
        };
        let hash = format!("{:x}", md5::compute(content.as_bytes()));
        let id = self.document_id(path);
        let images = extract_image_refs(&content);
        Ok(Some(FileScanResult {
            document: Document { id, text: content, images },
            hash,
        }))
    }

    fn document_id(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root_path).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_markdown_recursively_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.md"), "second").unwrap();
        fs::write(dir.path().join("a.md"), "first").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::create_dir_all(dir.path().join("week2")).unwrap();
        fs::write(dir.path().join("week2/c.MD"), "third").unwrap();
        fs::create_dir_all(dir.path().join(".cache")).unwrap();
        fs::write(dir.path().join(".cache/d.md"), "hidden").unwrap();

        let scans = FileScanner::new(dir.path()).scan_documents().unwrap();
        let ids: Vec<_> = scans.iter().map(|s| s.document.id.as_str()).collect();
        assert_eq!(ids, ["a.md", "b.md", "week2/c.MD"]);
        assert_eq!(scans[0].document.text, "first");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycle_is_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "first").unwrap();
        fs::create_dir_all(dir.path().join("week1")).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("week1/back")).unwrap();

        let files = FileScanner::new(dir.path()).collect_files().unwrap();
        assert_eq!(files, [dir.path().join("a.md")]);
    }

    #[test]
    fn empty_or_missing_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileScanner::new(dir.path()).scan_documents().unwrap_err();
        assert!(matches!(err, RagError::EmptyDocumentStore(_)));

        let err = FileScanner::new(dir.path().join("missing")).scan_documents().unwrap_err();
        assert!(matches!(err, RagError::EmptyDocumentStore(_)));
    }

    #[test]
    fn extracts_markdown_and_html_image_references() {
        let text = "Intro ![diagram](lecture_images/_page_1_Figure_0.jpeg) text\n\
                    ![with title](img/b.png \"Title\")\n<img alt=\"x\" src='img/c.gif'>";
        assert_eq!(
            extract_image_refs(text),
            ["lecture_images/_page_1_Figure_0.jpeg", "img/b.png", "img/c.gif"]
        );
    }

    #[test]
    fn fingerprint_tracks_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "v1").unwrap();
        let scanner = FileScanner::new(dir.path());
        let before = FileScanner::fingerprint(&scanner.scan_documents().unwrap());
        let again = FileScanner::fingerprint(&scanner.scan_documents().unwrap());
        assert_eq!(before, again);

        fs::write(dir.path().join("a.md"), "v2").unwrap();
        let after = FileScanner::fingerprint(&scanner.scan_documents().unwrap());
        assert_ne!(before, after);
    }
}
