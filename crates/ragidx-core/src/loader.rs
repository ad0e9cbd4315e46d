use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::traits::DocumentLoader;
use crate::types::{DocType, Document};

const DEFAULT_EXTENSIONS: &[&str] = &["txt", "md"];

/// Loads every text file under a root directory.
///
/// The immediate parent folder decides the category: files under
/// `guidelines/` are guidelines, under `case_studies/` case studies, and
/// everything else is `other`. Files are visited in sorted path order.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
    extensions: Vec<String>,
    limit: Option<usize>,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            limit: None,
        }
    }

    pub fn with_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = exts.into_iter().map(Into::into).collect();
        self
    }

    /// Caps the number of files read, for smoke runs over large corpora.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn list_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
            })
            .collect();
        files.sort();
        if let Some(limit) = self.limit {
            files.truncate(limit);
        }
        files
    }

    fn doc_type_for(&self, path: &Path) -> DocType {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map(DocType::from_dir_name)
            .unwrap_or_default()
    }
}

fn read_file_content(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(path)?).to_string()),
    }
}

impl DocumentLoader for DirectoryLoader {
    fn load(&self) -> Result<Vec<Document>> {
        if !self.root.is_dir() {
            return Err(Error::config(format!(
                "corpus directory {} does not exist",
                self.root.display()
            )));
        }
        let files = self.list_files();
        let mut docs = Vec::with_capacity(files.len());
        for path in files {
            let text = read_file_content(&path)?;
            if text.trim().is_empty() {
                warn!(path = %path.display(), "skipping empty document");
                continue;
            }
            let source = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            docs.push(Document {
                text,
                source,
                doc_type: self.doc_type_for(&path),
                path: path.to_string_lossy().to_string(),
            });
        }
        info!(root = %self.root.display(), documents = docs.len(), "loaded corpus");
        Ok(docs)
    }
}

/// In-memory corpus.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    docs: Vec<Document>,
}

impl StaticLoader {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs }
    }
}

impl DocumentLoader for StaticLoader {
    fn load(&self) -> Result<Vec<Document>> {
        Ok(self.docs.clone())
    }
}
