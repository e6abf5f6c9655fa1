//! Document loader.
//!
//! Walks the docs directory and turns every allow-listed text file into one
//! chunk (or several, in paragraph mode). The sequence is lazy and
//! restartable: each call to [`DocumentLoader::chunks`] walks the directory
//! again from scratch.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, ChunkingMode, DocsConfig};
use crate::error::LoadError;
use crate::models::Chunk;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

pub struct DocumentLoader {
    root: PathBuf,
    extensions: Vec<String>,
    exclude_set: GlobSet,
    follow_symlinks: bool,
    chunking: ChunkingConfig,
}

impl DocumentLoader {
    /// Loader with the default `.md` allow-list and whole-file chunks.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: vec!["md".to_string()],
            exclude_set: default_excludes(),
            follow_symlinks: false,
            chunking: ChunkingConfig::default(),
        }
    }

    pub fn from_config(docs: &DocsConfig, chunking: &ChunkingConfig) -> Result<Self, LoadError> {
        let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        patterns.extend(docs.exclude_globs.iter().cloned());

        Ok(Self {
            root: docs.root.clone(),
            extensions: normalize_extensions(&docs.extensions),
            exclude_set: build_globset(&patterns)?,
            follow_symlinks: docs.follow_symlinks,
            chunking: chunking.clone(),
        })
    }

    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        let owned: Vec<String> = extensions.iter().map(|s| s.to_string()).collect();
        self.extensions = normalize_extensions(&owned);
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a fresh pass over the directory.
    ///
    /// Fails up front if the root cannot be read. Errors on individual
    /// entries are yielded in-line; files that are not valid UTF-8 or are
    /// blank after trimming are skipped.
    pub fn chunks(&self) -> Result<impl Iterator<Item = Result<Chunk, LoadError>> + '_, LoadError> {
        std::fs::read_dir(&self.root).map_err(|source| LoadError::Io {
            path: self.root.clone(),
            source,
        })?;

        let walker = WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name();

        Ok(walker.into_iter().flat_map(move |entry| {
            let chunks: Vec<Result<Chunk, LoadError>> = match entry {
                Ok(entry) => match self.load_entry(entry.path(), entry.file_type().is_file()) {
                    Ok(chunks) => chunks.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                },
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
                    vec![Err(LoadError::Io { path, source })]
                }
            };
            chunks
        }))
    }

    /// Collect every chunk, failing on the first error.
    pub fn load_all(&self) -> Result<Vec<Chunk>, LoadError> {
        self.chunks()?.collect()
    }

    fn load_entry(&self, path: &Path, is_file: bool) -> Result<Vec<Chunk>, LoadError> {
        if !is_file || !self.is_allowed(path) {
            return Ok(Vec::new());
        }

        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if self.exclude_set.is_match(&rel_str) {
            return Ok(Vec::new());
        }

        let body = match std::fs::read_to_string(path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::debug!(path = %path.display(), "skipping non-UTF-8 file");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(LoadError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let content = body.trim();
        if content.is_empty() {
            tracing::debug!(path = %path.display(), "skipping empty file");
            return Ok(Vec::new());
        }

        Ok(match self.chunking.mode {
            ChunkingMode::Whole => vec![Chunk::new(rel_str.clone(), rel_str, content)],
            ChunkingMode::Paragraph => chunk_text(&rel_str, content, self.chunking.max_tokens),
        })
    }

    fn is_allowed(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|allowed| *allowed == ext))
    }
}

fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect()
}

fn default_excludes() -> GlobSet {
    let patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    // The built-in patterns are static and known to compile.
    build_globset(&patterns).unwrap_or_else(|_| GlobSet::empty())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, LoadError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
