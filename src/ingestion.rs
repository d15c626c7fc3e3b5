//! Turning a source file into stored, embedded chunks.
//!
//! Text files are split at form feeds, and PDFs go through the `pdftotext`
//! tool from poppler, whose output separates pages the same way.

use std::{
    io::IsTerminal,
    path::{Path, PathBuf},
    process::Command,
    time::{SystemTime, UNIX_EPOCH},
};

use kdam::{BarExt, tqdm};

use crate::{
    chunk_db::{ChunkStore, StoredChunk},
    chunking::{ChunkingConfig, chunk_pages},
    config_db::{ConfigDb, DocumentRecord},
    doc_id::{DocumentId, content_fingerprint},
    embedding::{EmbeddingService, all_zero},
    error::{Error, Result},
};

/// Page separator in extracted text.
pub const PAGE_BREAK: char = '\u{c}';

/// Chunks embedded per embedder call.
const EMBED_BATCH_SIZE: usize = 32;

fn ingest_error(path: &Path, reason: impl Into<String>) -> Error {
    Error::Ingest {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Extract per-page text from a `.pdf`, `.txt` or `.md` file.
pub fn extract_pages(path: &Path) -> Result<Vec<String>> {
    let bytes = std::fs::read(path)
        .map_err(|e| ingest_error(path, format!("cannot read file: {e}")))?;
    extract_pages_from(path, &bytes)
}

fn extract_pages_from(path: &Path, bytes: &[u8]) -> Result<Vec<String>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("txt" | "md") => Ok(split_pages(&String::from_utf8_lossy(bytes))),
        Some("pdf") => Ok(split_pages(&pdf_to_text(path)?)),
        _ => Err(ingest_error(path, "unsupported file type")),
    }
}

/// Split text into pages at form feeds.
///
/// The page after a final form feed is dropped when it is blank, as
/// `pdftotext` ends every page with one.
pub fn split_pages(text: &str) -> Vec<String> {
    let mut pages: Vec<String> =
        text.split(PAGE_BREAK).map(str::to_string).collect();
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    pages
}

fn pdf_to_text(path: &Path) -> Result<String> {
    tracing::debug!(path = %path.display(), "running pdftotext");
    let output = Command::new("pdftotext")
        .arg("-layout")
        .arg("-enc")
        .arg("UTF-8")
        .arg(path)
        .arg("-")
        .output()
        .map_err(|e| {
            ingest_error(
                path,
                format!("pdftotext could not be run (is poppler installed?): {e}"),
            )
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ingest_error(
            path,
            format!("pdftotext failed: {}", stderr.trim()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub chunking: ChunkingConfig,
    /// Re-ingest even when the file has not changed.
    pub force: bool,
    /// Show a progress bar while embedding, if stderr is a terminal.
    pub progress: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            force: false,
            progress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested(DocumentRecord),
    /// Already stored with the same content.
    Unchanged(DocumentRecord),
}

impl IngestOutcome {
    pub fn record(&self) -> &DocumentRecord {
        match self {
            IngestOutcome::Ingested(record) | IngestOutcome::Unchanged(record) => {
                record
            }
        }
    }
}

/// Extract, chunk, embed and store one document, replacing whatever was
/// stored for it before.
///
/// An unreadable file is an error. A file whose text cannot be extracted
/// is registered with no chunks and a warning.
pub fn ingest_document<S: ChunkStore + ?Sized>(
    path: &Path,
    store: &S,
    registry: &ConfigDb,
    embeddings: &mut EmbeddingService,
    options: &IngestOptions,
) -> Result<IngestOutcome> {
    let path: PathBuf = path
        .canonicalize()
        .map_err(|_| ingest_error(path, "file not found"))?;
    let bytes = std::fs::read(&path)
        .map_err(|e| ingest_error(&path, format!("cannot read file: {e}")))?;

    let id = DocumentId::from_path(&path);
    let key = id.key();
    let fingerprint = content_fingerprint(&bytes);

    if !options.force
        && let Some(existing) = registry.get_document(&key)?
        && existing.fingerprint == fingerprint
    {
        tracing::info!(document = %id, "unchanged, skipping");
        return Ok(IngestOutcome::Unchanged(existing));
    }

    let (pages, extracted) = match extract_pages_from(&path, &bytes) {
        Ok(pages) => (pages, true),
        Err(e) => {
            tracing::warn!(error = %e, "text extraction failed, storing no chunks");
            (Vec::new(), false)
        }
    };

    let chunks =
        chunk_pages(pages.iter().map(String::as_str), &key, options.chunking);
    tracing::info!(
        document = %id,
        pages = pages.len(),
        chunks = chunks.len(),
        "chunked document"
    );

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_all(embeddings, &texts, options.progress)?;
    if all_zero(&vectors) {
        tracing::warn!(
            document = %id,
            "every chunk embedding is zero, search will rely on keywords"
        );
    }

    let stored: Vec<StoredChunk> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, embedding)| StoredChunk::new(chunk, embedding))
        .collect();

    let removed = store.replace_document(&key, &stored)?;
    if removed > 0 {
        tracing::debug!(document = %id, removed, "replaced previous chunks");
    }

    let record = DocumentRecord {
        id: key,
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
        path: path.display().to_string(),
        page_count: pages.len(),
        chunk_count: stored.len(),
        // Left empty after a failed extraction so the next add retries.
        fingerprint: if extracted { fingerprint } else { String::new() },
        added_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    };
    registry.put_document(&record)?;

    Ok(IngestOutcome::Ingested(record))
}

fn embed_all(
    embeddings: &mut EmbeddingService,
    texts: &[String],
    progress: bool,
) -> Result<Vec<Vec<f32>>> {
    let show = progress && std::io::stderr().is_terminal();
    let mut bar = tqdm!(
        total = texts.len(),
        desc = "Embedding",
        unit = " chunks",
        disable = !show
    );

    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(EMBED_BATCH_SIZE) {
        vectors.extend(embeddings.embed_batch(batch));
        bar.update(batch.len())?;
    }
    if show {
        bar.refresh()?;
        eprintln!();
    }
    Ok(vectors)
}

/// Remove a document's chunks and its registry entry.
pub fn remove_document<S: ChunkStore + ?Sized>(
    record: &DocumentRecord,
    store: &S,
    registry: &ConfigDb,
) -> Result<usize> {
    let removed = store.delete_by_document_id(&record.id)?;
    registry.remove_document(&record.id)?;
    tracing::info!(document = %record.name, chunks = removed, "removed document");
    Ok(removed)
}
