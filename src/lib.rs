//! pocketrag - on-device question answering over your own documents.
//!
//! pocketrag splits PDFs and notes into overlapping chunks, embeds them
//! with a local model and stores both in [redb](https://www.redb.org).
//! A question is answered by ranking chunks with a mix of embedding
//! similarity and keyword matching, packing the best ones into a bounded
//! context, and letting a local language model answer from that context
//! alone. The model's raw output is cleaned of prompt echoes and
//! repetition loops before it is returned.
//!
//! # Quick start
//!
//! ```no_run
//! use pocketrag::{ChunkDb, ConfigDb, DataDir, RagConfig};
//! use pocketrag::ingestion::IngestOptions;
//! use pocketrag::rag::AskOptions;
//!
//! let data_dir = DataDir::resolve(None)?;
//! let config_db = ConfigDb::open(&data_dir.config_db())?;
//! let config = RagConfig::load(&config_db)?;
//! let store = ChunkDb::open(&data_dir.chunks_db())?;
//! let mut rag = config.rag_service(store)?;
//!
//! rag.ingest(
//!     std::path::Path::new("manual.pdf"),
//!     &config_db,
//!     &IngestOptions::default(),
//! )?;
//!
//! let result = rag.ask("How do I reset the device?", &AskOptions::default())?;
//! println!("{}", result.answer);
//! for source in &result.sources {
//!     println!("  p.{} ({:.3})", source.page_number, source.score);
//! }
//! # Ok::<(), pocketrag::Error>(())
//! ```

pub mod chunk_db;
pub mod chunking;
pub mod config;
pub mod config_db;
pub mod context;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod hybrid;
pub mod ingestion;
pub mod keyword;
pub mod mcp;
pub mod model_manager;
pub mod rag;
pub mod sanitize;
pub mod search;
pub mod similarity;
pub mod text_util;
pub mod walker;

pub use chunk_db::{ChunkDb, ChunkStore, StoredChunk};
pub use chunking::Chunk;
pub use config::RagConfig;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use error::{Error, Result};
pub use model_manager::ModelManager;
pub use rag::{RagResult, RagService, RagSource};
pub use similarity::ScoredChunk;
