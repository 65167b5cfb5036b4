//! docsift - chunk, embed and semantically search folders of documents.
//!
//! Documents are split into overlapping word windows, every window is
//! embedded with a sentence-transformer (or a deterministic hashing
//! function for offline use), and queries are ranked by cosine
//! similarity. Queries may carry structured filters such as `ks9` or
//! `folder:aero`, which are stripped before embedding and applied to the
//! chunk's source file.
//!
//! # Quick start
//!
//! ```no_run
//! use docsift::{ChunkingConfig, DataDir, Index, ModelManager};
//! use docsift::embedding::Embedder;
//! use docsift::ingestion;
//! use docsift::search::{self, SearchParams};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let mut model = ModelManager::new();
//!
//! let report =
//!     ingestion::ingest_directory("notes".as_ref(), &ChunkingConfig::default())
//!         .unwrap();
//! let index = Index::build(report.chunks, &mut model, 32).unwrap();
//! index.save(&data_dir.index_prefix()).unwrap();
//!
//! let index = Index::load(&data_dir.index_prefix(), model.dimension().unwrap())
//!     .unwrap();
//! let outcome = search::execute_search(
//!     &SearchParams::new("ks9 rear wing downforce"),
//!     &index,
//!     &mut model,
//! )
//! .unwrap();
//! for r in &outcome.results {
//!     println!("{:.4} {:?}", r.score, r.chunk.file);
//! }
//! ```

pub mod chunking;
pub mod cli;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod filters;
pub mod hash_embedder;
pub mod index_store;
pub mod ingestion;
pub mod mcp;
pub mod model_manager;
pub mod search;
pub mod shell;
pub mod summary;
pub mod walker;

pub use chunking::{Chunk, ChunkingConfig};
pub use data_dir::DataDir;
pub use embedding::{Embedder, EmbeddingMatrix};
pub use error::{Error, Result};
pub use hash_embedder::HashEmbedder;
pub use index_store::Index;
pub use model_manager::ModelManager;
