//! # Storage
//!
//! Durable state behind the router:
//!
//! - `blob`: raw image and thumbnail bytes (filesystem adapter)
//! - `embed`: the hybrid vector+keyword index holding the per-image row

pub mod blob;
pub mod embed;

pub use blob::{BlobMetadata, BlobStore, FsBlobStore, StorageError};
pub use embed::{
    EmbedIndex, EmbedStore, ImageRow, MemoryEmbedIndex, SearchHit, SearchScope, StoreError,
    UpsertImage, Visibility,
};
