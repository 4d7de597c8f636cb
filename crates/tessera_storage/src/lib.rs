//! # TESSERA Storage
//!
//! Region persistence for the streaming cache.
//!
//! ## Format
//!
//! Each region is one file of fixed-size `bytemuck` records compressed
//! with LZ4. See [`codec`] for the layout.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tessera_storage::{FileStore, FileStoreConfig};
//! use tessera_streaming::EntityCache;
//!
//! let store = FileStore::open(FileStoreConfig::production("saves/world1"))?;
//! let cache = EntityCache::new(Arc::new(store))?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod codec;
pub mod error;
pub mod file_store;

pub use codec::{decode_region, encode_region, FORMAT_VERSION, MAGIC};
pub use error::{CodecError, CodecResult};
pub use file_store::{FileStore, FileStoreConfig};
