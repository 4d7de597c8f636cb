//! # File Store
//!
//! One file per region at `<root>/<planet>/<x>_<y>.ents`. Saves write a
//! sibling temp file and rename it over the old one, so a crash leaves
//! either the old or the new region, never half of one.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use tessera_core::{ColumnIndex, Entity, PlanetId, RegionKey};
use tessera_streaming::{EntityStore, StorageError, StorageResult};

use crate::codec::{decode_region, encode_region};

/// File store configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    /// Directory holding one sub-directory per planet.
    pub root: PathBuf,
    /// Call `sync_all` before renaming a saved file into place.
    pub sync_writes: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("world"),
            sync_writes: false,
        }
    }
}

impl FileStoreConfig {
    /// Production config: durable writes under `root`.
    #[must_use]
    pub fn production(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sync_writes: true,
        }
    }

    /// Parses a TOML document. Missing keys take their default value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the document does not
    /// parse.
    pub fn from_toml_str(source: &str) -> StorageResult<Self> {
        toml::from_str(source).map_err(|e| StorageError::Unavailable(format!("bad store config: {e}")))
    }
}

/// [`EntityStore`] backed by LZ4 region files.
#[derive(Debug, Clone)]
pub struct FileStore {
    config: FileStoreConfig,
}

impl FileStore {
    /// Opens a store, creating the root directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the root cannot be created.
    pub fn open(config: FileStoreConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.root)?;
        Ok(Self { config })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Path of a region's file.
    #[must_use]
    pub fn region_path(&self, planet: PlanetId, column: ColumnIndex) -> PathBuf {
        self.config
            .root
            .join(planet.0.to_string())
            .join(format!("{}_{}.ents", column.x, column.y))
    }

    fn write_atomically(&self, path: &Path, bytes: &[u8]) -> StorageResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let temp = path.with_extension("ents.tmp");
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(bytes)?;
            if self.config.sync_writes {
                file.sync_all()?;
            }
        }
        fs::rename(&temp, path)?;
        Ok(())
    }
}

impl EntityStore for FileStore {
    fn load_entities(&self, planet: PlanetId, column: ColumnIndex) -> StorageResult<Vec<Entity>> {
        let path = self.region_path(planet, column);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let entities = decode_region(RegionKey::new(planet, column), &bytes)?;
        debug!(path = %path.display(), count = entities.len(), "region file read");
        Ok(entities)
    }

    fn save_entities(
        &self,
        planet: PlanetId,
        column: ColumnIndex,
        entities: &[Entity],
    ) -> StorageResult<()> {
        let path = self.region_path(planet, column);
        let bytes = encode_region(RegionKey::new(planet, column), entities)?;
        self.write_atomically(&path, &bytes)?;
        debug!(path = %path.display(), count = entities.len(), bytes = bytes.len(),
            "region file written");
        Ok(())
    }
}
