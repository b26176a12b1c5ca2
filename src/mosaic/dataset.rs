use crate::error::{MosaicError, Result};
use crate::mosaic::TILE_LEN;
use log::debug;
use std::path::Path;

/// Entries in the canonical reference corpus (CIFAR-10 train + test).
pub const CIFAR10_SIZE: usize = 60000;

/// Immutable corpus of channel-major 32x32x3 reference tiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    data: Vec<u8>,
}

impl Dataset {
    /// Wrap a raw corpus buffer. Any non-empty whole number of tiles is accepted.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(MosaicError::InvalidDataset("corpus is empty".to_string()));
        }
        if data.len() % TILE_LEN != 0 {
            return Err(MosaicError::InvalidDataset(format!(
                "corpus length {} is not a multiple of the tile size {}",
                data.len(),
                TILE_LEN
            )));
        }
        if data.len() / TILE_LEN > u32::MAX as usize {
            return Err(MosaicError::InvalidDataset("corpus has too many entries".to_string()));
        }
        Ok(Self { data })
    }

    /// Build a corpus from individual channel-major tiles.
    pub fn from_tiles<I>(tiles: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let mut data = Vec::new();
        for tile in tiles {
            let tile = tile.as_ref();
            if tile.len() != TILE_LEN {
                return Err(MosaicError::InvalidDataset(format!(
                    "tile holds {} bytes, expected {}",
                    tile.len(),
                    TILE_LEN
                )));
            }
            data.extend_from_slice(tile);
        }
        Self::new(data)
    }

    /// Read the raw CIFAR-10 corpus file; it must hold exactly 60,000 tiles.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        if data.len() != CIFAR10_SIZE * TILE_LEN {
            return Err(MosaicError::InvalidDataset(format!(
                "{} holds {} bytes, expected {}",
                path.display(),
                data.len(),
                CIFAR10_SIZE * TILE_LEN
            )));
        }
        debug!("dataset read success: {} entries from {}", CIFAR10_SIZE, path.display());
        Self::new(data)
    }

    pub fn len(&self) -> usize {
        self.data.len() / TILE_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Channel-major bytes of entry `index`.
    pub fn entry(&self, index: usize) -> &[u8] {
        &self.data[index * TILE_LEN..(index + 1) * TILE_LEN]
    }

    pub fn entries(&self) -> std::slice::ChunksExact<'_, u8> {
        self.data.chunks_exact(TILE_LEN)
    }
}
