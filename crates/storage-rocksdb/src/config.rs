//! RocksDB configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Compression applied to data blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionType {
    /// No compression
    None,
    /// LZ4 compression (fast)
    Lz4,
    /// Zstandard compression (balanced)
    Zstd,
    /// Snappy compression
    Snappy,
}

/// Configuration for RocksDB storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Path to the RocksDB database
    pub path: PathBuf,

    /// Create the database if it does not exist
    pub create_if_missing: bool,

    /// fsync the WAL on every commit
    pub sync_writes: bool,

    /// Compression type
    pub compression: CompressionType,

    /// Maximum number of open files (-1 for unlimited)
    pub max_open_files: i32,

    /// Write buffer size (default: 64MB)
    pub write_buffer_size: usize,

    /// Bloom filter bits per key (0 to disable)
    pub bloom_filter_bits: i32,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./replikv_data"),
            create_if_missing: true,
            sync_writes: true,
            compression: CompressionType::Lz4,
            max_open_files: -1, // Unlimited
            write_buffer_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
        }
    }
}

impl RocksDbConfig {
    /// Create a new configuration with the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a development configuration with lower resource usage.
    ///
    /// Commits are not fsynced, so a machine crash may lose the latest
    /// batches. A process crash does not.
    pub fn development<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            sync_writes: false,
            write_buffer_size: 16 * 1024 * 1024, // 16MB
            ..Default::default()
        }
    }

    /// Create a production configuration
    pub fn production<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            sync_writes: true,
            compression: CompressionType::Zstd,
            write_buffer_size: 128 * 1024 * 1024, // 128MB
            ..Default::default()
        }
    }

    /// Set whether commits are fsynced
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    /// Set the compression type
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }
}

/// Convert our compression type to RocksDB compression type
pub fn to_rocksdb_compression(compression: CompressionType) -> rocksdb::DBCompressionType {
    match compression {
        CompressionType::None => rocksdb::DBCompressionType::None,
        CompressionType::Lz4 => rocksdb::DBCompressionType::Lz4,
        CompressionType::Zstd => rocksdb::DBCompressionType::Zstd,
        CompressionType::Snappy => rocksdb::DBCompressionType::Snappy,
    }
}
