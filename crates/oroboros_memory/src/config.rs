//! # Arena Configuration
//!
//! Arenas can be described in TOML and built once at startup:
//!
//! ```toml
//! tracking = true
//!
//! [backend]
//! kind = "pool"
//! block_size = 64
//! block_alignment = 16
//! block_count = 4096
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::arena::{Arena, HeapArena, LinearArena, NullArena, PoolArena, StackArena, TrackingArena};
use crate::error::{MemoryError, MemoryResult};

/// Default block alignment for pool arenas.
const DEFAULT_BLOCK_ALIGNMENT: usize = 16;

fn default_block_alignment() -> usize {
    DEFAULT_BLOCK_ALIGNMENT
}

/// Backing strategy and its parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArenaKind {
    /// [`HeapArena`].
    Heap,
    /// [`NullArena`].
    Null,
    /// [`LinearArena`] with `capacity` bytes.
    Linear {
        /// Region size in bytes.
        capacity: usize,
    },
    /// [`StackArena`] with `capacity` bytes.
    Stack {
        /// Region size in bytes.
        capacity: usize,
    },
    /// [`PoolArena`] of `block_count` blocks.
    Pool {
        /// Usable bytes per block.
        block_size: usize,
        /// Maximum alignment per block. Default: 16.
        #[serde(default = "default_block_alignment")]
        block_alignment: usize,
        /// Number of blocks.
        block_count: usize,
    },
}

/// Description of one arena.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Wrap the backend in a [`TrackingArena`].
    #[serde(default)]
    pub tracking: bool,
    /// Backing strategy.
    pub backend: ArenaKind,
}

impl ArenaConfig {
    /// An untracked arena of the given kind.
    #[must_use]
    pub const fn new(backend: ArenaKind) -> Self {
        Self {
            tracking: false,
            backend,
        }
    }

    /// Parses and validates a TOML description.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] if the text is not a valid description,
    /// or any error reported by [`ArenaConfig::validate`].
    pub fn from_toml_str(text: &str) -> MemoryResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| MemoryError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML description from `path`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] if the file cannot be read, plus every
    /// error of [`ArenaConfig::from_toml_str`].
    pub fn from_toml(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MemoryError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks capacities and alignments without allocating anything.
    ///
    /// # Errors
    ///
    /// [`MemoryError::ZeroCapacity`] for empty regions or pools,
    /// [`MemoryError::InvalidAlignment`] for a non power-of-two block
    /// alignment.
    pub fn validate(&self) -> MemoryResult<()> {
        match self.backend {
            ArenaKind::Heap | ArenaKind::Null => Ok(()),
            ArenaKind::Linear { capacity } | ArenaKind::Stack { capacity } => {
                if capacity == 0 {
                    return Err(MemoryError::ZeroCapacity);
                }
                Ok(())
            }
            ArenaKind::Pool {
                block_size,
                block_alignment,
                block_count,
            } => {
                if block_size == 0 || block_count == 0 {
                    return Err(MemoryError::ZeroCapacity);
                }
                if !block_alignment.is_power_of_two() {
                    return Err(MemoryError::InvalidAlignment(block_alignment));
                }
                Ok(())
            }
        }
    }

    /// Builds the described arena.
    ///
    /// # Errors
    ///
    /// Any validation error, or a failure to allocate the backing region.
    pub fn build(&self) -> MemoryResult<Box<dyn Arena>> {
        self.validate()?;

        let backend: Box<dyn Arena> = match self.backend {
            ArenaKind::Heap => Box::new(HeapArena::new()),
            ArenaKind::Null => Box::new(NullArena::new()),
            ArenaKind::Linear { capacity } => Box::new(LinearArena::new(capacity)?),
            ArenaKind::Stack { capacity } => Box::new(StackArena::new(capacity)?),
            ArenaKind::Pool {
                block_size,
                block_alignment,
                block_count,
            } => Box::new(PoolArena::new(block_size, block_alignment, block_count)?),
        };

        tracing::debug!(
            backend = ?self.backend,
            tracking = self.tracking,
            "arena built from config"
        );

        if self.tracking {
            Ok(Box::new(TrackingArena::new(backend)))
        } else {
            Ok(backend)
        }
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(ArenaKind::Heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pool() {
        let config = ArenaConfig::from_toml_str(
            r#"
            tracking = true

            [backend]
            kind = "pool"
            block_size = 64
            block_count = 128
            "#,
        )
        .unwrap();

        assert!(config.tracking);
        assert_eq!(
            config.backend,
            ArenaKind::Pool {
                block_size: 64,
                block_alignment: 16,
                block_count: 128,
            }
        );
    }

    #[test]
    fn test_parse_defaults() {
        let config = ArenaConfig::from_toml_str("[backend]\nkind = \"heap\"\n").unwrap();
        assert_eq!(config, ArenaConfig::default());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = ArenaConfig::from_toml_str("[backend]\nkind = \"slab\"\n").unwrap_err();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
    }

    #[test]
    fn test_validation_errors() {
        let zero = ArenaConfig::new(ArenaKind::Linear { capacity: 0 });
        assert_eq!(zero.validate(), Err(MemoryError::ZeroCapacity));

        let misaligned = ArenaConfig::new(ArenaKind::Pool {
            block_size: 8,
            block_alignment: 24,
            block_count: 8,
        });
        assert_eq!(misaligned.build().err(), Some(MemoryError::InvalidAlignment(24)));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = ArenaConfig {
            tracking: true,
            backend: ArenaKind::Stack { capacity: 4096 },
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(ArenaConfig::from_toml_str(&text).unwrap(), config);
    }
}
