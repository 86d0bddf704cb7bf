//! Partition strategy
//!
//! Computes how a file is split into parts for a multipart upload, given the
//! caller's preferred part size and the active provider's limits.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default preferred part size (10MB)
pub const DEFAULT_PART_SIZE: u64 = 10 * 1024 * 1024;

/// Default minimum part size (1MB)
pub const DEFAULT_MIN_PART_SIZE: u64 = 1024 * 1024;

/// Default maximum part size (5GB)
pub const DEFAULT_MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Default maximum number of parts per upload
pub const DEFAULT_PART_COUNT_LIMIT: u32 = 1000;

/// Partition errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("Cannot partition an empty file")]
    EmptyFile,

    #[error("Part count limit must be at least 1")]
    ZeroPartCountLimit,

    #[error("Minimum part size must be at least 1 byte")]
    ZeroMinPartSize,

    #[error("Minimum part size {min_part_size} exceeds maximum part size {max_part_size}")]
    InvertedBounds {
        min_part_size: u64,
        max_part_size: u64,
    },

    #[error(
        "File of {file_size} bytes needs parts of {required_part_size} bytes to fit in \
         {part_count_limit} parts, above the {max_part_size} byte maximum"
    )]
    Unsatisfiable {
        file_size: u64,
        required_part_size: u64,
        part_count_limit: u32,
        max_part_size: u64,
    },
}

/// Sizing constraints for a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLimits {
    pub min_part_size: u64,
    pub max_part_size: u64,
    pub part_count_limit: u32,
}

impl Default for PartitionLimits {
    fn default() -> Self {
        Self {
            min_part_size: DEFAULT_MIN_PART_SIZE,
            max_part_size: DEFAULT_MAX_PART_SIZE,
            part_count_limit: DEFAULT_PART_COUNT_LIMIT,
        }
    }
}

/// How a file is split into parts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub file_size: u64,
    pub part_size: u64,
    pub part_count: u32,
}

/// Byte range covered by one part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based part number
    pub part_number: u32,
    pub offset: u64,
    pub length: u64,
}

impl PartitionPlan {
    /// Compute a plan for `file_size` bytes.
    ///
    /// `base_part_size` is the preferred part size (defaults to 10MB). When it
    /// would produce more parts than the limit allows, the part size grows to
    /// `ceil(file_size / part_count_limit)`. Fails when even that size is
    /// above `max_part_size`.
    pub fn compute(
        file_size: u64,
        base_part_size: Option<u64>,
        limits: PartitionLimits,
    ) -> Result<Self, PartitionError> {
        if file_size == 0 {
            return Err(PartitionError::EmptyFile);
        }
        if limits.part_count_limit == 0 {
            return Err(PartitionError::ZeroPartCountLimit);
        }
        if limits.min_part_size == 0 {
            return Err(PartitionError::ZeroMinPartSize);
        }
        if limits.min_part_size > limits.max_part_size {
            return Err(PartitionError::InvertedBounds {
                min_part_size: limits.min_part_size,
                max_part_size: limits.max_part_size,
            });
        }

        let limit = u64::from(limits.part_count_limit);
        let required_part_size = file_size.div_ceil(limit);
        if required_part_size > limits.max_part_size {
            return Err(PartitionError::Unsatisfiable {
                file_size,
                required_part_size,
                part_count_limit: limits.part_count_limit,
                max_part_size: limits.max_part_size,
            });
        }

        let mut part_size = base_part_size
            .unwrap_or(DEFAULT_PART_SIZE)
            .max(limits.min_part_size)
            .min(limits.max_part_size);
        let mut part_count = file_size.div_ceil(part_size);

        if part_count > limit {
            part_size = required_part_size.max(limits.min_part_size);
            part_count = file_size.div_ceil(part_size);
        }

        // part_count <= limit <= u32::MAX here
        let part_count = u32::try_from(part_count).map_err(|_| PartitionError::Unsatisfiable {
            file_size,
            required_part_size,
            part_count_limit: limits.part_count_limit,
            max_part_size: limits.max_part_size,
        })?;

        Ok(Self {
            file_size,
            part_size,
            part_count,
        })
    }

    /// Byte range of a 1-based part number, `None` when out of range
    pub fn part_range(&self, part_number: u32) -> Option<PartRange> {
        if part_number == 0 || part_number > self.part_count {
            return None;
        }
        let offset = u64::from(part_number - 1) * self.part_size;
        let length = self.part_size.min(self.file_size - offset);
        Some(PartRange {
            part_number,
            offset,
            length,
        })
    }

    /// All part ranges in order
    pub fn parts(&self) -> impl Iterator<Item = PartRange> + '_ {
        (1..=self.part_count).filter_map(move |n| self.part_range(n))
    }

    /// Size of the final (possibly short) part
    pub fn last_part_size(&self) -> u64 {
        self.file_size - self.part_size * u64::from(self.part_count - 1)
    }
}
