//! Part sizing for multipart uploads.
//!
//! Object storage caps a multipart upload at 10,000 parts and requires every
//! part to be at least 5 MiB. The planner keeps the default 8 MiB part size
//! unless that would exceed the part ceiling, in which case it grows the part
//! size just enough to fit.

use crate::models::multipart::PartPlan;

/// Preferred part size (8 MiB).
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Smallest part size storage accepts for non-final parts (5 MiB).
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum number of parts in one multipart upload.
pub const MAX_PARTS: u64 = 10_000;

/// Compute part size and count for a file.
///
/// Unknown or non-positive sizes plan for a single part at the default size,
/// since streaming recorders rarely know their final length up front.
pub fn plan(file_size: Option<i64>) -> PartPlan {
    let part_size = DEFAULT_PART_SIZE.max(MIN_PART_SIZE);

    let size = match file_size {
        Some(size) if size > 0 => size as u64,
        _ => {
            return PartPlan {
                part_size,
                part_count: 1,
            };
        }
    };

    let part_size = if size.div_ceil(part_size) > MAX_PARTS {
        size.div_ceil(MAX_PARTS).max(MIN_PART_SIZE)
    } else {
        part_size
    };

    PartPlan {
        part_size,
        part_count: size.div_ceil(part_size),
    }
}
