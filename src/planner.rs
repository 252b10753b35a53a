use std::path::Path;
use tracing::{info, warn};

use crate::error::DownloadError;
use crate::state::Part;

/// Size of every part except possibly the last one.
pub const PIECE_SIZE: u64 = 50 << 20;
/// Largest resource we agree to download.
pub const MAX_FILE_SIZE: u64 = 10 << 30;
pub const MAX_WORKERS: usize = 32;

pub fn check_worker_count(requested: i64) -> Result<(), DownloadError> {
    if requested < 1 {
        return Err(DownloadError::InvalidConfig(format!(
            "worker count must be at least 1, got {}",
            requested
        )));
    }
    Ok(())
}

/// Validates the requested worker count. Servers without range support
/// always get a single worker.
pub fn resolve_workers(requested: i64, supports_ranges: bool) -> Result<usize, DownloadError> {
    check_worker_count(requested)?;
    if !supports_ranges {
        if requested > 1 {
            info!("Server does not support byte ranges, using a single worker");
        }
        return Ok(1);
    }
    let requested = usize::try_from(requested).unwrap_or(usize::MAX);
    if requested > MAX_WORKERS {
        warn!("Worker count {} exceeds the limit, using {}", requested, MAX_WORKERS);
        return Ok(MAX_WORKERS);
    }
    Ok(requested)
}

/// Inclusive `(begin, end)` ranges partitioning `[0, size)`.
pub fn plan_ranges(size: u64, piece_size: u64, supports_ranges: bool) -> Vec<(u64, u64)> {
    if size == 0 {
        return vec![];
    }
    if !supports_ranges || piece_size == 0 {
        return vec![(0, size - 1)];
    }

    let piece_count = size.div_ceil(piece_size);
    let mut ranges = Vec::with_capacity(piece_count as usize);
    let mut begin = 0;
    while begin < size {
        let end = begin.saturating_add(piece_size).min(size) - 1;
        ranges.push((begin, end));
        begin = end + 1;
    }
    ranges
}

pub fn plan_parts(
    size: u64,
    piece_size: u64,
    supports_ranges: bool,
    temp_dir: &Path,
    file_name: &str,
) -> Vec<Part> {
    plan_ranges(size, piece_size, supports_ranges)
        .into_iter()
        .enumerate()
        .map(|(index, (begin, end))| Part {
            id: index + 1,
            begin,
            end,
            temp_path: temp_dir.join(format!("{}_{}", file_name, index)),
            finished: false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const MIB: u64 = 1 << 20;

    fn assert_partition(size: u64, ranges: &[(u64, u64)]) {
        if size == 0 {
            assert!(ranges.is_empty());
            return;
        }
        assert_eq!(ranges.first().map(|r| r.0), Some(0));
        assert_eq!(ranges.last().map(|r| r.1), Some(size - 1));
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1 + 1, pair[1].0, "ranges must be contiguous");
        }
        let covered: u64 = ranges.iter().map(|(b, e)| e - b + 1).sum();
        assert_eq!(covered, size);
    }

    #[test]
    fn ranges_partition_the_resource() {
        for size in [0, 1, 2, 9, 10, 11, 99, 100, 101, 1000, 4096, 12345] {
            for piece in [1, 3, 10, 64, 100, 5000] {
                let ranges = plan_ranges(size, piece, true);
                assert_partition(size, &ranges);
                assert!(ranges.iter().all(|(b, e)| e - b + 1 <= piece));
            }
        }
    }

    #[test]
    fn three_parts_for_150_mib() {
        let size = 150 * MIB;
        let ranges = plan_ranges(size, 50 * MIB, true);
        assert_eq!(
            ranges,
            vec![
                (0, 52428799),
                (52428800, 104857599),
                (104857600, size - 1),
            ]
        );
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_part() {
        let ranges = plan_ranges(100, 50, true);
        assert_eq!(ranges, vec![(0, 49), (50, 99)]);
    }

    #[test]
    fn last_part_absorbs_remainder() {
        let ranges = plan_ranges(120, 50, true);
        assert_eq!(ranges.last(), Some(&(100, 119)));
    }

    #[test]
    fn no_range_support_means_one_part_and_one_worker() {
        let parts = plan_parts(150 * MIB, PIECE_SIZE, false, Path::new("/tmp/scratch"), "a.iso");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].begin, 0);
        assert_eq!(parts[0].end, 150 * MIB - 1);
        assert_eq!(resolve_workers(8, false).unwrap(), 1);
    }

    #[test]
    fn parts_get_ids_and_temp_paths() {
        let parts = plan_parts(25, 10, true, Path::new("/tmp/scratch"), "a.bin");
        let ids: Vec<usize> = parts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(parts[0].temp_path, PathBuf::from("/tmp/scratch/a.bin_0"));
        assert_eq!(parts[2].temp_path, PathBuf::from("/tmp/scratch/a.bin_2"));
        assert!(parts.iter().all(|p| !p.finished));
    }

    #[test]
    fn worker_count_validation() {
        assert!(matches!(resolve_workers(-1, true), Err(DownloadError::InvalidConfig(_))));
        assert!(matches!(resolve_workers(0, true), Err(DownloadError::InvalidConfig(_))));
        assert_eq!(resolve_workers(4, true).unwrap(), 4);
        assert_eq!(resolve_workers(1000, true).unwrap(), MAX_WORKERS);
    }
}
