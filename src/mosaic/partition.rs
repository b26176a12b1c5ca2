//! Contiguous work splitting shared by the process, device and row levels.

use std::ops::Range;

/// Split `[0, total)` into `groups` contiguous ranges using the boundary
/// `i * total / groups`. Range lengths differ by at most one.
pub fn split(total: usize, groups: usize) -> Vec<Range<usize>> {
    assert!(groups > 0, "cannot split work across zero groups");
    (0..groups)
        .map(|i| boundary(total, groups, i)..boundary(total, groups, i + 1))
        .collect()
}

/// Split `range` the same way as [`split`], offsetting every slice by `range.start`.
pub fn split_range(range: Range<usize>, groups: usize) -> Vec<Range<usize>> {
    split(range.len(), groups)
        .into_iter()
        .map(|r| range.start + r.start..range.start + r.end)
        .collect()
}

fn boundary(total: usize, groups: usize, i: usize) -> usize {
    // u128 keeps i * total from overflowing for very large inputs
    ((i as u128 * total as u128) / groups as u128) as usize
}

/// Number of workers that should actually receive work.
///
/// If `units` is smaller than `quota * workers`, only `ceil(units / quota)`
/// workers are used (never fewer than one); the rest stay idle.
pub fn effective_workers(units: usize, workers: usize, quota: usize) -> usize {
    let quota = quota.max(1);
    if units < quota.saturating_mul(workers) {
        units.div_ceil(quota).clamp(1, workers.max(1))
    } else {
        workers
    }
}

/// Hand out disjoint mutable views of `data` for contiguous `ranges`, which are
/// relative to the start of `data` and must be sorted and non-overlapping.
pub fn split_mut<'a, T>(mut data: &'a mut [T], ranges: &[Range<usize>]) -> Vec<&'a mut [T]> {
    let mut consumed = 0;
    let mut parts = Vec::with_capacity(ranges.len());
    for range in ranges {
        assert!(range.start >= consumed, "ranges must be sorted and disjoint");
        let rest = std::mem::take(&mut data);
        let (_, rest) = rest.split_at_mut(range.start - consumed);
        let (part, rest) = rest.split_at_mut(range.len());
        parts.push(part);
        data = rest;
        consumed = range.end;
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_uses_integer_boundaries() {
        assert_eq!(split(7, 3), vec![0..2, 2..4, 4..7]);
        assert_eq!(split(4, 4), vec![0..1, 1..2, 2..3, 3..4]);
        assert_eq!(split(3, 1), vec![0..3]);
    }

    #[test]
    fn split_with_more_groups_than_work_yields_empty_ranges() {
        let ranges = split(2, 4);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges.iter().map(|r| r.len()).sum::<usize>(), 2);
        assert!(ranges.iter().any(|r| r.is_empty()));
    }

    #[test]
    fn split_range_keeps_offsets() {
        assert_eq!(split_range(10..17, 3), vec![10..12, 12..14, 14..17]);
    }

    #[test]
    fn effective_workers_applies_quota() {
        assert_eq!(effective_workers(100, 4, 4), 4);
        assert_eq!(effective_workers(16, 4, 4), 4);
        assert_eq!(effective_workers(15, 4, 4), 4);
        assert_eq!(effective_workers(9, 4, 4), 3);
        assert_eq!(effective_workers(4, 4, 4), 1);
        assert_eq!(effective_workers(1, 4, 4), 1);
        assert_eq!(effective_workers(0, 4, 4), 1);
    }

    #[test]
    fn split_mut_hands_out_requested_windows() {
        let mut data = [0u32; 8];
        {
            let parts = split_mut(&mut data, &[0..3, 3..5, 6..8]);
            for (i, part) in parts.into_iter().enumerate() {
                part.fill(i as u32 + 1);
            }
        }
        assert_eq!(data, [1, 1, 1, 2, 2, 0, 3, 3]);
    }
}
