use crate::distributed::{report_failure, Communicator, Contribution, ROOT};
use crate::error::{MosaicError, Result};
use crate::mosaic::IndexArray;
use crate::timer::PhaseTimer;
use log::debug;
use std::ops::Range;

/// Gather variable-length segments at the root.
///
/// `layout[r]` is the global range owned by rank `r`; only the first
/// `layout.len()` ranks take part. The root returns the full array with every
/// segment at its offset, everyone else returns `None`. A participant that
/// reports a failure aborts the gather on the root with `DistributedError`.
pub fn gather_segments(
    comm: &dyn Communicator,
    local: Vec<u32>,
    layout: &[Range<usize>],
) -> Result<Option<IndexArray>> {
    let rank = comm.rank();
    if rank >= layout.len() {
        return Err(MosaicError::DistributedError(format!(
            "rank {} is not part of a {}-participant gather",
            rank,
            layout.len()
        )));
    }
    if let Err(e) = check_segment(rank, &local, &layout[rank]) {
        report_failure(comm, &e);
        return Err(e);
    }

    let timer = PhaseTimer::begin("[photomosaic] gather time");
    if rank != ROOT {
        comm.send_to_root(Contribution::Segment(local))?;
        timer.end();
        return Ok(None);
    }

    let total = layout.last().map_or(0, |r| r.end);
    let mut indices = vec![0u32; total];
    indices[layout[ROOT].clone()].copy_from_slice(&local);

    let mut received = vec![false; layout.len()];
    received[ROOT] = true;
    for _ in 1..layout.len() {
        let (from, contribution) = comm.receive()?;
        if from >= layout.len() || received[from] {
            return Err(MosaicError::DistributedError(format!(
                "unexpected segment from rank {}",
                from
            )));
        }
        let segment = match contribution {
            Contribution::Segment(segment) => segment,
            Contribution::Failed(reason) => {
                return Err(MosaicError::DistributedError(format!("rank {} failed: {}", from, reason)));
            }
        };
        check_segment(from, &segment, &layout[from])?;
        indices[layout[from].clone()].copy_from_slice(&segment);
        received[from] = true;
    }
    timer.end();
    debug!("Gathered {} indices from {} participants", total, layout.len());
    Ok(Some(indices))
}

fn check_segment(rank: usize, segment: &[u32], range: &Range<usize>) -> Result<()> {
    if segment.len() != range.len() {
        return Err(MosaicError::DistributedError(format!(
            "rank {} contributed {} indices, expected {}",
            rank,
            segment.len(),
            range.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{ChannelCommunicator, SoloCommunicator};

    #[test]
    fn solo_gather_is_identity() {
        let out = gather_segments(&SoloCommunicator, vec![4, 5, 6], &[0..3]).unwrap();
        assert_eq!(out, Some(vec![4, 5, 6]));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(gather_segments(&SoloCommunicator, vec![1], &[0..3]).is_err());
    }

    #[test]
    fn duplicate_sender_is_rejected() {
        let group = ChannelCommunicator::group(3).unwrap();
        group[1].send_to_root(Contribution::Segment(vec![9])).unwrap();
        group[1].send_to_root(Contribution::Segment(vec![9])).unwrap();
        let err = gather_segments(&group[0], vec![0], &[0..1, 1..2, 2..3]).unwrap_err();
        assert!(matches!(err, MosaicError::DistributedError(_)));
    }

    #[test]
    fn reported_failure_aborts_root() {
        let group = ChannelCommunicator::group(3).unwrap();
        group[2].send_to_root(Contribution::Segment(vec![5])).unwrap();
        report_failure(&group[1], &MosaicError::NoGpuFound);
        let err = gather_segments(&group[0], vec![0], &[0..1, 1..2, 2..3]).unwrap_err();
        match err {
            MosaicError::DistributedError(reason) => assert!(reason.starts_with("rank 1 failed")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_local_segment_is_reported_to_root() {
        let group = ChannelCommunicator::group(2).unwrap();
        assert!(gather_segments(&group[1], vec![1, 2, 3], &[0..1, 1..2]).is_err());
        let err = gather_segments(&group[0], vec![0], &[0..1, 1..2]).unwrap_err();
        assert!(matches!(err, MosaicError::DistributedError(_)));
    }
}
