//! Collective transport between participants of one photomosaic job.
//!
//! Participants only talk twice: at start (rank and size) and at the end,
//! when every segment is gathered at rank 0.

pub mod channel;
pub mod gather;

use crate::error::{MosaicError, Result};
use log::warn;

pub use channel::ChannelCommunicator;
pub use gather::gather_segments;

/// Rank of the participant that receives the full index array.
pub const ROOT: usize = 0;

/// What a participant hands to the root at the end of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contribution {
    /// The indices of the participant's tile range
    Segment(Vec<u32>),
    /// The participant failed; the root aborts the gather with this reason
    Failed(String),
}

/// Point-to-root messaging used by [`gather_segments`].
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    /// Number of participants, including idle ones.
    fn size(&self) -> usize;

    /// Hand this participant's contribution to the root. Not valid on the root.
    fn send_to_root(&self, contribution: Contribution) -> Result<()>;

    /// Wait for the next contribution from any participant, tagged with its
    /// rank. Only valid on the root.
    fn receive(&self) -> Result<(usize, Contribution)>;
}

/// Tell the root this participant failed with `error`, so the gather aborts
/// instead of waiting for a segment that never comes. Does nothing on the root.
pub fn report_failure(comm: &dyn Communicator, error: &MosaicError) {
    if comm.rank() == ROOT {
        return;
    }
    if let Err(e) = comm.send_to_root(Contribution::Failed(error.to_string())) {
        warn!("Rank {} could not report its failure to the root: {}", comm.rank(), e);
    }
}

/// The single-participant job.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoloCommunicator;

impl Communicator for SoloCommunicator {
    fn rank(&self) -> usize {
        ROOT
    }

    fn size(&self) -> usize {
        1
    }

    fn send_to_root(&self, _contribution: Contribution) -> Result<()> {
        Err(MosaicError::DistributedError("the root cannot send to itself".to_string()))
    }

    fn receive(&self) -> Result<(usize, Contribution)> {
        Err(MosaicError::DistributedError("no other participant to receive from".to_string()))
    }
}
