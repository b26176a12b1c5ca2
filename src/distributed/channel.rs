use crate::distributed::{Communicator, Contribution, ROOT};
use crate::error::{MosaicError, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};

/// In-process participant backed by `crossbeam` channels, one per thread.
///
/// The root holds the only receiver; every other rank holds a sender. Each
/// participant should own its communicator, so a rank that exits early drops
/// its sender and the root sees the disconnect.
#[derive(Debug)]
pub struct ChannelCommunicator {
    rank: usize,
    size: usize,
    to_root: Option<Sender<(usize, Contribution)>>,
    inbox: Option<Receiver<(usize, Contribution)>>,
}

impl ChannelCommunicator {
    /// Create a connected group of `size` participants, indexed by rank.
    pub fn group(size: usize) -> Result<Vec<Self>> {
        if size == 0 {
            return Err(MosaicError::InvalidConfig(
                "a participant group needs at least one member".to_string(),
            ));
        }
        let (tx, rx) = unbounded();
        let mut inbox = Some(rx);
        Ok((0..size)
            .map(|rank| Self {
                rank,
                size,
                to_root: (rank != ROOT).then(|| tx.clone()),
                inbox: if rank == ROOT { inbox.take() } else { None },
            })
            .collect())
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send_to_root(&self, contribution: Contribution) -> Result<()> {
        let to_root = self
            .to_root
            .as_ref()
            .ok_or_else(|| MosaicError::DistributedError("the root cannot send to itself".to_string()))?;
        to_root
            .send((self.rank, contribution))
            .map_err(|_| MosaicError::DistributedError(format!("rank {}: root hung up", self.rank)))
    }

    fn receive(&self) -> Result<(usize, Contribution)> {
        let inbox = self.inbox.as_ref().ok_or_else(|| {
            MosaicError::DistributedError(format!("rank {} is not the root", self.rank))
        })?;
        inbox.recv().map_err(|_| {
            MosaicError::DistributedError("every participant disconnected before contributing".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_root_receives() {
        let group = ChannelCommunicator::group(3).unwrap();
        assert_eq!(group.iter().map(|c| c.rank()).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(group[1].receive().is_err());
        assert!(group[0].send_to_root(Contribution::Segment(vec![1])).is_err());

        group[2].send_to_root(Contribution::Segment(vec![7, 8])).unwrap();
        assert_eq!(group[0].receive().unwrap(), (2, Contribution::Segment(vec![7, 8])));
    }

    #[test]
    fn root_sees_disconnect() {
        let mut group = ChannelCommunicator::group(2).unwrap();
        let root = group.remove(0);
        drop(group);
        assert!(matches!(root.receive(), Err(MosaicError::DistributedError(_))));
    }

    #[test]
    fn empty_group_is_rejected() {
        assert!(matches!(
            ChannelCommunicator::group(0),
            Err(MosaicError::InvalidConfig(_))
        ));
    }

    #[test]
    fn member_thread_exit_disconnects_root() {
        let mut group = ChannelCommunicator::group(3).unwrap();
        let root = group.remove(0);
        std::thread::scope(|scope| {
            for member in group {
                scope.spawn(move || drop(member));
            }
        });
        assert!(root.receive().is_err());
    }
}
