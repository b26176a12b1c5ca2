use crate::config::MosaicConfig;
use crate::distributed::{gather_segments, report_failure, Communicator};
use crate::error::Result;
use crate::matcher::{build_matcher, TileMatcher};
use crate::mosaic::partition::{effective_workers, split};
use crate::mosaic::{Dataset, Image, IndexArray};
use crate::timer::PhaseTimer;
use log::{info, warn};

/// Drives one photomosaic job on one participant: partition across
/// participants, match the local segment, gather at the root.
pub struct PhotomosaicEngine {
    matcher: Box<dyn TileMatcher>,
    config: MosaicConfig,
}

impl std::fmt::Debug for PhotomosaicEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotomosaicEngine")
            .field("matcher", &self.matcher.name())
            .field("config", &self.config)
            .finish()
    }
}

impl PhotomosaicEngine {
    pub fn new(matcher: Box<dyn TileMatcher>, config: MosaicConfig) -> Self {
        Self { matcher, config }
    }

    /// Build the matcher the configuration asks for, then the engine.
    pub fn from_config(config: MosaicConfig) -> Result<Self> {
        let matcher = build_matcher(&config)?;
        Ok(Self::new(matcher, config))
    }

    pub fn matcher(&self) -> &dyn TileMatcher {
        self.matcher.as_ref()
    }

    /// Tiles a participant must own before it is worth using. It comes from
    /// the configuration alone, so every rank derives the same layout whatever
    /// hardware it found locally.
    pub fn participant_quota(&self) -> usize {
        self.config.participant_quota()
    }

    /// Run the job for the participant `comm` represents.
    ///
    /// Returns the complete index array on the root and `None` on every
    /// other participant, including ones left idle by a small image. A
    /// participant that fails reports it to the root before returning, so the
    /// root fails too instead of waiting for the missing segment.
    pub fn run(&self, image: &Image, dataset: &Dataset, comm: &dyn Communicator) -> Result<Option<IndexArray>> {
        let total = PhaseTimer::begin("[photomosaic] total");
        let tile_count = image.tile_count();
        let participants = effective_workers(tile_count, comm.size(), self.participant_quota());
        if comm.rank() >= participants {
            info!(
                "Rank {} idle: {} tiles only need {} of {} participants",
                comm.rank(),
                tile_count,
                participants,
                comm.size()
            );
            return Ok(None);
        }

        let layout = split(tile_count, participants);
        let range = layout[comm.rank()].clone();
        info!(
            "Rank {} matching tiles {:?} of {} with {}",
            comm.rank(),
            range,
            tile_count,
            self.matcher.name()
        );

        let mut local = vec![0u32; range.len()];
        if let Err(e) = self.matcher.compute_indices(image, dataset, range, &mut local) {
            warn!("Rank {} failed to match its tiles: {}", comm.rank(), e);
            report_failure(comm, &e);
            return Err(e);
        }
        let indices = gather_segments(comm, local, &layout)?;
        total.end();
        Ok(indices)
    }
}
