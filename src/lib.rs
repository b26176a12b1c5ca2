//! Vulkan Photomosaic Library
//!
//! Replaces every 32x32 tile of an RGB24 image by the closest tile of a fixed
//! reference corpus (CIFAR-10, 60,000 tiles), using an exhaustive search over
//! the sum of squared byte differences.
//!
//! ## Parallelism layers
//!
//! 1. **Participants** (`distributed`): the tile index space is split into
//!    contiguous segments, one per participant, and gathered at rank 0.
//! 2. **Devices** (`vulkan::VulkanHost`): each participant splits its segment
//!    across every Vulkan device, one host thread per device.
//!    - A pipelined transform converts interleaved tile rows to channel-major
//!      tiles, overlapping upload, kernel and read-back on three queues.
//!    - The matcher kernel runs one invocation per tile against the whole
//!      corpus held in device memory.
//! 3. **Threads** (`matcher::ThreadMatcher`): without a usable device, a rayon
//!    pool matches tiles straight from the interleaved buffer.
//!
//! Every strategy picks the first corpus index with the smallest distance, so
//! they agree bit for bit.

pub mod config;
pub mod distributed;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod mosaic;
pub mod timer;
pub mod vulkan;

pub use config::{Backend, MosaicConfig};
pub use distributed::{ChannelCommunicator, Communicator, Contribution, SoloCommunicator};
pub use engine::PhotomosaicEngine;
pub use error::{MosaicError, Result};
pub use matcher::{build_matcher, ThreadMatcher, TileMatcher};
pub use mosaic::{assemble_mosaic, Dataset, Image, IndexArray};
pub use timer::PhaseTimer;
pub use vulkan::VulkanHost;
