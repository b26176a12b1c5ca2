use crate::error::{MosaicError, Result};

/// Tiles a single device (or thread-pool unit) must receive before it is worth using.
pub const MIN_DEVICE_QUOTA: usize = 4;

/// Number of rotating buffer slots per device in the transform pipeline.
pub const DEFAULT_PIPELINE_SLOTS: usize = 2;

/// Which matcher implementation the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Rayon worker pool over host memory; no whole-image transform.
    Threads,
    /// Vulkan compute on every discovered device.
    Vulkan,
}

/// Runtime configuration for one photomosaic job.
#[derive(Debug, Clone)]
pub struct MosaicConfig {
    /// Matcher implementation selected at start-up
    pub backend: Backend,
    /// Worker threads for the thread backend. `None` uses the available parallelism.
    pub threads: Option<usize>,
    /// Upper bound on the number of Vulkan devices used. `None` uses all of them.
    pub max_devices: Option<usize>,
    /// Minimum tiles per device before the device count is reduced
    pub min_device_quota: usize,
    /// Devices each participant is planned with when the job is split across
    /// participants. Every rank must use the same value, so it is configured
    /// rather than discovered.
    pub participant_devices: usize,
    /// Rotating buffer slots per device in the transform pipeline
    pub pipeline_slots: usize,
    /// Abandon a corpus entry once its partial distance can no longer win (thread backend)
    pub early_exit: bool,
    /// Enable the Khronos validation layer when it is installed
    pub enable_validation: bool,
    /// Fall back to the thread backend when no Vulkan device can be opened
    pub fallback_to_threads: bool,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Vulkan,
            threads: None,
            max_devices: None,
            min_device_quota: MIN_DEVICE_QUOTA,
            participant_devices: 1,
            pipeline_slots: DEFAULT_PIPELINE_SLOTS,
            early_exit: true,
            enable_validation: false,
            fallback_to_threads: true,
        }
    }
}

impl MosaicConfig {
    /// Configuration for the pure host path.
    pub fn threads_only() -> Self {
        Self {
            backend: Backend::Threads,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            return Err(MosaicError::InvalidConfig("thread count must be at least 1".to_string()));
        }
        if self.max_devices == Some(0) {
            return Err(MosaicError::InvalidConfig("device cap must be at least 1".to_string()));
        }
        if self.min_device_quota == 0 {
            return Err(MosaicError::InvalidConfig("device quota must be at least 1 tile".to_string()));
        }
        if self.participant_devices == 0 {
            return Err(MosaicError::InvalidConfig("participants must plan for at least one device".to_string()));
        }
        if self.pipeline_slots == 0 {
            return Err(MosaicError::InvalidConfig("pipeline needs at least one buffer slot".to_string()));
        }
        Ok(())
    }

    /// Tiles a participant must own before it is worth using: a full device
    /// quota for every device it is planned with. Identical on every rank
    /// that shares the configuration.
    pub fn participant_quota(&self) -> usize {
        self.min_device_quota * self.participant_devices
    }

    /// Resolved worker thread count for the thread backend.
    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MosaicConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline_slots, 2);
        assert_eq!(config.min_device_quota, MIN_DEVICE_QUOTA);
    }

    #[test]
    fn zero_sized_settings_are_rejected() {
        let mut config = MosaicConfig::threads_only();
        config.threads = Some(0);
        assert!(matches!(config.validate(), Err(MosaicError::InvalidConfig(_))));

        let config = MosaicConfig {
            pipeline_slots: 0,
            ..MosaicConfig::default()
        };
        assert!(config.validate().is_err());

        let config = MosaicConfig {
            min_device_quota: 0,
            ..MosaicConfig::default()
        };
        assert!(config.validate().is_err());

        let config = MosaicConfig {
            participant_devices: 0,
            ..MosaicConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_thread_count_wins() {
        let config = MosaicConfig {
            threads: Some(3),
            ..MosaicConfig::threads_only()
        };
        assert_eq!(config.thread_count(), 3);
    }

    #[test]
    fn participant_quota_scales_with_planned_devices() {
        assert_eq!(MosaicConfig::default().participant_quota(), MIN_DEVICE_QUOTA);
        let config = MosaicConfig {
            min_device_quota: 5,
            participant_devices: 3,
            ..MosaicConfig::default()
        };
        assert_eq!(config.participant_quota(), 15);
    }
}
