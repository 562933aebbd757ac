use crate::trackers::klt::options::KltOptions;
use crate::utils::config_length::ConfigLength;
use crate::Errors;
use anyhow::Result;

/// Class that is used to configure the hybrid tracker
#[derive(Debug, Clone)]
pub struct HybridOptions {
    klt: KltOptions,
    threshold_respawn: ConfigLength,
    association_radius: Option<f32>,
    update_description: bool,
    max_inactive_tracks: usize,
    seed: u64,
}

impl HybridOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        self.klt.validate()?;
        self.threshold_respawn.validate()?;
        if let Some(r) = self.association_radius {
            if !(r > 0.0) {
                return Err(Errors::NonPositive("association_radius").into());
            }
        }
        Ok(())
    }

    /// Optical flow configuration
    ///
    pub fn klt(mut self, opts: KltOptions) -> Self {
        self.klt = opts;
        self
    }

    /// Re-association is triggered when the number of active tracks falls below the
    /// threshold computed from the number of active tracks after the last spawn or
    /// re-association, e.g. `ConfigLength::relative(0.4, 50)` is 40% of the reference count
    /// but not less than 50 tracks.
    ///
    pub fn threshold_respawn(mut self, threshold: ConfigLength) -> Self {
        self.threshold_respawn = threshold;
        self
    }

    /// Detections closer than the radius to an active track are considered the same feature:
    /// they refresh the track and are never spawned. Defaults to two template radii.
    ///
    pub fn association_radius(mut self, radius: f32) -> Self {
        self.association_radius = Some(radius);
        self
    }

    /// Tracks take the description of the detection they are matched with
    ///
    pub fn update_description(mut self, enabled: bool) -> Self {
        self.update_description = enabled;
        self
    }

    /// The maximum number of dormant tracks, the excess is dropped at random. `0` means
    /// unbounded.
    ///
    pub fn max_inactive_tracks(mut self, n: usize) -> Self {
        self.max_inactive_tracks = n;
        self
    }

    /// Seed of the generator choosing dormant tracks to drop
    ///
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn get_klt(&self) -> &KltOptions {
        &self.klt
    }

    pub fn get_threshold_respawn(&self) -> &ConfigLength {
        &self.threshold_respawn
    }

    pub fn get_association_radius(&self) -> f32 {
        self.association_radius
            .unwrap_or(2.0 * self.klt.get_template_radius() as f32)
    }

    pub fn get_update_description(&self) -> bool {
        self.update_description
    }

    pub fn get_max_inactive_tracks(&self) -> usize {
        self.max_inactive_tracks
    }

    pub fn get_seed(&self) -> u64 {
        self.seed
    }
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            klt: KltOptions::default(),
            threshold_respawn: ConfigLength::relative(0.4, 50),
            association_radius: None,
            update_description: false,
            max_inactive_tracks: 200,
            seed: 0xDEAD_BEEF,
        }
    }
}
