use crate::utils::config_length::ConfigLength;
use crate::utils::pyramid::check_levels;
use crate::Errors;
use anyhow::Result;

/// Class that is used to configure the KLT tracker and the optical flow part of the hybrid
/// tracker
#[derive(Debug, Clone)]
pub struct KltOptions {
    template_radius: usize,
    pyramid_levels: usize,
    max_iterations: usize,
    min_determinant: f32,
    min_position_delta: f32,
    max_per_pixel_error: f32,
    forward_backward_tolerance: Option<f32>,
    max_tracks: ConfigLength,
    prune_close: bool,
    detection_level: usize,
    concurrent: bool,
    min_concurrent_tracks: usize,
    concurrent_workers: usize,
}

impl KltOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.template_radius == 0 {
            return Err(Errors::InvalidRadius(self.template_radius).into());
        }
        check_levels(self.pyramid_levels)?;
        if self.detection_level >= self.pyramid_levels {
            return Err(Errors::InvalidDetectionLevel {
                level: self.detection_level,
                levels: self.pyramid_levels,
            }
            .into());
        }
        if self.max_iterations == 0 {
            return Err(Errors::NonPositive("max_iterations").into());
        }
        if !(self.min_determinant > 0.0) {
            return Err(Errors::NonPositive("min_determinant").into());
        }
        if !(self.min_position_delta > 0.0) {
            return Err(Errors::NonPositive("min_position_delta").into());
        }
        if !(self.max_per_pixel_error > 0.0) {
            return Err(Errors::NonPositive("max_per_pixel_error").into());
        }
        if let Some(tolerance) = self.forward_backward_tolerance {
            if !(tolerance > 0.0) {
                return Err(Errors::NonPositive("forward_backward_tolerance").into());
            }
        }
        self.max_tracks.validate()
    }

    /// Radius of the square template around the feature: the template side is
    /// `2 * radius + 1` pixels. The radius is also the minimal distance between spawned
    /// tracks.
    ///
    pub fn template_radius(mut self, radius: usize) -> Self {
        self.template_radius = radius;
        self
    }

    /// Number of pyramid levels the default pyramid builder produces. More levels allow
    /// tracking of faster motion, but coarse levels of small images lose the texture.
    ///
    pub fn pyramid_levels(mut self, levels: usize) -> Self {
        self.pyramid_levels = levels;
        self
    }

    /// The maximum number of Gauss-Newton iterations per pyramid level
    ///
    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    /// The minimal determinant of the template gradient matrix divided by the number of
    /// template pixels. Templates below the value are considered textureless, alignment
    /// of them diverges.
    ///
    pub fn min_determinant(mut self, v: f32) -> Self {
        self.min_determinant = v;
        self
    }

    /// Iterations at a level stop once the position update is shorter than the value
    ///
    pub fn min_position_delta(mut self, v: f32) -> Self {
        self.min_position_delta = v;
        self
    }

    /// The maximum mean absolute intensity difference between the template and the aligned
    /// patch at the base level. Tracks with larger error are dropped.
    ///
    pub fn max_per_pixel_error(mut self, v: f32) -> Self {
        self.max_per_pixel_error = v;
        self
    }

    /// Forward-backward validation: the track is aligned from the new location back into the
    /// previous frame and dropped when it doesn't return within `tolerance` pixels of the
    /// location it started from. `None` disables the validation.
    ///
    pub fn forward_backward_tolerance(mut self, tolerance: Option<f32>) -> Self {
        self.forward_backward_tolerance = tolerance;
        self
    }

    /// Track budget: an absolute number of tracks or a fraction of the image pixels.
    /// `0` means unbounded.
    ///
    pub fn max_tracks(mut self, length: ConfigLength) -> Self {
        self.max_tracks = length;
        self
    }

    /// Drop tracks that come closer than `template_radius` to an older track
    ///
    pub fn prune_close(mut self, enabled: bool) -> Self {
        self.prune_close = enabled;
        self
    }

    /// Pyramid level new features are detected at, `0` is the full resolution image
    ///
    pub fn detection_level(mut self, level: usize) -> Self {
        self.detection_level = level;
        self
    }

    /// Align tracks on the worker pool. The results are identical to the single-threaded mode.
    ///
    pub fn concurrent(mut self, enabled: bool) -> Self {
        self.concurrent = enabled;
        self
    }

    /// Below the number of active tracks the concurrent mode falls back to the
    /// single-threaded execution
    ///
    pub fn min_concurrent_tracks(mut self, n: usize) -> Self {
        self.min_concurrent_tracks = n;
        self
    }

    /// Number of worker threads, `0` means the number of CPUs
    ///
    pub fn concurrent_workers(mut self, n: usize) -> Self {
        self.concurrent_workers = n;
        self
    }

    pub fn get_template_radius(&self) -> usize {
        self.template_radius
    }

    pub fn get_pyramid_levels(&self) -> usize {
        self.pyramid_levels
    }

    pub fn get_max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn get_min_determinant(&self) -> f32 {
        self.min_determinant
    }

    pub fn get_min_position_delta(&self) -> f32 {
        self.min_position_delta
    }

    pub fn get_max_per_pixel_error(&self) -> f32 {
        self.max_per_pixel_error
    }

    pub fn get_forward_backward_tolerance(&self) -> Option<f32> {
        self.forward_backward_tolerance
    }

    pub fn get_max_tracks(&self) -> &ConfigLength {
        &self.max_tracks
    }

    pub fn get_prune_close(&self) -> bool {
        self.prune_close
    }

    pub fn get_detection_level(&self) -> usize {
        self.detection_level
    }

    pub fn get_concurrent(&self) -> bool {
        self.concurrent
    }

    pub fn get_min_concurrent_tracks(&self) -> usize {
        self.min_concurrent_tracks
    }

    /// Resolved number of workers
    ///
    pub fn get_concurrent_workers(&self) -> usize {
        if self.concurrent_workers == 0 {
            num_cpus::get()
        } else {
            self.concurrent_workers
        }
    }
}

impl Default for KltOptions {
    fn default() -> Self {
        Self {
            template_radius: 7,
            pyramid_levels: 4,
            max_iterations: 15,
            min_determinant: 1e-3,
            min_position_delta: 1e-2,
            max_per_pixel_error: 25.0,
            forward_backward_tolerance: Some(2.0),
            max_tracks: ConfigLength::fixed(0),
            prune_close: false,
            detection_level: 0,
            concurrent: false,
            min_concurrent_tracks: 50,
            concurrent_workers: 0,
        }
    }
}
