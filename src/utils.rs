/// Single channel raster and exclusion masks
pub mod image;

/// Image pyramids with per-level gradients
pub mod pyramid;

/// Absolute or relative lengths used for budgets and thresholds
pub mod config_length;

use nalgebra::Point2;

/// Squared euclidean distance between two pixel locations
///
pub fn distance2(a: &Point2<f32>, b: &Point2<f32>) -> f32 {
    (a - b).norm_squared()
}
