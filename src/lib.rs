pub mod association;
pub mod detection;
pub mod distance;
pub mod prelude;
pub mod test_stuff;
pub mod track;
pub mod trackers;
pub mod utils;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Errors {
    #[error("Template radius must be a positive number, got {0}.")]
    InvalidRadius(usize),
    #[error("At least one pyramid level is required.")]
    MissingPyramidLevels,
    #[error("Pyramid with {levels} levels exceeds the limit of {max} levels.")]
    TooManyPyramidLevels { levels: usize, max: usize },
    #[error("Detection level {level} is outside of the pyramid with {levels} levels.")]
    InvalidDetectionLevel { level: usize, levels: usize },
    #[error("Image size {got:?} differs from the size {expected:?} the tracker was started with.")]
    ImageSizeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("Image of size {0:?} is too small for the pyramid.")]
    ImageTooSmall((usize, usize)),
    #[error("Fraction must be within [0, 1], got {0}.")]
    InvalidFraction(f64),
    #[error("The value of `{0}` must be a positive number.")]
    NonPositive(&'static str),
    #[error("Detector provides no feature sets.")]
    NoFeatureSets,
}

pub(crate) const EPS: f32 = 0.00001;
