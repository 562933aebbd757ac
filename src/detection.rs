use crate::utils::image::{ExclusionMask, GrayImage};
use nalgebra::Point2;

/// Detected and described feature
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Candidate<D> {
    pub location: Point2<f32>,
    pub descriptor: D,
}

impl<D> Candidate<D> {
    pub fn new(location: Point2<f32>, descriptor: D) -> Self {
        Self {
            location,
            descriptor,
        }
    }
}

/// Point feature detector (corners, blobs, etc.)
///
pub trait PointDetector: Send {
    /// Detects features in the image.
    ///
    /// # Parameters
    /// * `image` - the image to search features in;
    /// * `exclude` - pixels the features must not be returned from;
    /// * `max_count` - the maximum number of features to return, `0` means unbounded;
    /// * `out` - the output, cleared by the detector.
    ///
    fn detect(
        &mut self,
        image: &GrayImage,
        exclude: Option<&ExclusionMask>,
        max_count: usize,
        out: &mut Vec<Point2<f32>>,
    );
}

/// Computes a fixed-shape descriptor of a feature at a location
///
pub trait DescribePoint: Send {
    type Descriptor: Clone + Default + Send + Sync;

    /// Returns `None` when the feature cannot be described at the location (e.g. too close to
    /// the border)
    ///
    fn describe(&self, image: &GrayImage, location: &Point2<f32>) -> Option<Self::Descriptor>;
}

/// Source of described features split into independent sets.
///
/// Features of different sets are never associated with each other, e.g. a detector may
/// put bright and dark blobs into different sets.
///
pub trait DetectDescribe: Send {
    type Descriptor: Clone + Default + Send + Sync;

    /// Number of feature sets, must be constant for the lifetime of the object
    ///
    fn set_count(&self) -> usize;

    /// Detects and describes the features of the set. `out` is cleared by the implementation.
    ///
    fn detect(&mut self, image: &GrayImage, set: usize, out: &mut Vec<Candidate<Self::Descriptor>>);
}

/// Single set feature source composed of a detector and a describer. Detections that
/// cannot be described are skipped.
///
pub struct DetectThenDescribe<Det, Des> {
    detector: Det,
    describer: Des,
    max_features: usize,
    points: Vec<Point2<f32>>,
}

impl<Det, Des> DetectThenDescribe<Det, Des>
where
    Det: PointDetector,
    Des: DescribePoint,
{
    /// # Parameters
    /// * `max_features` - the maximum number of features detected per frame, `0` means unbounded
    ///
    pub fn new(detector: Det, describer: Des, max_features: usize) -> Self {
        Self {
            detector,
            describer,
            max_features,
            points: Vec::default(),
        }
    }

    pub fn detector_mut(&mut self) -> &mut Det {
        &mut self.detector
    }
}

impl<Det, Des> DetectDescribe for DetectThenDescribe<Det, Des>
where
    Det: PointDetector,
    Des: DescribePoint,
{
    type Descriptor = Des::Descriptor;

    fn set_count(&self) -> usize {
        1
    }

    fn detect(&mut self, image: &GrayImage, set: usize, out: &mut Vec<Candidate<Self::Descriptor>>) {
        assert_eq!(set, 0, "Only a single feature set is provided");
        out.clear();
        self.detector
            .detect(image, None, self.max_features, &mut self.points);
        out.extend(self.points.iter().filter_map(|p| {
            self.describer
                .describe(image, p)
                .map(|d| Candidate::new(*p, d))
        }));
    }
}
