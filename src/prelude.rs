use crate::association;
use crate::trackers;
use crate::utils;

pub use association::greedy::GreedyAssociator;
pub use association::hungarian::HungarianAssociator;
pub use association::{AssociatePoints, AssociatedPair, PointRef};
pub use crate::detection::{Candidate, DescribePoint, DetectDescribe, DetectThenDescribe, PointDetector};
pub use crate::distance::{BinaryDescriptor, DescriptorDistance};
pub use crate::track::{TrackId, TrackRecord, TrackState};
pub use trackers::dda::options::DdaOptions;
pub use trackers::dda::DdaTracker;
pub use trackers::hybrid::options::HybridOptions;
pub use trackers::hybrid::HybridTracker;
pub use trackers::klt::aligner::{AlignStatus, KltAligner, PointAligner};
pub use trackers::klt::options::KltOptions;
pub use trackers::klt::KltTracker;
pub use trackers::tracker_api::PointTracker;
pub use utils::config_length::ConfigLength;
pub use utils::image::{ExclusionMask, GrayImage};
pub use utils::pyramid::{BoxPyramidBuilder, ImagePyramid, PyramidBuilder};
