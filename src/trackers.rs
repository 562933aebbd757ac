/// Capability contract shared by every strategy
pub mod tracker_api;

/// Pyramidal KLT optical flow tracker with the optional concurrent mode
pub mod klt;

/// Detect-describe-associate tracker
pub mod dda;

/// Hybrid tracker: KLT between frames, re-association when too many tracks are lost
pub mod hybrid;
