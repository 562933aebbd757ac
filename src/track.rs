use nalgebra::Point2;

/// Arena of recycled track slots
pub mod pool;

/// Track identifier, unique among the tracks reachable from a tracker
pub type TrackId = u64;

/// Roster a track belongs to during the current frame.
///
/// * `Active` - the track was observed in the current frame (or just spawned);
/// * `Inactive` - the track exists but wasn't observed (only strategies with re-detection keep such tracks);
/// * `Dropped` - the tracker gave up on the track during the current frame, it is recycled on the next frame.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackState {
    Active,
    Inactive,
    Dropped,
}

/// Per-feature state visible to the caller.
///
/// The strategy keeps its own description of the feature (template, descriptor) next to
/// the record, the caller payload `P` is never touched by the tracker while the track is alive
/// and is cleared when the record is recycled.
///
#[derive(Clone, Debug)]
pub struct TrackRecord<P> {
    pub(crate) id: TrackId,
    pub(crate) location: Point2<f32>,
    pub(crate) spawn_frame_id: i64,
    pub(crate) last_seen_frame_id: i64,
    pub(crate) set_id: usize,
    pub(crate) state: TrackState,
    pub(crate) payload: Option<P>,
}

impl<P> Default for TrackRecord<P> {
    fn default() -> Self {
        Self {
            id: 0,
            location: Point2::origin(),
            spawn_frame_id: -1,
            last_seen_frame_id: -1,
            set_id: 0,
            state: TrackState::Dropped,
            payload: None,
        }
    }
}

impl<P> TrackRecord<P> {
    pub fn id(&self) -> TrackId {
        self.id
    }

    /// Location of the feature in the base image, pixels
    ///
    pub fn location(&self) -> Point2<f32> {
        self.location
    }

    /// Frame the track was spawned at
    ///
    pub fn spawn_frame_id(&self) -> i64 {
        self.spawn_frame_id
    }

    /// Last frame the feature was observed at
    ///
    pub fn last_seen_frame_id(&self) -> i64 {
        self.last_seen_frame_id
    }

    /// Feature set of multi-set strategies, `0` otherwise
    ///
    pub fn set_id(&self) -> usize {
        self.set_id
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn payload(&self) -> Option<&P> {
        self.payload.as_ref()
    }

    pub(crate) fn observe(&mut self, location: Point2<f32>, frame_id: i64) {
        self.location = location;
        self.last_seen_frame_id = frame_id;
        self.state = TrackState::Active;
    }

    fn clear(&mut self) {
        self.id = 0;
        self.location = Point2::origin();
        self.spawn_frame_id = -1;
        self.last_seen_frame_id = -1;
        self.set_id = 0;
        self.state = TrackState::Dropped;
        self.payload = None;
    }
}

/// Storage unit of a track: caller visible record and the strategy description `D`.
///
#[derive(Debug)]
pub(crate) struct Slot<D, P> {
    pub(crate) record: TrackRecord<P>,
    pub(crate) description: D,
}

impl<D: Default, P> Default for Slot<D, P> {
    fn default() -> Self {
        Self {
            record: TrackRecord::default(),
            description: D::default(),
        }
    }
}
