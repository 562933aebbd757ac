use crate::track::pool::{remove_indices, TrackPool};
use crate::track::{Slot, TrackId, TrackRecord, TrackState};
use crate::utils::image::GrayImage;
use anyhow::Result;
use rand::rngs::StdRng;

/// Capability contract implemented by every point tracking strategy.
///
/// The caller feeds frames with [process](PointTracker::process), pulls roster snapshots
/// and decides when new tracks are spawned or existing ones are dropped. `P` is the
/// caller-owned payload attached to tracks.
///
/// Rosters of a frame are pairwise disjoint: a track is either active, inactive or
/// dropped. New tracks are the active tracks spawned during the current frame.
///
pub trait PointTracker<P> {
    /// Processes the next frame: advances the frame counter and updates locations of the
    /// tracked features.
    ///
    /// Tracks which cannot be followed anymore are moved to the dropped roster (or to the
    /// inactive one if the strategy supports re-detection). Per-track failures never
    /// produce an error, the method fails only when the frame is incompatible with the
    /// tracker configuration.
    ///
    fn process(&mut self, image: &GrayImage) -> Result<()>;

    /// Discards all the tracks and restarts the frame counter from `-1`
    ///
    fn reset(&mut self);

    /// Spawns new tracks from the features available in the current frame which don't
    /// overlap the existing tracks.
    ///
    /// # Returns
    /// The number of spawned tracks
    ///
    fn spawn_tracks(&mut self) -> usize;

    /// Removes the track on the caller request. The track is recycled immediately and
    /// doesn't appear in the dropped roster.
    ///
    /// # Returns
    /// `false` if the tracker doesn't own the track
    ///
    fn drop_track(&mut self, id: TrackId) -> bool;

    /// Removes every active or inactive track the predicate matches.
    ///
    /// # Returns
    /// The number of removed tracks
    ///
    fn drop_tracks(&mut self, predicate: &mut dyn FnMut(&TrackRecord<P>) -> bool) -> usize;

    /// Removes every active and inactive track
    ///
    fn drop_all_tracks(&mut self) {
        self.drop_tracks(&mut |_| true);
    }

    /// Current frame counter, `-1` until the first frame is processed
    ///
    fn frame_id(&self) -> i64;

    /// The configured spawn limit, `0` means unbounded.
    ///
    /// Optical flow strategies return the total track budget: a spawn creates at most
    /// `max_spawn() - total_active()` tracks. The association strategy applies the limit to
    /// every feature set, so a single spawn may create up to `max_spawn()` tracks per set.
    ///
    fn max_spawn(&self) -> usize;

    fn total_active(&self) -> usize;

    fn total_inactive(&self) -> usize;

    /// Clears `out` and fills it with the active tracks
    ///
    fn active_tracks_into<'a>(&'a self, out: &mut Vec<&'a TrackRecord<P>>);

    /// Clears `out` and fills it with the inactive tracks
    ///
    fn inactive_tracks_into<'a>(&'a self, out: &mut Vec<&'a TrackRecord<P>>);

    /// Clears `out` and fills it with the tracks the tracker dropped during the current frame
    ///
    fn dropped_tracks_into<'a>(&'a self, out: &mut Vec<&'a TrackRecord<P>>);

    /// Clears `out` and fills it with the active tracks spawned during the current frame
    ///
    fn new_tracks_into<'a>(&'a self, out: &mut Vec<&'a TrackRecord<P>>) {
        self.active_tracks_into(out);
        let frame_id = self.frame_id();
        out.retain(|t| t.spawn_frame_id() == frame_id);
    }

    /// Clears `out` and fills it with the active and inactive tracks
    ///
    fn all_tracks_into<'a>(&'a self, out: &mut Vec<&'a TrackRecord<P>>) {
        self.active_tracks_into(out);
        let mut inactive = Vec::default();
        self.inactive_tracks_into(&mut inactive);
        out.extend(inactive);
    }

    fn active_tracks(&self) -> Vec<&TrackRecord<P>> {
        let mut res = Vec::default();
        self.active_tracks_into(&mut res);
        res
    }

    fn inactive_tracks(&self) -> Vec<&TrackRecord<P>> {
        let mut res = Vec::default();
        self.inactive_tracks_into(&mut res);
        res
    }

    fn dropped_tracks(&self) -> Vec<&TrackRecord<P>> {
        let mut res = Vec::default();
        self.dropped_tracks_into(&mut res);
        res
    }

    fn new_tracks(&self) -> Vec<&TrackRecord<P>> {
        let mut res = Vec::default();
        self.new_tracks_into(&mut res);
        res
    }

    fn all_tracks(&self) -> Vec<&TrackRecord<P>> {
        let mut res = Vec::default();
        self.all_tracks_into(&mut res);
        res
    }

    /// Finds an active or inactive track
    ///
    fn track(&self, id: TrackId) -> Option<&TrackRecord<P>> {
        self.all_tracks().into_iter().find(|t| t.id() == id)
    }

    /// Mutable access to the caller payload of an active or inactive track
    ///
    fn payload_mut(&mut self, id: TrackId) -> Option<&mut Option<P>>;
}

pub(crate) fn position_of<D, P>(tracks: &[Slot<D, P>], id: TrackId) -> Option<usize> {
    tracks.iter().position(|s| s.record.id == id)
}

pub(crate) fn records<'a, D, P>(
    tracks: &'a [Slot<D, P>],
    out: &mut Vec<&'a TrackRecord<P>>,
) {
    out.extend(tracks.iter().map(|s| &s.record));
}

/// Explicit removal of matching tracks: removed slots go straight to the pool.
///
pub(crate) fn drop_matching<D, P>(
    tracks: &mut Vec<Slot<D, P>>,
    pool: &mut TrackPool<D, P>,
    predicate: &mut dyn FnMut(&TrackRecord<P>) -> bool,
) -> usize {
    let mut indices = tracks
        .iter()
        .enumerate()
        .filter(|(_, s)| predicate(&s.record))
        .map(|(i, _)| i)
        .collect::<Vec<_>>();
    let removed = remove_indices(tracks, &mut indices);
    let n = removed.len();
    pool.release_all(removed);
    n
}

pub(crate) fn payload_of<D, P>(tracks: &mut [Slot<D, P>], id: TrackId) -> Option<&mut Option<P>> {
    tracks
        .iter_mut()
        .find(|s| s.record.id == id)
        .map(|s| &mut s.record.payload)
}

/// Moves the tracks at `indices` from `tracks` to `to`, marking them with `state`
///
pub(crate) fn move_tracks<D, P>(
    tracks: &mut Vec<Slot<D, P>>,
    indices: &mut [usize],
    to: &mut Vec<Slot<D, P>>,
    state: TrackState,
) -> usize {
    let removed = remove_indices(tracks, indices);
    let n = removed.len();
    to.extend(removed.into_iter().map(|mut s| {
        s.record.state = state;
        s
    }));
    n
}

/// Randomly chosen tracks beyond `max` are moved to the dropped roster. `0` means unbounded.
///
pub(crate) fn prune_excess<D, P>(
    tracks: &mut Vec<Slot<D, P>>,
    max: usize,
    rng: &mut StdRng,
    dropped: &mut Vec<Slot<D, P>>,
) -> usize {
    if max == 0 || tracks.len() <= max {
        return 0;
    }
    let excess = tracks.len() - max;
    let mut indices = rand::seq::index::sample(rng, tracks.len(), excess).into_vec();
    move_tracks(tracks, &mut indices, dropped, TrackState::Dropped)
}
