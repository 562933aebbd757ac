use crate::association::{AssociatePoints, AssociatedPair, PointRef};
use crate::detection::{Candidate, DetectDescribe};
use crate::track::pool::TrackPool;
use crate::track::{Slot, TrackId, TrackRecord, TrackState};
use crate::trackers::dda::options::DdaOptions;
use crate::trackers::tracker_api::{drop_matching, payload_of, position_of, prune_excess, records, PointTracker};
use crate::utils::image::GrayImage;
use crate::Errors;
use anyhow::Result;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Detect-describe-associate tracker configuration
pub mod options;

struct FeatureSet<D, P> {
    active: Vec<Slot<D, P>>,
    inactive: Vec<Slot<D, P>>,
    candidates: Vec<Candidate<D>>,
    claimed: Vec<bool>,
}

impl<D, P> Default for FeatureSet<D, P> {
    fn default() -> Self {
        Self {
            active: Vec::default(),
            inactive: Vec::default(),
            candidates: Vec::default(),
            claimed: Vec::default(),
        }
    }
}

/// Tracker which detects and describes features in every frame and associates them with the
/// known tracks by their descriptions.
///
/// Every feature set of the detector is tracked independently: features are associated only
/// with the tracks of the same set. Tracks which aren't matched in the frame become inactive
/// and may be matched again later; when a set accumulates more than
/// [max_inactive_tracks](DdaOptions::max_inactive_tracks) inactive tracks, randomly chosen ones
/// are dropped.
///
pub struct DdaTracker<P, DD: DetectDescribe> {
    opts: DdaOptions,
    detector: DD,
    associator: Box<dyn AssociatePoints<DD::Descriptor>>,
    sets: Vec<FeatureSet<DD::Descriptor, P>>,
    pool: TrackPool<DD::Descriptor, P>,
    dropped: Vec<Slot<DD::Descriptor, P>>,
    unsorted: Vec<Slot<DD::Descriptor, P>>,
    pairs: Vec<AssociatedPair>,
    rng: StdRng,
    frame_id: i64,
    shape: Option<(usize, usize)>,
}

impl<P, DD: DetectDescribe> DdaTracker<P, DD> {
    pub fn new(
        opts: DdaOptions,
        detector: DD,
        associator: Box<dyn AssociatePoints<DD::Descriptor>>,
    ) -> Result<Self> {
        let set_count = detector.set_count();
        if set_count == 0 {
            return Err(Errors::NoFeatureSets.into());
        }
        let rng = StdRng::seed_from_u64(opts.get_seed());
        Ok(Self {
            opts,
            detector,
            associator,
            sets: (0..set_count).map(|_| FeatureSet::default()).collect(),
            pool: TrackPool::default(),
            dropped: Vec::default(),
            unsorted: Vec::default(),
            pairs: Vec::default(),
            rng,
            frame_id: -1,
            shape: None,
        })
    }

    pub fn options(&self) -> &DdaOptions {
        &self.opts
    }

    pub fn detector_mut(&mut self) -> &mut DD {
        &mut self.detector
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }
}

impl<P, DD: DetectDescribe> PointTracker<P> for DdaTracker<P, DD> {
    fn process(&mut self, image: &GrayImage) -> Result<()> {
        let got = image.shape();
        match self.shape {
            Some(expected) if expected != got => {
                return Err(Errors::ImageSizeMismatch { expected, got }.into());
            }
            _ => self.shape = Some(got),
        }
        self.pool.release_all(self.dropped.drain(..));
        self.frame_id += 1;

        let update = self.opts.get_update_description();
        let mut matched_total = 0;
        for (set_id, set) in self.sets.iter_mut().enumerate() {
            self.detector.detect(image, set_id, &mut set.candidates);
            set.claimed.clear();
            set.claimed.resize(set.candidates.len(), false);

            let tracks = &mut self.unsorted;
            tracks.append(&mut set.active);
            tracks.append(&mut set.inactive);

            {
                let src = tracks
                    .iter()
                    .map(|s| PointRef::new(s.record.location, &s.description))
                    .collect::<Vec<_>>();
                let dst = set
                    .candidates
                    .iter()
                    .map(|c| PointRef::new(c.location, &c.descriptor))
                    .collect::<Vec<_>>();
                self.associator.associate(&src, &dst, &mut self.pairs);
            }

            let mut matches = vec![None; tracks.len()];
            for p in &self.pairs {
                matches[p.src] = Some(p.dst);
                set.claimed[p.dst] = true;
            }
            matched_total += self.pairs.len();

            for (mut slot, m) in tracks.drain(..).zip(matches) {
                match m {
                    Some(ci) => {
                        let c = &set.candidates[ci];
                        slot.record.observe(c.location, self.frame_id);
                        if update {
                            slot.description.clone_from(&c.descriptor);
                        }
                        set.active.push(slot);
                    }
                    None => {
                        slot.record.state = TrackState::Inactive;
                        set.inactive.push(slot);
                    }
                }
            }

            prune_excess(
                &mut set.inactive,
                self.opts.get_max_inactive_tracks(),
                &mut self.rng,
                &mut self.dropped,
            );
        }

        debug!(
            "Frame {}: {} tracks matched, {} active, {} inactive, {} dropped",
            self.frame_id,
            matched_total,
            self.total_active(),
            self.total_inactive(),
            self.dropped.len()
        );
        Ok(())
    }

    fn reset(&mut self) {
        for set in self.sets.iter_mut() {
            self.pool.release_all(set.active.drain(..));
            self.pool.release_all(set.inactive.drain(..));
            set.candidates.clear();
            set.claimed.clear();
        }
        self.pool.release_all(self.dropped.drain(..));
        self.pool.reset_ids();
        self.rng = StdRng::seed_from_u64(self.opts.get_seed());
        self.frame_id = -1;
        self.shape = None;
    }

    fn spawn_tracks(&mut self) -> usize {
        let max_spawn = self.opts.get_max_spawn();
        let mut spawned = 0;
        for (set_id, set) in self.sets.iter_mut().enumerate() {
            let mut n = 0;
            for (ci, c) in set.candidates.iter().enumerate() {
                if max_spawn > 0 && n >= max_spawn {
                    break;
                }
                if set.claimed[ci] {
                    continue;
                }
                let slot = self.pool.acquire_with(c.location, self.frame_id, set_id, |d| {
                    d.clone_from(&c.descriptor);
                    true
                });
                if let Some(slot) = slot {
                    set.active.push(slot);
                    set.claimed[ci] = true;
                    n += 1;
                }
            }
            spawned += n;
        }
        debug!("Frame {}: {} tracks spawned", self.frame_id, spawned);
        spawned
    }

    fn drop_track(&mut self, id: TrackId) -> bool {
        for set in self.sets.iter_mut() {
            for tracks in [&mut set.active, &mut set.inactive] {
                if let Some(i) = position_of(tracks, id) {
                    let slot = tracks.remove(i);
                    self.pool.release(slot);
                    return true;
                }
            }
        }
        false
    }

    fn drop_tracks(&mut self, predicate: &mut dyn FnMut(&TrackRecord<P>) -> bool) -> usize {
        let mut n = 0;
        for set in self.sets.iter_mut() {
            n += drop_matching(&mut set.active, &mut self.pool, predicate);
            n += drop_matching(&mut set.inactive, &mut self.pool, predicate);
        }
        n
    }

    fn frame_id(&self) -> i64 {
        self.frame_id
    }

    fn max_spawn(&self) -> usize {
        self.opts.get_max_spawn()
    }

    fn total_active(&self) -> usize {
        self.sets.iter().map(|s| s.active.len()).sum()
    }

    fn total_inactive(&self) -> usize {
        self.sets.iter().map(|s| s.inactive.len()).sum()
    }

    fn active_tracks_into<'a>(&'a self, out: &mut Vec<&'a TrackRecord<P>>) {
        out.clear();
        for set in &self.sets {
            records(&set.active, out);
        }
    }

    fn inactive_tracks_into<'a>(&'a self, out: &mut Vec<&'a TrackRecord<P>>) {
        out.clear();
        for set in &self.sets {
            records(&set.inactive, out);
        }
    }

    fn dropped_tracks_into<'a>(&'a self, out: &mut Vec<&'a TrackRecord<P>>) {
        out.clear();
        records(&self.dropped, out);
    }

    fn payload_mut(&mut self, id: TrackId) -> Option<&mut Option<P>> {
        for set in self.sets.iter_mut() {
            if position_of(&set.active, id).is_some() {
                return payload_of(&mut set.active, id);
            }
            if position_of(&set.inactive, id).is_some() {
                return payload_of(&mut set.inactive, id);
            }
        }
        None
    }
}
