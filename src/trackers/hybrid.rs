use crate::association::{AssociatePoints, AssociatedPair, PointRef};
use crate::detection::{Candidate, DetectDescribe};
use crate::track::pool::TrackPool;
use crate::track::{Slot, TrackId, TrackRecord, TrackState};
use crate::trackers::hybrid::options::HybridOptions;
use crate::trackers::klt::aligner::{KltAligner, PointAligner};
use crate::trackers::klt::flow::{close_indices, FlowEngine, WithTemplate};
use crate::trackers::tracker_api::{
    drop_matching, move_tracks, payload_of, position_of, prune_excess, records, PointTracker,
};
use crate::utils::distance2;
use crate::utils::image::GrayImage;
use crate::utils::pyramid::{BoxPyramidBuilder, PyramidBuilder};
use crate::Errors;
use anyhow::Result;
use itertools::Itertools;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Hybrid tracker configuration
pub mod options;

/// Description of a hybrid track: the optical flow template and the detector descriptor
/// used to recover the track once the flow loses it
///
#[derive(Clone, Debug, Default)]
pub(crate) struct HybridDescription<T, F> {
    template: T,
    descriptor: F,
}

impl<T, F> WithTemplate<T> for HybridDescription<T, F> {
    fn template(&self) -> &T {
        &self.template
    }

    fn template_mut(&mut self) -> &mut T {
        &mut self.template
    }
}

type Description<A, DD> =
    HybridDescription<<A as PointAligner>::Template, <DD as DetectDescribe>::Descriptor>;

/// Tracker following the features with optical flow between the frames and repairing the
/// track set with detection when the flow loses too many of them.
///
/// Tracks lost by the flow become dormant (inactive). When the number of active tracks falls
/// below [threshold_respawn](HybridOptions::threshold_respawn) of the reference count, the
/// frame is re-associated once:
/// * every active track claims the nearest detection within
///   [association_radius](HybridOptions::association_radius);
/// * dormant tracks are associated with the unclaimed detections by their descriptors and
///   the matched ones are reactivated at the detection;
/// * the rest of the detections are kept for [spawn_tracks](PointTracker::spawn_tracks).
///
/// The reference count is the number of active tracks after the last re-association or
/// spawn, it decreases with every active track dropped by the caller.
///
pub struct HybridTracker<P, DD: DetectDescribe, A: PointAligner = KltAligner> {
    opts: HybridOptions,
    engine: FlowEngine<A>,
    detector: DD,
    associator: Box<dyn AssociatePoints<DD::Descriptor>>,
    pool: TrackPool<Description<A, DD>, P>,
    active: Vec<Slot<Description<A, DD>, P>>,
    inactive: Vec<Slot<Description<A, DD>, P>>,
    dropped: Vec<Slot<Description<A, DD>, P>>,
    candidates: Vec<Vec<Candidate<DD::Descriptor>>>,
    claimed: Vec<Vec<bool>>,
    pairs: Vec<AssociatedPair>,
    rng: StdRng,
    frame_id: i64,
    reference_count: usize,
    reassociated: bool,
    reassociations: usize,
}

impl<P: Send, DD: DetectDescribe> HybridTracker<P, DD, KltAligner> {
    /// Creates the tracker with the box filter pyramid and the KLT aligner
    ///
    pub fn new(
        opts: HybridOptions,
        detector: DD,
        associator: Box<dyn AssociatePoints<DD::Descriptor>>,
    ) -> Result<Self> {
        opts.validate()?;
        let builder = BoxPyramidBuilder::new(opts.get_klt().get_pyramid_levels())?;
        let aligner = KltAligner::new(opts.get_klt());
        Self::with_collaborators(opts, detector, associator, Box::new(builder), aligner)
    }
}

impl<P: Send, DD: DetectDescribe, A: PointAligner> HybridTracker<P, DD, A> {
    /// Creates the tracker with a custom pyramid builder and aligner
    ///
    pub fn with_collaborators(
        opts: HybridOptions,
        detector: DD,
        associator: Box<dyn AssociatePoints<DD::Descriptor>>,
        builder: Box<dyn PyramidBuilder>,
        aligner: A,
    ) -> Result<Self> {
        opts.validate()?;
        let set_count = detector.set_count();
        if set_count == 0 {
            return Err(Errors::NoFeatureSets.into());
        }
        let engine = FlowEngine::new(opts.get_klt(), builder, aligner)?;
        let rng = StdRng::seed_from_u64(opts.get_seed());
        Ok(Self {
            opts,
            engine,
            detector,
            associator,
            pool: TrackPool::default(),
            active: Vec::default(),
            inactive: Vec::default(),
            dropped: Vec::default(),
            candidates: (0..set_count).map(|_| Vec::default()).collect(),
            claimed: vec![Vec::default(); set_count],
            pairs: Vec::default(),
            rng,
            frame_id: -1,
            reference_count: 0,
            reassociated: false,
            reassociations: 0,
        })
    }

    pub fn options(&self) -> &HybridOptions {
        &self.opts
    }

    pub fn detector_mut(&mut self) -> &mut DD {
        &mut self.detector
    }

    /// Number of active tracks the respawn threshold is computed from
    ///
    pub fn reference_count(&self) -> usize {
        self.reference_count
    }

    /// Whether the current frame was re-associated
    ///
    pub fn is_reassociated(&self) -> bool {
        self.reassociated
    }

    /// Number of re-associations since the construction or the last reset
    ///
    pub fn total_reassociations(&self) -> usize {
        self.reassociations
    }

    fn track_budget(&self) -> usize {
        let (w, h) = self.engine.shape().unwrap_or((0, 0));
        self.opts.get_klt().get_max_tracks().compute(w * h)
    }

    fn reassociate(&mut self) {
        let image = self.engine.pyramid().base();
        for (set, candidates) in self.candidates.iter_mut().enumerate() {
            self.detector.detect(image, set, candidates);
            self.claimed[set].clear();
            self.claimed[set].resize(candidates.len(), false);
        }

        let radius2 = self.opts.get_association_radius().powi(2);
        let update = self.opts.get_update_description();

        let mut continued = 0;
        for t in self.active.iter_mut() {
            let set = t.record.set_id;
            let loc = t.record.location;
            let nearest = self.candidates[set]
                .iter()
                .enumerate()
                .filter(|(ci, _)| !self.claimed[set][*ci])
                .map(|(ci, c)| (ci, distance2(&c.location, &loc)))
                .filter(|(_, d)| *d <= radius2)
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((ci, _)) = nearest {
                self.claimed[set][ci] = true;
                if update {
                    t.description
                        .descriptor
                        .clone_from(&self.candidates[set][ci].descriptor);
                }
                continued += 1;
            }
        }

        let mut revived = Vec::default();
        for set in 0..self.candidates.len() {
            let src_idx = self
                .inactive
                .iter()
                .positions(|s| s.record.set_id == set)
                .collect::<Vec<_>>();
            let dst_idx = self.claimed[set].iter().positions(|c| !c).collect::<Vec<_>>();
            if src_idx.is_empty() || dst_idx.is_empty() {
                continue;
            }

            {
                let src = src_idx
                    .iter()
                    .map(|i| {
                        let s = &self.inactive[*i];
                        PointRef::new(s.record.location, &s.description.descriptor)
                    })
                    .collect::<Vec<_>>();
                let dst = dst_idx
                    .iter()
                    .map(|ci| {
                        let c = &self.candidates[set][*ci];
                        PointRef::new(c.location, &c.descriptor)
                    })
                    .collect::<Vec<_>>();
                self.associator.associate(&src, &dst, &mut self.pairs);
            }

            for p in &self.pairs {
                let (ti, ci) = (src_idx[p.src], dst_idx[p.dst]);
                let c = &self.candidates[set][ci];
                let slot = &mut self.inactive[ti];
                if !self.engine.describe(&c.location, &mut slot.description.template) {
                    continue;
                }
                slot.record.observe(c.location, self.frame_id);
                if update {
                    slot.description.descriptor.clone_from(&c.descriptor);
                }
                self.claimed[set][ci] = true;
                revived.push(ti);
            }
        }

        let reactivated = move_tracks(&mut self.inactive, &mut revived, &mut self.active, TrackState::Active);
        self.reference_count = self.active.len();
        self.reassociated = true;
        self.reassociations += 1;

        debug!(
            "Frame {}: re-associated, {} tracks continued, {} reactivated, {} dormant",
            self.frame_id,
            continued,
            reactivated,
            self.inactive.len()
        );
    }
}

impl<P: Send, DD: DetectDescribe, A: PointAligner> PointTracker<P> for HybridTracker<P, DD, A> {
    fn process(&mut self, image: &GrayImage) -> Result<()> {
        self.engine.next_frame(image)?;
        self.pool.release_all(self.dropped.drain(..));
        self.frame_id += 1;
        self.reassociated = false;
        for (candidates, claimed) in self.candidates.iter_mut().zip(self.claimed.iter_mut()) {
            candidates.clear();
            claimed.clear();
        }

        let mut failed = self.engine.track(&mut self.active, self.frame_id);
        let lost = move_tracks(&mut self.active, &mut failed, &mut self.inactive, TrackState::Inactive);

        if self.opts.get_klt().get_prune_close() {
            let radius = self.opts.get_klt().get_template_radius() as f32;
            let mut close = close_indices(&self.active, radius);
            move_tracks(&mut self.active, &mut close, &mut self.dropped, TrackState::Dropped);
        }

        let threshold = self.opts.get_threshold_respawn().compute(self.reference_count);
        debug!(
            "Frame {}: {} tracks active, {} lost by the flow, respawn threshold {}",
            self.frame_id,
            self.active.len(),
            lost,
            threshold
        );
        if self.active.len() < threshold {
            self.reassociate();
        }

        prune_excess(
            &mut self.inactive,
            self.opts.get_max_inactive_tracks(),
            &mut self.rng,
            &mut self.dropped,
        );
        Ok(())
    }

    fn reset(&mut self) {
        let active = self.active.drain(..);
        let inactive = self.inactive.drain(..);
        let dropped = self.dropped.drain(..);
        self.pool.release_all(active.chain(inactive).chain(dropped));
        self.pool.reset_ids();
        self.engine.reset();
        for (candidates, claimed) in self.candidates.iter_mut().zip(self.claimed.iter_mut()) {
            candidates.clear();
            claimed.clear();
        }
        self.rng = StdRng::seed_from_u64(self.opts.get_seed());
        self.frame_id = -1;
        self.reference_count = 0;
        self.reassociated = false;
        self.reassociations = 0;
    }

    fn spawn_tracks(&mut self) -> usize {
        if self.engine.pyramid().is_empty() {
            return 0;
        }
        if !self.reassociated {
            self.reassociate();
        }

        let budget = self.track_budget();
        let limit = if budget == 0 {
            usize::MAX
        } else {
            budget.saturating_sub(self.active.len())
        };
        let radius2 = self.opts.get_association_radius().powi(2);

        let mut spawned = 0;
        'sets: for (set, candidates) in self.candidates.iter().enumerate() {
            for (ci, c) in candidates.iter().enumerate() {
                if spawned >= limit {
                    break 'sets;
                }
                if self.claimed[set][ci] {
                    continue;
                }
                let occupied = self
                    .active
                    .iter()
                    .chain(self.inactive.iter())
                    .any(|t| distance2(&t.record.location, &c.location) < radius2);
                if occupied {
                    continue;
                }
                let engine = &self.engine;
                let slot = self.pool.acquire_with(c.location, self.frame_id, set, |d| {
                    if !engine.describe(&c.location, &mut d.template) {
                        return false;
                    }
                    d.descriptor.clone_from(&c.descriptor);
                    true
                });
                if let Some(slot) = slot {
                    self.active.push(slot);
                    self.claimed[set][ci] = true;
                    spawned += 1;
                }
            }
        }

        self.reference_count = self.active.len();
        debug!(
            "Frame {}: {} tracks spawned, reference count {}",
            self.frame_id, spawned, self.reference_count
        );
        spawned
    }

    fn drop_track(&mut self, id: TrackId) -> bool {
        if let Some(i) = position_of(&self.active, id) {
            let slot = self.active.remove(i);
            self.pool.release(slot);
            self.reference_count = self.reference_count.saturating_sub(1);
            return true;
        }
        if let Some(i) = position_of(&self.inactive, id) {
            let slot = self.inactive.remove(i);
            self.pool.release(slot);
            return true;
        }
        false
    }

    fn drop_tracks(&mut self, predicate: &mut dyn FnMut(&TrackRecord<P>) -> bool) -> usize {
        let active = drop_matching(&mut self.active, &mut self.pool, predicate);
        self.reference_count = self.reference_count.saturating_sub(active);
        active + drop_matching(&mut self.inactive, &mut self.pool, predicate)
    }

    fn frame_id(&self) -> i64 {
        self.frame_id
    }

    fn max_spawn(&self) -> usize {
        self.track_budget()
    }

    fn total_active(&self) -> usize {
        self.active.len()
    }

    fn total_inactive(&self) -> usize {
        self.inactive.len()
    }

    fn active_tracks_into<'a>(&'a self, out: &mut Vec<&'a TrackRecord<P>>) {
        out.clear();
        records(&self.active, out);
    }

    fn inactive_tracks_into<'a>(&'a self, out: &mut Vec<&'a TrackRecord<P>>) {
        out.clear();
        records(&self.inactive, out);
    }

    fn dropped_tracks_into<'a>(&'a self, out: &mut Vec<&'a TrackRecord<P>>) {
        out.clear();
        records(&self.dropped, out);
    }

    fn payload_mut(&mut self, id: TrackId) -> Option<&mut Option<P>> {
        if position_of(&self.active, id).is_some() {
            payload_of(&mut self.active, id)
        } else {
            payload_of(&mut self.inactive, id)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::association::greedy::GreedyAssociator;
    use crate::detection::DetectThenDescribe;
    use crate::test_stuff::{
        assert_disjoint_rosters, blobs_image, candidate, init_logger, PatchDescriber, ScriptedDetector,
        ScriptedFeatures, ShiftAligner,
    };
    use crate::track::{TrackRecord, TrackState};
    use crate::trackers::hybrid::options::HybridOptions;
    use crate::trackers::hybrid::HybridTracker;
    use crate::trackers::klt::options::KltOptions;
    use crate::trackers::tracker_api::PointTracker;
    use crate::utils::config_length::ConfigLength;
    use crate::utils::image::GrayImage;
    use crate::utils::pyramid::BoxPyramidBuilder;
    use nalgebra::Point2;

    type Tracker = HybridTracker<(), ScriptedFeatures, ShiftAligner>;

    fn ids(tracks: Vec<&TrackRecord<()>>) -> Vec<u64> {
        let mut ids = tracks.iter().map(|t| t.id()).collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    fn tracker(opts: HybridOptions) -> Tracker {
        let opts = opts
            .klt(
                KltOptions::default()
                    .template_radius(3)
                    .forward_backward_tolerance(None),
            )
            .threshold_respawn(ConfigLength::relative(0.5, 0));
        HybridTracker::with_collaborators(
            opts,
            ScriptedFeatures::new(1),
            Box::new(GreedyAssociator::new(0.5, 1.0).unwrap()),
            Box::new(BoxPyramidBuilder::new(2).unwrap()),
            ShiftAligner::new(10.0, 0.0),
        )
        .unwrap()
    }

    // ids 0-5 are close to the right border and leave the image on the next frame
    fn first_frame(t: &mut Tracker, img: &GrayImage) {
        let mut candidates = (0..6)
            .map(|k| candidate(95.0, 5.0 + 10.0 * k as f32, 10.0 + k as f32))
            .collect::<Vec<_>>();
        candidates.extend((0..4).map(|k| candidate(10.0, 5.0 + 10.0 * k as f32, 20.0 + k as f32)));
        t.detector_mut().set(0, candidates);
        t.process(img).unwrap();
        assert!(!t.is_reassociated());
        assert_eq!(t.spawn_tracks(), 10);
        assert!(t.is_reassociated());
        assert_eq!(t.total_reassociations(), 1);
        assert_eq!(t.reference_count(), 10);
        assert_eq!(ids(t.new_tracks()), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn respawn_reactivates_dormant_tracks() {
        init_logger();
        let img = GrayImage::new(100, 60);
        let mut t = tracker(HybridOptions::default());
        first_frame(&mut t, &img);

        let mut candidates = (0..6)
            .map(|k| candidate(40.0, 5.0 + 10.0 * k as f32, 10.0 + k as f32))
            .collect::<Vec<_>>();
        candidates.extend((0..4).map(|k| candidate(21.0, 5.0 + 10.0 * k as f32, 20.0 + k as f32)));
        t.detector_mut().set(0, candidates);
        t.process(&img).unwrap();

        // 4 active tracks are below a half of 10: the frame is re-associated once
        assert!(t.is_reassociated());
        assert_eq!(t.total_reassociations(), 2);
        assert_eq!(ids(t.active_tracks()), (0..10).collect::<Vec<_>>());
        assert!(t.inactive_tracks().is_empty());
        assert!(t.dropped_tracks().is_empty());
        assert_eq!(t.reference_count(), 10);
        for r in t.active_tracks() {
            let expected_x = if r.id() < 6 { 40.0 } else { 20.0 };
            assert_eq!(r.location().x, expected_x);
            assert_eq!(r.last_seen_frame_id(), 1);
        }

        // every detection is claimed
        assert_eq!(t.spawn_tracks(), 0);
        assert_eq!(t.total_reassociations(), 2);

        t.detector_mut().clear();
        t.process(&img).unwrap();
        assert!(!t.is_reassociated());
        assert_eq!(t.total_reassociations(), 2);
        assert_eq!(t.total_active(), 10);
        assert_eq!(t.track(0).unwrap().location(), Point2::new(50.0, 5.0));
        assert_disjoint_rosters(&t);
    }

    #[test]
    fn unmatched_detections_are_spawned() {
        let img = GrayImage::new(100, 60);
        let mut t = tracker(HybridOptions::default());
        first_frame(&mut t, &img);

        // only the first three lost tracks are recognized
        let mut candidates = (0..6)
            .map(|k| {
                let descriptor = if k < 3 { 10.0 + k as f32 } else { 100.0 + k as f32 };
                candidate(40.0, 5.0 + 10.0 * k as f32, descriptor)
            })
            .collect::<Vec<_>>();
        candidates.extend((0..4).map(|k| candidate(20.0, 5.0 + 10.0 * k as f32, 20.0 + k as f32)));
        t.detector_mut().set(0, candidates);
        t.process(&img).unwrap();

        assert_eq!(ids(t.active_tracks()), vec![0, 1, 2, 6, 7, 8, 9]);
        assert_eq!(ids(t.inactive_tracks()), vec![3, 4, 5]);
        assert!(t
            .inactive_tracks()
            .iter()
            .all(|r| r.state() == TrackState::Inactive && r.location().x == 95.0));
        assert_eq!(t.reference_count(), 7);

        assert_eq!(t.spawn_tracks(), 3);
        assert_eq!(ids(t.new_tracks()), vec![10, 11, 12]);
        assert_eq!(t.reference_count(), 10);
        assert_eq!(t.total_reassociations(), 2);
        assert_disjoint_rosters(&t);
    }

    #[test]
    fn manual_drops_lower_reference() {
        let img = GrayImage::new(100, 60);
        let mut t = tracker(HybridOptions::default());
        first_frame(&mut t, &img);

        assert_eq!(t.drop_tracks(&mut |r| r.id() < 6), 6);
        assert_eq!(t.reference_count(), 4);
        assert!(t.drop_track(9));
        assert!(!t.drop_track(9));
        assert_eq!(t.reference_count(), 3);

        t.detector_mut().clear();
        t.process(&img).unwrap();
        assert_eq!(t.total_active(), 3);
        assert!(!t.is_reassociated());
        assert_eq!(t.total_reassociations(), 1);
    }

    #[test]
    fn dormant_tracks_are_pruned() {
        let img = GrayImage::new(100, 60);
        let mut t = tracker(HybridOptions::default().max_inactive_tracks(2).seed(3));
        first_frame(&mut t, &img);

        t.detector_mut().clear();
        t.process(&img).unwrap();
        assert!(t.is_reassociated());
        assert_eq!(t.total_active(), 4);
        assert_eq!(t.total_inactive(), 2);
        assert_eq!(t.dropped_tracks().len(), 4);
        assert!(t.dropped_tracks().iter().all(|r| r.id() < 6));
        assert_disjoint_rosters(&t);

        // dormant tracks are dropped explicitly without touching the reference count
        let dormant = ids(t.inactive_tracks());
        assert!(t.drop_track(dormant[0]));
        assert_eq!(t.reference_count(), 4);

        t.reset();
        assert_eq!(t.frame_id(), -1);
        assert_eq!(t.total_inactive(), 0);
        assert_eq!(t.total_reassociations(), 0);
        assert_eq!(t.reference_count(), 0);
    }

    #[test]
    fn follows_blobs_with_flow() {
        let centers = (0..4)
            .flat_map(|r| (0..5).map(move |c| Point2::new(20.0 + 22.0 * c as f32, 20.0 + 22.0 * r as f32)))
            .collect::<Vec<_>>();
        let source = DetectThenDescribe::new(ScriptedDetector::new(centers.clone()), PatchDescriber::new(3), 0);
        let opts = HybridOptions::default()
            .klt(KltOptions::default().pyramid_levels(2).template_radius(5))
            .threshold_respawn(ConfigLength::relative(0.4, 0));
        let mut t: HybridTracker<(), _> = HybridTracker::new(
            opts,
            source,
            Box::new(GreedyAssociator::new(50.0, 0.8).unwrap()),
        )
        .unwrap();

        t.process(&blobs_image(128, 112, &centers, 3.0)).unwrap();
        assert_eq!(t.spawn_tracks(), 20);

        let moved = centers
            .iter()
            .map(|p| Point2::new(p.x + 1.5, p.y - 1.0))
            .collect::<Vec<_>>();
        t.process(&blobs_image(128, 112, &moved, 3.0)).unwrap();
        assert_eq!(t.total_active(), 20);
        assert!(!t.is_reassociated());
        for r in t.active_tracks() {
            assert!((r.location() - moved[r.id() as usize]).norm() < 0.3);
        }
    }
}
