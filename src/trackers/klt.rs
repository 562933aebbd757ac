use crate::detection::PointDetector;
use crate::track::pool::TrackPool;
use crate::track::{Slot, TrackId, TrackRecord, TrackState};
use crate::trackers::klt::aligner::{KltAligner, PointAligner};
use crate::trackers::klt::flow::{close_indices, FlowEngine, FlowTemplate, WithTemplate};
use crate::trackers::klt::options::KltOptions;
use crate::trackers::tracker_api::{
    drop_matching, move_tracks, payload_of, position_of, records, PointTracker,
};
use crate::utils::image::{ExclusionMask, GrayImage};
use crate::utils::pyramid::{BoxPyramidBuilder, ImagePyramid, PyramidBuilder};
use anyhow::Result;
use log::debug;
use nalgebra::Point2;

/// Template alignment routines
pub mod aligner;

/// Optical flow engine shared with the hybrid tracker
pub(crate) mod flow;

/// KLT tracker configuration
pub mod options;

type SpawnFilter = Box<dyn FnMut(&Point2<f32>) -> bool + Send>;

/// Pyramidal Kanade-Lucas-Tomasi point tracker.
///
/// Every frame each active track is aligned from the previous frame into the current one.
/// Tracks which diverge, leave the image or fail the forward-backward validation are dropped;
/// the tracker has no inactive tracks. New tracks are created only by
/// [spawn_tracks](PointTracker::spawn_tracks) from the detector output.
///
/// With [concurrent](KltOptions::concurrent) enabled the alignment runs on a worker pool, the
/// results are identical to the single-threaded mode.
///
pub struct KltTracker<P, A: PointAligner = KltAligner> {
    opts: KltOptions,
    engine: FlowEngine<A>,
    detector: Box<dyn PointDetector>,
    spawn_filter: SpawnFilter,
    pool: TrackPool<FlowTemplate<A::Template>, P>,
    active: Vec<Slot<FlowTemplate<A::Template>, P>>,
    dropped: Vec<Slot<FlowTemplate<A::Template>, P>>,
    frame_id: i64,
    mask: ExclusionMask,
    detections: Vec<Point2<f32>>,
}

impl<P: Send> KltTracker<P, KltAligner> {
    /// Creates the tracker with the box filter pyramid and the KLT aligner configured from
    /// the options
    ///
    pub fn new(opts: KltOptions, detector: Box<dyn PointDetector>) -> Result<Self> {
        opts.validate()?;
        let builder = BoxPyramidBuilder::new(opts.get_pyramid_levels())?;
        let aligner = KltAligner::new(&opts);
        Self::with_collaborators(opts, detector, Box::new(builder), aligner)
    }
}

impl<P: Send, A: PointAligner> KltTracker<P, A> {
    /// Creates the tracker with a custom pyramid builder and aligner
    ///
    pub fn with_collaborators(
        opts: KltOptions,
        detector: Box<dyn PointDetector>,
        builder: Box<dyn PyramidBuilder>,
        aligner: A,
    ) -> Result<Self> {
        let engine = FlowEngine::new(&opts, builder, aligner)?;
        Ok(Self {
            opts,
            engine,
            detector,
            spawn_filter: Box::new(|_| true),
            pool: TrackPool::default(),
            active: Vec::default(),
            dropped: Vec::default(),
            frame_id: -1,
            mask: ExclusionMask::default(),
            detections: Vec::default(),
        })
    }

    /// Sets the check every detection must pass to become a track (e.g. a region of
    /// interest). Locations are passed in the base image coordinates.
    ///
    pub fn set_spawn_filter<F>(&mut self, filter: F)
    where
        F: FnMut(&Point2<f32>) -> bool + Send + 'static,
    {
        self.spawn_filter = Box::new(filter);
    }

    pub fn options(&self) -> &KltOptions {
        &self.opts
    }

    fn track_budget(&self) -> usize {
        let (w, h) = self.engine.shape().unwrap_or((0, 0));
        self.opts.get_max_tracks().compute(w * h)
    }
}

impl<P: Send, A: PointAligner> PointTracker<P> for KltTracker<P, A> {
    fn process(&mut self, image: &GrayImage) -> Result<()> {
        self.engine.next_frame(image)?;
        self.pool.release_all(self.dropped.drain(..));
        self.frame_id += 1;

        let mut failed = self.engine.track(&mut self.active, self.frame_id);
        let lost = move_tracks(&mut self.active, &mut failed, &mut self.dropped, TrackState::Dropped);

        let mut pruned = 0;
        if self.opts.get_prune_close() {
            let mut close = close_indices(&self.active, self.opts.get_template_radius() as f32);
            pruned = move_tracks(&mut self.active, &mut close, &mut self.dropped, TrackState::Dropped);
        }

        debug!(
            "Frame {}: {} tracks active, {} lost, {} pruned",
            self.frame_id,
            self.active.len(),
            lost,
            pruned
        );
        Ok(())
    }

    fn reset(&mut self) {
        let active = self.active.drain(..);
        let dropped = self.dropped.drain(..);
        self.pool.release_all(active.chain(dropped));
        self.pool.reset_ids();
        self.engine.reset();
        self.frame_id = -1;
    }

    fn spawn_tracks(&mut self) -> usize {
        let pyramid = self.engine.pyramid();
        if pyramid.is_empty() {
            return 0;
        }

        let budget = self.track_budget();
        let limit = if budget == 0 {
            0
        } else {
            match budget.saturating_sub(self.active.len()) {
                0 => return 0,
                n => n,
            }
        };

        let level = self.opts.get_detection_level();
        let image = &pyramid.level(level).image;
        let radius = self.opts.get_template_radius() as f32 / ImagePyramid::scale(level);
        self.mask.reset(image.width(), image.height());
        for t in &self.active {
            self.mask
                .exclude_disk(ImagePyramid::to_level(&t.record.location, level), radius);
        }
        self.detector
            .detect(image, Some(&self.mask), limit, &mut self.detections);

        let mut spawned = 0;
        for p in &self.detections {
            if limit > 0 && spawned >= limit {
                break;
            }
            let location = ImagePyramid::from_level(p, level);
            if !(self.spawn_filter)(&location) {
                continue;
            }
            let engine = &self.engine;
            let slot = self.pool.acquire_with(location, self.frame_id, 0, |d| {
                engine.describe(&location, d.template_mut())
            });
            if let Some(slot) = slot {
                self.active.push(slot);
                spawned += 1;
            }
        }

        debug!(
            "Frame {}: {} tracks spawned from {} detections",
            self.frame_id,
            spawned,
            self.detections.len()
        );
        spawned
    }

    fn drop_track(&mut self, id: TrackId) -> bool {
        match position_of(&self.active, id) {
            Some(i) => {
                let slot = self.active.remove(i);
                self.pool.release(slot);
                true
            }
            None => false,
        }
    }

    fn drop_tracks(&mut self, predicate: &mut dyn FnMut(&TrackRecord<P>) -> bool) -> usize {
        drop_matching(&mut self.active, &mut self.pool, predicate)
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
        0
    }

    fn active_tracks_into<'a>(&'a self, out: &mut Vec<&'a TrackRecord<P>>) {
        out.clear();
        records(&self.active, out);
    }

    fn inactive_tracks_into<'a>(&'a self, out: &mut Vec<&'a TrackRecord<P>>) {
        out.clear();
    }

    fn dropped_tracks_into<'a>(&'a self, out: &mut Vec<&'a TrackRecord<P>>) {
        out.clear();
        records(&self.dropped, out);
    }

    fn payload_mut(&mut self, id: TrackId) -> Option<&mut Option<P>> {
        payload_of(&mut self.active, id)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_stuff::{assert_disjoint_rosters, blobs_image, init_logger, ScriptedDetector, ShiftAligner};
    use crate::track::TrackState;
    use crate::trackers::klt::options::KltOptions;
    use crate::trackers::klt::KltTracker;
    use crate::trackers::tracker_api::PointTracker;
    use crate::utils::config_length::ConfigLength;
    use crate::utils::image::GrayImage;
    use crate::utils::pyramid::BoxPyramidBuilder;
    use crate::Errors;
    use nalgebra::Point2;

    fn ids(tracks: Vec<&crate::track::TrackRecord<()>>) -> Vec<u64> {
        let mut ids = tracks.iter().map(|t| t.id()).collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    fn shifting_tracker(points: Vec<Point2<f32>>, max_tracks: usize) -> KltTracker<(), ShiftAligner> {
        let opts = KltOptions::default()
            .forward_backward_tolerance(None)
            .max_tracks(ConfigLength::fixed(max_tracks));
        KltTracker::with_collaborators(
            opts,
            Box::new(ScriptedDetector::new(points)),
            Box::new(BoxPyramidBuilder::new(4).unwrap()),
            ShiftAligner::new(10.0, 0.0),
        )
        .unwrap()
    }

    #[test]
    fn lifecycle() {
        init_logger();
        // the first five features leave the image on the next frame
        let points = (0..10)
            .map(|i| {
                let x = if i < 5 { 95.0 } else { 10.0 };
                Point2::new(x, 5.0 + 10.0 * (i % 5) as f32)
            })
            .collect::<Vec<_>>();
        let mut tracker = shifting_tracker(points, 10);
        let img = GrayImage::new(100, 60);

        tracker.process(&img).unwrap();
        assert_eq!(tracker.frame_id(), 0);
        assert_eq!(tracker.spawn_tracks(), 10);
        assert_eq!(ids(tracker.active_tracks()), (0..10).collect::<Vec<_>>());
        assert_eq!(ids(tracker.new_tracks()), (0..10).collect::<Vec<_>>());
        assert_disjoint_rosters(&tracker);

        tracker.process(&img).unwrap();
        assert_eq!(tracker.frame_id(), 1);
        assert_eq!(ids(tracker.active_tracks()), (5..10).collect::<Vec<_>>());
        assert_eq!(ids(tracker.dropped_tracks()), (0..5).collect::<Vec<_>>());
        assert!(tracker.inactive_tracks().is_empty());
        assert!(tracker.new_tracks().is_empty());
        assert!(tracker
            .dropped_tracks()
            .iter()
            .all(|t| t.state() == TrackState::Dropped));
        assert!(tracker
            .active_tracks()
            .iter()
            .all(|t| t.location().x == 20.0 && t.last_seen_frame_id() == 1));
        assert_disjoint_rosters(&tracker);

        assert_eq!(tracker.spawn_tracks(), 5);
        assert_eq!(ids(tracker.new_tracks()), (10..15).collect::<Vec<_>>());
        assert_eq!(tracker.total_active(), 10);
        assert_disjoint_rosters(&tracker);

        // the budget is exhausted
        assert_eq!(tracker.spawn_tracks(), 0);

        tracker.process(&img).unwrap();
        assert!(tracker.dropped_tracks().iter().all(|t| t.id() >= 10));
    }

    #[test]
    fn rosters_are_stable() {
        let mut tracker = shifting_tracker(vec![Point2::new(10.0, 10.0), Point2::new(30.0, 10.0)], 0);
        let img = GrayImage::new(100, 60);
        tracker.process(&img).unwrap();
        tracker.spawn_tracks();
        let a = ids(tracker.active_tracks());
        let b = ids(tracker.active_tracks());
        assert_eq!(a, b);
        let mut buf = Vec::default();
        tracker.all_tracks_into(&mut buf);
        tracker.all_tracks_into(&mut buf);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn explicit_drops() {
        let points = (0..6).map(|i| Point2::new(10.0 + 15.0 * i as f32, 20.0)).collect();
        let mut tracker = shifting_tracker(points, 0);
        let img = GrayImage::new(100, 60);
        tracker.process(&img).unwrap();
        assert_eq!(tracker.spawn_tracks(), 6);

        assert!(tracker.drop_track(2));
        assert!(!tracker.drop_track(2));
        assert!(!tracker.drop_track(100));
        assert_eq!(tracker.drop_tracks(&mut |t| t.id() % 2 == 1), 3);
        assert_eq!(ids(tracker.active_tracks()), vec![0, 4]);
        // explicit drops never appear in the dropped roster
        assert!(tracker.dropped_tracks().is_empty());

        *tracker.payload_mut(4).unwrap() = Some(());
        assert!(tracker.track(4).unwrap().payload().is_some());

        tracker.drop_all_tracks();
        assert_eq!(tracker.total_active(), 0);

        // recycled slots never reuse ids
        assert_eq!(tracker.spawn_tracks(), 6);
        assert_eq!(ids(tracker.active_tracks()), (6..12).collect::<Vec<_>>());
        assert!(tracker.active_tracks().iter().all(|t| t.payload().is_none()));
    }

    #[test]
    fn reset_restarts() {
        let mut tracker = shifting_tracker(vec![Point2::new(10.0, 10.0)], 0);
        let img = GrayImage::new(100, 60);
        tracker.process(&img).unwrap();
        tracker.spawn_tracks();
        tracker.process(&img).unwrap();
        tracker.reset();
        assert_eq!(tracker.frame_id(), -1);
        assert_eq!(tracker.total_active(), 0);
        assert!(tracker.dropped_tracks().is_empty());
        assert_eq!(tracker.spawn_tracks(), 0);

        // another frame size is accepted after the reset
        tracker.process(&GrayImage::new(80, 80)).unwrap();
        assert_eq!(tracker.spawn_tracks(), 1);
        assert_eq!(ids(tracker.active_tracks()), vec![0]);
    }

    #[test]
    fn image_size_mismatch() {
        let mut tracker = shifting_tracker(vec![], 0);
        tracker.process(&GrayImage::new(100, 60)).unwrap();
        let err = tracker.process(&GrayImage::new(60, 100)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Errors>(),
            Some(&Errors::ImageSizeMismatch {
                expected: (100, 60),
                got: (60, 100)
            })
        );
        assert_eq!(tracker.frame_id(), 0);
    }

    #[test]
    fn budget_limits_total_tracks() {
        let points = (0..6).map(|i| Point2::new(20.0 + 30.0 * i as f32, 50.0)).collect();
        let mut tracker = shifting_tracker(points, 4);
        tracker.process(&GrayImage::new(200, 100)).unwrap();
        assert_eq!(tracker.max_spawn(), 4);
        assert_eq!(tracker.spawn_tracks(), 4);
        assert_eq!(tracker.max_spawn(), 4);
        assert_eq!(tracker.spawn_tracks(), 0);

        assert!(tracker.drop_track(0));
        assert_eq!(tracker.spawn_tracks(), 1);
        assert_eq!(tracker.total_active(), 4);
    }

    #[test]
    fn too_many_levels_fail_at_construction() {
        let opts = KltOptions::default().pyramid_levels(70);
        let res = KltTracker::<()>::new(opts, Box::new(ScriptedDetector::default()));
        assert_eq!(
            res.err().unwrap().downcast_ref::<Errors>(),
            Some(&Errors::TooManyPyramidLevels { levels: 70, max: 16 })
        );
    }

    #[test]
    fn spawn_respects_footprint_and_filter() {
        let points = vec![
            Point2::new(20.0, 20.0),
            Point2::new(24.0, 20.0),
            Point2::new(60.0, 20.0),
            Point2::new(80.0, 40.0),
        ];
        let mut tracker = shifting_tracker(points, 0);
        tracker.set_spawn_filter(|p| p.x < 70.0);
        let img = GrayImage::new(100, 60);
        tracker.process(&img).unwrap();
        assert_eq!(tracker.spawn_tracks(), 3);
        // the footprint of the existing tracks is excluded
        assert_eq!(tracker.spawn_tracks(), 0);
        let locations = tracker
            .active_tracks()
            .iter()
            .map(|t| t.location())
            .collect::<Vec<_>>();
        assert!(locations.contains(&Point2::new(24.0, 20.0)));
        assert!(!locations.contains(&Point2::new(80.0, 40.0)));
    }

    #[test]
    fn prune_close_tracks() {
        // detections of a single spawn are not checked against each other
        let points = vec![
            Point2::new(20.0, 20.0),
            Point2::new(22.0, 20.0),
            Point2::new(40.0, 20.0),
        ];
        let opts = KltOptions::default()
            .forward_backward_tolerance(None)
            .template_radius(3)
            .prune_close(true);
        let mut tracker: KltTracker<(), _> = KltTracker::with_collaborators(
            opts,
            Box::new(ScriptedDetector::new(points)),
            Box::new(BoxPyramidBuilder::new(2).unwrap()),
            ShiftAligner::new(0.0, 0.0),
        )
        .unwrap();
        let img = GrayImage::new(100, 60);
        tracker.process(&img).unwrap();
        assert_eq!(tracker.spawn_tracks(), 3);
        tracker.process(&img).unwrap();
        assert_eq!(ids(tracker.active_tracks()), vec![0, 2]);
        assert_eq!(ids(tracker.dropped_tracks()), vec![1]);
        assert_disjoint_rosters(&tracker);
    }

    fn blob_centers() -> Vec<Point2<f32>> {
        (0..4)
            .flat_map(|r| (0..5).map(move |c| Point2::new(20.0 + 22.0 * c as f32, 20.0 + 22.0 * r as f32)))
            .collect()
    }

    fn blob_frames(steps: usize, dx: f32, dy: f32) -> Vec<GrayImage> {
        (0..steps)
            .map(|s| {
                let shifted = blob_centers()
                    .iter()
                    .map(|p| Point2::new(p.x + dx * s as f32, p.y + dy * s as f32))
                    .collect::<Vec<_>>();
                blobs_image(128, 112, &shifted, 3.0)
            })
            .collect()
    }

    fn klt(concurrent: bool) -> KltTracker<()> {
        let opts = KltOptions::default()
            .pyramid_levels(2)
            .template_radius(5)
            .concurrent(concurrent)
            .min_concurrent_tracks(1)
            .concurrent_workers(3);
        KltTracker::new(opts, Box::new(ScriptedDetector::new(blob_centers()))).unwrap()
    }

    #[test]
    fn follows_moving_blobs() {
        init_logger();
        let frames = blob_frames(4, 1.5, -1.0);
        let mut tracker = klt(false);
        tracker.process(&frames[0]).unwrap();
        assert_eq!(tracker.spawn_tracks(), 20);
        for f in &frames[1..] {
            tracker.process(f).unwrap();
        }
        assert_eq!(tracker.total_active(), 20);
        for t in tracker.active_tracks() {
            let start = blob_centers()[t.id() as usize];
            let expected = Point2::new(start.x + 4.5, start.y - 3.0);
            assert!((t.location() - expected).norm() < 0.3, "{:?}", t);
            assert_eq!(t.last_seen_frame_id(), 3);
        }
    }

    #[test]
    fn textureless_frame_drops_tracks() {
        let frames = blob_frames(1, 0.0, 0.0);
        let mut tracker = klt(false);
        tracker.process(&frames[0]).unwrap();
        tracker.spawn_tracks();
        tracker
            .process(&GrayImage::from_fn(128, 112, |_, _| 20.0))
            .unwrap();
        assert_eq!(tracker.total_active(), 0);
        assert_eq!(tracker.dropped_tracks().len(), 20);
    }

    #[test]
    fn concurrent_equals_sequential() {
        // every third blob vanishes on the fourth frame
        let frames = (0..5)
            .map(|s| {
                let centers = blob_centers()
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| s < 3 || i % 3 != 0)
                    .map(|(_, p)| Point2::new(p.x + 1.5 * s as f32, p.y + 0.5 * s as f32))
                    .collect::<Vec<_>>();
                blobs_image(128, 112, &centers, 3.0)
            })
            .collect::<Vec<_>>();

        let mut seq = klt(false);
        let mut par = klt(true);
        for (i, f) in frames.iter().enumerate() {
            seq.process(f).unwrap();
            par.process(f).unwrap();
            if i == 0 {
                assert_eq!(seq.spawn_tracks(), par.spawn_tracks());
            }
            assert_eq!(ids(seq.active_tracks()), ids(par.active_tracks()));
            assert_eq!(ids(seq.dropped_tracks()), ids(par.dropped_tracks()));
            for (a, b) in seq.active_tracks().iter().zip(par.active_tracks()) {
                assert_eq!(a.location(), b.location());
            }
        }
        assert_eq!(seq.total_active(), 13);
    }
}
