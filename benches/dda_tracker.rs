#![feature(test)]

extern crate test;

use pointtrack::association::greedy::GreedyAssociator;
use pointtrack::association::hungarian::HungarianAssociator;
use pointtrack::association::AssociatePoints;
use pointtrack::detection::DetectThenDescribe;
use pointtrack::test_stuff::{BlobScene, PatchDescriber, ScriptedDetector};
use pointtrack::trackers::dda::options::DdaOptions;
use pointtrack::trackers::dda::DdaTracker;
use pointtrack::trackers::tracker_api::PointTracker;
use test::Bencher;

#[bench]
fn bench_dda_greedy_00020(b: &mut Bencher) {
    bench_dda(4, 5, Box::new(GreedyAssociator::new(400.0, 0.9).unwrap()), b);
}

#[bench]
fn bench_dda_greedy_00100(b: &mut Bencher) {
    bench_dda(10, 10, Box::new(GreedyAssociator::new(400.0, 0.9).unwrap()), b);
}

#[bench]
fn bench_dda_hungarian_00020(b: &mut Bencher) {
    bench_dda(4, 5, Box::new(HungarianAssociator::new(400.0).unwrap()), b);
}

#[bench]
fn bench_dda_hungarian_00100(b: &mut Bencher) {
    bench_dda(10, 10, Box::new(HungarianAssociator::new(400.0).unwrap()), b);
}

fn bench_dda(rows: usize, cols: usize, associator: Box<dyn AssociatePoints<Vec<f32>>>, b: &mut Bencher) {
    let _ = env_logger::try_init();
    let mut scene = BlobScene::new(cols * 24, rows * 24, rows, cols, 3.0, 0.5);
    let source = DetectThenDescribe::new(
        ScriptedDetector::new(scene.centers().to_vec()),
        PatchDescriber::new(3),
        0,
    );
    let mut tracker: DdaTracker<(), _> =
        DdaTracker::new(DdaOptions::default(), source, associator).unwrap();

    let first = scene.next().unwrap();
    tracker.process(&first).unwrap();
    tracker.spawn_tracks();

    b.iter(|| {
        let centers = scene.centers().to_vec();
        let frame = scene.next().unwrap();
        tracker.detector_mut().detector_mut().set_points(centers);
        tracker.process(&frame).unwrap();
        tracker.spawn_tracks();
    });
    eprintln!(
        "Active tracks: {}, inactive: {}",
        tracker.total_active(),
        tracker.total_inactive()
    );
}
