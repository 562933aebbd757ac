#![feature(test)]

extern crate test;

use pointtrack::test_stuff::{BlobScene, ScriptedDetector};
use pointtrack::trackers::klt::options::KltOptions;
use pointtrack::trackers::klt::KltTracker;
use pointtrack::trackers::tracker_api::PointTracker;
use test::Bencher;

#[bench]
fn bench_klt_00020(b: &mut Bencher) {
    bench_klt(4, 5, false, b);
}

#[bench]
fn bench_klt_00100(b: &mut Bencher) {
    bench_klt(10, 10, false, b);
}

#[bench]
fn bench_klt_00400(b: &mut Bencher) {
    bench_klt(20, 20, false, b);
}

#[bench]
fn bench_klt_concurrent_00100(b: &mut Bencher) {
    bench_klt(10, 10, true, b);
}

#[bench]
fn bench_klt_concurrent_00400(b: &mut Bencher) {
    bench_klt(20, 20, true, b);
}

fn bench_klt(rows: usize, cols: usize, concurrent: bool, b: &mut Bencher) {
    let _ = env_logger::try_init();
    let mut scene = BlobScene::new(cols * 24, rows * 24, rows, cols, 3.0, 0.5);
    let detector = ScriptedDetector::new(scene.centers().to_vec());
    let opts = KltOptions::default()
        .pyramid_levels(2)
        .template_radius(5)
        .forward_backward_tolerance(None)
        .concurrent(concurrent);
    let mut tracker: KltTracker<()> = KltTracker::new(opts, Box::new(detector)).unwrap();

    let first = scene.next().unwrap();
    tracker.process(&first).unwrap();
    tracker.spawn_tracks();

    b.iter(|| {
        let frame = scene.next().unwrap();
        tracker.process(&frame).unwrap();
        if tracker.total_active() < rows * cols {
            tracker.spawn_tracks();
        }
    });
    eprintln!(
        "Active tracks: {}, frame: {}",
        tracker.total_active(),
        tracker.frame_id()
    );
}
