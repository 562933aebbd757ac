use crate::detection::{Candidate, DescribePoint, DetectDescribe, PointDetector};
use crate::trackers::klt::aligner::{AlignStatus, PointAligner};
use crate::trackers::tracker_api::PointTracker;
use crate::utils::image::{ExclusionMask, GrayImage};
use crate::utils::pyramid::ImagePyramid;
use nalgebra::Point2;
use rand::distributions::Uniform;
use rand::prelude::ThreadRng;
use rand::Rng;
use std::collections::HashSet;

const BLOB_BACKGROUND: f32 = 20.0;
const BLOB_AMPLITUDE: f32 = 200.0;

/// Renders gaussian blobs with the standard deviation `sigma` over a flat background
///
pub fn blobs_image(width: usize, height: usize, centers: &[Point2<f32>], sigma: f32) -> GrayImage {
    let s2 = 2.0 * sigma * sigma;
    let reach = 4.0 * sigma;
    let mut img = GrayImage::from_fn(width, height, |_, _| BLOB_BACKGROUND);
    for c in centers {
        let x0 = (c.x - reach).floor().max(0.0) as usize;
        let y0 = (c.y - reach).floor().max(0.0) as usize;
        let x1 = ((c.x + reach).ceil().max(0.0) as usize).min(width);
        let y1 = ((c.y + reach).ceil().max(0.0) as usize).min(height);
        for y in y0..y1 {
            for x in x0..x1 {
                let (dx, dy) = (x as f32 - c.x, y as f32 - c.y);
                let v = img.get(x, y) + BLOB_AMPLITUDE * (-(dx * dx + dy * dy) / s2).exp();
                img.set(x, y, v);
            }
        }
    }
    img
}

/// Scene of blobs drifting randomly, produces a frame per iteration
///
pub struct BlobScene {
    width: usize,
    height: usize,
    sigma: f32,
    centers: Vec<Point2<f32>>,
    gen: ThreadRng,
    dist: Uniform<f32>,
}

impl BlobScene {
    /// Places `rows x cols` blobs on a regular grid
    ///
    pub fn new(width: usize, height: usize, rows: usize, cols: usize, sigma: f32, drift: f32) -> Self {
        let (sx, sy) = (width as f32 / cols as f32, height as f32 / rows as f32);
        let centers = (0..rows)
            .flat_map(|r| {
                (0..cols).map(move |c| Point2::new(sx * (c as f32 + 0.5), sy * (r as f32 + 0.5)))
            })
            .collect();
        Self {
            width,
            height,
            sigma,
            centers,
            gen: rand::thread_rng(),
            dist: Uniform::new(-drift, drift),
        }
    }

    pub fn centers(&self) -> &[Point2<f32>] {
        &self.centers
    }
}

impl Iterator for BlobScene {
    type Item = GrayImage;

    fn next(&mut self) -> Option<Self::Item> {
        let img = blobs_image(self.width, self.height, &self.centers, self.sigma);
        for c in self.centers.iter_mut() {
            c.x += self.gen.sample(&self.dist);
            c.y += self.gen.sample(&self.dist);
        }
        Some(img)
    }
}

/// Detector returning the predefined points which are not excluded, in order
///
#[derive(Clone, Debug, Default)]
pub struct ScriptedDetector {
    points: Vec<Point2<f32>>,
}

impl ScriptedDetector {
    pub fn new(points: Vec<Point2<f32>>) -> Self {
        Self { points }
    }

    pub fn set_points(&mut self, points: Vec<Point2<f32>>) {
        self.points = points;
    }
}

impl PointDetector for ScriptedDetector {
    fn detect(
        &mut self,
        _image: &GrayImage,
        exclude: Option<&ExclusionMask>,
        max_count: usize,
        out: &mut Vec<Point2<f32>>,
    ) {
        out.clear();
        for p in &self.points {
            if max_count > 0 && out.len() >= max_count {
                break;
            }
            if exclude.map(|m| m.is_excluded(p.x, p.y)).unwrap_or(false) {
                continue;
            }
            out.push(*p);
        }
    }
}

/// Raw intensities of the square patch around the nearest pixel
///
#[derive(Clone, Debug)]
pub struct PatchDescriber {
    radius: usize,
}

impl PatchDescriber {
    pub fn new(radius: usize) -> Self {
        Self { radius }
    }
}

impl DescribePoint for PatchDescriber {
    type Descriptor = Vec<f32>;

    fn describe(&self, image: &GrayImage, location: &Point2<f32>) -> Option<Vec<f32>> {
        let r = self.radius as f32;
        let (cx, cy) = (location.x.round(), location.y.round());
        if cx - r < 0.0
            || cy - r < 0.0
            || cx + r >= image.width() as f32
            || cy + r >= image.height() as f32
        {
            return None;
        }
        let (cx, cy) = (cx as usize, cy as usize);
        let mut res = Vec::with_capacity((2 * self.radius + 1).pow(2));
        for y in cy - self.radius..=cy + self.radius {
            for x in cx - self.radius..=cx + self.radius {
                res.push(image.get(x, y));
            }
        }
        Some(res)
    }
}

/// Feature source returning the predefined candidates of every set
///
#[derive(Clone, Debug, Default)]
pub struct ScriptedFeatures {
    sets: Vec<Vec<Candidate<Vec<f32>>>>,
}

impl ScriptedFeatures {
    pub fn new(set_count: usize) -> Self {
        Self {
            sets: vec![Vec::default(); set_count],
        }
    }

    pub fn set(&mut self, set: usize, candidates: Vec<Candidate<Vec<f32>>>) {
        self.sets[set] = candidates;
    }

    pub fn clear(&mut self) {
        for s in self.sets.iter_mut() {
            s.clear();
        }
    }
}

impl DetectDescribe for ScriptedFeatures {
    type Descriptor = Vec<f32>;

    fn set_count(&self) -> usize {
        self.sets.len()
    }

    fn detect(&mut self, _image: &GrayImage, set: usize, out: &mut Vec<Candidate<Vec<f32>>>) {
        out.clear();
        out.extend_from_slice(&self.sets[set]);
    }
}

/// Candidate with the one-element descriptor
///
pub fn candidate(x: f32, y: f32, descriptor: f32) -> Candidate<Vec<f32>> {
    Candidate::new(Point2::new(x, y), vec![descriptor])
}

/// Aligner moving every feature by the fixed offset, fails when the feature leaves the image
///
#[derive(Clone, Debug)]
pub struct ShiftAligner {
    dx: f32,
    dy: f32,
}

impl ShiftAligner {
    pub fn new(dx: f32, dy: f32) -> Self {
        Self { dx, dy }
    }
}

impl PointAligner for ShiftAligner {
    type Template = ();

    fn describe(&self, pyramid: &ImagePyramid, location: &Point2<f32>, _template: &mut ()) -> bool {
        !pyramid.is_empty() && pyramid.base().is_inside(location.x, location.y)
    }

    fn align(&mut self, _template: &(), pyramid: &ImagePyramid, location: &mut Point2<f32>) -> AlignStatus {
        let (x, y) = (location.x + self.dx, location.y + self.dy);
        if !pyramid.base().is_inside(x, y) {
            return AlignStatus::OutOfBounds;
        }
        location.x = x;
        location.y = y;
        AlignStatus::Tracked
    }
}

/// Checks that active, inactive and dropped rosters don't intersect and that the new tracks
/// are active
///
pub fn assert_disjoint_rosters<P, T: PointTracker<P>>(tracker: &T) {
    let active = tracker.active_tracks().iter().map(|t| t.id()).collect::<HashSet<_>>();
    let inactive = tracker.inactive_tracks().iter().map(|t| t.id()).collect::<HashSet<_>>();
    let dropped = tracker.dropped_tracks().iter().map(|t| t.id()).collect::<HashSet<_>>();
    assert!(active.is_disjoint(&inactive));
    assert!(active.is_disjoint(&dropped));
    assert!(inactive.is_disjoint(&dropped));
    assert_eq!(active.len(), tracker.total_active());
    assert_eq!(inactive.len(), tracker.total_inactive());
    assert!(tracker.new_tracks().iter().all(|t| active.contains(&t.id())));
}

#[cfg(test)]
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
