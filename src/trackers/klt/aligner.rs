use crate::trackers::klt::options::KltOptions;
use crate::utils::pyramid::{ImagePyramid, PyramidLevel};
use crate::EPS;
use nalgebra::{Matrix2, Point2, Vector2};

/// Outcome of a single track alignment
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlignStatus {
    Tracked,
    /// The template is textureless or the iterations don't converge
    Diverged,
    /// The aligned patch differs from the template too much
    LargeError,
    /// The feature left the image
    OutOfBounds,
}

/// Frame-to-frame alignment routine of the optical flow trackers.
///
/// The concurrent mode clones the aligner for every worker, so implementations may keep
/// scratch buffers.
///
pub trait PointAligner: Clone + Send + Sync {
    /// Per-track description kept between frames (e.g. the template patch)
    ///
    type Template: Default + Clone + Send + Sync;

    /// Samples the description of the feature at `location` of the pyramid base.
    ///
    /// # Returns
    /// `false` when the feature cannot be tracked from the location
    ///
    fn describe(&self, pyramid: &ImagePyramid, location: &Point2<f32>, template: &mut Self::Template) -> bool;

    /// Searches for the template in the pyramid starting from `location`. On success the
    /// location is updated to the found position.
    ///
    fn align(
        &mut self,
        template: &Self::Template,
        pyramid: &ImagePyramid,
        location: &mut Point2<f32>,
    ) -> AlignStatus;
}

#[derive(Clone, Debug, Default)]
pub struct TemplateLevel {
    intensity: Vec<f32>,
    grad_x: Vec<f32>,
    grad_y: Vec<f32>,
    valid: Vec<bool>,
    usable: bool,
}

/// Template of the KLT aligner: a square patch with its gradients for every pyramid level
///
#[derive(Clone, Debug, Default)]
pub struct KltTemplate {
    levels: Vec<TemplateLevel>,
    used: usize,
}

impl KltTemplate {
    /// Number of levels the template was sampled at
    ///
    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Levels with enough valid and textured samples take part in the alignment
    ///
    pub fn is_usable(&self, level: usize) -> bool {
        level < self.used && self.levels[level].usable
    }
}

/// Pyramidal Kanade-Lucas-Tomasi aligner.
///
/// Alignment runs from the coarsest usable level to the base one. At every level it
/// performs Gauss-Newton iterations with the template gradients:
/// `G * d = sum(grad_T * (T - I))`, where `G` is the 2x2 gradient matrix of the samples
/// which stay inside of the image. The location found at a level initializes the next
/// finer level.
///
#[derive(Clone, Debug)]
pub struct KltAligner {
    radius: isize,
    max_iterations: usize,
    min_determinant: f32,
    min_position_delta: f32,
    max_per_pixel_error: f32,
}

impl KltAligner {
    pub fn new(opts: &KltOptions) -> Self {
        Self {
            radius: opts.get_template_radius() as isize,
            max_iterations: opts.get_max_iterations(),
            min_determinant: opts.get_min_determinant(),
            min_position_delta: opts.get_min_position_delta(),
            max_per_pixel_error: opts.get_max_per_pixel_error(),
        }
    }

    fn side(&self) -> usize {
        (2 * self.radius + 1) as usize
    }

    fn offsets(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        (-self.radius..=self.radius)
            .flat_map(move |dy| (-self.radius..=self.radius).map(move |dx| (dx as f32, dy as f32)))
    }

    fn sample_level(&self, level: &PyramidLevel, center: &Point2<f32>, out: &mut TemplateLevel) {
        let n = self.side() * self.side();
        for buf in [&mut out.intensity, &mut out.grad_x, &mut out.grad_y] {
            buf.clear();
            buf.resize(n, 0.0);
        }
        out.valid.clear();
        out.valid.resize(n, false);

        let (mut gxx, mut gxy, mut gyy) = (0.0, 0.0, 0.0);
        let mut count = 0;
        for (i, (dx, dy)) in self.offsets().enumerate() {
            let (x, y) = (center.x + dx, center.y + dy);
            let sample = level.image.bilinear(x, y).and_then(|v| {
                let gx = level.grad_x.bilinear(x, y)?;
                let gy = level.grad_y.bilinear(x, y)?;
                Some((v, gx, gy))
            });
            if let Some((v, gx, gy)) = sample {
                out.intensity[i] = v;
                out.grad_x[i] = gx;
                out.grad_y[i] = gy;
                out.valid[i] = true;
                gxx += gx * gx;
                gxy += gx * gy;
                gyy += gy * gy;
                count += 1;
            }
        }

        out.usable = 2 * count >= n && self.well_conditioned(gxx, gxy, gyy, count);
    }

    fn well_conditioned(&self, gxx: f32, gxy: f32, gyy: f32, count: usize) -> bool {
        let det = gxx * gyy - gxy * gxy;
        count > 0 && det > EPS && det / count as f32 >= self.min_determinant
    }

    fn align_level(
        &self,
        template: &TemplateLevel,
        level: &PyramidLevel,
        guess: &mut Point2<f32>,
    ) -> AlignStatus {
        let n = template.valid.len();
        for _ in 0..self.max_iterations {
            let (mut gxx, mut gxy, mut gyy) = (0.0, 0.0, 0.0);
            let mut b = Vector2::new(0.0, 0.0);
            let mut count = 0;

            for (i, (dx, dy)) in self.offsets().enumerate() {
                if !template.valid[i] {
                    continue;
                }
                let Some(v) = level.image.bilinear(guess.x + dx, guess.y + dy) else {
                    continue;
                };
                let (gx, gy) = (template.grad_x[i], template.grad_y[i]);
                let e = template.intensity[i] - v;
                gxx += gx * gx;
                gxy += gx * gy;
                gyy += gy * gy;
                b.x += gx * e;
                b.y += gy * e;
                count += 1;
            }

            if 2 * count < n {
                return AlignStatus::OutOfBounds;
            }
            if !self.well_conditioned(gxx, gxy, gyy, count) {
                return AlignStatus::Diverged;
            }
            let Some(inv) = Matrix2::new(gxx, gxy, gxy, gyy).try_inverse() else {
                return AlignStatus::Diverged;
            };
            let step = inv * b;
            if !(step.x.is_finite() && step.y.is_finite()) {
                return AlignStatus::Diverged;
            }
            guess.x += step.x;
            guess.y += step.y;
            if step.norm() < self.min_position_delta {
                break;
            }
        }
        AlignStatus::Tracked
    }

    fn mean_error(&self, template: &TemplateLevel, level: &PyramidLevel, at: &Point2<f32>) -> Option<f32> {
        let mut sum = 0.0;
        let mut count = 0;
        for (i, (dx, dy)) in self.offsets().enumerate() {
            if !template.valid[i] {
                continue;
            }
            if let Some(v) = level.image.bilinear(at.x + dx, at.y + dy) {
                sum += (template.intensity[i] - v).abs();
                count += 1;
            }
        }
        if 2 * count < template.valid.len() {
            None
        } else {
            Some(sum / count as f32)
        }
    }
}

impl PointAligner for KltAligner {
    type Template = KltTemplate;

    fn describe(&self, pyramid: &ImagePyramid, location: &Point2<f32>, template: &mut KltTemplate) -> bool {
        if pyramid.is_empty() || !pyramid.base().is_inside(location.x, location.y) {
            return false;
        }
        let levels = pyramid.len();
        if template.levels.len() < levels {
            template.levels.resize_with(levels, TemplateLevel::default);
        }
        template.used = levels;
        for l in 0..levels {
            let center = ImagePyramid::to_level(location, l);
            self.sample_level(pyramid.level(l), &center, &mut template.levels[l]);
        }
        template.is_usable(0)
    }

    fn align(&mut self, template: &KltTemplate, pyramid: &ImagePyramid, location: &mut Point2<f32>) -> AlignStatus {
        let levels = template.len().min(pyramid.len());
        if levels == 0 || !template.is_usable(0) {
            return AlignStatus::Diverged;
        }

        let top = levels - 1;
        let mut guess = ImagePyramid::to_level(location, top);
        for l in (0..levels).rev() {
            if template.is_usable(l) {
                let status = self.align_level(&template.levels[l], pyramid.level(l), &mut guess);
                if status != AlignStatus::Tracked {
                    return status;
                }
            }
            if l > 0 {
                guess = ImagePyramid::to_level(&ImagePyramid::from_level(&guess, l), l - 1);
            }
        }

        let base = pyramid.level(0);
        if !base.image.is_inside(guess.x, guess.y) {
            return AlignStatus::OutOfBounds;
        }
        match self.mean_error(&template.levels[0], base, &guess) {
            None => AlignStatus::OutOfBounds,
            Some(e) if e > self.max_per_pixel_error => AlignStatus::LargeError,
            Some(_) => {
                *location = guess;
                AlignStatus::Tracked
            }
        }
    }
}
