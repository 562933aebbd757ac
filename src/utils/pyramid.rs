use crate::utils::image::GrayImage;
use crate::Errors;
use anyhow::Result;
use nalgebra::Point2;

/// Single pyramid layer with its spatial gradients
///
#[derive(Clone, Debug, Default)]
pub struct PyramidLevel {
    pub image: GrayImage,
    pub grad_x: GrayImage,
    pub grad_y: GrayImage,
}

/// Multi-resolution representation of a frame. Level `0` is the frame itself, every next
/// level halves both dimensions.
///
/// The pyramid is immutable while tracks are aligned against it, so it may be shared
/// between worker threads by reference.
///
#[derive(Clone, Debug, Default)]
pub struct ImagePyramid {
    levels: Vec<PyramidLevel>,
    used: usize,
}

impl ImagePyramid {
    /// Number of valid levels
    ///
    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn level(&self, level: usize) -> &PyramidLevel {
        assert!(level < self.used, "Pyramid level is out of range");
        &self.levels[level]
    }

    pub fn base(&self) -> &GrayImage {
        &self.level(0).image
    }

    /// Shape of the base level, `(0, 0)` for an empty pyramid
    ///
    pub fn shape(&self) -> (usize, usize) {
        if self.is_empty() {
            (0, 0)
        } else {
            self.levels[0].image.shape()
        }
    }

    /// Scale between the base level and `level`
    ///
    pub fn scale(level: usize) -> f32 {
        (1u32 << level) as f32
    }

    /// Converts a base level location into `level` coordinates. Pixel centers are
    /// kept aligned: a level pixel covers `2^level` base pixels.
    ///
    pub fn to_level(p: &Point2<f32>, level: usize) -> Point2<f32> {
        let s = Self::scale(level);
        Point2::new((p.x + 0.5) / s - 0.5, (p.y + 0.5) / s - 0.5)
    }

    /// Inverse of [to_level](ImagePyramid::to_level)
    ///
    pub fn from_level(p: &Point2<f32>, level: usize) -> Point2<f32> {
        let s = Self::scale(level);
        Point2::new((p.x + 0.5) * s - 0.5, (p.y + 0.5) * s - 0.5)
    }

    /// Prepares `n` levels, allocations of previously built levels are reused
    ///
    pub(crate) fn ensure_levels(&mut self, n: usize) -> &mut [PyramidLevel] {
        if self.levels.len() < n {
            self.levels.resize_with(n, PyramidLevel::default);
        }
        self.used = n;
        &mut self.levels[..n]
    }

    pub fn clear(&mut self) {
        self.used = 0;
    }
}

/// Pyramid and gradient provider consumed by the optical flow trackers.
///
pub trait PyramidBuilder: Send + Sync {
    /// Number of levels produced by the builder
    ///
    fn levels(&self) -> usize;

    /// Builds the pyramid for the image into the `pyramid` reusing its buffers
    ///
    fn build(&self, image: &GrayImage, pyramid: &mut ImagePyramid) -> Result<()>;
}

/// The maximum number of pyramid levels, coarser levels of any practical image are empty
pub const MAX_PYRAMID_LEVELS: usize = 16;

/// Fails unless `1 <= levels <= MAX_PYRAMID_LEVELS`
///
pub(crate) fn check_levels(levels: usize) -> Result<()> {
    if levels == 0 {
        return Err(Errors::MissingPyramidLevels.into());
    }
    if levels > MAX_PYRAMID_LEVELS {
        return Err(Errors::TooManyPyramidLevels {
            levels,
            max: MAX_PYRAMID_LEVELS,
        }
        .into());
    }
    Ok(())
}

/// Reference pyramid: 2x2 box filter down-sampling with central difference gradients.
///
#[derive(Clone, Debug)]
pub struct BoxPyramidBuilder {
    levels: usize,
}

impl BoxPyramidBuilder {
    pub fn new(levels: usize) -> Result<Self> {
        check_levels(levels)?;
        Ok(Self { levels })
    }
}

impl PyramidBuilder for BoxPyramidBuilder {
    fn levels(&self) -> usize {
        self.levels
    }

    fn build(&self, image: &GrayImage, pyramid: &mut ImagePyramid) -> Result<()> {
        let (w, h) = image.shape();
        let min_side = 1usize << (self.levels - 1);
        if w / min_side < 2 || h / min_side < 2 {
            return Err(Errors::ImageTooSmall((w, h)).into());
        }

        let levels = pyramid.ensure_levels(self.levels);
        levels[0].image.copy_from(image);
        for l in 1..levels.len() {
            let (done, rest) = levels.split_at_mut(l);
            downsample(&done[l - 1].image, &mut rest[0].image);
        }
        for level in levels.iter_mut() {
            gradients(&level.image, &mut level.grad_x, &mut level.grad_y);
        }
        Ok(())
    }
}

fn downsample(src: &GrayImage, dst: &mut GrayImage) {
    let (w, h) = (src.width() / 2, src.height() / 2);
    dst.reshape(w, h);
    for y in 0..h {
        for x in 0..w {
            let v = src.get(2 * x, 2 * y)
                + src.get(2 * x + 1, 2 * y)
                + src.get(2 * x, 2 * y + 1)
                + src.get(2 * x + 1, 2 * y + 1);
            dst.set(x, y, v * 0.25);
        }
    }
}

fn gradients(src: &GrayImage, gx: &mut GrayImage, gy: &mut GrayImage) {
    let (w, h) = src.shape();
    gx.reshape(w, h);
    gy.reshape(w, h);
    for y in 0..h {
        for x in 0..w {
            let (xl, xr) = (x.saturating_sub(1), (x + 1).min(w - 1));
            let (yt, yb) = (y.saturating_sub(1), (y + 1).min(h - 1));
            let dx = (src.get(xr, y) - src.get(xl, y)) / (xr - xl).max(1) as f32;
            let dy = (src.get(x, yb) - src.get(x, yt)) / (yb - yt).max(1) as f32;
            gx.set(x, y, dx);
            gy.set(x, y, dy);
        }
    }
}
