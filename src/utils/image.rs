use nalgebra::Point2;

/// Single channel raster with `f32` intensities stored row by row.
///
/// The trackers are agnostic to the source pixel format, the caller converts frames
/// once into this representation.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GrayImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl GrayImage {
    /// Creates a black image
    ///
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    /// Creates an image from row-major pixels
    ///
    /// # Panics
    /// When the buffer length doesn't match `width * height`
    ///
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "Buffer length must be equal to width * height"
        );
        Self {
            width,
            height,
            data,
        }
    }

    /// Creates an image from 8 bit pixels
    ///
    pub fn from_u8(width: usize, height: usize, data: &[u8]) -> Self {
        Self::from_vec(width, height, data.iter().map(|p| *p as f32).collect())
    }

    /// Creates an image where every pixel is computed by `f(x, y)`
    ///
    pub fn from_fn<F>(width: usize, height: usize, f: F) -> Self
    where
        F: Fn(usize, usize) -> f32,
    {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Changes the shape of the image, the existing allocation is reused when possible.
    /// Pixel values are undefined after the call.
    ///
    pub fn reshape(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.data.resize(width * height, 0.0);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        self.data[y * self.width + x] = v;
    }

    /// Checks that the location can be sampled with [bilinear](GrayImage::bilinear)
    ///
    #[inline]
    pub fn is_inside(&self, x: f32, y: f32) -> bool {
        self.width > 0
            && self.height > 0
            && x >= 0.0
            && y >= 0.0
            && x <= (self.width - 1) as f32
            && y <= (self.height - 1) as f32
    }

    /// Bilinear interpolation of the intensity at a sub-pixel location.
    ///
    /// Returns `None` when the location is outside of the image.
    ///
    #[inline]
    pub fn bilinear(&self, x: f32, y: f32) -> Option<f32> {
        if !self.is_inside(x, y) {
            return None;
        }
        let x0 = (x.floor() as usize).min(self.width - 1);
        let y0 = (y.floor() as usize).min(self.height - 1);
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let ax = x - x0 as f32;
        let ay = y - y0 as f32;

        let top = self.get(x0, y0) * (1.0 - ax) + self.get(x1, y0) * ax;
        let bottom = self.get(x0, y1) * (1.0 - ax) + self.get(x1, y1) * ax;
        Some(top * (1.0 - ay) + bottom * ay)
    }

    /// Copies the content of the other image, reusing the allocation
    ///
    pub fn copy_from(&mut self, other: &GrayImage) {
        self.width = other.width;
        self.height = other.height;
        self.data.clear();
        self.data.extend_from_slice(&other.data);
    }
}

/// Binary mask of pixels a detector must not return features from.
///
#[derive(Clone, Debug, Default)]
pub struct ExclusionMask {
    width: usize,
    height: usize,
    data: Vec<bool>,
}

impl ExclusionMask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![false; width * height],
        }
    }

    /// Resizes the mask and clears every pixel
    ///
    pub fn reset(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data.resize(width * height, false);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Marks every pixel within `radius` of `center` as excluded
    ///
    pub fn exclude_disk(&mut self, center: Point2<f32>, radius: f32) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let r2 = radius * radius;
        let x0 = (center.x - radius).floor().max(0.0) as usize;
        let y0 = (center.y - radius).floor().max(0.0) as usize;
        let x1 = (center.x + radius).ceil().min((self.width - 1) as f32);
        let y1 = (center.y + radius).ceil().min((self.height - 1) as f32);
        if x1 < 0.0 || y1 < 0.0 {
            return;
        }
        for y in y0..=(y1 as usize) {
            for x in x0..=(x1 as usize) {
                let dx = x as f32 - center.x;
                let dy = y as f32 - center.y;
                if dx * dx + dy * dy <= r2 {
                    self.data[y * self.width + x] = true;
                }
            }
        }
    }

    /// Checks whether the pixel nearest to the location is excluded. Locations outside
    /// of the mask and non-finite coordinates are reported as excluded.
    ///
    pub fn is_excluded(&self, x: f32, y: f32) -> bool {
        if !(x.is_finite() && y.is_finite()) {
            return true;
        }
        let (xi, yi) = (x.round(), y.round());
        if xi < 0.0 || yi < 0.0 || xi >= self.width as f32 || yi >= self.height as f32 {
            return true;
        }
        self.data[yi as usize * self.width + xi as usize]
    }

    /// Number of excluded pixels
    ///
    pub fn excluded_count(&self) -> usize {
        self.data.iter().filter(|e| **e).count()
    }
}
