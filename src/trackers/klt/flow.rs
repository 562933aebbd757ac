use crate::track::Slot;
use crate::trackers::klt::aligner::{AlignStatus, PointAligner};
use crate::trackers::klt::options::KltOptions;
use crate::utils::distance2;
use crate::utils::image::GrayImage;
use crate::utils::pyramid::{check_levels, ImagePyramid, PyramidBuilder};
use crate::Errors;
use anyhow::Result;
use log::{trace, warn};
use nalgebra::Point2;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Access to the optical flow template inside of a strategy description
///
pub(crate) trait WithTemplate<T> {
    fn template(&self) -> &T;
    fn template_mut(&mut self) -> &mut T;
}

/// Description of the KLT tracks: the template only
///
#[derive(Clone, Debug, Default)]
pub(crate) struct FlowTemplate<T>(pub(crate) T);

impl<T> WithTemplate<T> for FlowTemplate<T> {
    fn template(&self) -> &T {
        &self.0
    }

    fn template_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Optical flow machinery shared by the KLT and the hybrid trackers: pyramids of the
/// previous and the current frame, the aligner and the optional worker pool.
///
pub(crate) struct FlowEngine<A: PointAligner> {
    builder: Box<dyn PyramidBuilder>,
    aligner: A,
    prev: ImagePyramid,
    curr: ImagePyramid,
    shape: Option<(usize, usize)>,
    forward_backward_tolerance: Option<f32>,
    min_concurrent_tracks: usize,
    workers: Option<ThreadPool>,
}

impl<A: PointAligner> FlowEngine<A> {
    pub fn new(opts: &KltOptions, builder: Box<dyn PyramidBuilder>, aligner: A) -> Result<Self> {
        opts.validate()?;
        check_levels(builder.levels())?;
        if opts.get_detection_level() >= builder.levels() {
            return Err(Errors::InvalidDetectionLevel {
                level: opts.get_detection_level(),
                levels: builder.levels(),
            }
            .into());
        }

        let workers = if opts.get_concurrent() {
            if opts.get_concurrent_workers() == 1 {
                warn!("Concurrent optical flow is enabled with a single worker thread");
            }
            Some(
                ThreadPoolBuilder::new()
                    .num_threads(opts.get_concurrent_workers())
                    .build()?,
            )
        } else {
            None
        };

        Ok(Self {
            builder,
            aligner,
            prev: ImagePyramid::default(),
            curr: ImagePyramid::default(),
            shape: None,
            forward_backward_tolerance: opts.get_forward_backward_tolerance(),
            min_concurrent_tracks: opts.get_min_concurrent_tracks(),
            workers,
        })
    }

    /// Makes the current pyramid the previous one and builds the pyramid of the image in
    /// place of the older one
    ///
    pub fn next_frame(&mut self, image: &GrayImage) -> Result<()> {
        let got = image.shape();
        match self.shape {
            Some(expected) if expected != got => {
                return Err(Errors::ImageSizeMismatch { expected, got }.into());
            }
            _ => {}
        }
        std::mem::swap(&mut self.prev, &mut self.curr);
        if let Err(e) = self.builder.build(image, &mut self.curr) {
            std::mem::swap(&mut self.prev, &mut self.curr);
            return Err(e);
        }
        self.shape = Some(got);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.prev.clear();
        self.curr.clear();
        self.shape = None;
    }

    /// Pyramid of the current frame, empty before the first frame
    ///
    pub fn pyramid(&self) -> &ImagePyramid {
        &self.curr
    }

    pub fn shape(&self) -> Option<(usize, usize)> {
        self.shape
    }

    pub fn describe(&self, location: &Point2<f32>, template: &mut A::Template) -> bool {
        self.aligner.describe(&self.curr, location, template)
    }

    /// Aligns every track from the previous frame into the current one.
    ///
    /// Successfully aligned tracks are observed at the new location with the refreshed
    /// template. The records of failed tracks are left untouched.
    ///
    /// # Returns
    /// Ascending indices of the failed tracks
    ///
    pub fn track<D, P>(&self, tracks: &mut [Slot<D, P>], frame_id: i64) -> Vec<usize>
    where
        D: WithTemplate<A::Template> + Send,
        P: Send,
    {
        if self.prev.is_empty() || tracks.is_empty() {
            return Vec::default();
        }

        let fb = self.forward_backward_tolerance;
        let (prev, curr) = (&self.prev, &self.curr);

        match &self.workers {
            Some(workers) if tracks.len() >= self.min_concurrent_tracks => {
                let threads = workers.current_num_threads().max(1);
                let chunk = ((tracks.len() + threads - 1) / threads).max(1);
                let failed = workers.install(|| {
                    tracks
                        .par_chunks_mut(chunk)
                        .enumerate()
                        .map(|(ci, part)| {
                            let mut aligner = self.aligner.clone();
                            part.iter_mut()
                                .enumerate()
                                .filter_map(|(i, slot)| {
                                    (!track_one(&mut aligner, prev, curr, fb, slot, frame_id))
                                        .then_some(ci * chunk + i)
                                })
                                .collect::<Vec<_>>()
                        })
                        .collect::<Vec<_>>()
                });
                failed.concat()
            }
            _ => {
                let mut aligner = self.aligner.clone();
                tracks
                    .iter_mut()
                    .enumerate()
                    .filter_map(|(i, slot)| {
                        (!track_one(&mut aligner, prev, curr, fb, slot, frame_id)).then_some(i)
                    })
                    .collect()
            }
        }
    }
}

fn track_one<A, D, P>(
    aligner: &mut A,
    prev: &ImagePyramid,
    curr: &ImagePyramid,
    forward_backward_tolerance: Option<f32>,
    slot: &mut Slot<D, P>,
    frame_id: i64,
) -> bool
where
    A: PointAligner,
    D: WithTemplate<A::Template>,
{
    let start = slot.record.location;
    let mut location = start;
    let status = aligner.align(slot.description.template(), curr, &mut location);
    if status != AlignStatus::Tracked {
        trace!("Track {} is lost: {:?}", slot.record.id, status);
        return false;
    }
    if !curr.base().is_inside(location.x, location.y) {
        trace!("Track {} left the image", slot.record.id);
        return false;
    }
    if !aligner.describe(curr, &location, slot.description.template_mut()) {
        trace!("Track {} can't be described at {:?}", slot.record.id, location);
        return false;
    }
    if let Some(tolerance) = forward_backward_tolerance {
        let mut back = location;
        let status = aligner.align(slot.description.template(), prev, &mut back);
        if status != AlignStatus::Tracked || distance2(&back, &start) > tolerance * tolerance {
            trace!(
                "Track {} failed forward-backward validation: {:?}, {:?} -> {:?}",
                slot.record.id,
                status,
                start,
                back
            );
            return false;
        }
    }
    slot.record.observe(location, frame_id);
    true
}

/// Indices of tracks closer than `radius` to a track with a lower id which is kept
///
pub(crate) fn close_indices<D, P>(tracks: &[Slot<D, P>], radius: f32) -> Vec<usize> {
    let mut order = (0..tracks.len()).collect::<Vec<_>>();
    order.sort_by_key(|i| tracks[*i].record.id);
    let r2 = radius * radius;
    let mut kept: Vec<usize> = Vec::with_capacity(tracks.len());
    let mut close = Vec::default();
    for i in order {
        let loc = &tracks[i].record.location;
        if kept
            .iter()
            .any(|k| distance2(&tracks[*k].record.location, loc) < r2)
        {
            close.push(i);
        } else {
            kept.push(i);
        }
    }
    close.sort_unstable();
    close
}
