/// Greedy nearest neighbour associator with ratio test
pub mod greedy;

/// Globally optimal associator built on Hungarian algorithm
pub mod hungarian;

use crate::utils::distance2;
use nalgebra::Point2;

/// Feature reference passed to associators: location and descriptor
///
#[derive(Debug)]
pub struct PointRef<'a, D> {
    pub location: Point2<f32>,
    pub descriptor: &'a D,
}

impl<'a, D> Clone for PointRef<'a, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, D> Copy for PointRef<'a, D> {}

impl<'a, D> PointRef<'a, D> {
    pub fn new(location: Point2<f32>, descriptor: &'a D) -> Self {
        Self {
            location,
            descriptor,
        }
    }
}

/// Match between the source feature `src` and the destination feature `dst`
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AssociatedPair {
    pub src: usize,
    pub dst: usize,
    pub distance: f32,
}

impl AssociatedPair {
    pub fn new(src: usize, dst: usize, distance: f32) -> Self {
        Self { src, dst, distance }
    }
}

/// Associates features of two frames.
///
/// Implementations must produce one-to-one matches: every source and every destination
/// index appears at most once in the output.
///
pub trait AssociatePoints<D>: Send {
    /// # Parameters
    /// * `src` - features known from previous frames
    /// * `dst` - features detected in the current frame
    /// * `out` - the matches, cleared by the implementation
    ///
    fn associate(&mut self, src: &[PointRef<'_, D>], dst: &[PointRef<'_, D>], out: &mut Vec<AssociatedPair>);
}

/// Optional spatial gate shared by the associators
///
pub(crate) fn within_gate(gate: Option<f32>, a: &Point2<f32>, b: &Point2<f32>) -> bool {
    match gate {
        None => true,
        Some(r) => distance2(a, b) <= r * r,
    }
}
