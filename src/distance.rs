use std::ops::{MulAssign, SubAssign};
use ultraviolet::f32x8;

/// Number of SIMD lanes used to compare float descriptors
const LANES: usize = 8;

/// Distance between two descriptors of the same kind. Lower is closer.
///
pub trait DescriptorDistance {
    fn distance(&self, other: &Self) -> f32;
}

/// Euclidian distance between two float descriptors
///
/// When the descriptor lengths don't match, the longer one is truncated to the shorter
/// one when the distance is calculated
///
pub fn euclidean(f1: &[f32], f2: &[f32]) -> f32 {
    let len = f1.len().min(f2.len());
    let (f1, f2) = (&f1[..len], &f2[..len]);

    let mut acc = f32x8::splat(0.0);
    let mut c1 = f1.chunks_exact(LANES);
    let mut c2 = f2.chunks_exact(LANES);
    for (a, b) in (&mut c1).zip(&mut c2) {
        let mut block = f32x8::new(as_lanes(a));
        block.sub_assign(f32x8::new(as_lanes(b)));
        block.mul_assign(block);
        acc += block;
    }

    let tail = c1
        .remainder()
        .iter()
        .zip(c2.remainder())
        .fold(0.0_f32, |acc, (a, b)| acc + (a - b) * (a - b));

    (acc.reduce_add() + tail).sqrt()
}

fn as_lanes(chunk: &[f32]) -> [f32; LANES] {
    let mut lanes = [0.0; LANES];
    lanes.copy_from_slice(chunk);
    lanes
}

/// Hamming distance between two bit-packed binary descriptors
///
pub fn hamming(f1: &[u64], f2: &[u64]) -> u32 {
    f1.iter()
        .zip(f2.iter())
        .map(|(a, b)| (a ^ b).count_ones())
        .sum()
}

impl DescriptorDistance for Vec<f32> {
    fn distance(&self, other: &Self) -> f32 {
        euclidean(self, other)
    }
}

impl<const N: usize> DescriptorDistance for [f32; N] {
    fn distance(&self, other: &Self) -> f32 {
        euclidean(self, other)
    }
}

/// Bit-packed binary descriptor (BRIEF-like)
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BinaryDescriptor(pub Vec<u64>);

impl DescriptorDistance for BinaryDescriptor {
    fn distance(&self, other: &Self) -> f32 {
        hamming(&self.0, &other.0) as f32
    }
}
