use crate::association::{within_gate, AssociatePoints, AssociatedPair, PointRef};
use crate::distance::DescriptorDistance;
use crate::Errors;
use anyhow::Result;
use log::trace;
use std::cmp::Ordering;

/// Greedy association engine.
///
/// It calculates matches as:
/// 1. for every source finds the closest and the second closest destination descriptor
///    within the spatial gate;
/// 2. rejects the source if the closest distance is greater than `max_distance` or the
///    match is ambiguous - `best > ratio * second_best`;
/// 3. optionally rejects the match if the source is not the closest one for the destination
///    (backwards validation);
/// 4. sorts surviving candidates by distance and assigns them greedily, so every destination
///    is taken by its closest source.
///
#[derive(Clone, Debug)]
pub struct GreedyAssociator {
    max_distance: f32,
    ratio: f32,
    backwards_validation: bool,
    max_pixel_distance: Option<f32>,
}

impl GreedyAssociator {
    /// Constructs new engine
    ///
    /// # Arguments
    /// * `max_distance` - the maximum descriptor distance of a match
    /// * `ratio` - ambiguity ratio within `(0, 1]`, `1.0` disables the ratio test
    ///
    pub fn new(max_distance: f32, ratio: f32) -> Result<Self> {
        if !(max_distance > 0.0) {
            return Err(Errors::NonPositive("max_distance").into());
        }
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(Errors::InvalidFraction(ratio as f64).into());
        }
        Ok(Self {
            max_distance,
            ratio,
            backwards_validation: false,
            max_pixel_distance: None,
        })
    }

    /// Requires the source to be the closest one to the destination as well
    ///
    pub fn backwards_validation(mut self, enabled: bool) -> Self {
        self.backwards_validation = enabled;
        self
    }

    /// Only features closer than `distance` pixels are compared
    ///
    pub fn max_pixel_distance(mut self, distance: f32) -> Self {
        self.max_pixel_distance = Some(distance);
        self
    }
}

impl<D: DescriptorDistance> AssociatePoints<D> for GreedyAssociator {
    fn associate(
        &mut self,
        src: &[PointRef<'_, D>],
        dst: &[PointRef<'_, D>],
        out: &mut Vec<AssociatedPair>,
    ) {
        out.clear();
        let mut candidates = Vec::with_capacity(src.len());

        for (si, s) in src.iter().enumerate() {
            let mut best: Option<(usize, f32)> = None;
            let mut second = f32::INFINITY;
            for (di, d) in dst.iter().enumerate() {
                if !within_gate(self.max_pixel_distance, &s.location, &d.location) {
                    continue;
                }
                let dist = s.descriptor.distance(d.descriptor);
                match best {
                    Some((_, b)) if dist >= b => second = second.min(dist),
                    Some((_, b)) => {
                        second = b;
                        best = Some((di, dist));
                    }
                    None => best = Some((di, dist)),
                }
            }

            let Some((di, dist)) = best else {
                continue;
            };
            if dist > self.max_distance {
                continue;
            }
            if self.ratio < 1.0 && second.is_finite() && dist > self.ratio * second {
                trace!("Ambiguous match rejected: src={}, best={}, second={}", si, dist, second);
                continue;
            }
            candidates.push(AssociatedPair::new(si, di, dist));
        }

        if self.backwards_validation {
            candidates.retain(|c| {
                let d = &dst[c.dst];
                let closest = src
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| within_gate(self.max_pixel_distance, &s.location, &d.location))
                    .map(|(i, s)| (i, s.descriptor.distance(d.descriptor)))
                    .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
                matches!(closest, Some((i, _)) if i == c.src)
            });
        }

        candidates.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then(a.src.cmp(&b.src))
        });

        let mut taken = vec![false; dst.len()];
        for c in candidates {
            if !taken[c.dst] {
                taken[c.dst] = true;
                out.push(c);
            }
        }
        out.sort_by_key(|c| c.src);
    }
}

#[cfg(test)]
mod tests {
    use crate::association::greedy::GreedyAssociator;
    use crate::association::{AssociatePoints, PointRef};
    use nalgebra::Point2;

    fn refs(descriptors: &[Vec<f32>]) -> Vec<PointRef<'_, Vec<f32>>> {
        descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| PointRef::new(Point2::new(i as f32 * 10.0, 0.0), d))
            .collect()
    }

    #[test]
    fn nearest_neighbours() {
        let src = vec![vec![0.0, 0.0], vec![10.0, 10.0]];
        let dst = vec![vec![10.2, 10.0], vec![0.1, 0.0], vec![50.0, 50.0]];
        let mut a = GreedyAssociator::new(1.0, 1.0).unwrap();
        let mut out = Vec::default();
        a.associate(&refs(&src), &refs(&dst), &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].src, out[0].dst), (0, 1));
        assert_eq!((out[1].src, out[1].dst), (1, 0));
    }

    #[test]
    fn max_distance_and_ratio() {
        let src = vec![vec![0.0], vec![5.0]];
        let dst = vec![vec![0.5], vec![0.6], vec![9.0]];
        let mut out = Vec::default();

        // ambiguous: 0.5 vs 0.6
        let mut a = GreedyAssociator::new(1.0, 0.8).unwrap();
        a.associate(&refs(&src), &refs(&dst), &mut out);
        assert!(out.is_empty());

        let mut a = GreedyAssociator::new(1.0, 1.0).unwrap();
        a.associate(&refs(&src), &refs(&dst), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].src, out[0].dst), (0, 0));
    }

    #[test]
    fn one_to_one() {
        let src = vec![vec![1.0], vec![1.1]];
        let dst = vec![vec![1.05]];
        let mut out = Vec::default();
        let mut a = GreedyAssociator::new(1.0, 1.0).unwrap();
        a.associate(&refs(&src), &refs(&dst), &mut out);
        assert_eq!(out.len(), 1);
        // equal distances, the lower source index wins
        assert_eq!(out[0].dst, 0);

        let src = vec![vec![1.0], vec![1.04]];
        a.associate(&refs(&src), &refs(&dst), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].src, 1);
    }

    #[test]
    fn pixel_gate() {
        let src = vec![vec![0.0]];
        let dst = vec![vec![0.0], vec![0.0]];
        let s = [PointRef::new(Point2::new(0.0, 0.0), &src[0])];
        let d = [
            PointRef::new(Point2::new(100.0, 0.0), &dst[0]),
            PointRef::new(Point2::new(3.0, 4.0), &dst[1]),
        ];
        let mut out = Vec::default();
        let mut a = GreedyAssociator::new(1.0, 1.0)
            .unwrap()
            .max_pixel_distance(5.0);
        a.associate(&s, &d, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dst, 1);
    }

    #[test]
    fn backwards() {
        let src = vec![vec![0.0], vec![0.9]];
        let dst = vec![vec![1.0], vec![5.0]];
        let mut out = Vec::default();
        let mut a = GreedyAssociator::new(2.0, 1.0)
            .unwrap()
            .backwards_validation(true);
        a.associate(&refs(&src), &refs(&dst), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].src, out[0].dst), (1, 0));
        assert!(GreedyAssociator::new(0.0, 1.0).is_err());
        assert!(GreedyAssociator::new(1.0, 1.5).is_err());
    }
}
