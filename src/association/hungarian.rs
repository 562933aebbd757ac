use crate::association::{within_gate, AssociatePoints, AssociatedPair, PointRef};
use crate::distance::DescriptorDistance;
use crate::Errors;
use anyhow::Result;
use pathfinding::kuhn_munkres::kuhn_munkres;
use pathfinding::matrix::Matrix;

const F32_I64_MULT: f32 = 1_000_000.0;

/// Association engine which minimizes the total descriptor distance of the matches.
///
/// The weight matrix has a row per source and a column per destination, plus a dummy
/// column per source which lets the source stay unmatched. Pairs farther than `max_distance`
/// (or outside of the pixel gate) never match.
///
#[derive(Clone, Debug)]
pub struct HungarianAssociator {
    max_distance: f32,
    max_pixel_distance: Option<f32>,
}

impl HungarianAssociator {
    pub fn new(max_distance: f32) -> Result<Self> {
        if !(max_distance > 0.0 && max_distance.is_finite()) {
            return Err(Errors::NonPositive("max_distance").into());
        }
        Ok(Self {
            max_distance,
            max_pixel_distance: None,
        })
    }

    /// Only features closer than `distance` pixels are compared
    ///
    pub fn max_pixel_distance(mut self, distance: f32) -> Self {
        self.max_pixel_distance = Some(distance);
        self
    }

    fn weight(&self, distance: f32) -> Option<i64> {
        if distance <= self.max_distance {
            Some(((self.max_distance - distance) * F32_I64_MULT) as i64 + 1)
        } else {
            None
        }
    }
}

impl<D: DescriptorDistance> AssociatePoints<D> for HungarianAssociator {
    fn associate(
        &mut self,
        src: &[PointRef<'_, D>],
        dst: &[PointRef<'_, D>],
        out: &mut Vec<AssociatedPair>,
    ) {
        out.clear();
        if src.is_empty() || dst.is_empty() {
            return;
        }

        let mut distances = Matrix::new(src.len(), dst.len(), f32::INFINITY);
        let mut weights = Matrix::new(src.len(), dst.len() + src.len(), 0i64);

        for (si, s) in src.iter().enumerate() {
            for (di, d) in dst.iter().enumerate() {
                if !within_gate(self.max_pixel_distance, &s.location, &d.location) {
                    continue;
                }
                let dist = s.descriptor.distance(d.descriptor);
                if let Some(w) = self.weight(dist) {
                    distances[(si, di)] = dist;
                    weights[(si, di)] = w;
                }
            }
        }

        let (_, solution) = kuhn_munkres(&weights);

        out.extend(
            solution
                .into_iter()
                .enumerate()
                .filter(|(si, di)| *di < dst.len() && distances[(*si, *di)].is_finite())
                .map(|(si, di)| AssociatedPair::new(si, di, distances[(si, di)])),
        );
    }
}
