use crate::Errors;
use anyhow::Result;

/// Length that is either an absolute number or a fraction of some total with an
/// absolute floor.
///
/// It is used for track budgets (absolute count or fraction of image pixels) and for
/// the respawn threshold of the hybrid tracker (fraction of the reference count, never
/// below a minimum).
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfigLength {
    fraction: Option<f64>,
    length: usize,
}

impl Default for ConfigLength {
    fn default() -> Self {
        Self::fixed(0)
    }
}

impl ConfigLength {
    /// Absolute length independent of the total
    ///
    pub fn fixed(length: usize) -> Self {
        Self {
            fraction: None,
            length,
        }
    }

    /// `fraction` of the total but not less than `floor`
    ///
    pub fn relative(fraction: f64, floor: usize) -> Self {
        Self {
            fraction: Some(fraction),
            length: floor,
        }
    }

    pub fn is_relative(&self) -> bool {
        self.fraction.is_some()
    }

    pub fn fraction(&self) -> Option<f64> {
        self.fraction
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Checks that the fraction is within `[0, 1]`
    ///
    pub fn validate(&self) -> Result<()> {
        match self.fraction {
            Some(f) if !(0.0..=1.0).contains(&f) => Err(Errors::InvalidFraction(f).into()),
            _ => Ok(()),
        }
    }

    /// Computes the length for the total, the relative part is rounded down
    ///
    pub fn compute(&self, total: usize) -> usize {
        match self.fraction {
            None => self.length,
            Some(f) => ((f * total as f64).floor() as usize).max(self.length),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::utils::config_length::ConfigLength;
    use crate::Errors;

    #[test]
    fn compute() {
        assert_eq!(ConfigLength::fixed(30).compute(1000), 30);
        assert_eq!(ConfigLength::relative(0.4, 0).compute(25), 10);
        assert_eq!(ConfigLength::relative(0.4, 0).compute(24), 9);
        assert_eq!(ConfigLength::relative(0.4, 12).compute(24), 12);
        assert_eq!(ConfigLength::relative(0.001, 0).compute(640 * 480), 307);
        assert_eq!(ConfigLength::default().compute(100), 0);
    }

    #[test]
    fn validate() {
        assert!(ConfigLength::relative(0.5, 0).validate().is_ok());
        let err = ConfigLength::relative(1.5, 0).validate().unwrap_err();
        assert_eq!(err.downcast_ref::<Errors>(), Some(&Errors::InvalidFraction(1.5)));
    }
}
