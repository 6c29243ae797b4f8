use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};

use crate::config::CoreConfig;
use crate::error::InsufficientDataError;

/// Maps a contact-angle profile of arbitrary length onto a parameter
/// vector of fixed length, so pairs from plans with different slice
/// counts stay comparable.
pub trait ContactProfileReducer: Send + Sync {
    /// Length of every vector `reduce` returns.
    fn output_len(&self) -> usize;

    fn reduce(&self, profile: &[f64]) -> Result<Vec<f64>, InsufficientDataError>;
}

/// Least-squares projection onto a truncated cosine basis over the
/// normalized profile axis. Component 0 is the mean level, higher
/// components capture progressively finer cranio-caudal variation.
pub struct CosineBasisReducer {
    output_len: usize,
    min_samples: usize,
}

impl CosineBasisReducer {
    pub fn new(output_len: usize, min_samples: usize) -> Self {
        CosineBasisReducer {
            output_len,
            min_samples,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        CosineBasisReducer::new(config.reduction_output_len, config.min_angle_samples)
    }
}

impl ContactProfileReducer for CosineBasisReducer {
    fn output_len(&self) -> usize {
        self.output_len
    }

    fn reduce(&self, profile: &[f64]) -> Result<Vec<f64>, InsufficientDataError> {
        if profile.len() < self.min_samples {
            return Err(InsufficientDataError {
                got: profile.len(),
                min: self.min_samples,
            });
        }

        let m = profile.len();
        let n = self.output_len;
        let mut design = DMatrix::zeros(m, n);
        for i in 0..m {
            let u = i as f64 / (m - 1) as f64;
            for j in 0..n {
                design[(i, j)] = (j as f64 * PI * u).cos();
            }
        }
        let rhs = DVector::from_column_slice(profile);
        let coeffs = design
            .svd(true, true)
            .solve(&rhs, 1e-10)
            .unwrap_or_else(|_| DVector::zeros(n));
        Ok(coeffs.iter().copied().collect())
    }
}

/// Statistical-moment summary of the profile: mean, spread, then
/// standardized higher moments. A cheap alternative basis for plans
/// where the cosine fit is too smooth.
pub struct MomentReducer {
    output_len: usize,
    min_samples: usize,
}

impl MomentReducer {
    pub fn new(output_len: usize, min_samples: usize) -> Self {
        MomentReducer {
            output_len,
            min_samples,
        }
    }
}

impl ContactProfileReducer for MomentReducer {
    fn output_len(&self) -> usize {
        self.output_len
    }

    fn reduce(&self, profile: &[f64]) -> Result<Vec<f64>, InsufficientDataError> {
        if profile.len() < self.min_samples {
            return Err(InsufficientDataError {
                got: profile.len(),
                min: self.min_samples,
            });
        }

        let m = profile.len() as f64;
        let mean = profile.iter().sum::<f64>() / m;
        let variance = profile.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / m;
        let sigma = variance.sqrt();

        let mut out = Vec::with_capacity(self.output_len);
        for j in 0..self.output_len {
            let component = match j {
                0 => mean,
                1 => sigma,
                _ => {
                    let order = (j + 1) as i32;
                    if sigma > 0.0 {
                        profile.iter().map(|p| (p - mean).powi(order)).sum::<f64>()
                            / (m * sigma.powi(order))
                    } else {
                        0.0
                    }
                }
            };
            out.push(component);
        }
        Ok(out)
    }
}
