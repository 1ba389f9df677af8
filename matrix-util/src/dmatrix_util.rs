pub use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardUniform;

use crate::traits::*;

impl SampleOps for DMatrix<f32> {
    type Mat = Self;
    type Scalar = f32;

    fn runif_seeded(dd: usize, nn: usize, seed: u64) -> Self::Mat {
        let mut rng = SmallRng::seed_from_u64(seed);
        DMatrix::<f32>::from_fn(dd, nn, |_, _| rng.sample(StandardUniform))
    }
}

impl MatOps for DMatrix<f32> {
    type Mat = Self;
    type Scalar = f32;

    /// z-score; zero-variance columns are only centred
    fn scale_columns_inplace(&mut self) {
        let mu = self.column_means();
        let var = self.column_variances();
        for (j, mut xx_j) in self.column_iter_mut().enumerate() {
            let sig = var[j].sqrt();
            if sig > 0.0 {
                xx_j.apply(|x| *x = (*x - mu[j]) / sig);
            } else {
                xx_j.add_scalar_mut(-mu[j]);
            }
        }
    }

    fn scale_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.scale_columns_inplace();
        ret
    }

    fn centre_columns_inplace(&mut self) {
        let mu = self.column_means();
        for (j, mut xx_j) in self.column_iter_mut().enumerate() {
            xx_j.add_scalar_mut(-mu[j]);
        }
    }

    fn centre_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.centre_columns_inplace();
        ret
    }

    fn column_means(&self) -> Vec<f32> {
        let nn = self.nrows().max(1) as f64;
        self.column_iter()
            .map(|x_j| (x_j.iter().map(|&x| x as f64).sum::<f64>() / nn) as f32)
            .collect()
    }

    fn column_variances(&self) -> Vec<f32> {
        let nn = self.nrows();
        if nn < 2 {
            return vec![0.0; self.ncols()];
        }
        self.column_iter()
            .map(|x_j| {
                let mu = x_j.iter().map(|&x| x as f64).sum::<f64>() / nn as f64;
                let ss = x_j
                    .iter()
                    .map(|&x| {
                        let d = x as f64 - mu;
                        d * d
                    })
                    .sum::<f64>();
                (ss / (nn - 1) as f64) as f32
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn scale_columns_zero_mean_unit_var() {
        let xx = DMatrix::<f32>::runif_seeded(200, 4, 7) * 10.0;
        let zz = xx.scale_columns();
        for (mu, var) in zz.column_means().iter().zip(zz.column_variances()) {
            assert_abs_diff_eq!(*mu, 0.0, epsilon = 1e-4);
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn constant_column_is_only_centred() {
        let xx = DMatrix::<f32>::from_row_slice(3, 2, &[1.0, 5.0, 2.0, 5.0, 3.0, 5.0]);
        let zz = xx.scale_columns();
        assert!(zz.column(1).iter().all(|&x| x == 0.0));
    }
}
