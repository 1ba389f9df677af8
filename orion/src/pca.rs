use crate::anndata::AnnData;
use crate::orion_common::*;
use matrix_util::dmatrix_rsvd::RSVD;

pub const PCA_KEY: &str = "X_pca";

pub struct PcaResult {
    /// cells × components
    pub scores: Mat,
    /// markers × components
    pub loadings: Mat,
    pub variance: Vec<f32>,
    pub variance_ratio: Vec<f32>,
}

impl PcaResult {
    pub fn num_components(&self) -> usize {
        self.scores.ncols()
    }

    pub fn component_names(&self) -> Vec<Box<str>> {
        (1..=self.num_components())
            .map(|k| format!("PC{}", k).into_boxed_str())
            .collect()
    }
}

/// Principal components of the column-centred matrix `x` (cells × markers)
///
/// `n_comps` is capped at `min(n_vars - 1, n_obs - 1)`. Each component is
/// oriented so that its largest-magnitude loading is positive.
pub fn fit_pca(x: &Mat, n_comps: usize, seed: u64) -> anyhow::Result<PcaResult> {
    let (nobs, nvars) = x.shape();
    if nobs < 2 || nvars < 2 {
        anyhow::bail!(
            "PCA needs at least 2 cells and 2 markers, got {} x {}",
            nobs,
            nvars
        );
    }

    let n_comps = n_comps.min(nvars - 1).min(nobs - 1).max(1);
    info!("PCA: {} cells x {} markers, {} components", nobs, nvars, n_comps);

    let xc = x.centre_columns();
    let (mut u, d, mut v) = xc.rsvd_seeded(n_comps, seed)?;

    for k in 0..v.ncols() {
        let imax = v.column(k).iamax();
        if v[(imax, k)] < 0.0 {
            v.column_mut(k).neg_mut();
            u.column_mut(k).neg_mut();
        }
    }

    let scores = u * Mat::from_diagonal(&d);
    let denom = (nobs - 1) as f32;
    let variance: Vec<f32> = d.iter().map(|&s| s * s / denom).collect();
    let total: f32 = x.column_variances().iter().sum();
    let variance_ratio = variance
        .iter()
        .map(|&v| if total > 0.0 { v / total } else { 0.0 })
        .collect();

    Ok(PcaResult {
        scores,
        loadings: v,
        variance,
        variance_ratio,
    })
}

/// Fit PCA on `adata.x` and store the scores as `obsm["X_pca"]`
pub fn pca_into(adata: &mut AnnData, n_comps: usize, seed: u64) -> anyhow::Result<PcaResult> {
    let pca = fit_pca(&adata.x, n_comps, seed)?;
    adata.insert_obsm(PCA_KEY, pca.scores.clone())?;
    adata.insert_uns(&["pca", "variance"], serde_json::json!(pca.variance))?;
    adata.insert_uns(&["pca", "variance_ratio"], serde_json::json!(pca.variance_ratio))?;
    adata.insert_uns(
        &["pca", "params"],
        serde_json::json!({ "n_comps": pca.num_components(), "seed": seed }),
    )?;
    Ok(pca)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    /// points spread along (1, 2, 0) with small noise
    fn elongated(n: usize) -> Mat {
        let mut rng = SmallRng::seed_from_u64(7);
        let along = Normal::new(0.0f32, 5.0).unwrap();
        let noise = Normal::new(0.0f32, 0.1).unwrap();
        let mut x = Mat::zeros(n, 3);
        for i in 0..n {
            let t = along.sample(&mut rng);
            x[(i, 0)] = t + noise.sample(&mut rng) + 10.0;
            x[(i, 1)] = 2.0 * t + noise.sample(&mut rng);
            x[(i, 2)] = noise.sample(&mut rng);
        }
        x
    }

    #[test]
    fn first_component_follows_the_long_axis() {
        let x = elongated(200);
        let pca = fit_pca(&x, 10, 1).unwrap();

        // capped at n_vars - 1
        assert_eq!(pca.num_components(), 2);
        assert_eq!(pca.scores.shape(), (200, 2));
        assert_eq!(pca.loadings.shape(), (3, 2));

        let l = pca.loadings.column(0);
        approx::assert_abs_diff_eq!(l[1], 2.0 / 5f32.sqrt(), epsilon = 0.01);
        assert!(l[1] > 0.0);
        assert!(pca.variance_ratio[0] > 0.99);
        assert!(pca.variance[0] >= pca.variance[1]);

        // scores are centred
        approx::assert_abs_diff_eq!(pca.scores.column(0).mean(), 0.0, epsilon = 1e-2);
    }

    #[test]
    fn too_small_inputs() {
        assert!(fit_pca(&Mat::zeros(1, 5), 2, 0).is_err());
        assert!(fit_pca(&Mat::zeros(5, 1), 2, 0).is_err());
    }
}
