use crate::traits::SampleOps;
use log::debug;
use nalgebra::{DMatrix, DVector};

type Mat = DMatrix<f32>;
type Vec = DVector<f32>;

const DEFAULT_ITER: usize = 5;
const DEFAULT_OVERSAMPLE: usize = 10;

pub trait RSVD {
    /// Leading `rank` singular triplets; the random test matrix is
    /// drawn with `seed`
    fn rsvd_seeded(&self, rank: usize, seed: u64) -> anyhow::Result<(Mat, Vec, Mat)>;
}

impl RSVD for Mat {
    fn rsvd_seeded(&self, rank: usize, seed: u64) -> anyhow::Result<(Mat, Vec, Mat)> {
        let mut rsvd = RandomizedSVD::new(rank, DEFAULT_ITER, seed);
        rsvd.compute(self)?;
        Ok(rsvd.into_parts())
    }
}

/// Randomized SVD
///
/// Implement Alg 4.4 of Halko et al. (2009)
/// Modified from https://github.com/kazuotani14/RandomizedSvd
///
pub struct RandomizedSVD {
    max_rank: usize,
    iter: usize,
    seed: u64,
    u_vectors: Mat,
    singular_values: Vec,
    v_vectors: Mat,
}

impl RandomizedSVD {
    pub fn new(max_rank: usize, iter: usize, seed: u64) -> Self {
        Self {
            max_rank,
            iter,
            seed,
            u_vectors: Mat::zeros(0, 0),
            singular_values: Vec::zeros(0),
            v_vectors: Mat::zeros(0, 0),
        }
    }

    pub fn matrix_u(&self) -> &Mat {
        &self.u_vectors
    }

    pub fn matrix_v(&self) -> &Mat {
        &self.v_vectors
    }

    pub fn singular_values(&self) -> &Vec {
        &self.singular_values
    }

    fn into_parts(self) -> (Mat, Vec, Mat) {
        (self.u_vectors, self.singular_values, self.v_vectors)
    }

    pub fn compute(&mut self, xx: &Mat) -> anyhow::Result<()> {
        let nr = xx.nrows();
        let nc = xx.ncols();

        let full_rank = nr.min(nc);
        if full_rank == 0 {
            anyhow::bail!("empty matrix [{} x {}]", nr, nc);
        }

        let rank = if self.max_rank > 0 {
            self.max_rank.min(full_rank)
        } else {
            full_rank
        };
        let kk = (rank + DEFAULT_OVERSAMPLE).min(full_rank);

        let qq = self.rand_subspace_iteration(xx, kk);

        let bb = qq.transpose() * xx;
        debug!("Final svd on [{} x {}]", bb.nrows(), bb.ncols());

        // singular values come out in descending order
        let svd = bb.svd(true, true);

        let (Some(svd_u), Some(svd_vt)) = (svd.u, svd.v_t) else {
            anyhow::bail!("SVD failed");
        };

        let rank = rank.min(svd.singular_values.len());
        self.u_vectors = qq * svd_u.columns(0, rank);
        self.v_vectors = svd_vt.rows(0, rank).transpose();
        self.singular_values = svd.singular_values.rows(0, rank).into_owned();
        Ok(())
    }

    // Find an orthonormal matrix Q whose range approximates the range of X
    fn rand_subspace_iteration(&self, xx: &Mat, kk: usize) -> Mat {
        let nc = xx.ncols();

        let omega = Mat::runif_seeded(nc, kk, self.seed);

        let mut qq = (xx * omega).qr().q();

        for i in 0..self.iter {
            debug!("subspace iteration {:>3}", i + 1);
            let ww = (xx.transpose() * &qq).qr().q();
            qq = (xx * ww).qr().q();
        }

        let kk = kk.min(qq.ncols());
        qq.columns(0, kk).into_owned()
    }
}
