pub use clap::{Args, Parser, Subcommand, ValueEnum};
pub use log::{info, warn};

pub use matrix_util::common_io::{mkdir, write_lines};
pub use matrix_util::traits::{IoOps, MatOps, MatWithNames};

pub type Mat = nalgebra::DMatrix<f32>;
pub type CscMat = nalgebra_sparse::CscMatrix<f32>;

pub const DEFAULT_SEED: u64 = 42;

/// Write run parameters as pretty JSON
pub fn write_parameters(param_file: &str, params: &serde_json::Value) -> anyhow::Result<()> {
    mkdir(param_file)?;
    std::fs::write(param_file, serde_json::to_string_pretty(params)?)?;
    info!("Wrote parameters: {}", param_file);
    Ok(())
}

/// Cap the global rayon pool at `max_threads`
pub fn set_num_threads(max_threads: Option<usize>) -> anyhow::Result<()> {
    if let Some(n) = max_threads {
        let num_threads = num_cpus::get().min(n.max(1));
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()?;
        info!("using {} threads", num_threads);
    }
    Ok(())
}

/// Select rows of a dense matrix
pub fn select_rows(mat: &Mat, rows: &[usize]) -> Mat {
    Mat::from_fn(rows.len(), mat.ncols(), |i, j| mat[(rows[i], j)])
}
