/// Centre or scale columns
pub trait MatOps {
    type Mat;
    type Scalar;

    fn scale_columns_inplace(&mut self);
    fn scale_columns(&self) -> Self::Mat;
    fn centre_columns_inplace(&mut self);
    fn centre_columns(&self) -> Self::Mat;

    /// column-wise means
    fn column_means(&self) -> Vec<Self::Scalar>;

    /// column-wise variances with `n - 1` in the denominator
    fn column_variances(&self) -> Vec<Self::Scalar>;
}

/// Operations to sample random matrices
pub trait SampleOps {
    type Mat;
    type Scalar;

    /// Sample a matrix from `U(0,1)` with a fixed seed
    fn runif_seeded(dd: usize, nn: usize, seed: u64) -> Self::Mat;
}

/// A matrix with row and column names
pub struct MatWithNames<T> {
    pub rows: Vec<Box<str>>,
    pub cols: Vec<Box<str>>,
    pub mat: T,
}

/// Read and write named matrices as parquet files
pub trait IoOps {
    type Scalar;
    type Mat;

    /// Write a matrix with a leading `row` name column
    ///
    /// * `row_names` - if `None`, use `0..nrows`
    /// * `column_names` - if `None`, use `0..ncols`
    fn to_parquet(
        &self,
        row_names: Option<&[Box<str>]>,
        column_names: Option<&[Box<str>]>,
        file_path: &str,
    ) -> anyhow::Result<()>;

    /// Read back a named matrix written by `to_parquet`
    fn from_parquet(file_path: &str) -> anyhow::Result<MatWithNames<Self::Mat>>;
}
