use crate::parquet::*;
use crate::traits::*;
pub use nalgebra::{DMatrix, DVector};

impl IoOps for DMatrix<f32> {
    type Scalar = f32;
    type Mat = Self;

    fn to_parquet(
        &self,
        row_names: Option<&[Box<str>]>,
        column_names: Option<&[Box<str>]>,
        file_path: &str,
    ) -> anyhow::Result<()> {
        let (nrows, ncols) = (self.nrows(), self.ncols());

        let writer = ParquetWriter::new(file_path, (nrows, ncols), (row_names, column_names))?;
        let row_names = writer.row_names.clone();

        let mut writer = writer.open()?;
        let mut row_group_writer = writer.next_row_group()?;
        parquet_add_bytearray(&mut row_group_writer, &row_names)?;

        for j in 0..ncols {
            let column: Vec<f64> = self.column(j).iter().map(|&x| x as f64).collect();
            parquet_add_numeric_column(&mut row_group_writer, &column)?;
        }

        row_group_writer.close()?;
        writer.close()?;
        Ok(())
    }

    fn from_parquet(file_path: &str) -> anyhow::Result<MatWithNames<Self::Mat>> {
        let parquet = ParquetReader::new(file_path, None, None)?;

        let nrows = parquet.row_names.len();
        let ncols = parquet.column_names.len();
        let data = parquet.row_major_data.into_iter().map(|x| x as f32);

        Ok(MatWithNames {
            rows: parquet.row_names,
            cols: parquet.column_names,
            mat: DMatrix::<f32>::from_row_iterator(nrows, ncols, data),
        })
    }
}
