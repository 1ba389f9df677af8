use parquet::basic::Type as ParquetType;
use parquet::basic::{Compression, ConvertedType, Repetition, ZstdLevel};
use parquet::data_type::{ByteArray, ByteArrayType, DoubleType};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::{SerializedFileWriter, SerializedRowGroupWriter};
use parquet::record::RowAccessor;
use parquet::schema::types::Type;
use std::fs::File;
use std::sync::Arc;

pub struct ParquetReader {
    pub row_major_data: Vec<f64>,
    pub row_names: Vec<Box<str>>,
    pub column_names: Vec<Box<str>>,
}

impl ParquetReader {
    /// Read a matrix with row and column names.
    ///
    /// * `row_name_index`: if `None`, the column `0` will be so.
    ///
    /// * `select_columns_names`: if `None`, use all the other numeric columns
    pub fn new(
        file_path: &str,
        row_name_index: Option<usize>,
        select_columns_names: Option<&[Box<str>]>,
    ) -> anyhow::Result<Self> {
        let row_name_index = row_name_index.unwrap_or(0);

        let file = File::open(file_path)
            .map_err(|e| anyhow::anyhow!("failed to open {}: {}", file_path, e))?;
        let reader = SerializedFileReader::new(file)?;
        let metadata = reader.metadata();
        let nrows = metadata.file_metadata().num_rows() as usize;
        let fields = metadata.file_metadata().schema().get_fields();

        let select_indices = fields
            .iter()
            .enumerate()
            .filter(|(j, f)| {
                *j != row_name_index
                    && select_columns_names
                        .map(|names| names.iter().any(|x| x.as_ref() == f.name()))
                        .unwrap_or(true)
            })
            .filter_map(|(j, f)| match f.get_physical_type() {
                tt @ (ParquetType::FLOAT
                | ParquetType::DOUBLE
                | ParquetType::INT32
                | ParquetType::INT64) => Some((tt, j)),
                _ => None,
            })
            .collect::<Vec<_>>();

        if select_indices.is_empty() {
            return Err(anyhow::anyhow!("no available columns in {}", file_path));
        }

        let ncols = select_indices.len();

        let column_names: Vec<Box<str>> = select_indices
            .iter()
            .map(|&(_, j)| fields[j].name().into())
            .collect();

        let row_iter = reader.get_row_iter(None)?;
        let mut row_names: Vec<Box<str>> = Vec::with_capacity(nrows);
        let mut row_major_data: Vec<f64> = Vec::with_capacity(nrows * ncols);

        for record in row_iter {
            let row = record?;
            row_names.push(row.get_string(row_name_index)?.as_str().into());

            for &(tt, j) in select_indices.iter() {
                let x = match tt {
                    ParquetType::FLOAT => row.get_float(j)? as f64,
                    ParquetType::DOUBLE => row.get_double(j)?,
                    ParquetType::INT32 => row.get_int(j)? as f64,
                    _ => row.get_long(j)? as f64,
                };
                row_major_data.push(x);
            }
        }

        Ok(Self {
            row_major_data,
            row_names,
            column_names,
        })
    }
}

pub struct ParquetWriter {
    file: std::fs::File,
    schema: Arc<Type>,
    writer_properties: Arc<WriterProperties>,
    pub row_names: Vec<ByteArray>,
}

impl ParquetWriter {
    /// Create a new parquet writer for a matrix with row and column
    /// names.
    ///
    /// * `file_path`: output file path
    ///
    /// * `shape`: number of rows and columns
    ///
    /// * `names`: for row and column names, respectively; if `None`, just add `[0, n)` numbers.
    ///
    pub fn new(
        file_path: &str,
        shape: (usize, usize),
        names: (Option<&[Box<str>]>, Option<&[Box<str>]>),
    ) -> anyhow::Result<Self> {
        let (nrows, ncols) = shape;
        let (row_names, column_names) = names;

        let schema = build_columns_schema(ncols, column_names)?;

        let file = std::fs::File::create(file_path)?;

        let zstd_level = ZstdLevel::try_new(5)?;
        let writer_properties = Arc::new(
            WriterProperties::builder()
                .set_compression(Compression::ZSTD(zstd_level))
                .build(),
        );

        let row_names: Vec<ByteArray> = match row_names {
            Some(row_names) => {
                if row_names.len() != nrows {
                    return Err(anyhow::anyhow!(
                        "Row names length ({}) does not match number of rows ({})",
                        row_names.len(),
                        nrows
                    ));
                }
                row_names
                    .iter()
                    .map(|r| ByteArray::from(r.as_ref()))
                    .collect()
            }
            None => (0..nrows)
                .map(|i| ByteArray::from(i.to_string().as_str()))
                .collect(),
        };

        Ok(Self {
            file,
            schema,
            writer_properties,
            row_names,
        })
    }

    pub fn open(&self) -> anyhow::Result<SerializedFileWriter<File>> {
        Ok(SerializedFileWriter::new(
            self.file.try_clone()?,
            self.schema.clone(),
            self.writer_properties.clone(),
        )?)
    }
}

/// Write the next column of a row group as UTF-8 strings
pub fn parquet_add_bytearray(
    row_group_writer: &mut SerializedRowGroupWriter<'_, File>,
    values: &[ByteArray],
) -> anyhow::Result<()> {
    let mut column_writer = row_group_writer
        .next_column()?
        .ok_or_else(|| anyhow::anyhow!("no more columns in the schema"))?;
    column_writer
        .typed::<ByteArrayType>()
        .write_batch(values, None, None)?;
    column_writer.close()?;
    Ok(())
}

/// Write the next column of a row group as doubles
pub fn parquet_add_numeric_column(
    row_group_writer: &mut SerializedRowGroupWriter<'_, File>,
    values: &[f64],
) -> anyhow::Result<()> {
    let mut column_writer = row_group_writer
        .next_column()?
        .ok_or_else(|| anyhow::anyhow!("no more columns in the schema"))?;
    column_writer
        .typed::<DoubleType>()
        .write_batch(values, None, None)?;
    column_writer.close()?;
    Ok(())
}

fn build_columns_schema(
    ncols: usize,
    column_names: Option<&[Box<str>]>,
) -> anyhow::Result<Arc<Type>> {
    if let Some(column_names) = column_names {
        if column_names.len() != ncols {
            return Err(anyhow::anyhow!(
                "Column names length ({}) does not match number of columns ({})",
                column_names.len(),
                ncols
            ));
        }
    }

    let mut fields = vec![Arc::new(
        Type::primitive_type_builder("row", ParquetType::BYTE_ARRAY)
            .with_repetition(Repetition::REQUIRED)
            .with_converted_type(ConvertedType::UTF8)
            .build()?,
    )];

    let _column_names: Vec<Box<str>> = (0..ncols).map(|x| x.to_string().into()).collect();

    let column_names: &[Box<str>] = column_names.unwrap_or(&_column_names);

    for column_name in column_names {
        fields.push(Arc::new(
            Type::primitive_type_builder(column_name, ParquetType::DOUBLE)
                .with_repetition(Repetition::REQUIRED)
                .build()?,
        ));
    }

    let schema = Arc::new(
        Type::group_type_builder("2dMatrix")
            .with_fields(fields)
            .build()?,
    );

    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common_io::create_temp_dir_file;

    fn write_table(file: &str, rows: Option<&[Box<str>]>, cols: Option<&[Box<str>]>) {
        let writer = ParquetWriter::new(file, (2, 2), (rows, cols)).unwrap();
        let row_names = writer.row_names.clone();
        let mut file_writer = writer.open().unwrap();
        let mut row_group = file_writer.next_row_group().unwrap();
        parquet_add_bytearray(&mut row_group, &row_names).unwrap();
        parquet_add_numeric_column(&mut row_group, &[1.0, 2.0]).unwrap();
        parquet_add_numeric_column(&mut row_group, &[3.0, 4.0]).unwrap();
        row_group.close().unwrap();
        file_writer.close().unwrap();
    }

    #[test]
    fn columns_come_back_row_major() {
        let file = create_temp_dir_file(".parquet").unwrap();
        let file = file.to_str().unwrap();
        let rows: Vec<Box<str>> = vec!["c1".into(), "c2".into()];
        let cols: Vec<Box<str>> = vec!["CD3D".into(), "CD20".into()];
        write_table(file, Some(rows.as_slice()), Some(cols.as_slice()));

        let back = ParquetReader::new(file, None, None).unwrap();
        assert_eq!(back.row_names, rows);
        assert_eq!(back.column_names, cols);
        assert_eq!(back.row_major_data, vec![1.0, 3.0, 2.0, 4.0]);

        let only: Vec<Box<str>> = vec!["CD20".into()];
        let back = ParquetReader::new(file, None, Some(only.as_slice())).unwrap();
        assert_eq!(back.row_major_data, vec![3.0, 4.0]);

        let missing: Vec<Box<str>> = vec!["CD99".into()];
        assert!(ParquetReader::new(file, None, Some(missing.as_slice())).is_err());
    }

    #[test]
    fn default_names_and_length_checks() {
        let file = create_temp_dir_file(".parquet").unwrap();
        let file = file.to_str().unwrap();
        write_table(file, None, None);

        let back = ParquetReader::new(file, None, None).unwrap();
        let numbered: Vec<Box<str>> = vec!["0".into(), "1".into()];
        assert_eq!(back.row_names, numbered);
        assert_eq!(back.column_names, numbered);

        let one: Vec<Box<str>> = vec!["a".into()];
        assert!(ParquetWriter::new(file, (2, 2), (Some(one.as_slice()), None)).is_err());
        assert!(ParquetWriter::new(file, (2, 2), (None, Some(one.as_slice()))).is_err());
    }
}
