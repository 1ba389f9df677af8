use matrix_util::common_io::{create_temp_dir_file, read_lines_of_words_delim};
use matrix_util::mtx_io::{read_mtx_triplets, write_mtx_triplets};
use matrix_util::traits::{IoOps, SampleOps};
use nalgebra::DMatrix;

#[test]
fn dmatrix_parquet_keeps_names() -> anyhow::Result<()> {
    let xx = DMatrix::<f32>::runif_seeded(7, 3, 11);
    let rows: Vec<Box<str>> = (0..7).map(|i| format!("cell_{}", i).into()).collect();
    let cols: Vec<Box<str>> = vec!["PC1".into(), "PC2".into(), "PC3".into()];

    let file = create_temp_dir_file(".parquet")?;
    let file = file.to_str().unwrap();
    xx.to_parquet(Some(&rows), Some(&cols), file)?;

    let back = DMatrix::<f32>::from_parquet(file)?;
    assert_eq!(back.rows, rows);
    assert_eq!(back.cols, cols);
    approx::assert_abs_diff_eq!(back.mat, xx, epsilon = 1e-6);

    let wrong_rows: Vec<Box<str>> = vec!["a".into()];
    assert!(xx.to_parquet(Some(&wrong_rows), None, file).is_err());
    Ok(())
}

#[test]
fn mtx_triplets_round_trip_zero_based() -> anyhow::Result<()> {
    let triplets = vec![(0u64, 1u64, 0.5f32), (1, 0, 0.5), (2, 2, 1.0)];
    let file = create_temp_dir_file(".mtx.gz")?;
    let file = file.to_str().unwrap();
    write_mtx_triplets(&triplets, 3, 3, file)?;

    let (back, shape) = read_mtx_triplets(file)?;
    assert_eq!(shape, (3, 3, 3));
    assert_eq!(back, vec![(1, 0, 0.5), (0, 1, 0.5), (2, 2, 1.0)]);
    Ok(())
}

#[test]
fn delimited_header_and_comments() -> anyhow::Result<()> {
    let file = create_temp_dir_file(".csv")?;
    let file = file.to_str().unwrap();
    std::fs::write(file, "# comment\nCellID,CD3D,X_centroid\n1,2.5,10\n2,3.5,20\n")?;

    let out = read_lines_of_words_delim(file, ",", 0)?;
    assert_eq!(out.header.len(), 3);
    assert_eq!(out.lines.len(), 2);
    assert_eq!(out.lines[1][2].as_ref(), "20");
    assert_eq!(out.line_numbers, vec![3, 4]);
    Ok(())
}
