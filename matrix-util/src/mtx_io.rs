use crate::common_io::*;
use std::io::Write;

/// Write the triplets into a MatrixMarket file with 1-based indices
/// * `triplets` - the triplets to write
/// * `nrow` - number of rows
/// * `ncol` - number of columns
/// * `mtx_file` - the output file (e.g., "matrix.mtx.gz")
pub fn write_mtx_triplets(
    triplets: &[(u64, u64, f32)],
    nrow: usize,
    ncol: usize,
    mtx_file: &str,
) -> anyhow::Result<()> {
    mkdir(mtx_file)?;

    let mut buf = open_buf_writer(mtx_file)?;

    let nnz = triplets.len();
    writeln!(buf, "%%MatrixMarket matrix coordinate real general")?;
    writeln!(buf, "{}\t{}\t{}", nrow, ncol, nnz)?;

    for (row, col, val) in triplets {
        writeln!(buf, "{}\t{}\t{}", row + 1, col + 1, val)?;
    }

    buf.flush()?;
    Ok(())
}

/// Read a matrix market file and return triplets (row, col, val)
/// with 0-based indices, sorted by column then row, and the
/// `(nrow, ncol, nnz)` header
/// * `mtx_file` - Path to the matrix market file
pub fn read_mtx_triplets(
    mtx_file: &str,
) -> anyhow::Result<(Vec<(u64, u64, f32)>, (usize, usize, usize))> {
    let mtx_hdr_position = 0;
    let ReadLinesOut {
        lines,
        header,
        line_numbers,
    } = read_lines_of_words(mtx_file, mtx_hdr_position)?;

    let (nrow, ncol, nnz) = match header.as_slice() {
        [nrow, ncol, nnz] => (
            nrow.parse::<usize>()?,
            ncol.parse::<usize>()?,
            nnz.parse::<usize>()?,
        ),
        _ => return Err(anyhow::anyhow!("Failed to parse mtx header in {}", mtx_file)),
    };

    let mut mtx_triplets = Vec::with_capacity(lines.len());
    for (words, line) in lines.iter().zip(line_numbers) {
        let [row, col, val] = words.as_slice() else {
            anyhow::bail!("{}: line {} is not a triplet", mtx_file, line);
        };
        let row = row.parse::<u64>()?;
        let col = col.parse::<u64>()?;
        if row == 0 || col == 0 || row > nrow as u64 || col > ncol as u64 {
            anyhow::bail!("{}: index ({}, {}) out of range", mtx_file, row, col);
        }
        mtx_triplets.push((row - 1, col - 1, val.parse::<f32>()?));
    }

    if mtx_triplets.len() != nnz {
        anyhow::bail!(
            "{}: header says {} entries, found {}",
            mtx_file,
            nnz,
            mtx_triplets.len()
        );
    }

    mtx_triplets.sort_by_key(|&(row, col, _)| (col, row));
    Ok((mtx_triplets, (nrow, ncol, nnz)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_mtx(content: &str) -> String {
        let file = create_temp_dir_file(".mtx").unwrap();
        let file = file.to_str().unwrap().to_string();
        std::fs::write(&file, content).unwrap();
        file
    }

    #[test]
    fn indices_are_one_based_on_disk() {
        let file = create_temp_dir_file(".mtx").unwrap();
        let file = file.to_str().unwrap();
        write_mtx_triplets(&[(0, 2, 1.5), (1, 0, 2.0)], 2, 3, file).unwrap();

        let lines = read_lines(file).unwrap();
        assert_eq!(lines[1].as_ref(), "2\t3\t2");
        assert_eq!(lines[2].as_ref(), "1\t3\t1.5");

        let (triplets, shape) = read_mtx_triplets(file).unwrap();
        assert_eq!(shape, (2, 3, 2));
        // sorted by column, then row
        assert_eq!(triplets, vec![(1, 0, 2.0), (0, 2, 1.5)]);
    }

    #[test]
    fn malformed_entries_are_errors() {
        let out_of_range = temp_mtx("%%MatrixMarket matrix coordinate real general\n2\t2\t1\n3\t1\t1\n");
        assert!(read_mtx_triplets(&out_of_range).is_err());

        let zero_index = temp_mtx("%%MatrixMarket matrix coordinate real general\n2\t2\t1\n0\t1\t1\n");
        assert!(read_mtx_triplets(&zero_index).is_err());

        let short = temp_mtx("%%MatrixMarket matrix coordinate real general\n2\t2\t2\n1\t1\t1\n");
        assert!(read_mtx_triplets(&short).is_err());

        let broken = temp_mtx(
            "%%MatrixMarket matrix coordinate real general\n% note\n2\t2\t2\n1\t1\t1\n2\t2\n",
        );
        let err = read_mtx_triplets(&broken).unwrap_err();
        assert!(err.to_string().contains("line 5"), "{}", err);
    }
}
