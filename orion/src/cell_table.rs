//! Load a single-cell quantification table (CSV or CSV.gz) into `AnnData`

use crate::anndata::{AnnData, ObsColumn, SPATIAL_KEY};
use crate::orion_common::*;
use fnv::FnvHashMap as HashMap;
use matrix_util::common_io::{file_stem, read_lines_of_words_delim};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const CELL_ID_COLUMN: &str = "CellID";
pub const IMAGE_ID_COLUMN: &str = "image_id";
pub const RAW_LAYER: &str = "raw";

/// Which columns hold coordinates and markers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    #[serde(rename = "X", default = "default_x")]
    pub x: Box<str>,
    #[serde(rename = "Y", default = "default_y")]
    pub y: Box<str>,
    #[serde(rename = "MARKERS", default)]
    pub markers: Option<Vec<Box<str>>>,
}

fn default_x() -> Box<str> {
    "X_centroid".into()
}

fn default_y() -> Box<str> {
    "Y_centroid".into()
}

impl Default for ColumnSpec {
    fn default() -> Self {
        Self {
            x: default_x(),
            y: default_y(),
            markers: None,
        }
    }
}

impl ColumnSpec {
    pub fn from_json_file(file: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(file)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", file, e))?;
        serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("{}: {}", file, e))
    }
}

#[derive(Debug, Clone)]
pub struct CellTableOptions {
    pub columns: ColumnSpec,
    pub drop_markers: Vec<Box<str>>,
    /// drop markers whose names start with "DNA"
    pub remove_dna: bool,
    /// log1p-transform X; the raw values stay in the `raw` layer
    pub log1p: bool,
    /// prefix of cell names; defaults to the file stem
    pub image_id: Option<Box<str>>,
    /// a text column kept as a categorical annotation
    pub phenotype: Option<Box<str>>,
}

impl Default for CellTableOptions {
    fn default() -> Self {
        Self {
            columns: ColumnSpec::default(),
            drop_markers: vec![],
            remove_dna: false,
            log1p: true,
            image_id: None,
            phenotype: None,
        }
    }
}

fn is_dna_marker(name: &str) -> bool {
    name.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("dna"))
}

/// Decide which header columns are markers
fn select_markers(
    header: &[Box<str>],
    header_index: &HashMap<Box<str>, usize>,
    opts: &CellTableOptions,
) -> anyhow::Result<Vec<usize>> {
    let x_index = header_index[&opts.columns.x];

    let candidates: Vec<usize> = match opts.columns.markers.as_ref() {
        Some(markers) => markers
            .iter()
            .map(|m| {
                header_index
                    .get(m)
                    .copied()
                    .ok_or_else(|| anyhow::anyhow!("marker column '{}' not in the table", m))
            })
            .collect::<anyhow::Result<_>>()?,
        None => marker_block(header_index, x_index).collect(),
    };

    let markers: Vec<usize> = candidates
        .into_iter()
        .filter(|&j| !opts.drop_markers.contains(&header[j]))
        .filter(|&j| !(opts.remove_dna && is_dna_marker(&header[j])))
        .collect();

    if markers.is_empty() {
        anyhow::bail!("no marker columns left to analyze");
    }
    Ok(markers)
}

fn parse_field(field: &str, line: usize, column: &str) -> anyhow::Result<f32> {
    field.trim().parse::<f32>().map_err(|_| {
        anyhow::anyhow!(
            "line {}: column '{}' has a non-numeric value '{}'",
            line,
            column,
            field
        )
    })
}

/// Read a quantification table with one row per cell
pub fn read_cell_table(file: &str, opts: &CellTableOptions) -> anyhow::Result<AnnData> {
    let data = read_lines_of_words_delim(file, ",", 0)?;

    let header: Vec<Box<str>> = data.header.iter().map(|h| h.trim().into()).collect();
    let header_index: HashMap<Box<str>, usize> = header
        .iter()
        .enumerate()
        .map(|(j, h)| (h.clone(), j))
        .collect();

    for col in [&opts.columns.x, &opts.columns.y] {
        if !header_index.contains_key(col) {
            anyhow::bail!("{}: column '{}' not found in the header", file, col);
        }
    }

    let rows = data.lines;
    let line_numbers = data.line_numbers;
    let ncells = rows.len();
    if ncells == 0 {
        anyhow::bail!("{}: no cells", file);
    }

    if let Some((i, row)) = rows
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != header.len())
    {
        anyhow::bail!(
            "{} line {}: {} fields, header has {}",
            file,
            line_numbers[i],
            row.len(),
            header.len()
        );
    }

    let markers = select_markers(&header, &header_index, opts)?;
    let cell_id = header_index.get(CELL_ID_COLUMN).copied();
    let phenotype = match opts.phenotype.as_ref() {
        Some(p) => Some(
            header_index
                .get(p)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("{}: column '{}' not found", file, p))?,
        ),
        None => None,
    };

    let x_index = header_index[&opts.columns.x];
    let y_index = header_index[&opts.columns.y];
    let block = marker_block(&header_index, x_index);
    let obs_columns: Vec<usize> = (0..header.len())
        .filter(|&j| {
            j == x_index
                || j == y_index
                || (Some(j) != cell_id
                    && Some(j) != phenotype
                    && !block.contains(&j)
                    && !markers.contains(&j))
        })
        .collect();

    info!(
        "{}: {} cells, {} markers, {} other numeric columns",
        file,
        ncells,
        markers.len(),
        obs_columns.len()
    );

    ////////////////////////////////
    // markers and numeric fields //
    ////////////////////////////////

    let parsed: Vec<(Vec<f32>, Vec<f32>)> = rows
        .par_iter()
        .enumerate()
        .map(|(i, row)| -> anyhow::Result<(Vec<f32>, Vec<f32>)> {
            let line = line_numbers[i];
            let x = markers
                .iter()
                .map(|&j| parse_field(&row[j], line, &header[j]))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let o = obs_columns
                .iter()
                .map(|&j| parse_field(&row[j], line, &header[j]))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok((x, o))
        })
        .collect::<anyhow::Result<_>>()?;

    let raw = Mat::from_fn(ncells, markers.len(), |i, j| parsed[i].0[j]);

    let image_id: Box<str> = match opts.image_id.as_ref() {
        Some(id) => id.clone(),
        None => file_stem(file)?,
    };

    let obs_names: Vec<Box<str>> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let id = match cell_id {
                Some(j) => row[j].trim().to_string(),
                None => (i + 1).to_string(),
            };
            format!("{}_{}", image_id, id).into_boxed_str()
        })
        .collect();

    let var_names: Vec<Box<str>> = markers.iter().map(|&j| header[j].clone()).collect();

    let x = if opts.log1p {
        raw.map(|v| v.ln_1p())
    } else {
        raw.clone()
    };

    let mut adata = AnnData::new(x, obs_names, var_names)?;
    adata.insert_layer(RAW_LAYER, raw)?;

    for (k, &j) in obs_columns.iter().enumerate() {
        let values = parsed.iter().map(|(_, o)| o[k]).collect();
        adata.insert_obs(&header[j], ObsColumn::Numeric(values))?;
    }

    if let Some(j) = phenotype {
        let labels = rows
            .iter()
            .map(|row| {
                let v = row[j].trim();
                if v.is_empty() || v.eq_ignore_ascii_case("nan") {
                    None
                } else {
                    Some(v.into())
                }
            })
            .collect();
        adata.insert_obs(&header[j], ObsColumn::Categorical(labels))?;
    }

    adata.insert_obs(IMAGE_ID_COLUMN, ObsColumn::Categorical(vec![Some(image_id.clone()); ncells]))?;

    let xs = adata.obs_numeric(&opts.columns.x)?;
    let ys = adata.obs_numeric(&opts.columns.y)?;
    let spatial = Mat::from_fn(ncells, 2, |i, k| if k == 0 { xs[i] } else { ys[i] });
    adata.insert_obsm(SPATIAL_KEY, spatial)?;

    adata.insert_uns(
        &["table"],
        serde_json::json!({
            "file": file,
            "image_id": image_id,
            "log1p": opts.log1p,
            "x": opts.columns.x,
            "y": opts.columns.y,
        }),
    )?;

    Ok(adata)
}

/// columns strictly between `CellID` and the X column
fn marker_block(header_index: &HashMap<Box<str>, usize>, x_index: usize) -> std::ops::Range<usize> {
    let start = header_index
        .get(CELL_ID_COLUMN)
        .map(|&i| i + 1)
        .unwrap_or(0);
    start..x_index
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_util::common_io::create_temp_dir_file;

    const TABLE: &str = "CellID,DNA_1,CD3D,CD20,X_centroid,Y_centroid,Area\n\
                         1,100,10,0,5.5,6.5,30\n\
                         2,200,0,20,15.0,16.0,40\n\
                         3,300,3,3,25.0,26.0,50\n";

    const TABLE_WITH_PHENOTYPE: &str =
        "CellID,DNA_1,CD3D,CD20,X_centroid,Y_centroid,Area,phenotype\n\
         1,100,10,0,5.5,6.5,30,T\n\
         2,200,0,20,15.0,16.0,40,B\n\
         3,300,3,3,25.0,26.0,50,\n";

    fn write_table(content: &str, name: &str) -> String {
        let dir = create_temp_dir_file(".d").unwrap();
        let file = dir.parent().unwrap().join(name);
        std::fs::write(&file, content).unwrap();
        file.to_str().unwrap().to_string()
    }

    #[test]
    fn default_columns_and_names() {
        let file = write_table(TABLE, "slide7.csv");
        let adata = read_cell_table(&file, &CellTableOptions::default()).unwrap();

        assert_eq!(adata.n_obs(), 3);
        let expected: Vec<Box<str>> = vec!["DNA_1".into(), "CD3D".into(), "CD20".into()];
        assert_eq!(adata.var_names, expected);
        assert_eq!(adata.obs_names[1].as_ref(), "slide7_2");
        approx::assert_abs_diff_eq!(adata.x[(0, 1)], 11f32.ln(), epsilon = 1e-6);
        assert_eq!(adata.layer(RAW_LAYER).unwrap()[(0, 1)], 10.0);
        assert_eq!(adata.obsm("spatial").unwrap()[(2, 1)], 26.0);
        assert_eq!(adata.obs_numeric("Area").unwrap(), &[30.0, 40.0, 50.0]);
    }

    #[test]
    fn drop_dna_and_keep_phenotype() {
        let file = write_table(TABLE_WITH_PHENOTYPE, "t.csv");
        let opts = CellTableOptions {
            remove_dna: true,
            drop_markers: vec!["CD20".into()],
            log1p: false,
            phenotype: Some("phenotype".into()),
            ..Default::default()
        };
        let adata = read_cell_table(&file, &opts).unwrap();
        assert_eq!(adata.var_names[0].as_ref(), "CD3D");
        assert_eq!(adata.n_vars(), 1);
        assert_eq!(adata.n_obs(), 3);
        assert_eq!(adata.x[(0, 0)], 10.0);
        assert!(adata.obs("DNA_1").is_none());
        assert!(adata.obs("CD20").is_none());
        assert_eq!(
            adata.obs_categorical("phenotype").unwrap(),
            &[Some("T".into()), Some("B".into()), None]
        );
    }

    #[test]
    fn explicit_marker_list() {
        let file = write_table(TABLE_WITH_PHENOTYPE, "t.csv");
        let opts = CellTableOptions {
            columns: serde_json::from_str(r#"{"X": "Y_centroid", "Y": "X_centroid", "MARKERS": ["CD20"]}"#).unwrap(),
            phenotype: Some("phenotype".into()),
            ..Default::default()
        };
        let adata = read_cell_table(&file, &opts).unwrap();
        assert_eq!(adata.n_vars(), 1);
        assert_eq!(adata.obsm("spatial").unwrap()[(0, 0)], 6.5);

        let opts = CellTableOptions {
            columns: ColumnSpec {
                markers: Some(vec!["CD99".into()]),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(read_cell_table(&file, &opts).is_err());
    }

    #[test]
    fn malformed_tables() {
        let file = write_table("CellID,CD3D,X_centroid\n1,2,3\n", "t.csv");
        let err = read_cell_table(&file, &CellTableOptions::default()).unwrap_err();
        assert!(err.to_string().contains("Y_centroid"));

        let file = write_table("CellID,CD3D,X_centroid,Y_centroid\n1,2,3,4\n2,3,4\n", "t.csv");
        let err = read_cell_table(&file, &CellTableOptions::default()).unwrap_err();
        assert!(err.to_string().contains("line 3"));

        let file = write_table("CellID,CD3D,X_centroid,Y_centroid\n1,abc,3,4\n", "t.csv");
        assert!(read_cell_table(&file, &CellTableOptions::default()).is_err());
    }

    #[test]
    fn error_lines_count_comment_lines() {
        let file = write_table(
            "# exported by mcmicro\n# v2\nCellID,CD3D,X_centroid,Y_centroid\n1,2,3,4\n# gap\n2,3,4\n",
            "t.csv",
        );
        let err = read_cell_table(&file, &CellTableOptions::default()).unwrap_err();
        assert!(err.to_string().contains("line 6"), "{}", err);

        let file = write_table(
            "# header comment\nCellID,CD3D,X_centroid,Y_centroid\n1,2,3,4\n2,x,4,5\n",
            "t.csv",
        );
        let err = read_cell_table(&file, &CellTableOptions::default()).unwrap_err();
        assert!(err.to_string().contains("line 4"), "{}", err);
    }
}
