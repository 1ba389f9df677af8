//! Rasterised scatter plots and heatmaps written as PNG

use crate::orion_common::*;
use image::{ImageBuffer, Rgb, RgbImage};
use matrix_util::utils::quantile_f32;

pub const DEFAULT_CANVAS_SIZE: u32 = 1000;
pub const DEFAULT_POINT_SIZE: f32 = 2.0;
const MARGIN_FRACTION: f32 = 0.05;
const HEATMAP_CELL_PX: u32 = 20;

pub const NA_COLOR: Rgb<u8> = Rgb([211, 211, 211]);
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const EDGE_COLOR: Rgb<u8> = Rgb([170, 170, 170]);

/// 20-colour categorical palette, cycled beyond 20 labels
const PALETTE: [[u8; 3]; 20] = [
    [0x1f, 0x77, 0xb4],
    [0xff, 0x7f, 0x0e],
    [0x27, 0x9e, 0x68],
    [0xd6, 0x27, 0x28],
    [0xaa, 0x40, 0xfc],
    [0x8c, 0x56, 0x4b],
    [0xe3, 0x77, 0xc2],
    [0xb5, 0xbd, 0x61],
    [0x17, 0xbe, 0xcf],
    [0xae, 0xc7, 0xe8],
    [0xff, 0xbb, 0x78],
    [0x98, 0xdf, 0x8a],
    [0xff, 0x98, 0x96],
    [0xc5, 0xb0, 0xd5],
    [0xc4, 0x9c, 0x94],
    [0xf7, 0xb6, 0xd2],
    [0xdb, 0xdb, 0x8d],
    [0x9e, 0xda, 0xe5],
    [0xad, 0x49, 0x4a],
    [0x8c, 0x6d, 0x31],
];

pub fn hex(c: &Rgb<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
}

/// Colour per cell for categorical labels; also returns the legend
/// in label order
pub fn categorical_colors(
    cell_labels: &[Option<Box<str>>],
    labels: &[Box<str>],
) -> (Vec<Rgb<u8>>, Vec<(Box<str>, Rgb<u8>)>) {
    let legend: Vec<(Box<str>, Rgb<u8>)> = labels
        .iter()
        .enumerate()
        .map(|(k, l)| (l.clone(), Rgb(PALETTE[k % PALETTE.len()])))
        .collect();

    let colors = cell_labels
        .iter()
        .map(|label| {
            label
                .as_deref()
                .and_then(|l| legend.iter().find(|(name, _)| name.as_ref() == l))
                .map(|&(_, c)| c)
                .unwrap_or(NA_COLOR)
        })
        .collect();

    (colors, legend)
}

/// Blue-white-red between the 1st and 99th percentiles; NaN gets `NA_COLOR`
pub fn diverging_colors(values: &[f32]) -> Vec<Rgb<u8>> {
    let finite: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let lo = quantile_f32(&finite, 0.01);
    let hi = quantile_f32(&finite, 0.99);

    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                return NA_COLOR;
            }
            let t = if hi > lo {
                ((v - lo) / (hi - lo)).clamp(0.0, 1.0)
            } else {
                0.5
            };
            blue_white_red(t)
        })
        .collect()
}

fn blue_white_red(t: f32) -> Rgb<u8> {
    if t < 0.5 {
        let s = (255.0 * t * 2.0).round() as u8;
        Rgb([s, s, 255])
    } else {
        let s = (255.0 * (1.0 - t) * 2.0).round() as u8;
        Rgb([255, s, s])
    }
}

fn white_red(t: f32) -> Rgb<u8> {
    let s = (255.0 * (1.0 - t.clamp(0.0, 1.0))).round() as u8;
    Rgb([255, s, s])
}

#[derive(Debug, Clone)]
pub struct ScatterArgs {
    /// pixels on the longest side
    pub size: u32,
    /// disk radius in pixels
    pub point_size: f32,
    /// image convention: larger y is further down
    pub y_down: bool,
}

impl Default for ScatterArgs {
    fn default() -> Self {
        Self {
            size: DEFAULT_CANVAS_SIZE,
            point_size: DEFAULT_POINT_SIZE,
            y_down: false,
        }
    }
}

/// Maps data coordinates onto a canvas with a margin
struct Canvas {
    image: RgbImage,
    x_min: f32,
    y_min: f32,
    scale: f32,
    margin: f32,
    y_down: bool,
}

impl Canvas {
    fn new(coords: &Mat, args: &ScatterArgs) -> Self {
        let finite = |v: &f32| v.is_finite();
        let xs = coords.column(0);
        let ys = coords.column(1);
        let x_min = xs.iter().copied().filter(finite).fold(f32::INFINITY, f32::min);
        let x_max = xs.iter().copied().filter(finite).fold(f32::NEG_INFINITY, f32::max);
        let y_min = ys.iter().copied().filter(finite).fold(f32::INFINITY, f32::min);
        let y_max = ys.iter().copied().filter(finite).fold(f32::NEG_INFINITY, f32::max);

        let (x_min, x_max) = if x_min <= x_max { (x_min, x_max) } else { (0.0, 0.0) };
        let (y_min, y_max) = if y_min <= y_max { (y_min, y_max) } else { (0.0, 0.0) };

        let size = args.size.max(16) as f32;
        let margin = (MARGIN_FRACTION * size).round();
        let extent = (x_max - x_min).max(y_max - y_min);
        let scale = if extent > 0.0 {
            (size - 2.0 * margin) / extent
        } else {
            1.0
        };

        let width = ((x_max - x_min) * scale + 2.0 * margin).ceil().max(1.0) as u32;
        let height = ((y_max - y_min) * scale + 2.0 * margin).ceil().max(1.0) as u32;

        let image: RgbImage = ImageBuffer::from_pixel(width, height, BACKGROUND);

        Self {
            image,
            x_min,
            y_min,
            scale,
            margin,
            y_down: args.y_down,
        }
    }

    fn to_pixel(&self, x: f32, y: f32) -> (f32, f32) {
        let px = self.margin + (x - self.x_min) * self.scale;
        let py = self.margin + (y - self.y_min) * self.scale;
        if self.y_down {
            (px, py)
        } else {
            (px, self.image.height() as f32 - 1.0 - py)
        }
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < self.image.width() && (y as u32) < self.image.height() {
            self.image.put_pixel(x as u32, y as u32, color);
        }
    }

    fn disk(&mut self, cx: f32, cy: f32, radius: f32, color: Rgb<u8>) {
        let r = radius.max(0.5);
        let r2 = r * r;
        let (x0, x1) = ((cx - r).floor() as i64, (cx + r).ceil() as i64);
        let (y0, y1) = ((cy - r).floor() as i64, (cy + r).ceil() as i64);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let (dx, dy) = (x as f32 - cx, y as f32 - cy);
                if dx * dx + dy * dy <= r2 {
                    self.put(x, y, color);
                }
            }
        }
    }

    /// Bresenham line
    fn line(&mut self, from: (f32, f32), to: (f32, f32), color: Rgb<u8>) {
        let (mut x0, mut y0) = (from.0.round() as i64, from.1.round() as i64);
        let (x1, y1) = (to.0.round() as i64, to.1.round() as i64);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.put(x0, y0, color);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }
}

/// Draw cells (rows of `coords`, first two columns) as disks, with
/// optional graph edges underneath; NA-coloured cells go first
pub fn scatter_png(
    coords: &Mat,
    colors: &[Rgb<u8>],
    edges: Option<&[(usize, usize)]>,
    args: &ScatterArgs,
    output: &str,
) -> anyhow::Result<()> {
    if coords.ncols() < 2 {
        anyhow::bail!("scatter needs 2 coordinate columns, got {}", coords.ncols());
    }
    if colors.len() != coords.nrows() {
        anyhow::bail!("{} colours for {} cells", colors.len(), coords.nrows());
    }

    let mut canvas = Canvas::new(coords, args);
    let pixel = |canvas: &Canvas, i: usize| canvas.to_pixel(coords[(i, 0)], coords[(i, 1)]);
    let drawable = |i: usize| coords[(i, 0)].is_finite() && coords[(i, 1)].is_finite();

    if let Some(edges) = edges {
        for &(i, j) in edges {
            if drawable(i) && drawable(j) {
                let (a, b) = (pixel(&canvas, i), pixel(&canvas, j));
                canvas.line(a, b, EDGE_COLOR);
            }
        }
    }

    let (na, labelled): (Vec<usize>, Vec<usize>) =
        (0..coords.nrows()).filter(|&i| drawable(i)).partition(|&i| colors[i] == NA_COLOR);

    for i in na.into_iter().chain(labelled) {
        let (px, py) = pixel(&canvas, i);
        canvas.disk(px, py, args.point_size, colors[i]);
    }

    mkdir(output)?;
    canvas.image.save(output)?;
    info!(
        "Wrote {} ({} x {})",
        output,
        canvas.image.width(),
        canvas.image.height()
    );
    Ok(())
}

/// Heatmap of a rows × columns table, each column min-max scaled to
/// white-red; NaN cells are grey
pub fn heatmap_png(mat: &Mat, output: &str) -> anyhow::Result<()> {
    let (nrow, ncol) = mat.shape();
    if nrow == 0 || ncol == 0 {
        anyhow::bail!("empty heatmap table");
    }

    let mut image: RgbImage = ImageBuffer::from_pixel(
        ncol as u32 * HEATMAP_CELL_PX,
        nrow as u32 * HEATMAP_CELL_PX,
        BACKGROUND,
    );

    for j in 0..ncol {
        let col = mat.column(j);
        let finite = col.iter().copied().filter(|v| v.is_finite());
        let lo = finite.clone().fold(f32::INFINITY, f32::min);
        let hi = finite.fold(f32::NEG_INFINITY, f32::max);

        for (i, &v) in col.iter().enumerate() {
            let color = if !v.is_finite() {
                NA_COLOR
            } else if hi > lo {
                white_red((v - lo) / (hi - lo))
            } else {
                white_red(0.5)
            };
            for y in 0..HEATMAP_CELL_PX {
                for x in 0..HEATMAP_CELL_PX {
                    image.put_pixel(
                        j as u32 * HEATMAP_CELL_PX + x,
                        i as u32 * HEATMAP_CELL_PX + y,
                        color,
                    );
                }
            }
        }
    }

    mkdir(output)?;
    image.save(output)?;
    info!("Wrote {} ({} x {} cells)", output, nrow, ncol);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colormap_endpoints() {
        let colors = diverging_colors(&[0.0, 50.0, 100.0, f32::NAN]);
        assert_eq!(colors[0], Rgb([0, 0, 255]));
        assert_eq!(colors[2], Rgb([255, 0, 0]));
        assert_eq!(colors[3], NA_COLOR);
        // middle is close to white
        assert!(colors[1].0.iter().all(|&c| c > 240));
    }

    #[test]
    fn categorical_palette_and_missing_labels() {
        let cell_labels: Vec<Option<Box<str>>> = vec![Some("b".into()), None, Some("a".into())];
        let labels: Vec<Box<str>> = vec!["a".into(), "b".into()];
        let (colors, legend) = categorical_colors(&cell_labels, &labels);
        assert_eq!(colors[1], NA_COLOR);
        assert_eq!(colors[2], Rgb(PALETTE[0]));
        assert_eq!(colors[0], Rgb(PALETTE[1]));
        assert_eq!(hex(&legend[0].1), "#1f77b4");
    }

    #[test]
    fn scatter_canvas_and_orientation() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("scatter.png");
        let out = out.to_str().unwrap();

        // wide layout: 200 × 100 in data units
        let coords = Mat::from_row_slice(3, 2, &[0., 0., 200., 100., 100., 50.]);
        let colors = vec![Rgb([255, 0, 0]), Rgb([0, 0, 255]), NA_COLOR];
        let args = ScatterArgs {
            size: 100,
            point_size: 1.0,
            y_down: true,
        };
        scatter_png(&coords, &colors, Some(&[(0, 1)]), &args, out).unwrap();

        let img = image::open(out).unwrap().to_rgb8();
        // longest side is `size`, 5 pixel margin
        assert_eq!(img.width(), 100);
        assert_eq!(img.height(), 55);
        assert_eq!(*img.get_pixel(5, 5), Rgb([255, 0, 0]));
        assert_eq!(*img.get_pixel(95, 50), Rgb([0, 0, 255]));

        // flipped: cell 0 is at the bottom left
        let args = ScatterArgs {
            y_down: false,
            ..args
        };
        scatter_png(&coords, &colors, None, &args, out).unwrap();
        let img = image::open(out).unwrap().to_rgb8();
        assert_eq!(*img.get_pixel(5, 49), Rgb([255, 0, 0]));
    }

    #[test]
    fn heatmap_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("heat.png");
        let out = out.to_str().unwrap();

        let mat = Mat::from_row_slice(2, 3, &[0., 1., f32::NAN, 1., 1., 2.]);
        heatmap_png(&mat, out).unwrap();
        let img = image::open(out).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (60, 40));
        assert_eq!(*img.get_pixel(0, 0), Rgb([255, 255, 255]));
        assert_eq!(*img.get_pixel(0, 20), Rgb([255, 0, 0]));
        assert_eq!(*img.get_pixel(40, 0), NA_COLOR);
    }
}
