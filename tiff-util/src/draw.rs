//! Cell outlines on a gray canvas

use crate::ifd::*;
use crate::raster::Raster;
use crate::writer::write_gray8;
use log::info;

pub const DEFAULT_CIRCLE_RADIUS: f32 = 5.0;
pub const CIRCLE_ANGLE_STEPS: usize = 361;

/// Pixel positions of a circle outline sampled at every degree
/// from 0 to 360 inclusive
pub fn circle_points(cx: f32, cy: f32, radius: f32) -> Vec<(i64, i64)> {
    (0..CIRCLE_ANGLE_STEPS)
        .map(|deg| {
            let theta = (deg as f32).to_radians();
            let x = cx + radius * theta.cos();
            let y = cy + radius * theta.sin();
            (x.round() as i64, y.round() as i64)
        })
        .collect()
}

/// Draw circle outlines of `radius` around every centre.
/// Returns the number of outline points that fell outside the canvas.
pub fn draw_circles(canvas: &mut Raster<u8>, centres: &[(f32, f32)], radius: f32, value: u8) -> usize {
    let mut skipped = 0;
    for &(cx, cy) in centres {
        for (x, y) in circle_points(cx, cy, radius) {
            if canvas.contains(x, y) {
                canvas.put(x, y, value);
            } else {
                skipped += 1;
            }
        }
    }
    skipped
}

/// Draw cells on a canvas shaped like directory 0 of `reference`
pub fn draw_cells(
    reference: &str,
    centres: &[(f32, f32)],
    radius: f32,
    output: &str,
) -> anyhow::Result<()> {
    let mut decoder = open_decoder(reference)?;
    let summary = DirectorySummary::from_decoder(&mut decoder, 0)?;

    info!(
        "drawing {} cells on a {} x {} canvas",
        add_commas(centres.len() as u64),
        summary.width,
        summary.height
    );

    let mut canvas = Raster::<u8>::new(summary.width, summary.height, 1);
    let skipped = draw_circles(&mut canvas, centres, radius, 255);
    if skipped > 0 {
        info!("{} outline points outside the canvas", add_commas(skipped as u64));
    }

    write_gray8(&canvas, output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circle_closes_on_itself() {
        let pts = circle_points(10.0, 10.0, 5.0);
        assert_eq!(pts.len(), 361);
        assert_eq!(pts[0], (15, 10));
        assert_eq!(pts[360], pts[0]);
        assert_eq!(pts[90], (10, 15));
    }

    #[test]
    fn points_off_canvas_are_skipped() {
        let mut canvas = Raster::<u8>::new(8, 8, 1);
        let skipped = draw_circles(&mut canvas, &[(0.0, 0.0)], 3.0, 255);
        assert!(skipped > 0);
        assert_eq!(canvas.get(3, 0, 0), Some(255));
        assert_eq!(canvas.get(0, 3, 0), Some(255));
        assert_eq!(canvas.get(0, 0, 0), Some(0));
    }
}
