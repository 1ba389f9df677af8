//! Tissue mask from tile intensity statistics

use crate::ifd::*;
use crate::raster::{read_gray16, Raster};
use crate::writer::write_gray8;
use indicatif::ParallelProgressIterator;
use log::info;
use rayon::prelude::*;

pub const DEFAULT_MEAN_THRESHOLD: u64 = 300;
pub const DEFAULT_DIFF_THRESHOLD: u64 = 300;
pub const DEFAULT_TILE_SIZE: u32 = 256;

#[derive(Clone, Debug)]
pub struct TileMaskArgs {
    /// keep a tile whose (integer) mean is at least this
    pub mean_threshold: u64,
    /// keep a tile whose 95th - 5th percentile spread exceeds this
    pub diff_threshold: u64,
    /// tile size for strip images; tiled images use their own tiles
    pub tile_size: u32,
}

impl Default for TileMaskArgs {
    fn default() -> Self {
        Self {
            mean_threshold: DEFAULT_MEAN_THRESHOLD,
            diff_threshold: DEFAULT_DIFF_THRESHOLD,
            tile_size: DEFAULT_TILE_SIZE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileMaskReport {
    pub kept: usize,
    pub dropped: usize,
}

impl TileMaskReport {
    pub fn drop_rate(&self) -> f64 {
        let n = self.kept + self.dropped;
        if n == 0 {
            0.0
        } else {
            self.dropped as f64 / n as f64
        }
    }
}

/// integer mean, 5th and 95th percentile (nearest rank below)
pub fn tile_statistics(values: &[u16]) -> (u64, u16, u16) {
    if values.is_empty() {
        return (0, 0, 0);
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();
    let at = |q: f64| sorted[((q * n as f64) as usize).min(n - 1)];
    let mean = sorted.iter().map(|&v| v as u64).sum::<u64>() / n as u64;
    (mean, at(0.05), at(0.95))
}

pub fn keep_tile(values: &[u16], args: &TileMaskArgs) -> bool {
    let (mean, p5, p95) = tile_statistics(values);
    mean >= args.mean_threshold || p95.saturating_sub(p5) as u64 > args.diff_threshold
}

/// Mark tiles of `image` worth keeping with 255, the rest with 0
pub fn tile_mask(
    image: &Raster<u16>,
    tile: (u32, u32),
    args: &TileMaskArgs,
) -> (Raster<u8>, TileMaskReport) {
    let (tw, th) = (tile.0.max(1), tile.1.max(1));
    let across = image.width.div_ceil(tw);
    let down = image.height.div_ceil(th);
    let ntiles = (across * down) as usize;

    let kept: Vec<bool> = (0..ntiles)
        .into_par_iter()
        .progress_count(ntiles as u64)
        .map(|t| {
            let x0 = (t as u32 % across) * tw;
            let y0 = (t as u32 / across) * th;
            let x1 = (x0 + tw).min(image.width);
            let y1 = (y0 + th).min(image.height);
            let values: Vec<u16> = (y0..y1)
                .flat_map(|y| {
                    let row = y as usize * image.width as usize;
                    image.data[row + x0 as usize..row + x1 as usize].iter().copied()
                })
                .collect();
            keep_tile(&values, args)
        })
        .collect();

    let mut mask = Raster::<u8>::new(image.width, image.height, 1);
    for (t, _) in kept.iter().enumerate().filter(|(_, &k)| k) {
        let x0 = (t as u32 % across) * tw;
        let y0 = (t as u32 / across) * th;
        let x1 = (x0 + tw).min(image.width);
        let y1 = (y0 + th).min(image.height);
        for y in y0..y1 {
            let row = y as usize * image.width as usize;
            mask.data[row + x0 as usize..row + x1 as usize].fill(255);
        }
    }

    let nkept = kept.iter().filter(|&&k| k).count();
    let report = TileMaskReport {
        kept: nkept,
        dropped: ntiles - nkept,
    };
    (mask, report)
}

/// Mask directory 0 of `file` and write the 8-bit mask to `output`
pub fn tile_mask_file(
    file: &str,
    args: &TileMaskArgs,
    output: &str,
) -> anyhow::Result<TileMaskReport> {
    let mut decoder = open_decoder(file)?;
    let summary = DirectorySummary::from_decoder(&mut decoder, 0)?;
    let tile = if summary.tiled {
        (summary.chunk_width, summary.chunk_height)
    } else {
        (args.tile_size, args.tile_size)
    };

    let image = read_gray16(file, 0)?;
    let (mask, report) = tile_mask(&image, tile, args);

    info!(
        "tile mask {} x {}: kept {}, dropped {} (drop rate {:.2}%)",
        tile.0,
        tile.1,
        add_commas(report.kept as u64),
        add_commas(report.dropped as u64),
        100.0 * report.drop_rate()
    );

    write_gray8(&mask, output)?;
    Ok(report)
}
