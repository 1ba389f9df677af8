//! Blend selected channels of a multiplexed image into one RGB image

use crate::channel::*;
use crate::ifd::directory_count;
use crate::raster::{read_gray16, Raster};
use crate::writer::write_rgb8;
use log::{info, warn};
use rayon::prelude::*;

/// Look up the palette entry of every selected channel and check the
/// image has a directory for it
pub fn select_channels(
    palette: &[Channel],
    selected: &[usize],
    num_directories: usize,
) -> anyhow::Result<Vec<Channel>> {
    selected
        .iter()
        .map(|&k| {
            let channel = palette
                .iter()
                .find(|c| c.index == k)
                .ok_or_else(|| anyhow::anyhow!("channel {} is not in the palette", k))?;
            if k >= num_directories {
                anyhow::bail!(
                    "channel {} requested but the image has {} directories",
                    k,
                    num_directories
                );
            }
            Ok(channel.clone())
        })
        .collect()
}

/// Per-pixel additive blend of same-sized gray planes
pub fn blend_planes(planes: &[Raster<u16>], channels: &[Channel]) -> anyhow::Result<Raster<u8>> {
    let Some(first) = planes.first() else {
        anyhow::bail!("no planes to blend");
    };
    if planes.len() != channels.len() {
        anyhow::bail!("{} planes for {} channels", planes.len(), channels.len());
    }
    if let Some(p) = planes
        .iter()
        .find(|p| p.width != first.width || p.height != first.height)
    {
        anyhow::bail!(
            "channel planes differ in size: {} x {} vs {} x {}",
            p.width,
            p.height,
            first.width,
            first.height
        );
    }

    let mut out = Raster::<u8>::new(first.width, first.height, 3);
    out.data
        .par_chunks_mut(3)
        .enumerate()
        .for_each(|(i, px)| {
            let rgb = blend(planes.iter().map(|p| p.data[i]), channels);
            px[0] = rgb.r;
            px[1] = rgb.g;
            px[2] = rgb.b;
        });
    Ok(out)
}

/// Colorize `selected` channels of `file` with `palette` into `output`.
/// Returns false when nothing was selected and nothing was written.
pub fn colorize(
    file: &str,
    palette: &[Channel],
    selected: &[usize],
    output: &str,
) -> anyhow::Result<bool> {
    if selected.is_empty() {
        warn!("no channels selected; nothing to colorize");
        return Ok(false);
    }

    let num_directories = directory_count(file)?;
    let channels = select_channels(palette, selected, num_directories)?;

    for ch in channels.iter() {
        info!("channel {}", ch);
    }

    let planes = channels
        .iter()
        .map(|ch| read_gray16(file, ch.index))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let rgb = blend_planes(&planes, &channels)?;
    write_rgb8(&rgb, output)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn palette() -> Vec<Channel> {
        vec![
            Channel::parse_csv_line("0,DNA,0,0,255,0,1000").unwrap(),
            Channel::parse_csv_line("2,CD3D,255,0,0,100,200").unwrap(),
        ]
    }

    #[test]
    fn selection_checks_palette_and_directories() {
        let pal = palette();
        assert_eq!(select_channels(&pal, &[2, 0], 3).unwrap()[0].index, 2);
        assert!(select_channels(&pal, &[1], 3).is_err());
        assert!(select_channels(&pal, &[2], 2).is_err());
    }

    #[test]
    fn blends_two_planes() {
        let pal = palette();
        let dna = Raster {
            width: 2,
            height: 1,
            samples_per_pixel: 1,
            data: vec![1000, 0],
        };
        let cd3 = Raster {
            width: 2,
            height: 1,
            samples_per_pixel: 1,
            data: vec![0, 200],
        };
        let rgb = blend_planes(&[dna, cd3], &pal).unwrap();
        assert_eq!(rgb.data, vec![0, 0, 255, 255, 0, 0]);
    }
}
