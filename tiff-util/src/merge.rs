//! Merge three 8-bit gray channels into one RGB image

use crate::ifd::*;
use crate::raster::{read_gray8, Raster};
use crate::writer::write_rgb8;
use log::info;
use rayon::prelude::*;

/// Where the red, green and blue planes come from
pub enum GraySources<'a> {
    /// directories 0, 1, 2 of one file
    Stacked(&'a str),
    /// directory 0 of three files
    Separate {
        red: &'a str,
        green: &'a str,
        blue: &'a str,
    },
}

fn check_gray8_minisblack(file: &str, directory: usize) -> anyhow::Result<()> {
    let mut decoder = open_decoder(file)?;
    seek_directory(&mut decoder, directory)?;
    let summary = DirectorySummary::from_decoder(&mut decoder, directory)?;
    if summary.pixel_mode() != PixelMode::Gray8 || summary.photometric != PHOTOMETRIC_MINISBLACK {
        anyhow::bail!(
            "{} directory {}: expected 8-bit min-is-black gray, found {} (photometric {})",
            file,
            directory,
            summary.pixel_mode(),
            summary.photometric
        );
    }
    Ok(())
}

/// Interleave three gray planes of equal size
pub fn interleave_rgb(
    red: &Raster<u8>,
    green: &Raster<u8>,
    blue: &Raster<u8>,
) -> anyhow::Result<Raster<u8>> {
    for (name, r) in [("green", green), ("blue", blue)] {
        if r.width != red.width || r.height != red.height {
            anyhow::bail!(
                "{} plane is {} x {}, red plane is {} x {}",
                name,
                r.width,
                r.height,
                red.width,
                red.height
            );
        }
    }

    let mut out = Raster::<u8>::new(red.width, red.height, 3);
    out.data
        .par_chunks_mut(3)
        .zip(red.data.par_iter())
        .zip(green.data.par_iter().zip(blue.data.par_iter()))
        .for_each(|((px, &r), (&g, &b))| {
            px[0] = r;
            px[1] = g;
            px[2] = b;
        });
    Ok(out)
}

/// Read the three planes, check them, and write an RGB image to `output`
pub fn gray_to_rgb(sources: GraySources<'_>, output: &str) -> anyhow::Result<()> {
    let planes: [(&str, usize); 3] = match sources {
        GraySources::Stacked(file) => {
            let n = directory_count(file)?;
            if n < 3 {
                anyhow::bail!("{} has {} directories, need at least 3", file, n);
            }
            [(file, 0), (file, 1), (file, 2)]
        }
        GraySources::Separate { red, green, blue } => [(red, 0), (green, 0), (blue, 0)],
    };

    for &(file, dir) in planes.iter() {
        check_gray8_minisblack(file, dir)?;
    }

    let red = read_gray8(planes[0].0, planes[0].1)?;
    let green = read_gray8(planes[1].0, planes[1].1)?;
    let blue = read_gray8(planes[2].0, planes[2].1)?;

    info!("merging {} x {} gray planes into RGB", red.width, red.height);
    let rgb = interleave_rgb(&red, &green, &blue)?;
    write_rgb8(&rgb, output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaves_in_rgb_order() {
        let plane = |v: u8| Raster {
            width: 2,
            height: 1,
            samples_per_pixel: 1,
            data: vec![v, v + 1],
        };
        let rgb = interleave_rgb(&plane(10), &plane(20), &plane(30)).unwrap();
        assert_eq!(rgb.data, vec![10, 20, 30, 11, 21, 31]);

        let wide = Raster::<u8>::new(3, 1, 1);
        assert!(interleave_rgb(&plane(1), &wide, &plane(1)).is_err());
    }
}
