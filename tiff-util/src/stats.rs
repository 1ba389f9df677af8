use crate::ifd::*;
use crate::raster::for_each_chunk;
use log::info;
use std::fmt;

/// Mean intensity of one directory; one value per sample
#[derive(Clone, Debug, PartialEq)]
pub struct DirectoryMean {
    pub summary: DirectorySummary,
    pub means: Vec<f64>,
}

impl fmt::Display for DirectoryMean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let means = self
            .means
            .iter()
            .map(|m| format!("{:.4}", m))
            .collect::<Vec<_>>()
            .join("\t");
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.summary.index,
            self.summary.width,
            self.summary.height,
            self.summary.pixel_mode(),
            means
        )
    }
}

/// Streaming per-sample mean of every pixel in every directory
pub fn directory_means(file: &str) -> anyhow::Result<Vec<DirectoryMean>> {
    let mut decoder = open_decoder(file)?;
    let mut ret = vec![];

    loop {
        let index = ret.len();
        let summary = DirectorySummary::from_decoder(&mut decoder, index)?;

        if summary.pixel_mode() == PixelMode::Unsupported {
            anyhow::bail!(
                "{} directory {}: unsupported pixel layout ({} samples x {} bits)",
                file,
                index,
                summary.samples_per_pixel,
                summary.bits_per_sample
            );
        }

        let spp = summary.samples_per_pixel as usize;
        let mut sums = vec![0u64; spp];

        for_each_chunk(&mut decoder, &summary, |chunk| {
            let n = chunk.width as usize * chunk.height as usize * spp;
            for i in 0..n {
                sums[i % spp] += chunk.samples.get(i) as u64;
            }
            Ok(())
        })?;

        let npix = summary.num_pixels().max(1) as f64;
        let means = sums.iter().map(|&s| s as f64 / npix).collect::<Vec<_>>();
        info!("directory {}: mean {:?}", index, means);

        ret.push(DirectoryMean { summary, means });

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Raster;
    use crate::writer::{write_gray16, write_gray8_stack};

    #[test]
    fn means_stream_over_every_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stack.tif");
        let file = file.to_str().unwrap();

        let mut first = Raster::<u8>::new(10, 10, 1);
        first.data.iter_mut().take(50).for_each(|v| *v = 100);
        let second = Raster {
            width: 10,
            height: 10,
            samples_per_pixel: 1,
            data: vec![255u8; 100],
        };
        write_gray8_stack(&[first, second], file).unwrap();

        let means = directory_means(file).unwrap();
        assert_eq!(means.len(), 2);
        approx::assert_abs_diff_eq!(means[0].means[0], 50.0);
        approx::assert_abs_diff_eq!(means[1].means[0], 255.0);
        assert_eq!(means[0].summary.index, 0);
        assert_eq!(means[1].summary.pixel_mode(), PixelMode::Gray8);
        assert_eq!(means[1].to_string(), "1\t10\t10\tGRAY8\t255.0000");
    }

    #[test]
    fn sixteen_bit_values_do_not_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bright.tif");
        let file = file.to_str().unwrap();
        let bright = Raster {
            width: 300,
            height: 300,
            samples_per_pixel: 1,
            data: vec![u16::MAX; 90_000],
        };
        write_gray16(&bright, file).unwrap();
        approx::assert_abs_diff_eq!(directory_means(file).unwrap()[0].means[0], u16::MAX as f64);
    }
}
