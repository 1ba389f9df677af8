//! Image file directory (IFD) summaries on top of the `tiff` decoder

use log::warn;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use tiff::decoder::{Decoder, Limits};
use tiff::tags::Tag;

pub type TiffDecoder = Decoder<BufReader<File>>;

pub const PHOTOMETRIC_MINISWHITE: u16 = 0;
pub const PHOTOMETRIC_MINISBLACK: u16 = 1;
pub const PHOTOMETRIC_RGB: u16 = 2;
pub const PLANARCONFIG_CONTIG: u16 = 1;
pub const PLANARCONFIG_SEPARATE: u16 = 2;

/// Open `file` for decoding without the default memory limits,
/// since whole-slide channels easily exceed them
pub fn open_decoder(file: &str) -> anyhow::Result<TiffDecoder> {
    let reader = BufReader::new(
        File::open(file).map_err(|e| anyhow::anyhow!("failed to open {}: {}", file, e))?,
    );
    let decoder = Decoder::new(reader)
        .map_err(|e| anyhow::anyhow!("{} is not a readable TIFF: {}", file, e))?
        .with_limits(Limits::unlimited());
    Ok(decoder)
}

/// Position the decoder at directory `index` (0-based)
pub fn seek_directory(decoder: &mut TiffDecoder, index: usize) -> anyhow::Result<()> {
    decoder
        .seek_to_image(index)
        .map_err(|e| anyhow::anyhow!("cannot seek to directory {}: {}", index, e))
}

/// Number of directories in `file`
pub fn directory_count(file: &str) -> anyhow::Result<usize> {
    let mut decoder = open_decoder(file)?;
    let mut n = 1;
    while decoder.more_images() {
        decoder.next_image()?;
        n += 1;
    }
    Ok(n)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelMode {
    Rgb8,
    Gray8,
    Gray16,
    Gray32,
    Unsupported,
}

impl fmt::Display for PixelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PixelMode::Rgb8 => "RGB8",
            PixelMode::Gray8 => "GRAY8",
            PixelMode::Gray16 => "GRAY16",
            PixelMode::Gray32 => "GRAY32",
            PixelMode::Unsupported => "UNSUPPORTED",
        };
        write!(f, "{}", s)
    }
}

/// What one directory holds and how its pixels are chunked
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectorySummary {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u16,
    pub bits_per_sample: u16,
    pub photometric: u16,
    pub planar: u16,
    pub sample_format: u16,
    pub compression: u16,
    pub tiled: bool,
    /// tile size, or (width, rows per strip) for strip images
    pub chunk_width: u32,
    pub chunk_height: u32,
}

fn find_u32(decoder: &mut TiffDecoder, tag: Tag) -> anyhow::Result<Option<u32>> {
    match decoder.find_tag(tag)? {
        Some(value) => Ok(value.into_u32_vec()?.first().copied()),
        None => Ok(None),
    }
}

impl DirectorySummary {
    /// Summarize the directory the decoder currently points at
    pub fn from_decoder(decoder: &mut TiffDecoder, index: usize) -> anyhow::Result<Self> {
        let (width, height) = decoder.dimensions()?;

        let samples_per_pixel = match find_u32(decoder, Tag::SamplesPerPixel)? {
            Some(x) => x as u16,
            None => {
                warn!("directory {}: no SamplesPerPixel tag, assuming 1", index);
                1
            }
        };

        let bits_per_sample = match find_u32(decoder, Tag::BitsPerSample)? {
            Some(x) => x as u16,
            None => {
                warn!("directory {}: no BitsPerSample tag, assuming 8", index);
                8
            }
        };

        let photometric = match find_u32(decoder, Tag::PhotometricInterpretation)? {
            Some(x) => x as u16,
            None => {
                warn!("directory {}: no Photometric tag, assuming min-is-black", index);
                PHOTOMETRIC_MINISBLACK
            }
        };

        let planar = match find_u32(decoder, Tag::PlanarConfiguration)? {
            Some(x) => x as u16,
            None => {
                warn!("directory {}: no PlanarConfig tag, assuming contiguous", index);
                PLANARCONFIG_CONTIG
            }
        };

        let sample_format = find_u32(decoder, Tag::SampleFormat)?.unwrap_or(1) as u16;
        let compression = find_u32(decoder, Tag::Compression)?.unwrap_or(1) as u16;

        let tile_width = find_u32(decoder, Tag::TileWidth)?;
        let tile_height = find_u32(decoder, Tag::TileLength)?;

        let (tiled, chunk_width, chunk_height) = match (tile_width, tile_height) {
            (Some(tw), Some(th)) if tw > 0 && th > 0 => (true, tw, th),
            _ => {
                let rows = find_u32(decoder, Tag::RowsPerStrip)?
                    .unwrap_or(height)
                    .clamp(1, height.max(1));
                (false, width, rows)
            }
        };

        Ok(Self {
            index,
            width,
            height,
            samples_per_pixel,
            bits_per_sample,
            photometric,
            planar,
            sample_format,
            compression,
            tiled,
            chunk_width,
            chunk_height,
        })
    }

    pub fn pixel_mode(&self) -> PixelMode {
        match (self.samples_per_pixel, self.bits_per_sample) {
            (3, 8) => PixelMode::Rgb8,
            (1, 8) => PixelMode::Gray8,
            (1, 16) => PixelMode::Gray16,
            (1, 32) => PixelMode::Gray32,
            _ => PixelMode::Unsupported,
        }
    }

    pub fn chunks_across(&self) -> u32 {
        self.width.div_ceil(self.chunk_width.max(1))
    }

    pub fn chunks_down(&self) -> u32 {
        self.height.div_ceil(self.chunk_height.max(1))
    }

    pub fn num_chunks(&self) -> u32 {
        self.chunks_across() * self.chunks_down()
    }

    pub fn num_pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Pixel origin and valid size of chunk `chunk_index`;
    /// chunks at the right and bottom edges are cropped
    pub fn chunk_rect(&self, chunk_index: u32) -> (u32, u32, u32, u32) {
        let across = self.chunks_across().max(1);
        let x = (chunk_index % across) * self.chunk_width;
        let y = (chunk_index / across) * self.chunk_height;
        let w = self.chunk_width.min(self.width - x);
        let h = self.chunk_height.min(self.height - y);
        (x, y, w, h)
    }

    pub fn same_shape(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height
    }
}

impl fmt::Display for DirectorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IFD {}: {} x {}, {} sample(s) x {} bit, photometric {}, planar {}, \
	     sample format {}, compression {}, mode {}, ",
            self.index,
            add_commas(self.width as u64),
            add_commas(self.height as u64),
            self.samples_per_pixel,
            self.bits_per_sample,
            self.photometric,
            self.planar,
            self.sample_format,
            self.compression,
            self.pixel_mode(),
        )?;
        write!(
            f,
            "{} {} x {} ({} chunks)",
            if self.tiled { "tiles" } else { "strips" },
            self.chunk_width,
            self.chunk_height,
            self.num_chunks()
        )
    }
}

/// Summaries of every directory in `file`
pub fn summarize_directories(file: &str) -> anyhow::Result<Vec<DirectorySummary>> {
    let mut decoder = open_decoder(file)?;
    let mut ret = vec![DirectorySummary::from_decoder(&mut decoder, 0)?];
    while decoder.more_images() {
        decoder.next_image()?;
        let index = ret.len();
        ret.push(DirectorySummary::from_decoder(&mut decoder, index)?);
    }
    Ok(ret)
}

/// `1234567` → `1,234,567`
pub fn add_commas(x: u64) -> String {
    let digits = x.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_summary() -> DirectorySummary {
        DirectorySummary {
            index: 0,
            width: 10,
            height: 7,
            samples_per_pixel: 1,
            bits_per_sample: 16,
            photometric: PHOTOMETRIC_MINISBLACK,
            planar: PLANARCONFIG_CONTIG,
            sample_format: 1,
            compression: 1,
            tiled: true,
            chunk_width: 4,
            chunk_height: 4,
        }
    }

    #[test]
    fn chunk_geometry_crops_edges() {
        let s = strip_summary();
        assert_eq!(s.chunks_across(), 3);
        assert_eq!(s.chunks_down(), 2);
        assert_eq!(s.num_chunks(), 6);
        assert_eq!(s.chunk_rect(0), (0, 0, 4, 4));
        assert_eq!(s.chunk_rect(2), (8, 0, 2, 4));
        assert_eq!(s.chunk_rect(5), (8, 4, 2, 3));
        assert_eq!(s.pixel_mode(), PixelMode::Gray16);
    }

    #[test]
    fn commas() {
        assert_eq!(add_commas(0), "0");
        assert_eq!(add_commas(999), "999");
        assert_eq!(add_commas(1000), "1,000");
        assert_eq!(add_commas(1234567), "1,234,567");
    }
}
