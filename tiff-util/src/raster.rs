//! Chunk-wise and whole-directory pixel access

use crate::ifd::*;
use log::info;
use tiff::decoder::DecodingResult;

/// Decoded samples of one chunk or one directory
#[derive(Debug, Clone)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Samples {
    fn from_decoding(result: DecodingResult) -> anyhow::Result<Self> {
        match result {
            DecodingResult::U8(x) => Ok(Samples::U8(x)),
            DecodingResult::U16(x) => Ok(Samples::U16(x)),
            DecodingResult::U32(x) => Ok(Samples::U32(x)),
            _ => anyhow::bail!("only unsigned 8/16/32-bit samples are supported"),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Samples::U8(x) => x.len(),
            Samples::U16(x) => x.len(),
            Samples::U32(x) => x.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> u32 {
        match self {
            Samples::U8(x) => x[i] as u32,
            Samples::U16(x) => x[i] as u32,
            Samples::U32(x) => x[i],
        }
    }

    /// widen to 16 bits; 32-bit data are rejected
    pub fn into_u16(self) -> anyhow::Result<Vec<u16>> {
        match self {
            Samples::U8(x) => Ok(x.into_iter().map(u16::from).collect()),
            Samples::U16(x) => Ok(x),
            Samples::U32(_) => anyhow::bail!("32-bit samples cannot be narrowed to 16 bits"),
        }
    }
}

/// One decoded chunk: its pixel origin, valid size and samples
pub struct Chunk {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub samples: Samples,
}

/// Visit every chunk of the directory the decoder points at
pub fn for_each_chunk<F>(
    decoder: &mut TiffDecoder,
    summary: &DirectorySummary,
    mut visit: F,
) -> anyhow::Result<()>
where
    F: FnMut(Chunk) -> anyhow::Result<()>,
{
    if summary.planar == PLANARCONFIG_SEPARATE && summary.samples_per_pixel > 1 {
        anyhow::bail!(
            "directory {}: separate planar configuration is not supported",
            summary.index
        );
    }

    for chunk_index in 0..summary.num_chunks() {
        let (x, y, width, height) = summary.chunk_rect(chunk_index);
        let samples = Samples::from_decoding(decoder.read_chunk(chunk_index)?)?;
        let expected = width as usize * height as usize * summary.samples_per_pixel as usize;
        if samples.len() < expected {
            anyhow::bail!(
                "directory {} chunk {}: {} samples, expected {}",
                summary.index,
                chunk_index,
                samples.len(),
                expected
            );
        }
        visit(Chunk {
            x,
            y,
            width,
            height,
            samples,
        })?;
    }
    Ok(())
}

/// Row-major pixel buffer with interleaved samples
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<T> {
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u16,
    pub data: Vec<T>,
}

impl<T: Copy + Default> Raster<T> {
    pub fn new(width: u32, height: u32, samples_per_pixel: u16) -> Self {
        let n = width as usize * height as usize * samples_per_pixel as usize;
        Self {
            width,
            height,
            samples_per_pixel,
            data: vec![T::default(); n],
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.samples_per_pixel as usize
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64
    }

    pub fn get(&self, x: u32, y: u32, sample: u16) -> Option<T> {
        if x < self.width && y < self.height && sample < self.samples_per_pixel {
            Some(self.data[self.offset(x, y) + sample as usize])
        } else {
            None
        }
    }

    /// set every sample of pixel (x, y); out-of-bounds pixels are skipped
    pub fn put(&mut self, x: i64, y: i64, value: T) {
        if self.contains(x, y) {
            let off = self.offset(x as u32, y as u32);
            let spp = self.samples_per_pixel as usize;
            self.data[off..off + spp].fill(value);
        }
    }
}

/// Read a whole single-sample directory widened to 16 bits
pub fn read_gray16(file: &str, directory: usize) -> anyhow::Result<Raster<u16>> {
    let mut decoder = open_decoder(file)?;
    seek_directory(&mut decoder, directory)?;
    let summary = DirectorySummary::from_decoder(&mut decoder, directory)?;

    match summary.pixel_mode() {
        PixelMode::Gray8 | PixelMode::Gray16 => {}
        mode => anyhow::bail!(
            "{} directory {}: expected 8 or 16-bit gray, found {}",
            file,
            directory,
            mode
        ),
    }

    info!(
        "reading {} directory {} ({} x {}, {})",
        file,
        directory,
        summary.width,
        summary.height,
        summary.pixel_mode()
    );

    let data = Samples::from_decoding(decoder.read_image()?)?.into_u16()?;
    Ok(Raster {
        width: summary.width,
        height: summary.height,
        samples_per_pixel: 1,
        data,
    })
}

/// Read a whole 8-bit single-sample directory
pub fn read_gray8(file: &str, directory: usize) -> anyhow::Result<Raster<u8>> {
    let mut decoder = open_decoder(file)?;
    seek_directory(&mut decoder, directory)?;
    let summary = DirectorySummary::from_decoder(&mut decoder, directory)?;

    if summary.pixel_mode() != PixelMode::Gray8 {
        anyhow::bail!(
            "{} directory {}: expected 8-bit gray, found {}",
            file,
            directory,
            summary.pixel_mode()
        );
    }

    match Samples::from_decoding(decoder.read_image()?)? {
        Samples::U8(data) => Ok(Raster {
            width: summary.width,
            height: summary.height,
            samples_per_pixel: 1,
            data,
        }),
        _ => anyhow::bail!("{} directory {}: decoder returned non 8-bit data", file, directory),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_put_get_bounds() {
        let mut r = Raster::<u8>::new(3, 2, 3);
        r.put(2, 1, 255);
        r.put(-1, 0, 9);
        r.put(3, 0, 9);
        assert_eq!(r.get(2, 1, 0), Some(255));
        assert_eq!(r.get(2, 1, 2), Some(255));
        assert_eq!(r.get(0, 0, 0), Some(0));
        assert_eq!(r.get(3, 0, 0), None);
        assert_eq!(r.data.iter().filter(|&&v| v == 9).count(), 0);
    }

    #[test]
    fn samples_widen() {
        let s = Samples::U8(vec![1, 255]);
        assert_eq!(s.get(1), 255);
        assert_eq!(s.into_u16().unwrap(), vec![1, 255]);
        assert!(Samples::U32(vec![1]).into_u16().is_err());
    }
}
