use crate::raster::Raster;
use log::info;
use matrix_util::common_io::mkdir;
use std::fs::File;
use std::io::BufWriter;
use tiff::encoder::{colortype, compression::Lzw, TiffEncoder};

fn create_encoder(file: &str) -> anyhow::Result<TiffEncoder<BufWriter<File>>> {
    mkdir(file)?;
    let out = BufWriter::new(
        File::create(file).map_err(|e| anyhow::anyhow!("failed to create {}: {}", file, e))?,
    );
    Ok(TiffEncoder::new(out)?)
}

fn check_layout<T>(raster: &Raster<T>, spp: u16) -> anyhow::Result<()> {
    let expected = raster.width as usize * raster.height as usize * spp as usize;
    if raster.samples_per_pixel != spp || raster.data.len() != expected {
        anyhow::bail!(
            "raster [{} x {} x {}] with {} samples cannot be written as {} sample(s) per pixel",
            raster.width,
            raster.height,
            raster.samples_per_pixel,
            raster.data.len(),
            spp
        );
    }
    Ok(())
}

/// Write an 8-bit gray image (LZW)
pub fn write_gray8(raster: &Raster<u8>, file: &str) -> anyhow::Result<()> {
    check_layout(raster, 1)?;
    let mut encoder = create_encoder(file)?;
    encoder.write_image_with_compression::<colortype::Gray8, _>(
        raster.width,
        raster.height,
        Lzw::default(),
        &raster.data,
    )?;
    info!("wrote {} x {} gray8 image to {}", raster.width, raster.height, file);
    Ok(())
}

/// Write a 16-bit gray image (LZW)
pub fn write_gray16(raster: &Raster<u16>, file: &str) -> anyhow::Result<()> {
    check_layout(raster, 1)?;
    let mut encoder = create_encoder(file)?;
    encoder.write_image_with_compression::<colortype::Gray16, _>(
        raster.width,
        raster.height,
        Lzw::default(),
        &raster.data,
    )?;
    info!("wrote {} x {} gray16 image to {}", raster.width, raster.height, file);
    Ok(())
}

/// Write an interleaved RGB image (LZW)
pub fn write_rgb8(raster: &Raster<u8>, file: &str) -> anyhow::Result<()> {
    check_layout(raster, 3)?;
    let mut encoder = create_encoder(file)?;
    encoder.write_image_with_compression::<colortype::RGB8, _>(
        raster.width,
        raster.height,
        Lzw::default(),
        &raster.data,
    )?;
    info!("wrote {} x {} RGB image to {}", raster.width, raster.height, file);
    Ok(())
}

/// Write several 16-bit gray directories into one file
pub fn write_gray16_stack(rasters: &[Raster<u16>], file: &str) -> anyhow::Result<()> {
    let mut encoder = create_encoder(file)?;
    for raster in rasters {
        check_layout(raster, 1)?;
        encoder.write_image_with_compression::<colortype::Gray16, _>(
            raster.width,
            raster.height,
            Lzw::default(),
            &raster.data,
        )?;
    }
    info!("wrote {} gray16 directories to {}", rasters.len(), file);
    Ok(())
}

/// Write several 8-bit gray directories into one file
pub fn write_gray8_stack(rasters: &[Raster<u8>], file: &str) -> anyhow::Result<()> {
    let mut encoder = create_encoder(file)?;
    for raster in rasters {
        check_layout(raster, 1)?;
        encoder.write_image_with_compression::<colortype::Gray8, _>(
            raster.width,
            raster.height,
            Lzw::default(),
            &raster.data,
        )?;
    }
    info!("wrote {} gray8 directories to {}", rasters.len(), file);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ifd::*;
    use crate::raster::{read_gray16, read_gray8};

    fn temp_file(dir: &tempfile::TempDir, name: &str) -> String {
        dir.path().join(name).to_str().unwrap().to_string()
    }

    #[test]
    fn written_directories_summarize_back() {
        let dir = tempfile::tempdir().unwrap();

        let gray = temp_file(&dir, "nested/gray.tif");
        let mut raster = Raster::<u8>::new(5, 3, 1);
        raster.put(4, 2, 200);
        write_gray8(&raster, &gray).unwrap();

        let summary = &summarize_directories(&gray).unwrap()[0];
        assert_eq!((summary.width, summary.height), (5, 3));
        assert_eq!(summary.pixel_mode(), PixelMode::Gray8);
        assert_eq!(summary.photometric, PHOTOMETRIC_MINISBLACK);
        assert_eq!(summary.compression, 5);
        assert_eq!(read_gray8(&gray, 0).unwrap(), raster);

        let rgb = temp_file(&dir, "rgb.tif");
        write_rgb8(&Raster::<u8>::new(2, 2, 3), &rgb).unwrap();
        let summary = &summarize_directories(&rgb).unwrap()[0];
        assert_eq!(summary.pixel_mode(), PixelMode::Rgb8);
        assert_eq!(summary.photometric, PHOTOMETRIC_RGB);

        let stack = temp_file(&dir, "stack.tif");
        let planes: Vec<Raster<u16>> = (0..3)
            .map(|k| {
                let mut p = Raster::<u16>::new(4, 4, 1);
                p.put(k, k, 1000 * (k as u16 + 1));
                p
            })
            .collect();
        write_gray16_stack(&planes, &stack).unwrap();
        assert_eq!(directory_count(&stack).unwrap(), 3);
        assert_eq!(read_gray16(&stack, 2).unwrap(), planes[2]);
    }

    #[test]
    fn sample_count_must_match_the_layout() {
        let dir = tempfile::tempdir().unwrap();
        let file = temp_file(&dir, "bad.tif");
        assert!(write_rgb8(&Raster::<u8>::new(2, 2, 1), &file).is_err());
        assert!(write_gray8(&Raster::<u8>::new(2, 2, 3), &file).is_err());

        let short = Raster {
            width: 4,
            height: 4,
            samples_per_pixel: 1,
            data: vec![0u16; 5],
        };
        assert!(write_gray16(&short, &file).is_err());
    }
}
