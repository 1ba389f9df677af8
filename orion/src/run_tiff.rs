//! Image-side commands backed by `tiff-util`

use crate::anndata::SPATIAL_KEY;
use crate::orion_common::*;
use crate::orion_input::TableArgs;
use tiff_util::channel::read_palette;
use tiff_util::colorize::colorize;
use tiff_util::draw::{draw_cells, DEFAULT_CIRCLE_RADIUS};
use tiff_util::header::TiffHeader;
use tiff_util::ifd::summarize_directories;
use tiff_util::mask::*;
use tiff_util::merge::{gray_to_rgb, GraySources};
use tiff_util::stats::directory_means;

#[derive(Args, Debug)]
pub struct TiffFileArgs {
    #[arg(required = true, help = "TIFF file")]
    pub file: Box<str>,
}

#[derive(Args, Debug)]
pub struct TiffMeanArgs {
    #[arg(required = true, help = "TIFF file")]
    pub file: Box<str>,

    #[arg(long, short = 'o', help = "Write the table to this TSV file")]
    pub out: Option<Box<str>>,
}

#[derive(Args, Debug)]
pub struct Gray2RgbArgs {
    #[arg(
        long,
        short = 'i',
        help = "One file with gray directories 0, 1, 2 as red, green, blue",
        conflicts_with_all = ["red", "green", "blue"]
    )]
    pub input: Option<Box<str>>,

    #[arg(long, requires_all = ["green", "blue"], help = "Red plane (directory 0)")]
    pub red: Option<Box<str>>,

    #[arg(long, requires_all = ["red", "blue"], help = "Green plane (directory 0)")]
    pub green: Option<Box<str>>,

    #[arg(long, requires_all = ["red", "green"], help = "Blue plane (directory 0)")]
    pub blue: Option<Box<str>>,

    #[arg(long, short = 'o', required = true, help = "Output RGB TIFF")]
    pub out: Box<str>,
}

#[derive(Args, Debug)]
pub struct ColorizeArgs {
    #[arg(required = true, help = "Multi-channel 16-bit TIFF (one directory per channel)")]
    pub file: Box<str>,

    #[arg(
        long,
        short = 'p',
        required = true,
        help = "Channel palette CSV",
        long_help = "Channel palette, one channel per line:\n\
		     index,name,r,g,b,lower,upper\n\
		     Intensities are windowed to [lower, upper] and scaled by the colour.\n\
		     Blank lines and lines starting with # are skipped."
    )]
    pub palette: Box<str>,

    #[arg(
        long,
        short = 'c',
        value_delimiter(','),
        help = "Channel indices to blend (comma separated)"
    )]
    pub channels: Vec<usize>,

    #[arg(long, short = 'o', required = true, help = "Output RGB TIFF")]
    pub out: Box<str>,
}

#[derive(Args, Debug)]
pub struct TileMaskCmdArgs {
    #[arg(required = true, help = "16-bit gray TIFF")]
    pub file: Box<str>,

    #[arg(
        long,
        default_value_t = DEFAULT_MEAN_THRESHOLD,
        help = "Keep tiles whose mean is at least this"
    )]
    pub mean_threshold: u64,

    #[arg(
        long,
        default_value_t = DEFAULT_DIFF_THRESHOLD,
        help = "Keep tiles whose 95th - 5th percentile spread exceeds this"
    )]
    pub diff_threshold: u64,

    #[arg(
        long,
        default_value_t = DEFAULT_TILE_SIZE,
        help = "Tile size for strip images (tiled images use their own tiles)"
    )]
    pub tile_size: u32,

    #[arg(long, short = 'o', required = true, help = "Output 8-bit mask TIFF")]
    pub out: Box<str>,
}

#[derive(Args, Debug)]
pub struct DrawCellsArgs {
    #[command(flatten)]
    pub table: TableArgs,

    #[arg(
        long,
        short = 'r',
        required = true,
        help = "Reference TIFF giving the canvas size"
    )]
    pub reference: Box<str>,

    #[arg(long, default_value_t = DEFAULT_CIRCLE_RADIUS, help = "Circle radius in pixels")]
    pub radius: f32,

    #[arg(long, short = 'o', required = true, help = "Output 8-bit TIFF")]
    pub out: Box<str>,
}

pub fn run_tiff_header(args: &TiffFileArgs) -> anyhow::Result<()> {
    let header = TiffHeader::from_file(&args.file)?;
    println!("{}", header);
    Ok(())
}

pub fn run_tiff_info(args: &TiffFileArgs) -> anyhow::Result<()> {
    let header = TiffHeader::from_file(&args.file)?;
    println!("{}", header);
    for summary in summarize_directories(&args.file)? {
        println!("{}", summary);
    }
    Ok(())
}

pub fn run_tiff_mean(args: &TiffMeanArgs) -> anyhow::Result<()> {
    let means = directory_means(&args.file)?;

    let mut lines: Vec<Box<str>> = vec!["directory\twidth\theight\tmode\tmean".into()];
    lines.extend(means.iter().map(|m| m.to_string().into_boxed_str()));

    match args.out.as_deref() {
        Some(file) => {
            write_lines(&lines, file)?;
            info!("Wrote {}", file);
        }
        None => {
            for line in lines {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

pub fn run_gray2rgb(args: &Gray2RgbArgs) -> anyhow::Result<()> {
    let sources = match (
        args.input.as_deref(),
        args.red.as_deref(),
        args.green.as_deref(),
        args.blue.as_deref(),
    ) {
        (Some(file), None, None, None) => GraySources::Stacked(file),
        (None, Some(red), Some(green), Some(blue)) => GraySources::Separate { red, green, blue },
        _ => anyhow::bail!("give either --input or all of --red, --green and --blue"),
    };
    mkdir(&args.out)?;
    gray_to_rgb(sources, &args.out)?;
    info!("Wrote {}", args.out);
    Ok(())
}

pub fn run_colorize(args: &ColorizeArgs) -> anyhow::Result<()> {
    let palette = read_palette(&args.palette)?;
    mkdir(&args.out)?;
    if colorize(&args.file, &palette, &args.channels, &args.out)? {
        info!("Wrote {}", args.out);
    }
    Ok(())
}

pub fn run_tile_mask(args: &TileMaskCmdArgs) -> anyhow::Result<()> {
    let mask_args = TileMaskArgs {
        mean_threshold: args.mean_threshold,
        diff_threshold: args.diff_threshold,
        tile_size: args.tile_size,
    };
    mkdir(&args.out)?;
    let report = tile_mask_file(&args.file, &mask_args, &args.out)?;
    eprintln!(
        "kept {} tiles, dropped {} (drop rate {:.2}%)",
        report.kept,
        report.dropped,
        100.0 * report.drop_rate()
    );
    Ok(())
}

pub fn run_draw_cells(args: &DrawCellsArgs) -> anyhow::Result<()> {
    let adata = args.table.load()?;
    let coords = adata.obsm(SPATIAL_KEY)?;
    let centres: Vec<(f32, f32)> = coords
        .row_iter()
        .map(|r| (r[0], r[1]))
        .collect();

    mkdir(&args.out)?;
    draw_cells(&args.reference, &centres, args.radius, &args.out)?;
    info!("Wrote {}", args.out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiff_util::raster::{read_gray8, Raster};
    use tiff_util::writer::write_gray16_stack;

    fn plane(width: u32, height: u32, f: impl Fn(u32, u32) -> u16) -> Raster<u16> {
        Raster {
            width,
            height,
            samples_per_pixel: 1,
            data: (0..height)
                .flat_map(|y| (0..width).map(move |x| (x, y)))
                .map(|(x, y)| f(x, y))
                .collect(),
        }
    }

    #[test]
    fn tile_mask_on_a_two_directory_stack() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stack.tif");
        let file = file.to_str().unwrap();

        // directory 0: bright lower half; directory 1 is ignored
        let first = plane(16, 16, |_, y| if y >= 8 { 2000 } else { 5 });
        let second = plane(16, 16, |_, _| 4000);
        write_gray16_stack(&[first, second], file).unwrap();

        let out = dir.path().join("mask").join("stack.mask.tif");
        let out = out.to_str().unwrap();
        let args = TileMaskCmdArgs {
            file: file.into(),
            mean_threshold: DEFAULT_MEAN_THRESHOLD,
            diff_threshold: DEFAULT_DIFF_THRESHOLD,
            tile_size: 8,
            out: out.into(),
        };
        run_tile_mask(&args).unwrap();

        let mask = read_gray8(out, 0).unwrap();
        assert_eq!((mask.width, mask.height), (16, 16));
        assert_eq!(mask.get(3, 3, 0), Some(0));
        assert_eq!(mask.get(12, 3, 0), Some(0));
        assert_eq!(mask.get(3, 12, 0), Some(255));
        assert_eq!(mask.get(15, 15, 0), Some(255));
    }

    #[test]
    fn mean_table_lists_every_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stack.tif");
        let file = file.to_str().unwrap();
        write_gray16_stack(&[plane(4, 2, |_, _| 10), plane(4, 2, |x, _| x as u16)], file).unwrap();

        let out = dir.path().join("means.tsv");
        let args = TiffMeanArgs {
            file: file.into(),
            out: Some(out.to_str().unwrap().into()),
        };
        run_tiff_mean(&args).unwrap();

        let lines = matrix_util::common_io::read_lines(out.to_str().unwrap()).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].as_ref(), "directory\twidth\theight\tmode\tmean");
        assert!(lines[1].ends_with("10.0000"));
        assert!(lines[2].ends_with("1.5000"));
    }

    #[test]
    fn gray2rgb_needs_one_source_form() {
        let args = Gray2RgbArgs {
            input: None,
            red: Some("r.tif".into()),
            green: None,
            blue: None,
            out: "rgb.tif".into(),
        };
        let err = run_gray2rgb(&args).unwrap_err();
        assert!(err.to_string().contains("--input"));
    }
}
