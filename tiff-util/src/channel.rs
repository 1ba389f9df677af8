//! Channel palettes and intensity windowing

use matrix_util::common_io::read_lines;
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl fmt::Display for RgbColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RGB({}, {}, {})", self.r, self.g, self.b)
    }
}

/// How one image channel is shown: a colour and a display window
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub index: usize,
    pub name: Box<str>,
    pub color: RgbColor,
    pub lower: u16,
    pub upper: u16,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {} [{},{}]",
            self.index, self.name, self.color, self.lower, self.upper
        )
    }
}

impl Channel {
    /// Parse `index,name,r,g,b,lower,upper`
    pub fn parse_csv_line(line: &str) -> anyhow::Result<Self> {
        let words: Vec<&str> = line.split(',').map(|x| x.trim()).collect();
        let [index, name, r, g, b, lower, upper] = words.as_slice() else {
            anyhow::bail!("expected 7 comma-separated fields, found {}", words.len());
        };

        let num = |field: &str, what: &str| -> anyhow::Result<u64> {
            field
                .parse::<u64>()
                .map_err(|_| anyhow::anyhow!("invalid {} '{}'", what, field))
        };
        let byte = |field: &str, what: &str| -> anyhow::Result<u8> {
            u8::try_from(num(field, what)?)
                .map_err(|_| anyhow::anyhow!("{} '{}' exceeds 255", what, field))
        };
        let word = |field: &str, what: &str| -> anyhow::Result<u16> {
            u16::try_from(num(field, what)?)
                .map_err(|_| anyhow::anyhow!("{} '{}' exceeds 65535", what, field))
        };

        Ok(Self {
            index: num(*index, "channel index")? as usize,
            name: (*name).into(),
            color: RgbColor {
                r: byte(*r, "red")?,
                g: byte(*g, "green")?,
                b: byte(*b, "blue")?,
            },
            lower: word(*lower, "lower bound")?,
            upper: word(*upper, "upper bound")?,
        })
    }
}

/// Read a palette file; blank lines and `#` comments are skipped
pub fn read_palette(file: &str) -> anyhow::Result<Vec<Channel>> {
    let mut channels = vec![];
    for (i, line) in read_lines(file)?.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let channel = Channel::parse_csv_line(line)
            .map_err(|e| anyhow::anyhow!("{} line {}: {}", file, i + 1, e))?;
        channels.push(channel);
    }
    if channels.is_empty() {
        anyhow::bail!("no channels in {}", file);
    }
    Ok(channels)
}

/// Map `value` from the window `[lower, upper]` onto `[0, 255]`
pub fn window_u8(value: u64, lower: u64, upper: u64) -> u8 {
    if value <= lower {
        0
    } else if value >= upper {
        255
    } else {
        // here lower < value < upper
        ((value - lower) as f64 * 255.0 / (upper - lower) as f64) as u8
    }
}

/// Additive blend of windowed channels into one RGB colour
pub fn combine_channels_to_rgb(values: &[u16], channels: &[Channel]) -> anyhow::Result<RgbColor> {
    if values.len() != channels.len() {
        anyhow::bail!(
            "{} values given for {} channels",
            values.len(),
            channels.len()
        );
    }
    Ok(blend(values.iter().copied(), channels))
}

pub(crate) fn blend(values: impl Iterator<Item = u16>, channels: &[Channel]) -> RgbColor {
    let mut sum = [0u32; 3];
    for (v, ch) in values.zip(channels) {
        let w = window_u8(v as u64, ch.lower as u64, ch.upper as u64) as u32;
        sum[0] += ch.color.r as u32 * w;
        sum[1] += ch.color.g as u32 * w;
        sum[2] += ch.color.b as u32 * w;
    }
    let scale = |s: u32| (s.min(255 * 255) / 255) as u8;
    RgbColor {
        r: scale(sum[0]),
        g: scale(sum[1]),
        b: scale(sum[2]),
    }
}
