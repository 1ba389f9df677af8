//! The fixed-size TIFF header: byte order, classic or BigTIFF, and the
//! offset of the first image file directory.

use std::fmt;
use std::io::Read;

const HEADER_BYTES: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    /// 42 for classic TIFF, 43 for BigTIFF
    pub version: u16,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Read and validate the header of `file`
    pub fn from_file(file: &str) -> anyhow::Result<Self> {
        let mut buf = Vec::with_capacity(HEADER_BYTES);
        std::fs::File::open(file)
            .map_err(|e| anyhow::anyhow!("failed to open {}: {}", file, e))?
            .take(HEADER_BYTES as u64)
            .read_to_end(&mut buf)?;
        Self::parse(&buf).map_err(|e| anyhow::anyhow!("{}: {}", file, e))
    }

    pub fn parse(bytes: &[u8]) -> anyhow::Result<Self> {
        if bytes.len() < 8 {
            anyhow::bail!("too short for a TIFF header ({} bytes)", bytes.len());
        }

        let byte_order = match &bytes[0..2] {
            b"II" => ByteOrder::Little,
            b"MM" => ByteOrder::Big,
            _ => anyhow::bail!(
                "first two bytes must be \"II\" for little-endian or \"MM\" for big-endian"
            ),
        };

        let u16_at = |pos: usize| -> u16 {
            let b = [bytes[pos], bytes[pos + 1]];
            match byte_order {
                ByteOrder::Little => u16::from_le_bytes(b),
                ByteOrder::Big => u16::from_be_bytes(b),
            }
        };

        let version = u16_at(2);

        let first_ifd_offset = match version {
            42 => {
                let b = [bytes[4], bytes[5], bytes[6], bytes[7]];
                match byte_order {
                    ByteOrder::Little => u32::from_le_bytes(b) as u64,
                    ByteOrder::Big => u32::from_be_bytes(b) as u64,
                }
            }
            43 => {
                if bytes.len() < HEADER_BYTES {
                    anyhow::bail!("too short for a BigTIFF header ({} bytes)", bytes.len());
                }
                if u16_at(4) != 8 {
                    anyhow::bail!("BigTIFF offset size must be 8, found {}", u16_at(4));
                }
                if u16_at(6) != 0 {
                    anyhow::bail!("BigTIFF bytes 6-7 must be zero, found {}", u16_at(6));
                }
                let mut b = [0u8; 8];
                b.copy_from_slice(&bytes[8..16]);
                match byte_order {
                    ByteOrder::Little => u64::from_le_bytes(b),
                    ByteOrder::Big => u64::from_be_bytes(b),
                }
            }
            other => anyhow::bail!("TIFF version must be 42 or 43, found {}", other),
        };

        Ok(Self {
            byte_order,
            version,
            first_ifd_offset,
        })
    }

    pub fn is_big_tiff(&self) -> bool {
        self.version == 43
    }
}

impl fmt::Display for TiffHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (id, order) = match self.byte_order {
            ByteOrder::Little => ("II", "little"),
            ByteOrder::Big => ("MM", "big"),
        };
        writeln!(f, "Endian ID: {} -- {}", id, order)?;
        writeln!(
            f,
            "TIFF ID: {} -- {}-bit TIFF",
            self.version,
            if self.is_big_tiff() { 64 } else { 32 }
        )?;
        write!(f, "First IFD offset: 0x{:x}", self.first_ifd_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_little_endian() {
        let hdr = TiffHeader::parse(&[b'I', b'I', 42, 0, 8, 0, 0, 0]).unwrap();
        assert_eq!(hdr.byte_order, ByteOrder::Little);
        assert_eq!(hdr.first_ifd_offset, 8);
        assert!(!hdr.is_big_tiff());
    }

    #[test]
    fn classic_big_endian() {
        let hdr = TiffHeader::parse(&[b'M', b'M', 0, 42, 0, 0, 1, 0]).unwrap();
        assert_eq!(hdr.byte_order, ByteOrder::Big);
        assert_eq!(hdr.first_ifd_offset, 256);
    }

    #[test]
    fn big_tiff_checks_reserved_bytes() {
        let mut bytes = vec![b'I', b'I', 43, 0, 8, 0, 0, 0, 16, 0, 0, 0, 0, 0, 0, 0];
        let hdr = TiffHeader::parse(&bytes).unwrap();
        assert!(hdr.is_big_tiff());
        assert_eq!(hdr.first_ifd_offset, 16);
        assert!(hdr.to_string().contains("64-bit"));

        bytes[6] = 1;
        assert!(TiffHeader::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(TiffHeader::parse(&[b'I', b'M', 42, 0, 8, 0, 0, 0]).is_err());
        assert!(TiffHeader::parse(&[b'I', b'I', 41, 0, 8, 0, 0, 0]).is_err());
        assert!(TiffHeader::parse(&[b'I', b'I']).is_err());
    }
}
