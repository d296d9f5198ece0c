// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Per-column compression codecs.
//!
//! Each codec has a fixed one-byte ID persisted in the block header; the
//! reader resolves the decompressor purely by that byte. The codec set is
//! closed and versioned: changing an ID breaks forward compatibility.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{FormatError, FormatResult};

/// Compression codec, persisted as one byte per column in the block header.
///
/// `0x03` is intentionally unused. QuickLZ keeps its reserved ID but has no
/// implementation in this build; selecting it is a configuration error.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    Gzip = 0x00,
    Lzma = 0x01,
    QuickLz = 0x02,
    Lz4 = 0x04,
}

impl TryFrom<u8> for CompressionType {
    type Error = FormatError;

    fn try_from(byte: u8) -> FormatResult<Self> {
        match byte {
            0x00 => Ok(Self::Gzip),
            0x01 => Ok(Self::Lzma),
            0x02 => Ok(Self::QuickLz),
            0x04 => Ok(Self::Lz4),
            _ => Err(FormatError::corrupt(format!(
                "unknown compression codec byte {byte:#04x}"
            ))),
        }
    }
}

impl From<CompressionType> for u8 {
    fn from(ty: CompressionType) -> u8 {
        ty as u8
    }
}

impl CompressionType {
    /// Fails for codecs that are reserved but not bundled, so writers and
    /// readers reject them before any I/O.
    pub fn ensure_supported(self) -> FormatResult<()> {
        match self {
            CompressionType::QuickLz => Err(FormatError::config(
                "quicklz codec id is reserved but not available in this build",
            )),
            _ => Ok(()),
        }
    }
}

/// Compress `data`, returning a freshly allocated compressed buffer.
pub fn compress(ty: CompressionType, data: &[u8]) -> FormatResult<Vec<u8>> {
    match ty {
        CompressionType::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map_err(|e| FormatError::compression(format!("gzip: {e}")))
        }
        CompressionType::Lzma => {
            let mut out = Vec::new();
            lzma_rs::lzma_compress(&mut &data[..], &mut out)
                .map_err(|e| FormatError::compression(format!("lzma: {e}")))?;
            Ok(out)
        }
        CompressionType::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionType::QuickLz => {
            ty.ensure_supported()?;
            unreachable!()
        }
    }
}

/// Decompress `data` into `out`, which must be sized to the exact expected
/// decompressed length. A length mismatch means the stream is corrupt.
pub fn decompress(ty: CompressionType, data: &[u8], out: &mut [u8]) -> FormatResult<()> {
    let produced = match ty {
        CompressionType::Gzip => {
            let mut decoder = GzDecoder::new(data);
            let mut buf = Vec::with_capacity(out.len());
            decoder
                .read_to_end(&mut buf)
                .map_err(|e| FormatError::compression(format!("gzip: {e}")))?;
            buf
        }
        CompressionType::Lzma => {
            let mut buf = Vec::with_capacity(out.len());
            lzma_rs::lzma_decompress(&mut &data[..], &mut buf)
                .map_err(|e| FormatError::compression(format!("lzma: {e:?}")))?;
            buf
        }
        CompressionType::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| FormatError::compression(format!("lz4: {e}")))?,
        CompressionType::QuickLz => {
            ty.ensure_supported()?;
            unreachable!()
        }
    };
    if produced.len() != out.len() {
        return Err(FormatError::corrupt(format!(
            "decompressed {} bytes, expected {}",
            produced.len(),
            out.len()
        )));
    }
    out.copy_from_slice(&produced);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODECS: [CompressionType; 3] = [
        CompressionType::Gzip,
        CompressionType::Lzma,
        CompressionType::Lz4,
    ];

    fn roundtrip(ty: CompressionType, data: &[u8]) {
        let compressed = compress(ty, data).unwrap();
        let mut out = vec![0u8; data.len()];
        decompress(ty, &compressed, &mut out).unwrap();
        assert_eq!(out, data, "{ty:?}");
    }

    #[test]
    fn test_roundtrip_empty_and_tiny() {
        for ty in CODECS {
            roundtrip(ty, &[]);
            roundtrip(ty, &[0x5a]);
        }
    }

    #[test]
    fn test_roundtrip_large() {
        // repetitive payload larger than the default row-group threshold
        // would compress well on all codecs
        let data: Vec<u8> = (0..5_000_000u32).map(|i| (i % 251) as u8).collect();
        for ty in CODECS {
            roundtrip(ty, &data);
        }
    }

    #[test]
    fn test_length_mismatch_is_corrupt() {
        let compressed = compress(CompressionType::Lz4, b"hello world").unwrap();
        let mut short = vec![0u8; 5];
        assert!(matches!(
            decompress(CompressionType::Lz4, &compressed, &mut short),
            Err(FormatError::Corrupt(_))
        ));
    }

    #[test]
    fn test_codec_bytes() {
        for (byte, ty) in [
            (0x00, CompressionType::Gzip),
            (0x01, CompressionType::Lzma),
            (0x02, CompressionType::QuickLz),
            (0x04, CompressionType::Lz4),
        ] {
            assert_eq!(CompressionType::try_from(byte).unwrap(), ty);
            assert_eq!(u8::from(ty), byte);
        }
        // 0x03 is reserved
        assert!(CompressionType::try_from(0x03).is_err());
        assert!(CompressionType::QuickLz.ensure_supported().is_err());
    }
}
