//! Raw capture buffer decoding: YUYV, GREY and Y16 down to 8-bit luma.

/// Pixel formats the capture path can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grey => 1,
            PixelFormat::Yuyv | PixelFormat::Y16 => 2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format:?} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
}

/// Decode a raw capture buffer into 8-bit luma.
pub fn decode_luma(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    let expected = pixels * format.bytes_per_pixel();
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }

    Ok(match format {
        PixelFormat::Grey => buf[..pixels].to_vec(),
        // [Y0, U, Y1, V]: luma is every even byte.
        PixelFormat::Yuyv => buf[..expected].iter().step_by(2).copied().collect(),
        // Little-endian; keep the high byte.
        PixelFormat::Y16 => buf[..expected].chunks_exact(2).map(|p| p[1]).collect(),
    })
}
