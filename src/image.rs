use crate::error::CaptureError;
use rayon::prelude::*;

/// Crossover between the linear and logarithmic response regions, on the
/// 0-255 intensity scale.
pub const LINLOG_THRESHOLD: f64 = 20.0;

/// Floor applied to rescaled intensities before the response mapping.
const INTENSITY_EPS: f64 = 1.0e-8;

/// Quantization step used to stabilise the mapped values.
const ROUNDING: f64 = 1.0e8;

/// A raw pixel buffer read back from the render host.
///
/// Samples are row major with the top row first:
///
/// ```text
/// +--------+--------+--------+-----+--------+--------+
/// |      0 |      1 |      2 | ... |    w-2 |    w-1 |
/// +--------+--------+--------+-----+--------+--------+
/// |      w |    w+1 |    w+2 | ... |   2w-2 |   2w-1 |
/// +--------+--------+--------+-----+--------+--------+
/// |    ... |    ... |
/// ```
///
/// Each pixel carries `channels` consecutive samples on the 0-1 scale.
/// One (luma), three (RGB) and four (RGBA) channel layouts are accepted.
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<f32>,
}

impl PixelBuffer {
    /// Create a pixel buffer from raw samples, checking that the sample
    /// count matches the claimed dimensions.
    pub fn new(
        width: u32,
        height: u32,
        channels: u8,
        data: Vec<f32>,
    ) -> Result<Self, CaptureError> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(CaptureError::UnsupportedChannels(channels));
        }

        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected || expected == 0 {
            return Err(CaptureError::BufferSize {
                width,
                height,
                channels,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn as_slice(&self) -> &[f32] {
        self.data.as_slice()
    }

    /// Collapse the buffer to one luma sample per pixel.
    ///
    /// Multi-channel input uses the BT.601 weights
    /// `0.299 R + 0.587 G + 0.114 B`; the alpha channel is ignored.
    /// Single-channel input is passed through unchanged.
    pub fn into_luma(self) -> LumaImage {
        let data: Vec<f64> = match self.channels {
            1 => self.data.par_iter().map(|x| *x as f64).collect(),
            _ => self
                .data
                .par_chunks(self.channels as usize)
                .map(|px| 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64)
                .collect(),
        };

        LumaImage {
            width: self.width,
            height: self.height,
            data,
        }
    }

    /// Encode the buffer as an 8-bit PNG at `path`.
    ///
    /// Single-channel buffers are written as grayscale, everything else as
    /// RGB with the alpha channel dropped.
    pub fn save_png(&self, path: &std::path::Path) -> Result<(), CaptureError> {
        let quantize = |x: f32| (x.clamp(0.0, 1.0) * 255.0).round() as u8;

        let (bytes, color): (Vec<u8>, _) = match self.channels {
            1 => (
                self.data.par_iter().map(|x| quantize(*x)).collect(),
                image::ExtendedColorType::L8,
            ),
            _ => (
                self.data
                    .par_chunks(self.channels as usize)
                    .flat_map_iter(|px| px[..3].iter().map(|x| quantize(*x)))
                    .collect(),
                image::ExtendedColorType::Rgb8,
            ),
        };

        image::save_buffer(path, &bytes, self.width, self.height, color)?;
        Ok(())
    }
}

/// A single-channel intensity image on the linear 0-1 scale.
pub struct LumaImage {
    width: u32,
    height: u32,
    data: Vec<f64>,
}

impl LumaImage {
    pub fn new(width: u32, height: u32, data: Vec<f64>) -> Result<Self, CaptureError> {
        let expected = width as usize * height as usize;
        if data.len() != expected || expected == 0 {
            return Err(CaptureError::BufferSize {
                width,
                height,
                channels: 1,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Map linear intensities into the perceptual lin-log domain.
    ///
    /// The photoreceptor response is linear below `threshold` and
    /// logarithmic above it:
    ///
    /// ```text
    /// x' = max(x * 255, 1e-8)
    /// f  = ln(threshold) / threshold
    /// y  = x' * f        if x' <= threshold
    ///      ln(x')        otherwise
    /// ```
    ///
    /// The two regions meet at `x' = threshold` since
    /// `threshold * f = ln(threshold)`. Values are quantized to 1e-8 to
    /// keep repeated mappings of equal inputs bit-identical.
    pub fn into_lin_log(self, threshold: f64) -> LinLogImage {
        let f = threshold.ln() / threshold;
        let data: Vec<f64> = self
            .data
            .par_iter()
            .map(|x| {
                let x = (x * 255.0).max(INTENSITY_EPS);
                let y = if x <= threshold { x * f } else { x.ln() };
                (y * ROUNDING).round() / ROUNDING
            })
            .collect();

        LinLogImage {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

/// A lin-log mapped brightness image, the signal the event detector
/// differences against its reference.
#[derive(Clone, PartialEq)]
pub struct LinLogImage {
    width: u32,
    height: u32,
    data: Vec<f64>,
}

impl LinLogImage {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_slice(&self) -> &[f64] {
        self.data.as_slice()
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f64] {
        self.data.as_mut_slice()
    }
}
