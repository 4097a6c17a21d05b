//! Depth frame and capture types.
//!
//! A [`DepthFrame`] is a 2-D grid of unsigned 16-bit samples stored row-major
//! in a single flat buffer.  Each sample is a distance in millimetres; `0`
//! means the sensor got no valid return for that pixel.
//!
//! A [`Capture`] is what one device acquisition returns.  Depending on the
//! configured depth mode, the depth component may be absent (for example in
//! passive-IR mode), so it is an `Option`.

use thiserror::Error;

/// Errors raised when constructing a [`DepthFrame`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Width or height was zero.
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    EmptyDimension { width: u32, height: u32 },

    /// The sample buffer length does not equal `width * height`.
    #[error("expected {expected} samples for a {width}x{height} frame, got {actual}")]
    SampleCount {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// One depth image: `height` rows of `width` samples, row-major.
///
/// The invariant `samples.len() == width * height` is enforced by
/// [`DepthFrame::new`]; the fields are private so it cannot be broken later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthFrame {
    width: u32,
    height: u32,
    samples: Vec<u16>,
}

impl DepthFrame {
    /// Builds a frame from a flat row-major sample buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::EmptyDimension`] if either dimension is zero, or
    /// [`FrameError::SampleCount`] if the buffer is the wrong length.
    ///
    /// # Example
    ///
    /// ```rust
    /// use depth_core::DepthFrame;
    ///
    /// let frame = DepthFrame::new(3, 2, vec![1, 2, 3, 4, 5, 6]).unwrap();
    /// assert_eq!(frame.row(1), Some(&[4, 5, 6][..]));
    /// ```
    pub fn new(width: u32, height: u32, samples: Vec<u16>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyDimension { width, height });
        }
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(FrameError::SampleCount {
                width,
                height,
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// Samples per row.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The flat row-major sample buffer.
    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    /// Iterates over the rows, top to bottom.
    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[u16]> + '_ {
        // `width` is never zero, so `chunks_exact` cannot panic.
        self.samples.chunks_exact(self.width as usize)
    }

    /// Returns row `y`, or `None` if it is out of range.
    pub fn row(&self, y: u32) -> Option<&[u16]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.width as usize;
        self.samples.get(start..start + self.width as usize)
    }

    /// Returns the sample at column `x`, row `y`.
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width {
            return None;
        }
        self.row(y).map(|row| row[x as usize])
    }

    /// Summarises the valid (non-zero) samples of the frame.
    pub fn stats(&self) -> DepthStats {
        let mut stats = DepthStats {
            total: self.samples.len(),
            valid: 0,
            min_mm: None,
            max_mm: None,
        };
        for &sample in self.samples.iter().filter(|&&s| s != 0) {
            stats.valid += 1;
            stats.min_mm = Some(stats.min_mm.map_or(sample, |m| m.min(sample)));
            stats.max_mm = Some(stats.max_mm.map_or(sample, |m| m.max(sample)));
        }
        stats
    }
}

/// Summary of a frame's valid samples, as produced by [`DepthFrame::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStats {
    /// Total number of samples (`width * height`).
    pub total: usize,
    /// Number of non-zero samples.
    pub valid: usize,
    /// Nearest valid distance, `None` if no sample is valid.
    pub min_mm: Option<u16>,
    /// Farthest valid distance, `None` if no sample is valid.
    pub max_mm: Option<u16>,
}

impl DepthStats {
    /// Fraction of samples that carry a valid return, in `0.0..=1.0`.
    pub fn valid_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.valid as f64 / self.total as f64
    }
}

/// The result of one device acquisition.
///
/// Only the depth component is consumed by this project.  It is `None` when
/// the device produced no depth image for this acquisition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capture {
    pub depth: Option<DepthFrame>,
}

impl Capture {
    /// A capture carrying a depth image.
    pub fn with_depth(frame: DepthFrame) -> Self {
        Self { depth: Some(frame) }
    }

    /// A capture with no depth component.
    pub fn empty() -> Self {
        Self { depth: None }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
