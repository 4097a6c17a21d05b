//! JSON codec for depth frames.
//!
//! Wire format, one WebSocket text message per frame:
//! ```json
//! {"width":640,"height":576,"depth_data":[[0,812,815,...],...]}
//! ```
//! `depth_data` holds `height` rows of `width` integer samples, row-major,
//! in millimetres.  `0` marks a pixel with no valid return.
//!
//! Encoding serializes rows straight out of the frame's flat buffer, so no
//! nested `Vec<Vec<u16>>` is built on the hot path.  Decoding does build the
//! nested form and checks its shape before producing a [`DepthFrame`].

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::frame::{Capture, DepthFrame, FrameError};

/// Errors that can occur while encoding or decoding a frame payload.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization or parsing failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The declared dimensions do not match the nested sample grid.
    #[error("payload declares {width}x{height} but row {row} has {actual} samples")]
    RowLength {
        width: u32,
        height: u32,
        row: usize,
        actual: usize,
    },

    /// The number of rows does not match the declared height.
    #[error("payload declares height {height} but carries {actual} rows")]
    RowCount { height: u32, actual: usize },

    /// The decoded grid is not a valid frame.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Borrowed view used for encoding; field order fixes the JSON key order.
#[derive(Serialize)]
struct PayloadRef<'a> {
    width: u32,
    height: u32,
    depth_data: Rows<'a>,
}

/// Serializes a frame's rows as a sequence of sequences.
struct Rows<'a>(&'a DepthFrame);

impl Serialize for Rows<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.rows())
    }
}

/// Encodes a frame into its JSON text payload.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
///
/// # Example
///
/// ```rust
/// use depth_core::{encode_frame, DepthFrame};
///
/// let frame = DepthFrame::new(2, 2, vec![0, 900, 901, 902]).unwrap();
/// let json = encode_frame(&frame).unwrap();
/// assert_eq!(json, r#"{"width":2,"height":2,"depth_data":[[0,900],[901,902]]}"#);
/// ```
pub fn encode_frame(frame: &DepthFrame) -> Result<String, CodecError> {
    let payload = PayloadRef {
        width: frame.width(),
        height: frame.height(),
        depth_data: Rows(frame),
    };
    Ok(serde_json::to_string(&payload)?)
}

/// Encodes the depth component of a capture.
///
/// Returns `Ok(None)` when the capture carries no depth image; the caller
/// must skip sending for that cycle rather than emit an empty payload.
pub fn encode_capture(capture: &Capture) -> Result<Option<String>, CodecError> {
    capture.depth.as_ref().map(encode_frame).transpose()
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Owned form of a frame payload, as received by a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramePayload {
    pub width: u32,
    pub height: u32,
    pub depth_data: Vec<Vec<u16>>,
}

impl FramePayload {
    /// Checks the grid shape and flattens it into a [`DepthFrame`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::RowCount`] or [`CodecError::RowLength`] when the
    /// grid disagrees with the declared dimensions.
    pub fn into_frame(self) -> Result<DepthFrame, CodecError> {
        if self.depth_data.len() != self.height as usize {
            return Err(CodecError::RowCount {
                height: self.height,
                actual: self.depth_data.len(),
            });
        }
        // Shape is checked before any sample is copied.
        if let Some((row, values)) = self
            .depth_data
            .iter()
            .enumerate()
            .find(|(_, values)| values.len() != self.width as usize)
        {
            return Err(CodecError::RowLength {
                width: self.width,
                height: self.height,
                row,
                actual: values.len(),
            });
        }
        let samples: Vec<u16> = self.depth_data.into_iter().flatten().collect();
        Ok(DepthFrame::new(self.width, self.height, samples)?)
    }
}

/// Parses a JSON text payload back into a [`DepthFrame`].
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed JSON or out-of-range samples,
/// and a shape error if the rows disagree with `width`/`height`.
pub fn decode_frame(text: &str) -> Result<DepthFrame, CodecError> {
    let payload: FramePayload = serde_json::from_str(text)?;
    payload.into_frame()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
