//! Detector frame model.
//!
//! A [`Frame`] owns a 2D intensity array in row-major `(nrow, ncol)` layout,
//! the same indexing ndarray uses (`[row, col]` = `[y, x]`). Frames are built
//! from the flat waveform a diagnostic device returns, optionally have a
//! background removed and a region of interest cropped, and are finally
//! projected onto each transverse axis for profile fitting.
//!
//! Background subtraction keeps the sign of the result. Pixels that end up
//! below zero stay negative; the profile fit carries a constant offset term
//! that absorbs the resulting pedestal.

use ndarray::{s, Array1, Array2, ArrayView2};
use thiserror::Error;

use super::roi::Roi;

/// Errors produced by frame construction and manipulation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    /// Raw payload length does not match the requested dimensions.
    #[error("cannot reshape {len} samples into {nrow}x{ncol}")]
    Shape {
        /// Number of samples in the payload.
        len: usize,
        /// Requested row count.
        nrow: usize,
        /// Requested column count.
        ncol: usize,
    },

    /// Region of interest falls outside the frame or is empty.
    #[error("ROI {roi} outside {nrow}x{ncol} frame")]
    Bounds {
        /// Offending window.
        roi: Roi,
        /// Frame row count.
        nrow: usize,
        /// Frame column count.
        ncol: usize,
    },

    /// Background array dimensions differ from the frame.
    #[error("background is {bg_rows}x{bg_cols}, frame is {nrow}x{ncol}")]
    BackgroundShape {
        bg_rows: usize,
        bg_cols: usize,
        nrow: usize,
        ncol: usize,
    },

    /// A background was already removed from this frame.
    #[error("background already subtracted")]
    BackgroundAlreadySubtracted,

    /// Averaging requires at least one frame.
    #[error("no frames to average")]
    EmptyAverage,

    /// Frames being averaged differ in dimensions or background state.
    #[error("frames to average disagree in dimensions or background state")]
    AverageMismatch,
}

/// Transverse axis of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Horizontal axis (columns)
    X,
    /// Vertical axis (rows)
    Y,
}

/// 2D detector frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    data: Array2<f64>,
    background_subtracted: bool,
}

impl Frame {
    /// Build a frame from a flat row-major waveform.
    pub fn reshape(raw: Vec<f64>, nrow: usize, ncol: usize) -> Result<Self, FrameError> {
        let len = raw.len();
        if nrow.checked_mul(ncol) != Some(len) {
            return Err(FrameError::Shape { len, nrow, ncol });
        }
        let data = Array2::from_shape_vec((nrow, ncol), raw)
            .map_err(|_| FrameError::Shape { len, nrow, ncol })?;
        Ok(Self::from_array(data))
    }

    /// Wrap an existing array. The frame is treated as raw (no background removed).
    pub fn from_array(data: Array2<f64>) -> Self {
        Self {
            data,
            background_subtracted: false,
        }
    }

    pub fn nrow(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncol(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as `(nrow, ncol)`.
    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn into_array(self) -> Array2<f64> {
        self.data
    }

    pub fn is_background_subtracted(&self) -> bool {
        self.background_subtracted
    }

    /// Subtract a background array elementwise.
    ///
    /// Consumes the frame so the raw intensities cannot be reused by mistake.
    /// A second subtraction on the same frame is rejected.
    pub fn subtract_background(mut self, background: &ArrayView2<f64>) -> Result<Self, FrameError> {
        if self.background_subtracted {
            return Err(FrameError::BackgroundAlreadySubtracted);
        }
        if background.dim() != self.data.dim() {
            let (bg_rows, bg_cols) = background.dim();
            return Err(FrameError::BackgroundShape {
                bg_rows,
                bg_cols,
                nrow: self.nrow(),
                ncol: self.ncol(),
            });
        }
        self.data -= background;
        self.background_subtracted = true;
        Ok(self)
    }

    /// Copy out the region of interest.
    pub fn crop(&self, roi: &Roi) -> Result<Self, FrameError> {
        roi.validate_for_frame(self.nrow(), self.ncol())?;
        let data = self
            .data
            .slice(s![roi.ymin..roi.ymax, roi.xmin..roi.xmax])
            .to_owned();
        Ok(Self {
            data,
            background_subtracted: self.background_subtracted,
        })
    }

    /// Sum intensity along the orthogonal axis for every index of `axis`.
    ///
    /// The X projection has one entry per column, the Y projection one entry
    /// per row.
    pub fn project(&self, axis: Axis) -> Array1<f64> {
        match axis {
            Axis::X => self.data.sum_axis(ndarray::Axis(0)),
            Axis::Y => self.data.sum_axis(ndarray::Axis(1)),
        }
    }

    /// Elementwise mean of a set of frames.
    ///
    /// All frames must share dimensions and background state; the result
    /// inherits that background state.
    pub fn mean_of(frames: &[Frame]) -> Result<Frame, FrameError> {
        let first = frames.first().ok_or(FrameError::EmptyAverage)?;
        let mut sum = Array2::<f64>::zeros(first.dim());

        for frame in frames {
            if frame.dim() != first.dim()
                || frame.background_subtracted != first.background_subtracted
            {
                return Err(FrameError::AverageMismatch);
            }
            sum += &frame.data;
        }

        sum.mapv_inplace(|v| v / frames.len() as f64);
        Ok(Frame {
            data: sum,
            background_subtracted: first.background_subtracted,
        })
    }
}
