//! Rectangular region of interest on a detector frame.
//!
//! Bounds are half-open in both directions (`xmin..xmax`, `ymin..ymax`), the
//! same convention as array slicing, so a ROI of `0..ncol` x `0..nrow` covers
//! the whole frame.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::frame::FrameError;

/// Region of interest in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roi {
    /// First column included in the window
    pub xmin: usize,
    /// One past the last column included in the window
    pub xmax: usize,
    /// First row included in the window
    pub ymin: usize,
    /// One past the last row included in the window
    pub ymax: usize,
}

impl Roi {
    pub fn new(xmin: usize, xmax: usize, ymin: usize, ymax: usize) -> Self {
        Self {
            xmin,
            xmax,
            ymin,
            ymax,
        }
    }

    /// Number of columns covered by the window.
    pub fn width(&self) -> usize {
        self.xmax.saturating_sub(self.xmin)
    }

    /// Number of rows covered by the window.
    pub fn height(&self) -> usize {
        self.ymax.saturating_sub(self.ymin)
    }

    /// Validate that the window is non-empty and fits inside a `nrow` x `ncol` frame.
    pub fn validate_for_frame(&self, nrow: usize, ncol: usize) -> Result<(), FrameError> {
        if self.width() == 0 || self.height() == 0 || self.xmax > ncol || self.ymax > nrow {
            return Err(FrameError::Bounds {
                roi: *self,
                nrow,
                ncol,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "x[{}..{}) y[{}..{})",
            self.xmin, self.xmax, self.ymin, self.ymax
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roi_dimensions() {
        let roi = Roi::new(10, 30, 5, 45);
        assert_eq!(roi.width(), 20);
        assert_eq!(roi.height(), 40);

        let inverted = Roi::new(30, 10, 5, 45);
        assert_eq!(inverted.width(), 0);
    }

    #[test]
    fn test_roi_validation() {
        // Full frame is valid
        assert!(Roi::new(0, 200, 0, 100).validate_for_frame(100, 200).is_ok());

        // Extends past the last column
        assert!(Roi::new(0, 201, 0, 100).validate_for_frame(100, 200).is_err());

        // Extends past the last row
        assert!(Roi::new(0, 200, 0, 101).validate_for_frame(100, 200).is_err());

        // Empty windows
        assert!(Roi::new(5, 5, 0, 10).validate_for_frame(100, 200).is_err());
        assert!(Roi::new(0, 10, 7, 3).validate_for_frame(100, 200).is_err());
    }

    #[test]
    fn test_roi_display() {
        assert_eq!(Roi::new(1, 2, 3, 4).to_string(), "x[1..2) y[3..4)");
    }
}
