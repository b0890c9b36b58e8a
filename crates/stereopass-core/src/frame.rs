//! Stereo frame model and the left/right eye split.
//!
//! A [`StereoFrame`] is one combined capture, both eyes side by side in
//! packed RGB rows. [`EyeImage`] is a borrowed column-range view into
//! it; no pixel data is copied until the upload stage converts a view
//! into the staging buffer.

use bytes::Bytes;

/// Bytes per pixel of a captured frame (packed RGB).
pub const CAPTURE_CHANNELS: usize = 3;

/// Bytes per pixel of an uploaded texture (RGBA).
pub const TEXTURE_CHANNELS: usize = 4;

/// One combined stereo capture. Ephemeral: built each tick, dropped
/// after the split views are consumed.
#[derive(Debug, Clone)]
pub struct StereoFrame {
    width: u32,
    height: u32,
    data: Bytes,
}

impl StereoFrame {
    /// Wrap a packed RGB buffer. Returns `None` when the buffer does
    /// not hold exactly `width * height` pixels.
    pub fn new(width: u32, height: u32, data: Bytes) -> Option<Self> {
        let expected = width as usize * height as usize * CAPTURE_CHANNELS;
        if data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Split at the horizontal midpoint. Odd widths floor the split
    /// point, silently dropping the last column.
    pub fn split(&self) -> (EyeImage<'_>, EyeImage<'_>) {
        let eye_width = self.width / 2;
        (
            EyeImage {
                frame: self,
                x_offset: 0,
                width: eye_width,
            },
            EyeImage {
                frame: self,
                x_offset: eye_width,
                width: eye_width,
            },
        )
    }
}

/// Borrowed view covering one eye's columns of a [`StereoFrame`].
/// Invalidated when the next frame is captured.
#[derive(Debug, Clone, Copy)]
pub struct EyeImage<'a> {
    frame: &'a StereoFrame,
    x_offset: u32,
    width: u32,
}

impl<'a> EyeImage<'a> {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    /// True when the view covers no pixels (e.g. a degenerate capture).
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.frame.height == 0
    }

    /// Packed RGB bytes of row `y` restricted to this eye's columns.
    pub fn row(&self, y: u32) -> &'a [u8] {
        let stride = self.frame.width as usize * CAPTURE_CHANNELS;
        let start = y as usize * stride + self.x_offset as usize * CAPTURE_CHANNELS;
        &self.frame.data[start..start + self.width as usize * CAPTURE_CHANNELS]
    }

    /// Byte size of this view converted to RGBA.
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.frame.height as usize * TEXTURE_CHANNELS
    }

    /// Convert this view to RGBA into `dst`, row by row. The alpha
    /// channel is forced opaque. `dst` must hold [`Self::rgba_len`]
    /// bytes; the upload stage points it at the mapped staging buffer.
    pub fn copy_rgba_into(&self, dst: &mut [u8]) {
        debug_assert!(dst.len() >= self.rgba_len());
        let row_pixels = self.width as usize;
        for y in 0..self.frame.height {
            let src = self.row(y);
            let dst_row = &mut dst
                [y as usize * row_pixels * TEXTURE_CHANNELS..(y as usize + 1) * row_pixels * TEXTURE_CHANNELS];
            for x in 0..row_pixels {
                let s = &src[x * CAPTURE_CHANNELS..x * CAPTURE_CHANNELS + CAPTURE_CHANNELS];
                let d = &mut dst_row[x * TEXTURE_CHANNELS..x * TEXTURE_CHANNELS + TEXTURE_CHANNELS];
                d[0] = s[0];
                d[1] = s[1];
                d[2] = s[2];
                d[3] = 0xFF;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_column_indices(width: u32, height: u32) -> StereoFrame {
        // Each pixel carries its column index so split boundaries are
        // visible in the byte stream.
        let mut data = Vec::with_capacity(width as usize * height as usize * CAPTURE_CHANNELS);
        for _y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, x as u8, x as u8]);
            }
        }
        StereoFrame::new(width, height, Bytes::from(data)).unwrap()
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(StereoFrame::new(4, 2, Bytes::from_static(&[0u8; 10])).is_none());
    }

    #[test]
    fn split_covers_exact_column_ranges() {
        let frame = frame_with_column_indices(8, 3);
        let (left, right) = frame.split();
        assert_eq!(left.width(), 4);
        assert_eq!(right.width(), 4);
        assert_eq!(left.height(), 3);
        assert_eq!(right.height(), 3);
        for y in 0..3 {
            let l = left.row(y);
            let r = right.row(y);
            assert_eq!(l[0], 0);
            assert_eq!(l[l.len() - CAPTURE_CHANNELS], 3);
            assert_eq!(r[0], 4);
            assert_eq!(r[r.len() - CAPTURE_CHANNELS], 7);
        }
    }

    #[test]
    fn odd_width_drops_last_column() {
        let frame = frame_with_column_indices(9, 2);
        let (left, right) = frame.split();
        assert_eq!(left.width(), 4);
        assert_eq!(right.width(), 4);
        // Column 8 is unreachable from either view.
        let r = right.row(0);
        assert_eq!(r[r.len() - CAPTURE_CHANNELS], 7);
    }

    #[test]
    fn one_column_frame_splits_to_empty_eyes() {
        // Width 1 floors to zero-width views; the upload stage must be
        // able to see and skip them.
        let frame = frame_with_column_indices(1, 2);
        let (left, right) = frame.split();
        assert!(left.is_empty());
        assert!(right.is_empty());
        assert_eq!(left.rgba_len(), 0);
    }

    #[test]
    fn rgba_conversion_sets_opaque_alpha() {
        let frame = frame_with_column_indices(4, 2);
        let (left, _) = frame.split();
        let mut out = vec![0u8; left.rgba_len()];
        left.copy_rgba_into(&mut out);
        assert_eq!(out.len(), 2 * 2 * TEXTURE_CHANNELS);
        // First pixel of the left eye is column 0, opaque.
        assert_eq!(&out[0..4], &[0, 0, 0, 0xFF]);
        // Last pixel of row 0 is column 1.
        assert_eq!(&out[4..8], &[1, 1, 1, 0xFF]);
    }

    #[test]
    fn right_eye_conversion_reads_right_columns() {
        let frame = frame_with_column_indices(6, 1);
        let (_, right) = frame.split();
        let mut out = vec![0u8; right.rgba_len()];
        right.copy_rgba_into(&mut out);
        assert_eq!(out[0], 3);
        assert_eq!(out[4], 4);
        assert_eq!(out[8], 5);
    }
}
