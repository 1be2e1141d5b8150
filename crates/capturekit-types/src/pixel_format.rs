//! Pixel formats and the memory layout of their planes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Row strides are rounded up to this many bytes.
pub const ROW_ALIGNMENT: usize = 64;

/// Pixel format of captured video frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed little-endian ARGB8888 (`'BGRA'`).
    #[default]
    Bgra32,

    /// Packed little-endian ARGB2101010 (`'l10r'`).
    Argb2101010,

    /// Two-plane video-range YCbCr 4:2:0 (`'420v'`).
    YCbCr420Video,

    /// Two-plane full-range YCbCr 4:2:0 (`'420f'`).
    YCbCr420Full,
}

impl PixelFormat {
    /// All supported formats.
    pub const ALL: [PixelFormat; 4] = [
        Self::Bgra32,
        Self::Argb2101010,
        Self::YCbCr420Video,
        Self::YCbCr420Full,
    ];

    /// Big-endian four-char code.
    pub const fn four_cc(self) -> u32 {
        u32::from_be_bytes(*self.code())
    }

    const fn code(self) -> &'static [u8; 4] {
        match self {
            Self::Bgra32 => b"BGRA",
            Self::Argb2101010 => b"l10r",
            Self::YCbCr420Video => b"420v",
            Self::YCbCr420Full => b"420f",
        }
    }

    /// Look up a format by its four-char code.
    pub fn from_four_cc(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.four_cc() == code)
    }

    /// Number of memory planes. Packed formats report 1.
    pub const fn plane_count(self) -> usize {
        match self {
            Self::Bgra32 | Self::Argb2101010 => 1,
            Self::YCbCr420Video | Self::YCbCr420Full => 2,
        }
    }

    pub const fn is_planar(self) -> bool {
        self.plane_count() > 1
    }

    /// Compute the layout of every plane for a `width` x `height` buffer.
    ///
    /// Planes are stored back to back; each `offset` is relative to the
    /// start of the allocation.
    pub fn plane_layouts(self, width: u32, height: u32) -> Vec<PlaneLayout> {
        let w = width as usize;
        let h = height as usize;

        match self {
            Self::Bgra32 | Self::Argb2101010 => vec![PlaneLayout::new(w, h, 4, 0)],
            Self::YCbCr420Video | Self::YCbCr420Full => {
                let luma = PlaneLayout::new(w, h, 1, 0);
                let chroma = PlaneLayout::new(w.div_ceil(2), h.div_ceil(2), 2, luma.len());
                vec![luma, chroma]
            }
        }
    }

    /// Total bytes needed for a `width` x `height` buffer.
    pub fn data_size(self, width: u32, height: u32) -> usize {
        self.plane_layouts(width, height)
            .iter()
            .map(PlaneLayout::len)
            .sum()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&four_cc_to_string(self.four_cc()))
    }
}

/// Render a four-char code as text, replacing non-printable bytes with '?'.
pub fn four_cc_to_string(code: u32) -> String {
    code.to_be_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}

/// Memory layout of a single plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Plane width in elements.
    pub width: usize,

    /// Plane height in rows.
    pub height: usize,

    /// Bytes per element.
    pub bytes_per_element: usize,

    /// Row stride in bytes, aligned to [`ROW_ALIGNMENT`].
    pub bytes_per_row: usize,

    /// Byte offset of the plane inside the allocation.
    pub offset: usize,
}

impl PlaneLayout {
    fn new(width: usize, height: usize, bytes_per_element: usize, offset: usize) -> Self {
        let bytes_per_row = (width * bytes_per_element).next_multiple_of(ROW_ALIGNMENT);
        Self {
            width,
            height,
            bytes_per_element,
            bytes_per_row,
            offset,
        }
    }

    /// Size of the plane in bytes.
    pub fn len(&self) -> usize {
        self.bytes_per_row * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_cc_codes() {
        assert_eq!(PixelFormat::Bgra32.four_cc(), 0x4247_5241);
        assert_eq!(PixelFormat::from_four_cc(0x4247_5241), Some(PixelFormat::Bgra32));
        assert_eq!(PixelFormat::YCbCr420Video.to_string(), "420v");
        assert_eq!(PixelFormat::from_four_cc(0), None);
    }

    #[test]
    fn test_bgra_layout_is_single_plane() {
        let planes = PixelFormat::Bgra32.plane_layouts(1920, 1080);
        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0].bytes_per_row, 7680);
        assert_eq!(planes[0].len(), 7680 * 1080);
    }

    #[test]
    fn test_bytes_per_row_alignment() {
        let planes = PixelFormat::Bgra32.plane_layouts(17, 3);
        assert_eq!(planes[0].bytes_per_row, 128);
    }

    #[test]
    fn test_biplanar_layout() {
        let planes = PixelFormat::YCbCr420Full.plane_layouts(101, 51);
        assert_eq!(planes.len(), 2);

        let (luma, chroma) = (planes[0], planes[1]);
        assert_eq!((luma.width, luma.height, luma.bytes_per_element), (101, 51, 1));
        assert_eq!((chroma.width, chroma.height, chroma.bytes_per_element), (51, 26, 2));
        assert_eq!(chroma.offset, luma.len());
        assert_eq!(
            PixelFormat::YCbCr420Full.data_size(101, 51),
            luma.len() + chroma.len()
        );
    }

    #[test]
    fn test_non_printable_four_cc() {
        assert_eq!(four_cc_to_string(0x0000_4142), "??AB");
    }
}
