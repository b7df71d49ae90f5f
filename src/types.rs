use crate::pool::PooledBuffer;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Resolution and frame rate applied identically to every camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CameraFormat {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    /// Time between two frames at the configured rate.
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

impl std::fmt::Display for CameraFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.fps)
    }
}

/// Pixel layout of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    Rgb8,
    Bgr8,
    Mono8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelLayout::Rgb8 | PixelLayout::Bgr8 => 3,
            PixelLayout::Mono8 => 1,
        }
    }
}

/// A decoded image delivered by a camera.
///
/// The pixel data lives in a pooled buffer owned by the source; dropping the
/// frame hands the buffer back.
#[derive(Debug)]
pub struct Frame {
    pub source_index: usize,
    pub sequence: u64,
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    data: PooledBuffer,
}

impl Frame {
    pub fn new(
        source_index: usize,
        sequence: u64,
        timestamp_us: u64,
        width: u32,
        height: u32,
        layout: PixelLayout,
        data: PooledBuffer,
    ) -> Self {
        Self {
            source_index,
            sequence,
            timestamp_us,
            width,
            height,
            layout,
            data,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Expected length of the pixel data for the frame geometry.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.layout.bytes_per_pixel()
    }

    /// Pixel data as packed RGB24, converting only when needed.
    pub fn rgb_bytes(&self) -> Cow<'_, [u8]> {
        let data = &self.data[..self.expected_len().min(self.data.len())];
        match self.layout {
            PixelLayout::Rgb8 => Cow::Borrowed(data),
            PixelLayout::Bgr8 => Cow::Owned(
                data.chunks_exact(3)
                    .flat_map(|px| [px[2], px[1], px[0]])
                    .collect(),
            ),
            PixelLayout::Mono8 => Cow::Owned(data.iter().flat_map(|&v| [v, v, v]).collect()),
        }
    }

    /// Copy the frame into an `image` RGB buffer.
    pub fn to_rgb_image(&self) -> Option<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.rgb_bytes().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(layout: PixelLayout, data: Vec<u8>) -> Frame {
        Frame::new(0, 1, 0, 2, 1, layout, PooledBuffer::detached(data))
    }

    #[test]
    fn test_rgb_is_borrowed() {
        let f = frame(PixelLayout::Rgb8, vec![1, 2, 3, 4, 5, 6]);
        assert!(matches!(f.rgb_bytes(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_bgr_is_swapped() {
        let f = frame(PixelLayout::Bgr8, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(&f.rgb_bytes()[..], &[3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_mono_is_expanded() {
        let f = frame(PixelLayout::Mono8, vec![7, 9]);
        assert_eq!(&f.rgb_bytes()[..], &[7, 7, 7, 9, 9, 9]);
        let image = f.to_rgb_image().expect("image");
        assert_eq!(image.dimensions(), (2, 1));
    }

    #[test]
    fn test_frame_interval() {
        let format = CameraFormat::new(640, 480, 25);
        assert_eq!(format.frame_interval().as_millis(), 40);
        assert_eq!(format.to_string(), "640x480@25");
    }
}
