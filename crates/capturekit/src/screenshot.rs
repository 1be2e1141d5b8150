//! One-shot screenshots.

use capturekit_ffi as ffi;
use capturekit_types::Rect;
use tracing::instrument;

use crate::buffer::{PixelBuffer, SampleBuffer};
use crate::completion::{handle_trampoline, submit, Completion};
use crate::configuration::StreamConfiguration;
use crate::error::Result;
use crate::filter::ContentFilter;
use crate::handle::{adopt, handle_type, HandleType};

handle_type!(
    /// A captured still image.
    Image
);

impl Image {
    pub fn width(&self) -> u32 {
        ffi::sc_image_get_width(self.as_ptr())
    }

    pub fn height(&self) -> u32 {
        ffi::sc_image_get_height(self.as_ptr())
    }

    /// New reference to the image's pixels.
    pub fn pixel_buffer(&self) -> Result<PixelBuffer> {
        // SAFETY: the C ABI hands us a new reference.
        unsafe { adopt(ffi::sc_image_copy_pixel_buffer(self.as_ptr()), "image pixel buffer") }
    }
}

/// Capture a single image of `filter`.
///
/// An invalid configuration is reported through the completion.
#[instrument(name = "screenshot", skip_all)]
pub fn capture_image(
    filter: &ContentFilter,
    configuration: &StreamConfiguration,
) -> Result<Completion<Image>> {
    submit("screenshot", |context| {
        ffi::sc_screenshot_capture(
            filter.as_ptr(),
            configuration.as_ptr(),
            Some(handle_trampoline::<Image>),
            context,
        )
    })
}

/// Capture a single frame of `filter` as an owned video sample.
///
/// The sample carries frame metadata and a pixel buffer, like the ones a
/// stream delivers.
#[instrument(name = "screenshot_sample_buffer", skip_all)]
pub fn capture_sample_buffer(
    filter: &ContentFilter,
    configuration: &StreamConfiguration,
) -> Result<Completion<SampleBuffer>> {
    submit("screenshot sample buffer", |context| {
        ffi::sc_screenshot_capture_sample_buffer(
            filter.as_ptr(),
            configuration.as_ptr(),
            Some(handle_trampoline::<SampleBuffer>),
            context,
        )
    })
}

/// Capture a region of the desktop given in points. The region may span
/// displays.
///
/// An empty rect is rejected immediately; a region that covers no display
/// fails the completion.
#[instrument(name = "screenshot_in_rect", skip_all, fields(width = rect.width(), height = rect.height()))]
pub fn capture_image_in_rect(rect: Rect) -> Result<Completion<Image>> {
    submit("screenshot in rect", |context| {
        ffi::sc_screenshot_capture_image_in_rect(rect, Some(handle_trampoline::<Image>), context)
    })
}
