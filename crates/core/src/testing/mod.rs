//! Testing utilities and mock implementations of the collaborator seams.
//!
//! Lets the connection client and the pipeline be exercised without a control
//! service, a camera or an upload endpoint.
//!
//! # Example
//!
//! ```rust,ignore
//! use snap_core::testing::{MockConnector, MockUploader};
//!
//! let connector = MockConnector::new();
//! let (handle, client) = ConnectionClient::new(Arc::new(connector.clone()), timing);
//!
//! // Drive the socket by hand
//! connector.open(0);
//! connector.deliver(0, r#"42["message",{"type":"take-capture",...}]"#);
//! assert_eq!(connector.sent(0).len(), 1);
//! ```

mod mock_capture_device;
mod mock_connector;
mod mock_uploader;
mod recording_stage;

pub use mock_capture_device::MockCaptureDevice;
pub use mock_connector::MockConnector;
pub use mock_uploader::MockUploader;
pub use recording_stage::RecordingStage;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    use crate::connection::EVENT_PREFIX;

    /// Writes a solid-color JPEG.
    pub fn write_jpeg(path: &Path, width: u32, height: u32, rgb: [u8; 3]) {
        RgbImage::from_pixel(width, height, Rgb(rgb))
            .save_with_format(path, image::ImageFormat::Jpeg)
            .expect("write test jpeg");
    }

    /// Writes a solid-color PNG.
    pub fn write_png(path: &Path, width: u32, height: u32, rgba: [u8; 4]) {
        RgbaImage::from_pixel(width, height, Rgba(rgba))
            .save_with_format(path, image::ImageFormat::Png)
            .expect("write test png");
    }

    /// An inbound take-capture frame as the control service sends it.
    pub fn take_capture_frame(instance_id: &str, session_id: &str, user_id: &str, tag: &str) -> String {
        let event = serde_json::json!({
            "type": "take-capture",
            "instanceId": instance_id,
            "sessionId": session_id,
            "userId": user_id,
            "tag": tag,
        });
        format!("{}{}]", EVENT_PREFIX, event)
    }
}
