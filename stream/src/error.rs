use mjpeg_common::multipart::MultipartError;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("cannot encode a {width}x{height} image: both dimensions must be non-zero")]
    EmptyImage { width: u32, height: u32 },
    #[error("cannot encode a {width}x{height} image: JPEG sides are limited to 65535 pixels")]
    TooLarge { width: u32, height: u32 },
    #[error("JPEG encode failed: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("invalid session boundary: {0}")]
    Boundary(#[from] MultipartError),
    #[error("failed to negotiate multipart response: {0}")]
    Negotiate(String),
}
