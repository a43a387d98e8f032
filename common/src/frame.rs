use bytes::Bytes;

/// One encoded still image, as handed out to every connected client.
///
/// The JPEG bytes are shared, so cloning a frame never copies the image.
/// `seq` is assigned by whoever publishes the frame and only ever grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub jpeg: Bytes,
    pub seq: u64,
    pub captured_at_ms: i64,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap already-encoded JPEG bytes, stamping the current wall-clock time.
    pub fn new(jpeg: Bytes, seq: u64, width: u32, height: u32) -> Self {
        Self {
            jpeg,
            seq,
            captured_at_ms: chrono::Utc::now().timestamp_millis(),
            width,
            height,
        }
    }

    pub fn jpeg_data(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
