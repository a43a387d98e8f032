use std::sync::{Mutex, PoisonError, RwLock};

use bytes::Bytes;
use image::DynamicImage;
use mjpeg_common::Frame;

use crate::encode::encode_jpeg;
use crate::error::EncodeError;

/// Writer-side state. Holding its lock makes a caller the single writer.
struct Scratch {
    buf: Vec<u8>,
    seq: u64,
}

/// Holds the most recently published JPEG.
///
/// Many readers, one writer at a time. The encode runs into a reused scratch
/// buffer outside the read/write lock; readers are only excluded while the
/// new [`Frame`] handle is swapped in, so they never see a partial image.
pub struct FrameStore {
    current: RwLock<Option<Frame>>,
    writer: Mutex<Scratch>,
    quality: u8,
}

impl FrameStore {
    pub fn new(quality: u8) -> Self {
        Self {
            current: RwLock::new(None),
            writer: Mutex::new(Scratch {
                buf: Vec::new(),
                seq: 0,
            }),
            quality,
        }
    }

    /// Encode `image` and make it the current frame.
    ///
    /// On error the previously published frame stays in place.
    pub fn update(&self, image: &DynamicImage) -> Result<Frame, EncodeError> {
        let mut scratch = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        encode_jpeg(image, self.quality, &mut scratch.buf)?;

        scratch.seq += 1;
        let frame = Frame::new(
            Bytes::copy_from_slice(&scratch.buf),
            scratch.seq,
            image.width(),
            image.height(),
        );
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(frame.clone());
        Ok(frame)
    }

    /// The current frame, or `None` until the first successful update.
    pub fn read(&self) -> Option<Frame> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sequence number of the current frame; 0 before the first update.
    pub fn seq(&self) -> u64 {
        self.read().map_or(0, |frame| frame.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use std::sync::Arc;

    fn gray(side: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(side, side, Luma([value])))
    }

    #[test]
    fn empty_until_first_update() {
        let store = FrameStore::new(75);
        assert!(store.read().is_none());
        assert_eq!(store.seq(), 0);
    }

    #[test]
    fn read_returns_latest_encode() {
        let store = FrameStore::new(75);
        for (n, value) in [10u8, 120, 250].into_iter().enumerate() {
            let image = gray(4, value);
            let published = store.update(&image).unwrap();

            let mut expected = Vec::new();
            encode_jpeg(&image, 75, &mut expected).unwrap();

            let current = store.read().unwrap();
            assert_eq!(current.jpeg_data(), expected.as_slice());
            assert_eq!(current, published);
            assert_eq!(current.seq, n as u64 + 1);
            assert_eq!(current.dimensions(), (4, 4));
        }
    }

    #[test]
    fn failed_update_keeps_previous_frame() {
        let store = FrameStore::new(75);
        let good = store.update(&gray(2, 128)).unwrap();

        let err = store.update(&DynamicImage::new_luma8(0, 0)).unwrap_err();
        assert!(matches!(err, EncodeError::EmptyImage { .. }));

        assert_eq!(store.read().unwrap(), good);
        assert_eq!(store.seq(), 1);
    }

    #[test]
    fn concurrent_readers_never_see_partial_frames() {
        let store = Arc::new(FrameStore::new(75));
        store.update(&gray(16, 0)).unwrap();

        std::thread::scope(|scope| {
            for writer in 0..4u8 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for i in 0..25u8 {
                        store.update(&gray(16, writer * 50 + i)).unwrap();
                    }
                });
            }
            for _ in 0..8 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    let mut last_seq = 0;
                    for _ in 0..500 {
                        let frame = store.read().unwrap();
                        assert!(!frame.is_empty());
                        assert!(frame.jpeg_data().starts_with(&[0xFF, 0xD8]));
                        assert!(frame.jpeg_data().ends_with(&[0xFF, 0xD9]));
                        assert!(frame.seq >= last_seq, "reader went back in time");
                        last_seq = frame.seq;
                    }
                });
            }
        });

        assert_eq!(store.seq(), 101);
        let decoded = image::load_from_memory(store.read().unwrap().jpeg_data()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }
}
