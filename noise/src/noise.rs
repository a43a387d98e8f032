use std::sync::Arc;

use image::DynamicImage;
use mjpeg_common::config::NoiseConfig;
use mjpeg_stream::Stream;
use rand::RngCore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An 8-bit gray image whose pixels are re-randomized for every frame.
pub struct NoiseSource {
    frame: DynamicImage,
}

impl NoiseSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: DynamicImage::new_luma8(width, height),
        }
    }

    pub fn next_frame(&mut self, rng: &mut impl RngCore) -> &DynamicImage {
        if let Some(pixels) = self.frame.as_mut_luma8() {
            rng.fill_bytes(pixels);
        }
        &self.frame
    }
}

/// Publish a fresh noise frame every `config.frame_interval()` until cancelled.
///
/// Blocks the calling thread; run it on a dedicated one.
pub fn run_noise_loop(stream: Arc<Stream>, config: NoiseConfig, cancel: CancellationToken) -> u64 {
    let mut source = NoiseSource::new(config.width, config.height);
    let mut rng = rand::thread_rng();
    let interval = config.frame_interval();
    let mut published: u64 = 0;

    info!(
        width = config.width,
        height = config.height,
        fps = config.fps,
        "noise producer started"
    );

    while !cancel.is_cancelled() {
        std::thread::sleep(interval);
        match stream.update(source.next_frame(&mut rng)) {
            Ok(frame) => {
                published += 1;
                if frame.seq % 100 == 0 {
                    debug!(
                        seq = frame.seq,
                        bytes = frame.len(),
                        sessions = stream.active_sessions(),
                        "published noise frame"
                    );
                }
            }
            Err(e) => warn!(error = %e, "failed to publish noise frame"),
        }
    }

    info!(published, "noise producer stopped");
    published
}
