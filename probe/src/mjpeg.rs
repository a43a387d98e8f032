use std::io::Cursor;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use image::{ImageFormat, ImageReader};
use mjpeg_common::multipart::{boundary_from_content_type, MultipartParser, Part, IMAGE_JPEG};
use mjpeg_common::Frame;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, error, info, warn};

use crate::ProbeError;

const REPORT_EVERY: Duration = Duration::from_secs(2);

/// Counters for everything received across reconnects.
pub struct ProbeStats {
    pub frames: u64,
    pub bytes: u64,
    pub skipped: u64,
    pub last: Option<Frame>,
    window_start: Instant,
    window_frames: u64,
}

impl Default for ProbeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeStats {
    pub fn new() -> Self {
        Self {
            frames: 0,
            bytes: 0,
            skipped: 0,
            last: None,
            window_start: Instant::now(),
            window_frames: 0,
        }
    }

    pub fn record(&mut self, frame: Frame) {
        self.frames += 1;
        self.bytes += frame.len() as u64;
        self.window_frames += 1;
        debug!(
            seq = frame.seq,
            bytes = frame.len(),
            width = frame.width,
            height = frame.height,
            "received frame"
        );
        self.last = Some(frame);

        if self.window_start.elapsed() >= REPORT_EVERY {
            self.report();
        }
    }

    /// Whether `max_frames` (0 = unlimited) has been reached.
    pub fn reached(&self, max_frames: u64) -> bool {
        max_frames > 0 && self.frames >= max_frames
    }

    fn report(&mut self) {
        let secs = self.window_start.elapsed().as_secs_f64();
        let fps = self.window_frames as f64 / secs;
        info!(
            frames = self.frames,
            skipped = self.skipped,
            fps = format!("{fps:.1}"),
            avg_bytes = self.bytes / self.frames.max(1),
            "stream stats"
        );
        self.window_start = Instant::now();
        self.window_frames = 0;
    }
}

/// Watch an MJPEG stream, reconnecting with exponential backoff on failure.
/// Returns once `max_frames` frames were received; 0 keeps going forever.
pub async fn run_probe(url: &str, max_frames: u64) -> Result<u64, ProbeError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(ProbeError::HttpConnect)?;
    let mut stats = ProbeStats::new();
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);

    loop {
        info!(url, "connecting to MJPEG stream");
        match consume_stream(&client, url, &mut stats, max_frames).await {
            Ok(()) if stats.reached(max_frames) => return Ok(stats.frames),
            Ok(()) => {
                info!(frames = stats.frames, "stream ended cleanly, reconnecting");
                backoff = Duration::from_secs(2);
            }
            Err(e) => {
                error!(error = %e, "stream error, reconnecting in {:?}", backoff);
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

pub(crate) async fn consume_stream(
    client: &reqwest::Client,
    url: &str,
    stats: &mut ProbeStats,
    max_frames: u64,
) -> Result<(), ProbeError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(ProbeError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(ProbeError::HttpStatus(response.status().as_u16()));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let boundary = boundary_from_content_type(&content_type)
        .ok_or_else(|| ProbeError::NotMjpeg(content_type.clone()))?;
    let mut parser = MultipartParser::new(boundary)?;

    info!(status = %response.status(), boundary, "connected to MJPEG stream");

    let mut byte_stream = response.bytes_stream();
    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(ProbeError::HttpStream)?;
        parser.push(&chunk);

        while let Some(part) = parser.next_part()? {
            match inspect_part(part, stats.frames + 1) {
                Some(frame) => stats.record(frame),
                None => stats.skipped += 1,
            }
            if stats.reached(max_frames) {
                return Ok(());
            }
        }

        if parser.is_closed() {
            info!(frames = stats.frames, "server closed the multipart stream");
            break;
        }
    }

    Ok(())
}

/// Turn a received part into a [`Frame`], reading only the JPEG header.
pub(crate) fn inspect_part(part: Part, seq: u64) -> Option<Frame> {
    if part.content_type.as_deref() != Some(IMAGE_JPEG) {
        warn!(content_type = ?part.content_type, "skipping non-JPEG part");
        return None;
    }

    let mut reader = ImageReader::new(Cursor::new(&part.body[..]));
    reader.set_format(ImageFormat::Jpeg);
    match reader.into_dimensions() {
        Ok((width, height)) => Some(Frame::new(part.body, seq, width, height)),
        Err(e) => {
            warn!(error = %e, bytes = part.body.len(), "skipping undecodable JPEG part");
            None
        }
    }
}
