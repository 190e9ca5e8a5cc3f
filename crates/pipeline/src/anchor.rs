//! Continuity anchor derivation: clip in, final-frame still out.
//!
//! The deriver downloads the finished clip, extracts its last frame into a
//! scratch directory, checks that the frame decodes to a non-empty image,
//! and stores it. Failures are retried here with their own budget and
//! backoff, independent of the job retry policy.

use std::io::Cursor;
use std::sync::Arc;

use shotline_core::backoff::BackoffConfig;

use crate::ffmpeg::{FfmpegError, FrameExtractor};
use crate::storage::{ObjectStore, StorageError};

/// File name of the downloaded clip inside the scratch directory.
const CLIP_FILE: &str = "clip.mp4";

/// File name of the extracted frame inside the scratch directory.
const FRAME_FILE: &str = "last_frame.png";

#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("frame extraction failed: {0}")]
    Ffmpeg(#[from] FfmpegError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("extracted frame is not a usable image: {0}")]
    InvalidFrame(String),
}

/// A stored final-frame still.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedAnchor {
    pub image_url: String,
    pub width: u32,
    pub height: u32,
}

/// Turns completed clips into continuity anchors.
#[derive(Clone)]
pub struct AnchorDeriver {
    store: Arc<dyn ObjectStore>,
    extractor: Arc<dyn FrameExtractor>,
}

impl AnchorDeriver {
    pub fn new(store: Arc<dyn ObjectStore>, extractor: Arc<dyn FrameExtractor>) -> Self {
        Self { store, extractor }
    }

    /// One derivation attempt.
    pub async fn derive(&self, clip_url: &str) -> Result<DerivedAnchor, AnchorError> {
        let clip = self.store.fetch_clip(clip_url).await?;
        if clip.is_empty() {
            return Err(AnchorError::InvalidFrame(format!("clip {clip_url} is empty")));
        }

        let scratch = tempfile::tempdir()?;
        let clip_path = scratch.path().join(CLIP_FILE);
        let frame_path = scratch.path().join(FRAME_FILE);
        tokio::fs::write(&clip_path, &clip).await?;

        self.extractor
            .extract_last_frame(&clip_path, &frame_path)
            .await?;

        let frame = tokio::fs::read(&frame_path).await?;
        let (width, height) = frame_dimensions(&frame)?;
        let image_url = self.store.store_image(&frame).await?;

        Ok(DerivedAnchor {
            image_url,
            width,
            height,
        })
    }

    /// Derive with up to `max_attempts` tries, sleeping per `backoff`
    /// between them. Returns the last error once the budget is spent.
    pub async fn derive_with_retry(
        &self,
        clip_url: &str,
        max_attempts: u32,
        backoff: &BackoffConfig,
    ) -> Result<DerivedAnchor, AnchorError> {
        let mut attempt = 1u32;
        loop {
            match self.derive(clip_url).await {
                Ok(anchor) => return Ok(anchor),
                Err(e) if attempt < max_attempts => {
                    let delay = backoff.delay_for_retry(attempt);
                    tracing::warn!(
                        clip_url,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Anchor derivation failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Read image dimensions from the header, rejecting undecodable or empty
/// frames.
pub fn frame_dimensions(bytes: &[u8]) -> Result<(u32, u32), AnchorError> {
    let (width, height) = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()
        .map_err(|e| AnchorError::InvalidFrame(e.to_string()))?;
    if width == 0 || height == 0 {
        return Err(AnchorError::InvalidFrame(format!(
            "frame is {width}x{height}"
        )));
    }
    Ok((width, height))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;

    /// 1x1 RGBA PNG.
    const TINY_PNG: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
        0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0xDA, 0x63, 0x64,
        0x60, 0xF8, 0x5F, 0x0F, 0x00, 0x02, 0x87, 0x01, 0x80, 0xEB, 0x47, 0xBA, 0x92, 0x00, 0x00,
        0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];

    #[derive(Default)]
    struct MemStore {
        clips: HashMap<String, Vec<u8>>,
        images: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl ObjectStore for MemStore {
        async fn store_image(&self, bytes: &[u8]) -> Result<String, StorageError> {
            let mut images = self.images.lock().unwrap();
            images.push(bytes.to_vec());
            Ok(format!("mem://anchors/{}.png", images.len()))
        }
        async fn fetch_clip(&self, url: &str) -> Result<Vec<u8>, StorageError> {
            self.clips
                .get(url)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(url.to_string()))
        }
    }

    /// Writes `frame` as the extracted image, failing the first
    /// `failures` calls.
    struct StubExtractor {
        frame: Vec<u8>,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl FrameExtractor for StubExtractor {
        async fn extract_last_frame(
            &self,
            _clip_path: &Path,
            output_path: &Path,
        ) -> Result<(), FfmpegError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(FfmpegError::ExecutionFailed {
                    exit_code: Some(1),
                    stderr: "moov atom not found".into(),
                });
            }
            tokio::fs::write(output_path, &self.frame).await?;
            Ok(())
        }
    }

    fn deriver(frame: &[u8], failures: u32) -> (AnchorDeriver, Arc<MemStore>, Arc<StubExtractor>) {
        let mut store = MemStore::default();
        store.clips.insert("clip://1".into(), vec![1, 2, 3]);
        let store = Arc::new(store);
        let extractor = Arc::new(StubExtractor {
            frame: frame.to_vec(),
            failures,
            calls: AtomicU32::new(0),
        });
        (
            AnchorDeriver::new(store.clone(), extractor.clone()),
            store,
            extractor,
        )
    }

    fn backoff() -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }

    #[test]
    fn png_header_dimensions() {
        assert_eq!(frame_dimensions(TINY_PNG).unwrap(), (1, 1));
    }

    #[test]
    fn garbage_frame_is_invalid() {
        assert_matches!(frame_dimensions(b"not an image"), Err(AnchorError::InvalidFrame(_)));
    }

    #[tokio::test]
    async fn derive_stores_final_frame() {
        let (deriver, store, _) = deriver(TINY_PNG, 0);
        let anchor = deriver.derive("clip://1").await.unwrap();
        assert_eq!(anchor.image_url, "mem://anchors/1.png");
        assert_eq!((anchor.width, anchor.height), (1, 1));
        assert_eq!(store.images.lock().unwrap()[0], TINY_PNG);
    }

    #[tokio::test]
    async fn unreachable_clip_is_storage_error() {
        let (deriver, _, _) = deriver(TINY_PNG, 0);
        assert_matches!(
            deriver.derive("clip://missing").await,
            Err(AnchorError::Storage(StorageError::NotFound(_)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_extraction_failure() {
        let (deriver, _, extractor) = deriver(TINY_PNG, 2);
        let anchor = deriver
            .derive_with_retry("clip://1", 3, &backoff())
            .await
            .unwrap();
        assert_eq!(anchor.width, 1);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_is_bounded() {
        let (deriver, store, extractor) = deriver(TINY_PNG, u32::MAX);
        assert_matches!(
            deriver.derive_with_retry("clip://1", 3, &backoff()).await,
            Err(AnchorError::Ffmpeg(_))
        );
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
        assert!(store.images.lock().unwrap().is_empty());
    }
}
