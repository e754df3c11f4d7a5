//! Background texture fetching with in-order, all-or-nothing commits.
//!
//! A single worker thread fetches and decodes the images one after another in
//! locator order and stops at the first failure, so no locator after a failed
//! one is ever fetched. The worker only produces pixel buffers; the engine
//! thread polls [`TextureLoad`] and performs every GPU upload itself.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use image::GenericImageView;

use crate::backend::TextureId;
use crate::error::EngineError;
use crate::types::TextureUnit;

/// Tightly packed RGBA8 pixels, first row at the top.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn from_dynamic(image: image::DynamicImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.to_rgba8().into_raw(),
        }
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Fetches and decodes an image for a locator. Called from worker threads.
pub trait TextureSource: Send + Sync {
    fn fetch(&self, locator: &str) -> Result<DecodedImage>;
}

/// Loads filesystem paths with `image` and `http(s)://` URLs with `reqwest`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTextureSource;

impl TextureSource for DefaultTextureSource {
    fn fetch(&self, locator: &str) -> Result<DecodedImage> {
        if is_remote(locator) {
            fetch_remote(locator)
        } else {
            load_file(Path::new(locator))
        }
    }
}

pub fn is_remote(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

pub fn decode_image(bytes: &[u8]) -> Result<DecodedImage> {
    let image = image::load_from_memory(bytes).context("failed to decode image data")?;
    Ok(DecodedImage::from_dynamic(image))
}

fn load_file(path: &Path) -> Result<DecodedImage> {
    let image = image::open(path)
        .with_context(|| format!("failed to open texture at {}", path.display()))?;
    Ok(DecodedImage::from_dynamic(image))
}

fn fetch_remote(url: &str) -> Result<DecodedImage> {
    tracing::debug!(%url, "downloading texture");
    let http = reqwest::blocking::Client::builder()
        .build()
        .context("failed to construct HTTP client")?;
    let response = http
        .get(url)
        .send()
        .with_context(|| format!("requesting texture {url}"))?
        .error_for_status()
        .context("texture request failed")?;
    let bytes = response.bytes()?;
    decode_image(&bytes)
}

/// A texture object allocated up front for one locator.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingTexture {
    pub index: usize,
    pub unit: TextureUnit,
    pub locator: String,
    pub texture: TextureId,
}

type FetchResult = (usize, Result<DecodedImage, String>);

pub(crate) struct TextureLoad {
    pending: Vec<PendingTexture>,
    decoded: Vec<Option<DecodedImage>>,
    committed: usize,
    receiver: Receiver<FetchResult>,
    cancel: Arc<AtomicBool>,
}

impl TextureLoad {
    pub fn start(
        pending: Vec<PendingTexture>,
        source: Arc<dyn TextureSource>,
    ) -> Result<Self, EngineError> {
        let (sender, receiver) = unbounded();
        let cancel = Arc::new(AtomicBool::new(false));

        if let Some(first) = pending.first() {
            let jobs: Vec<(usize, String)> = pending
                .iter()
                .map(|entry| (entry.index, entry.locator.clone()))
                .collect();
            let cancel_flag = Arc::clone(&cancel);
            let spawned = thread::Builder::new()
                .name("texture-loader".into())
                .spawn(move || {
                    for (index, locator) in jobs {
                        if cancel_flag.load(Ordering::Acquire) {
                            return;
                        }
                        let result = source.fetch(&locator).map_err(|err| format!("{err:#}"));
                        let failed = result.is_err();
                        if sender.send((index, result)).is_err() || failed {
                            return;
                        }
                    }
                });
            if let Err(err) = spawned {
                cancel.store(true, Ordering::Release);
                return Err(EngineError::TextureLoad {
                    index: first.index,
                    locator: first.locator.clone(),
                    message: format!("failed to spawn loader thread: {err}"),
                });
            }
        }

        let decoded = pending.iter().map(|_| None).collect();
        Ok(Self {
            pending,
            decoded,
            committed: 0,
            receiver,
            cancel,
        })
    }

    /// Drains finished fetches and returns the images that can be committed
    /// now, in locator order. The worker stops after the first failure.
    pub fn poll(&mut self) -> Result<Vec<(PendingTexture, DecodedImage)>, EngineError> {
        loop {
            match self.receiver.try_recv() {
                Ok((index, Ok(image))) => {
                    if let Some(slot) = self.decoded.get_mut(index) {
                        *slot = Some(image);
                    }
                }
                Ok((index, Err(message))) => return Err(self.fail(index, message)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    let missing = (self.committed..self.pending.len())
                        .find(|&index| self.decoded[index].is_none());
                    if let Some(index) = missing {
                        return Err(
                            self.fail(index, "loader exited without reporting a result".into())
                        );
                    }
                    break;
                }
            }
        }

        let mut ready = Vec::new();
        while self.committed < self.pending.len() {
            let Some(image) = self.decoded[self.committed].take() else {
                break;
            };
            ready.push((self.pending[self.committed].clone(), image));
            self.committed += 1;
        }
        Ok(ready)
    }

    pub fn is_complete(&self) -> bool {
        self.committed == self.pending.len()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    fn fail(&mut self, index: usize, message: String) -> EngineError {
        self.cancel();
        let locator = self
            .pending
            .get(index)
            .map(|entry| entry.locator.clone())
            .unwrap_or_default();
        EngineError::TextureLoad {
            index,
            locator,
            message,
        }
    }
}

impl Drop for TextureLoad {
    fn drop(&mut self) {
        self.cancel();
    }
}
