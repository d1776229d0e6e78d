use std::collections::HashMap;
use std::sync::Arc;

use eframe::egui::{self, TextureHandle, TextureOptions};

use super::loader::{ImageKey, LoadEvent};
use super::{DecodedImage, ImageMeta, Resolution};

pub enum Slot {
    /// Requested under the given generation.
    Pending(u64),
    Ready(ReadyImage),
    Failed(String),
}

/// A decoded image. The pixels are dropped once uploaded as a texture.
pub struct ReadyImage {
    pub meta: ImageMeta,
    pixels: Option<Arc<DecodedImage>>,
    texture: Option<TextureHandle>,
}

impl ReadyImage {
    fn new(image: Arc<DecodedImage>) -> Self {
        Self {
            meta: image.meta(),
            pixels: Some(image),
            texture: None,
        }
    }

    /// Whether the decoded pixels are still held in memory.
    pub fn has_pixels(&self) -> bool {
        self.pixels.is_some()
    }
}

/// Decoded images by key, plus their GPU textures once drawn.
#[derive(Default)]
pub struct ImageCache {
    slots: HashMap<ImageKey, Slot>,
}

impl ImageCache {
    pub fn get(&self, key: &ImageKey) -> Option<&Slot> {
        self.slots.get(key)
    }

    pub fn contains(&self, key: &ImageKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether any request is still outstanding.
    pub fn has_pending(&self) -> bool {
        self.slots.values().any(|slot| matches!(slot, Slot::Pending(_)))
    }

    pub fn mark_pending(&mut self, key: ImageKey, generation: u64) {
        self.slots.insert(key, Slot::Pending(generation));
    }

    /// Store a finished job. Only answers to the outstanding request are
    /// kept; returns whether the cache changed.
    pub fn apply(&mut self, event: LoadEvent) -> bool {
        let key = event.key();
        let waiting = match self.slots.get(&key) {
            Some(Slot::Pending(generation)) => *generation,
            _ => return false,
        };
        match event {
            LoadEvent::Loaded {
                generation, image, ..
            } if generation == waiting => {
                self.slots.insert(key, Slot::Ready(ReadyImage::new(image)));
                true
            }
            LoadEvent::Failed {
                generation, error, ..
            } if generation == waiting => {
                log::warn!("could not decode {key:?}: {error}");
                self.slots.insert(key, Slot::Failed(error));
                true
            }
            LoadEvent::Stale { generation, .. } if generation == waiting => {
                log::debug!("discarding stale result for {key:?}");
                self.slots.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Forget requests of `resolution` that are still in flight so they
    /// can be issued again under a newer generation.
    pub fn drop_pending(&mut self, resolution: Resolution) {
        self.slots
            .retain(|key, slot| key.resolution != resolution || !matches!(slot, Slot::Pending(_)));
    }

    /// Evict every entry of a specimen not in `keep`.
    pub fn retain_specimens(&mut self, keep: &[usize]) {
        let before = self.slots.len();
        self.slots.retain(|key, _| keep.contains(&key.specimen));
        let evicted = before - self.slots.len();
        if evicted > 0 {
            log::debug!("evicted {evicted} cached image(s)");
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Size and texture of a ready image, uploading it on first use.
    pub fn texture(
        &mut self,
        ctx: &egui::Context,
        key: &ImageKey,
    ) -> Option<(ImageMeta, TextureHandle)> {
        let Some(Slot::Ready(ready)) = self.slots.get_mut(key) else {
            return None;
        };
        if ready.texture.is_none() {
            let pixels = ready.pixels.take()?;
            ready.texture = Some(ctx.load_texture(
                format!("scan-{}-{}-{:?}", key.specimen, key.scan, key.resolution),
                pixels.to_color_image(),
                TextureOptions::LINEAR,
            ));
        }
        let texture = ready.texture.clone()?;
        Some((ready.meta, texture))
    }
}
