//! Shelf packing of 2D bitmaps into shared atlas textures.
//!
//! A single cursor advances along the current row; when an incoming bitmap
//! would overflow the row the cursor drops down by the tallest height seen in
//! that row and starts a new one. When the new row would overflow the atlas
//! itself, the atlas is full and the caller decides what to do (usually:
//! allocate another atlas).

use cgmath::vec2;
use thiserror::Error;

use crate::vulkan::image::Texture;
use crate::vulkan::vertex::Vec2;

#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("Texture '{name}' ({width}x{height}) does not fit in a {atlas_size}x{atlas_size} atlas.")]
    TextureTooLarge {
        name: String,
        width: u32,
        height: u32,
        atlas_size: u32,
    },
    #[error("Atlas {atlas_index} is full.")]
    AtlasFull { atlas_index: usize },
}

/// A packed subregion of an atlas. Carries its UV rectangle, its pixel
/// placement, and a weak back-reference (atlas index + subtexture index)
/// instead of any owning pointer.
#[derive(Copy, Clone, Debug)]
pub struct SubTexture {
    pub uv_min: Vec2,
    pub uv_max: Vec2,
    pub offset: Vec2,
    pub size: Vec2,
    pub atlas_index: usize,
    pub subtexture_index: usize,
}

/// Index pair naming a subtexture from the outside.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SubTextureRef {
    pub atlas_index: usize,
    pub subtexture_index: usize,
}

pub struct TextureAtlas {
    pub atlas_index: usize,
    pub size: u32,
    pub channels: u32,
    /// Host-side pixels; the backing texture re-uploads from here when dirty.
    pub pixels: Vec<u8>,
    pub texture: Texture,

    pub cursor_x: u32,
    pub cursor_y: u32,
    pub tallest_y: u32,

    /// Slot indices waiting for the next pack pass.
    pub pending: Vec<usize>,
    pub packed: Vec<SubTexture>,

    /// Bumped on every pack pass; consumers poll it to notice that their UVs
    /// or the backing texture changed.
    pub generation: u32,
    pub dirty: bool,
}

impl TextureAtlas {
    pub fn new(atlas_index: usize, size: u32, channels: u32) -> Self {
        Self {
            atlas_index,
            size,
            channels,
            pixels: vec![0; (size * size * channels) as usize],
            texture: Texture::default(),
            cursor_x: 0,
            cursor_y: 0,
            tallest_y: 0,
            pending: Vec::new(),
            packed: Vec::new(),
            generation: 0,
            dirty: false,
        }
    }

    /// Queues a texture slot for the next pack pass. Nothing touches the
    /// backing image until [`TextureAtlas::pack_one`] runs for it.
    pub fn add_texture(&mut self, slot_index: usize) {
        self.pending.push(slot_index);
    }

    /// Advances the shelf cursor for a `width` x `height` rectangle and
    /// returns the placement.
    fn place(&mut self, name: &str, width: u32, height: u32) -> Result<(u32, u32), AtlasError> {
        if width > self.size || height > self.size {
            return Err(AtlasError::TextureTooLarge {
                name: name.into(),
                width,
                height,
                atlas_size: self.size,
            });
        }

        if self.cursor_x + width > self.size {
            self.cursor_y += self.tallest_y;
            self.cursor_x = 0;
            self.tallest_y = 0;
        }
        if self.cursor_y + height > self.size {
            return Err(AtlasError::AtlasFull {
                atlas_index: self.atlas_index,
            });
        }

        let placement = (self.cursor_x, self.cursor_y);
        self.cursor_x += width;
        self.tallest_y = self.tallest_y.max(height);

        Ok(placement)
    }

    fn blit(&mut self, x: u32, y: u32, width: u32, height: u32, source: &[u8]) {
        let channels = self.channels as usize;
        let row_bytes = width as usize * channels;
        let atlas_row_bytes = self.size as usize * channels;

        for row in 0..height as usize {
            let src_start = row * row_bytes;
            let dst_start = (y as usize + row) * atlas_row_bytes + x as usize * channels;
            self.pixels[dst_start..dst_start + row_bytes]
                .copy_from_slice(&source[src_start..src_start + row_bytes]);
        }
    }

    /// Places and blits one bitmap, registers its subtexture and marks the
    /// atlas dirty for the next upload.
    pub fn pack_one(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        source: &[u8],
    ) -> Result<SubTexture, AtlasError> {
        let (x, y) = self.place(name, width, height)?;
        self.blit(x, y, width, height, source);

        let atlas_size = self.size as f32;
        let subtexture = SubTexture {
            uv_min: vec2(x as f32 / atlas_size, y as f32 / atlas_size),
            uv_max: vec2(
                (x + width) as f32 / atlas_size,
                (y + height) as f32 / atlas_size,
            ),
            offset: vec2(x as f32, y as f32),
            size: vec2(width as f32, height as f32),
            atlas_index: self.atlas_index,
            subtexture_index: self.packed.len(),
        };
        self.packed.push(subtexture);
        self.dirty = true;

        Ok(subtexture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> Vec<u8> {
        vec![value; (width * height * 4) as usize]
    }

    fn rectangles_overlap(a: &SubTexture, b: &SubTexture) -> bool {
        a.offset.x < b.offset.x + b.size.x
            && b.offset.x < a.offset.x + a.size.x
            && a.offset.y < b.offset.y + b.size.y
            && b.offset.y < a.offset.y + a.size.y
    }

    #[test]
    fn three_bitmaps_pack_into_disjoint_rectangles() {
        let mut atlas = TextureAtlas::new(0, 128, 4);

        let a = atlas.pack_one("a", 32, 32, &solid(32, 32, 1)).unwrap();
        let b = atlas.pack_one("b", 64, 64, &solid(64, 64, 2)).unwrap();
        let c = atlas.pack_one("c", 32, 32, &solid(32, 32, 3)).unwrap();

        // The third bitmap lands at the end of the first row, leaving the
        // cursor at the right edge; the next add starts a new row.
        assert_eq!(atlas.cursor_x, 128);
        assert_eq!(atlas.cursor_y, 0);
        assert_eq!(atlas.tallest_y, 64);

        let d = atlas.pack_one("d", 32, 32, &solid(32, 32, 4)).unwrap();
        assert_eq!((d.offset.x, d.offset.y), (0.0, 64.0));

        let packed = [a, b, c, d];
        for subtexture in &packed {
            assert!(subtexture.uv_min.x >= 0.0 && subtexture.uv_min.x < subtexture.uv_max.x);
            assert!(subtexture.uv_min.y >= 0.0 && subtexture.uv_min.y < subtexture.uv_max.y);
            assert!(subtexture.uv_max.x <= 1.0 && subtexture.uv_max.y <= 1.0);
        }
        for (i, a) in packed.iter().enumerate() {
            for b in &packed[i + 1..] {
                assert!(!rectangles_overlap(a, b));
            }
        }
    }

    #[test]
    fn blit_lands_pixels_at_the_cursor() {
        let mut atlas = TextureAtlas::new(0, 8, 4);

        atlas.pack_one("a", 2, 2, &solid(2, 2, 0xAA)).unwrap();
        atlas.pack_one("b", 2, 2, &solid(2, 2, 0xBB)).unwrap();

        // First pixel of each bitmap, row 0.
        assert_eq!(atlas.pixels[0], 0xAA);
        assert_eq!(atlas.pixels[2 * 4], 0xBB);
        // Second row of the first bitmap.
        assert_eq!(atlas.pixels[8 * 4], 0xAA);
    }

    #[test]
    fn atlas_full_is_surfaced_to_the_caller() {
        let mut atlas = TextureAtlas::new(3, 64, 4);

        atlas.pack_one("a", 64, 64, &solid(64, 64, 1)).unwrap();
        let result = atlas.pack_one("b", 16, 16, &solid(16, 16, 2));

        assert!(matches!(
            result,
            Err(AtlasError::AtlasFull { atlas_index: 3 })
        ));
    }

    #[test]
    fn oversized_textures_are_rejected_with_a_clear_error() {
        let mut atlas = TextureAtlas::new(0, 64, 4);

        let result = atlas.pack_one("huge", 128, 16, &solid(128, 16, 1));
        assert!(matches!(result, Err(AtlasError::TextureTooLarge { .. })));

        // The cursor is untouched by the rejection.
        assert_eq!((atlas.cursor_x, atlas.cursor_y), (0, 0));
    }

    #[test]
    fn row_overflow_starts_a_new_shelf() {
        let mut atlas = TextureAtlas::new(0, 64, 4);

        atlas.pack_one("a", 48, 16, &solid(48, 16, 1)).unwrap();
        let b = atlas.pack_one("b", 32, 8, &solid(32, 8, 2)).unwrap();

        assert_eq!((b.offset.x, b.offset.y), (0.0, 16.0));
        assert_eq!(atlas.cursor_y, 16);
        assert_eq!(atlas.tallest_y, 8);
    }
}
