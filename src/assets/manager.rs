//! The asset manager: a reference-counted, file-backed catalog over packed
//! archive files.
//!
//! Slots are index-stable for the manager's lifetime and their `state`,
//! `generation` and `ref_count` fields are atomics, so any thread may observe
//! them and load workers complete by flipping state, never by touching driver
//! objects. GPU uploads and teardown happen only on the render thread, via
//! the explicit `upload_*` / `flush_retired` entry points.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};

use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::prelude::v1_0::*;

use super::archive::{Archive, AssetType, ASSET_TYPE_COUNT};
use super::atlas::{AtlasError, SubTextureRef, TextureAtlas};
use crate::renderer::RendererData;
use crate::vulkan::image::{destroy_texture, upload_texture, Texture};
use crate::vulkan::shader::{create_shader, destroy_shader, Shader};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum SlotState {
    Invalid = 0,
    Unloaded = 1,
    LoadQueued = 2,
    Loaded = 3,
    ShouldUnload = 4,
    ShouldReload = 5,
}

impl SlotState {
    pub fn from_u32(value: u32) -> SlotState {
        match value {
            1 => SlotState::Unloaded,
            2 => SlotState::LoadQueued,
            3 => SlotState::Loaded,
            4 => SlotState::ShouldUnload,
            5 => SlotState::ShouldReload,
            _ => SlotState::Invalid,
        }
    }
}

/// CPU-side bitmap bytes decoded from a PNG payload.
#[derive(Clone, Debug, Default)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct TextureAsset {
    pub bitmap: Bitmap,
    pub gpu: Texture,
    pub subtexture: Option<SubTextureRef>,
}

#[derive(Debug, Default)]
pub struct ShaderAsset {
    pub bytecode: Vec<u8>,
    pub gpu: Option<Shader>,
}

#[derive(Debug, Default)]
pub enum AssetPayload {
    #[default]
    None,
    Texture(TextureAsset),
    Shader(ShaderAsset),
    Font(Vec<u8>),
    Sound(Vec<u8>),
    Material(Vec<u8>),
}

/// One catalog slot. The payload belongs to the manager thread; the atomic
/// fields are the cross-thread surface.
#[derive(Debug)]
pub struct AssetSlot {
    state: AtomicU32,
    pub asset_type: AssetType,
    pub name: String,
    pub owner_file: usize,
    pub entry_index: usize,
    pub generation: AtomicU32,
    pub ref_count: AtomicU32,
    pub payload: AssetPayload,
}

impl AssetSlot {
    pub fn state(&self) -> SlotState {
        SlotState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: SlotState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// CAS-style transition; returns whether the transition happened.
    pub fn try_transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn texture(&self) -> Option<&TextureAsset> {
        match &self.payload {
            AssetPayload::Texture(texture) => Some(texture),
            _ => None,
        }
    }

    pub fn texture_mut(&mut self) -> Option<&mut TextureAsset> {
        match &mut self.payload {
            AssetPayload::Texture(texture) => Some(texture),
            _ => None,
        }
    }

    pub fn shader(&self) -> Option<&ShaderAsset> {
        match &self.payload {
            AssetPayload::Shader(shader) => Some(shader),
            _ => None,
        }
    }
}

/// The only public way to touch a slot after the initial lookup. Carries the
/// atlas subregion for packed textures. Never owning; dropping a handle does
/// not release the slot.
#[derive(Copy, Clone, Debug)]
pub struct AssetHandle {
    pub is_valid: bool,
    pub asset_type: AssetType,
    pub slot_index: usize,
    pub subtexture: Option<SubTextureRef>,
}

impl AssetHandle {
    pub fn invalid() -> Self {
        Self {
            is_valid: false,
            asset_type: AssetType::Invalid,
            slot_index: 0,
            subtexture: None,
        }
    }
}

/// GPU objects whose slots were unloaded; destroyed on the render thread by
/// `flush_retired`.
#[derive(Debug)]
enum RetiredGpu {
    Texture(Texture),
    Shader(Shader),
}

#[derive(Copy, Clone, Debug, Default)]
pub struct PackOutcome {
    pub packed: usize,
    pub atlas_full: bool,
}

struct ArchiveFile {
    archive: Archive,
}

pub struct AssetManager {
    files: Vec<ArchiveFile>,
    name_to_file: HashMap<String, usize>,

    slots: Vec<AssetSlot>,
    catalogs: [HashMap<String, usize>; ASSET_TYPE_COUNT],

    load_tx: Sender<usize>,
    load_rx: Receiver<usize>,

    pub atlases: Vec<TextureAtlas>,
    retired: Vec<RetiredGpu>,
}

impl Default for AssetManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetManager {
    pub fn new() -> Self {
        let (load_tx, load_rx) = channel();
        Self {
            files: Vec::new(),
            name_to_file: HashMap::new(),
            slots: Vec::new(),
            catalogs: Default::default(),
            load_tx,
            load_rx,
            atlases: Vec::new(),
            retired: Vec::new(),
        }
    }

    /// Loads an archive and indexes its entries into the catalogs. Entries
    /// start Unloaded; nothing is decoded here.
    pub fn load_archive_file(&mut self, path: &Path) -> Result<usize> {
        let archive = Archive::open(path)?;
        Ok(self.register_archive(archive))
    }

    pub fn register_archive(&mut self, archive: Archive) -> usize {
        let file_index = self.files.len();

        for (entry_index, entry) in archive.entries.iter().enumerate() {
            let catalog = &mut self.catalogs[entry.asset_type as usize];
            if catalog.contains_key(&entry.name) {
                warn!(
                    "Duplicate asset name '{}' ({:?}); keeping the first.",
                    entry.name, entry.asset_type
                );
                continue;
            }

            let slot_index = self.slots.len();
            self.slots.push(AssetSlot {
                state: AtomicU32::new(SlotState::Unloaded as u32),
                asset_type: entry.asset_type,
                name: entry.name.clone(),
                owner_file: file_index,
                entry_index,
                generation: AtomicU32::new(0),
                ref_count: AtomicU32::new(0),
                payload: AssetPayload::None,
            });
            catalog.insert(entry.name.clone(), slot_index);
            self.name_to_file.insert(entry.name.clone(), file_index);
        }

        info!(
            "Registered archive with {} entries.",
            archive.entries.len()
        );
        self.files.push(ArchiveFile { archive });

        file_index
    }

    pub fn slot(&self, handle: &AssetHandle) -> &AssetSlot {
        &self.slots[handle.slot_index]
    }

    /// Which archive file an asset name came from, for cross-file lookups.
    pub fn archive_file_index(&self, name: &str) -> Option<usize> {
        self.name_to_file.get(name).copied()
    }

    /// Looks a name up across every catalog. Missing names return an invalid
    /// handle; callers must check.
    pub fn acquire_handle(&self, name: &str) -> AssetHandle {
        for catalog in &self.catalogs {
            if let Some(slot_index) = catalog.get(name) {
                let slot = &self.slots[*slot_index];
                return AssetHandle {
                    is_valid: true,
                    asset_type: slot.asset_type,
                    slot_index: *slot_index,
                    subtexture: slot.texture().and_then(|t| t.subtexture),
                };
            }
        }

        AssetHandle::invalid()
    }

    pub fn acquire_typed_handle(&self, asset_type: AssetType, name: &str) -> AssetHandle {
        match self.catalogs[asset_type as usize].get(name) {
            Some(slot_index) => {
                let slot = &self.slots[*slot_index];
                AssetHandle {
                    is_valid: true,
                    asset_type,
                    slot_index: *slot_index,
                    subtexture: slot.texture().and_then(|t| t.subtexture),
                }
            }
            None => AssetHandle::invalid(),
        }
    }

    /// Queues the slot for loading. Returns false when the slot was not in a
    /// queueable state (already loaded, already queued).
    pub fn queue_load(&self, handle: &AssetHandle) -> bool {
        if !handle.is_valid {
            return false;
        }

        let slot = &self.slots[handle.slot_index];
        let queued = slot.try_transition(SlotState::Unloaded, SlotState::LoadQueued)
            || slot.try_transition(SlotState::ShouldReload, SlotState::LoadQueued);
        if queued {
            self.load_tx
                .send(handle.slot_index)
                .expect("Load queue receiver dropped.");
        }
        queued
    }

    /// Drains the load queue, decoding payloads from the owning archive's
    /// bytes. Each completed slot flips LoadQueued -> Loaded and bumps its
    /// generation.
    pub fn process_load_queue(&mut self) -> usize {
        let mut processed = 0;

        while let Ok(slot_index) = self.load_rx.try_recv() {
            let slot = &self.slots[slot_index];
            if slot.state() != SlotState::LoadQueued {
                warn!(
                    "Slot '{}' was in the load queue but in state {:?}.",
                    slot.name,
                    slot.state()
                );
                continue;
            }

            let data = {
                let file = &self.files[slot.owner_file];
                let entry = &file.archive.entries[slot.entry_index];
                file.archive.entry_data(entry)
            };

            let payload = match decode_payload(slot.asset_type, data) {
                Ok(payload) => payload,
                Err(error) => {
                    error!("Failed to load asset '{}': {}", slot.name, error);
                    slot.set_state(SlotState::Unloaded);
                    continue;
                }
            };

            let slot = &mut self.slots[slot_index];
            slot.payload = payload;
            slot.generation.fetch_add(1, Ordering::AcqRel);
            slot.try_transition(SlotState::LoadQueued, SlotState::Loaded);
            processed += 1;
        }

        processed
    }

    pub fn acquire_ref(&self, handle: &AssetHandle) {
        let slot = &self.slots[handle.slot_index];
        slot.ref_count.fetch_add(1, Ordering::AcqRel);
        // A handle acquired between release and unload resurrects the slot.
        slot.try_transition(SlotState::ShouldUnload, SlotState::Loaded);
    }

    /// Drops one reference. The last release marks the slot for unloading; a
    /// later maintenance pass frees the payload.
    pub fn release_ref(&self, handle: &AssetHandle) {
        let slot = &self.slots[handle.slot_index];
        let previous = slot.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "Releasing an unreferenced asset slot.");

        if previous == 1 {
            slot.try_transition(SlotState::Loaded, SlotState::ShouldUnload);
        }
    }

    pub fn request_reload(&self, handle: &AssetHandle) -> bool {
        self.slots[handle.slot_index].try_transition(SlotState::Loaded, SlotState::ShouldReload)
    }

    /// Frees the payloads of unreferenced ShouldUnload slots. GPU objects are
    /// parked on the retirement list for the render thread.
    pub fn run_maintenance(&mut self) {
        for slot in self.slots.iter_mut() {
            if slot.state() != SlotState::ShouldUnload
                || slot.ref_count.load(Ordering::Acquire) != 0
            {
                continue;
            }

            match std::mem::take(&mut slot.payload) {
                AssetPayload::Texture(texture) => {
                    if texture.gpu.image.handle != vk::Image::null() {
                        self.retired.push(RetiredGpu::Texture(texture.gpu));
                    }
                }
                AssetPayload::Shader(mut shader) => {
                    if let Some(gpu) = shader.gpu.take() {
                        self.retired.push(RetiredGpu::Shader(gpu));
                    }
                }
                _ => {}
            }

            slot.try_transition(SlotState::ShouldUnload, SlotState::Unloaded);
            trace!("Unloaded asset '{}'.", slot.name);
        }
    }

    /// Destroys retired GPU objects. Render thread only; the caller is
    /// responsible for making sure none of them are still in flight.
    pub unsafe fn flush_retired(&mut self, device: &Device) {
        for retired in self.retired.drain(..) {
            match retired {
                RetiredGpu::Texture(mut texture) => destroy_texture(device, &mut texture),
                RetiredGpu::Shader(mut shader) => destroy_shader(device, &mut shader),
            }
        }
    }

    /// Uploads a loaded bitmap slot to the GPU. Render thread only.
    pub unsafe fn upload_slot_texture(
        &mut self,
        device: &Device,
        data: &RendererData,
        handle: &AssetHandle,
    ) -> Result<()> {
        let slot = &mut self.slots[handle.slot_index];
        if slot.state() != SlotState::Loaded {
            return Err(anyhow!("Asset '{}' is not loaded.", slot.name));
        }

        let texture = slot
            .texture_mut()
            .ok_or_else(|| anyhow!("Asset '{}' is not a texture.", handle.slot_index))?;

        let bitmap = &texture.bitmap;
        texture.gpu = upload_texture(
            device,
            data,
            &bitmap.pixels,
            bitmap.width,
            bitmap.height,
            bitmap.channels,
        )?;
        slot.generation.fetch_add(1, Ordering::AcqRel);

        Ok(())
    }

    /// Builds the GPU shader for a loaded shader slot. Render thread only.
    pub unsafe fn create_slot_shader(
        &mut self,
        device: &Device,
        data: &mut RendererData,
        handle: &AssetHandle,
    ) -> Result<()> {
        let slot = &mut self.slots[handle.slot_index];
        if slot.state() != SlotState::Loaded {
            return Err(anyhow!("Asset '{}' is not loaded.", slot.name));
        }

        let AssetPayload::Shader(shader_asset) = &mut slot.payload else {
            return Err(anyhow!("Asset '{}' is not a shader.", slot.name));
        };

        shader_asset.gpu = Some(create_shader(device, data, &shader_asset.bytecode)?);
        slot.generation.fetch_add(1, Ordering::AcqRel);

        Ok(())
    }

    pub fn shader_for(&self, handle: &AssetHandle) -> Option<&Shader> {
        self.slots[handle.slot_index]
            .shader()
            .and_then(|s| s.gpu.as_ref())
    }

    pub fn shader_for_mut(&mut self, handle: &AssetHandle) -> Option<&mut Shader> {
        match &mut self.slots[handle.slot_index].payload {
            AssetPayload::Shader(shader) => shader.gpu.as_mut(),
            _ => None,
        }
    }

    pub fn texture_for(&self, handle: &AssetHandle) -> Option<&Texture> {
        self.slots[handle.slot_index].texture().map(|t| &t.gpu)
    }

    pub fn create_atlas(&mut self, size: u32, channels: u32) -> usize {
        let atlas_index = self.atlases.len();
        self.atlases
            .push(TextureAtlas::new(atlas_index, size, channels));
        atlas_index
    }

    /// Queues a loaded texture slot for the atlas's next pack pass.
    pub fn add_texture_to_atlas(&mut self, atlas_index: usize, handle: &AssetHandle) {
        self.atlases[atlas_index].add_texture(handle.slot_index);
    }

    /// Shelf-packs every pending texture into the atlas, records each slot's
    /// subtexture reference and re-uploads the backing texture if anything
    /// changed. A full atlas stops the pass and leaves the remainder pending;
    /// the caller may allocate another atlas and retry.
    pub unsafe fn pack_atlas(
        &mut self,
        device: &Device,
        data: &RendererData,
        atlas_index: usize,
    ) -> Result<PackOutcome> {
        let outcome = self.pack_atlas_pixels(atlas_index);
        self.upload_atlas(device, data, atlas_index)?;
        Ok(outcome)
    }

    /// The CPU half of a pack pass: placement, blits, subtexture registration
    /// and the generation bump. Leaves the atlas dirty for `upload_atlas`.
    pub fn pack_atlas_pixels(&mut self, atlas_index: usize) -> PackOutcome {
        let Self { atlases, slots, .. } = self;
        let atlas = &mut atlases[atlas_index];

        let pending = std::mem::take(&mut atlas.pending);
        let mut leftover = Vec::new();
        let mut outcome = PackOutcome::default();

        for slot_index in pending {
            if outcome.atlas_full {
                leftover.push(slot_index);
                continue;
            }

            let slot = &mut slots[slot_index];
            if slot.state() != SlotState::Loaded {
                warn!("Skipping unloaded texture '{}' during pack.", slot.name);
                continue;
            }
            let name = slot.name.clone();
            let Some(texture) = slot.texture_mut() else {
                warn!("Skipping non-texture slot '{}' during pack.", name);
                continue;
            };

            let width = texture.bitmap.width;
            let height = texture.bitmap.height;
            match atlas.pack_one(&name, width, height, &texture.bitmap.pixels) {
                Ok(subtexture) => {
                    texture.subtexture = Some(SubTextureRef {
                        atlas_index: subtexture.atlas_index,
                        subtexture_index: subtexture.subtexture_index,
                    });
                    outcome.packed += 1;
                }
                Err(AtlasError::AtlasFull { .. }) => {
                    warn!("Atlas {} is full; '{}' stays pending.", atlas_index, name);
                    outcome.atlas_full = true;
                    leftover.push(slot_index);
                }
                Err(error @ AtlasError::TextureTooLarge { .. }) => {
                    error!("{}", error);
                }
            }
        }

        atlas.pending = leftover;
        atlas.generation += 1;

        outcome
    }

    /// Re-uploads the atlas's backing texture when the pixels changed.
    pub unsafe fn upload_atlas(
        &mut self,
        device: &Device,
        data: &RendererData,
        atlas_index: usize,
    ) -> Result<()> {
        let atlas = &mut self.atlases[atlas_index];
        if !atlas.dirty {
            return Ok(());
        }

        if atlas.texture.image.handle != vk::Image::null() {
            let mut old = std::mem::take(&mut atlas.texture);
            destroy_texture(device, &mut old);
        }
        atlas.texture = upload_texture(
            device,
            data,
            &atlas.pixels,
            atlas.size,
            atlas.size,
            atlas.channels,
        )?;
        atlas.dirty = false;

        Ok(())
    }

    /// Destroys every GPU object the manager still owns. Render thread only,
    /// device idle.
    pub unsafe fn destroy(&mut self, device: &Device) {
        self.run_maintenance();
        self.flush_retired(device);

        for slot in self.slots.iter_mut() {
            match std::mem::take(&mut slot.payload) {
                AssetPayload::Texture(mut texture) => destroy_texture(device, &mut texture.gpu),
                AssetPayload::Shader(mut shader) => {
                    if let Some(mut gpu) = shader.gpu.take() {
                        destroy_shader(device, &mut gpu);
                    }
                }
                _ => {}
            }
            slot.set_state(SlotState::Invalid);
        }

        for atlas in self.atlases.iter_mut() {
            destroy_texture(device, &mut atlas.texture);
        }
    }
}

/// Decodes an entry's raw bytes into its CPU-side payload. PNG payloads are
/// expanded to bitmaps; everything else is carried as bytes.
fn decode_payload(asset_type: AssetType, data: &[u8]) -> Result<AssetPayload> {
    match asset_type {
        AssetType::Bitmap => {
            let decoder = png::Decoder::new(Cursor::new(data));
            let mut reader = decoder.read_info()?;
            let mut pixels = vec![0; reader.output_buffer_size()];
            let info = reader.next_frame(&mut pixels)?;
            pixels.truncate(info.buffer_size());

            Ok(AssetPayload::Texture(TextureAsset {
                bitmap: Bitmap {
                    width: info.width,
                    height: info.height,
                    channels: info.color_type.samples() as u32,
                    pixels,
                },
                gpu: Texture::default(),
                subtexture: None,
            }))
        }
        AssetType::Shader => Ok(AssetPayload::Shader(ShaderAsset {
            bytecode: data.to_vec(),
            gpu: None,
        })),
        AssetType::Font => Ok(AssetPayload::Font(data.to_vec())),
        AssetType::Sound => Ok(AssetPayload::Sound(data.to_vec())),
        AssetType::Material => Ok(AssetPayload::Material(data.to_vec())),
        AssetType::Invalid => Err(anyhow!("Cannot load an invalid asset type.")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::archive::{write_archive, PendingEntry};

    fn tiny_png(width: u32, height: u32, value: u8) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut bytes, width, height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer
                .write_image_data(&vec![value; (width * height * 4) as usize])
                .unwrap();
        }
        bytes
    }

    fn manager_with_archive() -> AssetManager {
        let entries = vec![
            PendingEntry {
                name: "player".into(),
                asset_type: AssetType::Bitmap,
                data: tiny_png(4, 4, 0x80),
            },
            PendingEntry {
                name: "basic".into(),
                asset_type: AssetType::Shader,
                data: vec![0x03, 0x02, 0x23, 0x07],
            },
            PendingEntry {
                name: "mono".into(),
                asset_type: AssetType::Font,
                data: vec![9u8; 32],
            },
        ];

        let mut bytes = Vec::new();
        write_archive(&mut bytes, &entries).unwrap();

        let mut manager = AssetManager::new();
        manager.register_archive(Archive::read(bytes).unwrap());
        manager
    }

    #[test]
    fn lookups_return_typed_handles_and_missing_names_are_invalid() {
        let manager = manager_with_archive();

        let player = manager.acquire_handle("player");
        assert!(player.is_valid);
        assert_eq!(player.asset_type, AssetType::Bitmap);

        let shader = manager.acquire_typed_handle(AssetType::Shader, "basic");
        assert!(shader.is_valid);

        let missing = manager.acquire_handle("nonexistent");
        assert!(!missing.is_valid);

        let wrong_type = manager.acquire_typed_handle(AssetType::Sound, "player");
        assert!(!wrong_type.is_valid);
    }

    #[test]
    fn loading_walks_the_slot_state_machine_and_bumps_the_generation() {
        let mut manager = manager_with_archive();
        let handle = manager.acquire_handle("player");

        assert_eq!(manager.slot(&handle).state(), SlotState::Unloaded);
        assert_eq!(manager.slot(&handle).generation(), 0);

        assert!(manager.queue_load(&handle));
        assert_eq!(manager.slot(&handle).state(), SlotState::LoadQueued);
        // Double-queue is refused.
        assert!(!manager.queue_load(&handle));

        assert_eq!(manager.process_load_queue(), 1);
        let slot = manager.slot(&handle);
        assert_eq!(slot.state(), SlotState::Loaded);
        assert_eq!(slot.generation(), 1);

        let bitmap = &slot.texture().unwrap().bitmap;
        assert_eq!((bitmap.width, bitmap.height), (4, 4));
        assert_eq!(bitmap.channels, 4);
        assert_eq!(bitmap.pixels.len(), 64);
    }

    #[test]
    fn the_last_release_marks_the_slot_for_unloading() {
        let mut manager = manager_with_archive();
        let handle = manager.acquire_handle("basic");
        manager.queue_load(&handle);
        manager.process_load_queue();

        manager.acquire_ref(&handle);
        manager.acquire_ref(&handle);

        manager.release_ref(&handle);
        assert_eq!(manager.slot(&handle).state(), SlotState::Loaded);

        manager.release_ref(&handle);
        assert_eq!(manager.slot(&handle).state(), SlotState::ShouldUnload);

        manager.run_maintenance();
        let slot = manager.slot(&handle);
        assert_eq!(slot.state(), SlotState::Unloaded);
        assert!(matches!(slot.payload, AssetPayload::None));
    }

    #[test]
    fn a_referenced_slot_survives_maintenance() {
        let mut manager = manager_with_archive();
        let handle = manager.acquire_handle("mono");
        manager.queue_load(&handle);
        manager.process_load_queue();

        manager.acquire_ref(&handle);
        manager.run_maintenance();

        let slot = manager.slot(&handle);
        assert_eq!(slot.state(), SlotState::Loaded);
        assert!(matches!(slot.payload, AssetPayload::Font(_)));
    }

    #[test]
    fn acquiring_a_reference_resurrects_an_unload_candidate() {
        let mut manager = manager_with_archive();
        let handle = manager.acquire_handle("mono");
        manager.queue_load(&handle);
        manager.process_load_queue();

        manager.acquire_ref(&handle);
        manager.release_ref(&handle);
        assert_eq!(manager.slot(&handle).state(), SlotState::ShouldUnload);

        manager.acquire_ref(&handle);
        assert_eq!(manager.slot(&handle).state(), SlotState::Loaded);
    }

    #[test]
    fn reload_reenters_the_load_queue() {
        let mut manager = manager_with_archive();
        let handle = manager.acquire_handle("basic");
        manager.queue_load(&handle);
        manager.process_load_queue();
        assert_eq!(manager.slot(&handle).generation(), 1);

        assert!(manager.request_reload(&handle));
        assert_eq!(manager.slot(&handle).state(), SlotState::ShouldReload);

        assert!(manager.queue_load(&handle));
        manager.process_load_queue();

        let slot = manager.slot(&handle);
        assert_eq!(slot.state(), SlotState::Loaded);
        assert_eq!(slot.generation(), 2);
    }

    #[test]
    fn packing_records_subtexture_references_on_the_slots() {
        let entries = vec![
            PendingEntry {
                name: "small_a".into(),
                asset_type: AssetType::Bitmap,
                data: tiny_png(32, 32, 1),
            },
            PendingEntry {
                name: "big".into(),
                asset_type: AssetType::Bitmap,
                data: tiny_png(64, 64, 2),
            },
            PendingEntry {
                name: "small_b".into(),
                asset_type: AssetType::Bitmap,
                data: tiny_png(32, 32, 3),
            },
        ];
        let mut bytes = Vec::new();
        write_archive(&mut bytes, &entries).unwrap();

        let mut manager = AssetManager::new();
        manager.register_archive(Archive::read(bytes).unwrap());

        let atlas_index = manager.create_atlas(128, 4);
        for name in ["small_a", "big", "small_b"] {
            let handle = manager.acquire_handle(name);
            manager.queue_load(&handle);
            manager.process_load_queue();
            manager.add_texture_to_atlas(atlas_index, &handle);
        }

        let outcome = manager.pack_atlas_pixels(atlas_index);
        assert_eq!(outcome.packed, 3);
        assert!(!outcome.atlas_full);

        let atlas = &manager.atlases[atlas_index];
        assert_eq!(atlas.generation, 1);
        assert!(atlas.dirty);
        assert_eq!(atlas.cursor_x, 128);

        // Handles acquired after the pack carry the subtexture reference.
        let handle = manager.acquire_handle("big");
        let subtexture = handle.subtexture.expect("big was packed");
        assert_eq!(subtexture.atlas_index, atlas_index);
        assert_eq!(subtexture.subtexture_index, 1);
    }

    #[test]
    fn a_full_atlas_keeps_the_remainder_pending() {
        let entries = vec![
            PendingEntry {
                name: "first".into(),
                asset_type: AssetType::Bitmap,
                data: tiny_png(64, 64, 1),
            },
            PendingEntry {
                name: "second".into(),
                asset_type: AssetType::Bitmap,
                data: tiny_png(16, 16, 2),
            },
        ];
        let mut bytes = Vec::new();
        write_archive(&mut bytes, &entries).unwrap();

        let mut manager = AssetManager::new();
        manager.register_archive(Archive::read(bytes).unwrap());

        let atlas_index = manager.create_atlas(64, 4);
        for name in ["first", "second"] {
            let handle = manager.acquire_handle(name);
            manager.queue_load(&handle);
            manager.process_load_queue();
            manager.add_texture_to_atlas(atlas_index, &handle);
        }

        let outcome = manager.pack_atlas_pixels(atlas_index);
        assert_eq!(outcome.packed, 1);
        assert!(outcome.atlas_full);
        assert_eq!(manager.atlases[atlas_index].pending.len(), 1);
        assert!(manager.acquire_handle("second").subtexture.is_none());
    }

    #[test]
    fn names_map_back_to_their_archive_file() {
        let manager = manager_with_archive();

        assert_eq!(manager.archive_file_index("player"), Some(0));
        assert_eq!(manager.archive_file_index("nonexistent"), None);
    }

    #[test]
    fn empty_archives_produce_empty_catalogs() {
        let mut bytes = Vec::new();
        write_archive(&mut bytes, &[]).unwrap();

        let mut manager = AssetManager::new();
        manager.register_archive(Archive::read(bytes).unwrap());

        assert!(!manager.acquire_handle("anything").is_valid);
    }
}
