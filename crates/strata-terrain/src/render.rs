//! Render-facing buffers.
//!
//! Byte layouts consumed by the renderer:
//!
//! - Displacement: one `f16` per grid cell, host order, `R16F` texture of
//!   `num_vertices_x` by `num_vertices_y` texels.
//! - Particles: two `RGBA32F` texels per particle,
//!   `[px, py, pz, radius] [qx, qy, qz, qw]` with positions scaled by
//!   [`PARTICLE_POSITION_SCALE`].

use std::sync::Arc;

use glam::{DVec2, DVec3};
use half::f16;
use parking_lot::Mutex;
use strata_common::ConfigError;
use tracing::{debug, warn};

use crate::native::ParticleData;

/// Texels used per particle.
pub const PIXELS_PER_PARTICLE: usize = 2;

/// Floats written per particle.
pub const FLOATS_PER_PARTICLE: usize = 8;

/// Largest supported texture side.
pub const MAX_TEXTURE_SIZE: u32 = 8192;

/// Factor applied to particle positions before packing.
pub const PARTICLE_POSITION_SCALE: f32 = 0.01;

/// Texel formats of render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// One 16-bit float channel
    R16F,
    /// One 32-bit float channel
    R32F,
    /// Four 16-bit float channels
    Rgba16F,
    /// Four 32-bit float channels
    Rgba32F,
}

impl PixelFormat {
    /// Bytes per texel.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::R16F => 2,
            Self::R32F => 4,
            Self::Rgba16F => 8,
            Self::Rgba32F => 16,
        }
    }

    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::R16F => "R16F",
            Self::R32F => "R32F",
            Self::Rgba16F => "RGBA16F",
            Self::Rgba32F => "RGBA32F",
        }
    }
}

/// Rectangle of texels in a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    /// Left column
    pub x: u32,
    /// Top row
    pub y: u32,
    /// Columns
    pub width: u32,
    /// Rows
    pub height: u32,
}

impl TextureRegion {
    /// Region covering a whole `width` by `height` texture.
    #[must_use]
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// A GPU-visible texture the terrain writes into.
pub trait RenderTarget {
    /// Texel format.
    fn format(&self) -> PixelFormat;

    /// `(width, height)` in texels.
    fn size(&self) -> (u32, u32);

    /// Reallocates the texture.
    fn resize(&mut self, width: u32, height: u32);

    /// Copies `data` into `region`. `src_pitch` is the byte length of one
    /// source row, `src_bpp` the bytes per source texel.
    fn update_region(
        &mut self,
        region: TextureRegion,
        src_pitch: usize,
        src_bpp: usize,
        data: &[u8],
    );
}

#[derive(Debug)]
struct TextureStorage {
    format: PixelFormat,
    width: u32,
    height: u32,
    texels: Vec<u8>,
    updates: usize,
}

/// In-memory render target. Clones share the same storage.
#[derive(Debug, Clone)]
pub struct MemoryRenderTarget {
    storage: Arc<Mutex<TextureStorage>>,
}

impl MemoryRenderTarget {
    /// Creates a zeroed texture.
    #[must_use]
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            storage: Arc::new(Mutex::new(TextureStorage {
                format,
                width,
                height,
                texels: vec![0; len],
                updates: 0,
            })),
        }
    }

    /// Copy of the raw texel bytes.
    #[must_use]
    pub fn texels(&self) -> Vec<u8> {
        self.storage.lock().texels.clone()
    }

    /// Number of `update_region` calls so far.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.storage.lock().updates
    }

    /// Texels decoded as `f16` values.
    #[must_use]
    pub fn as_f16(&self) -> Vec<f16> {
        self.storage
            .lock()
            .texels
            .chunks_exact(2)
            .map(|b| f16::from_ne_bytes([b[0], b[1]]))
            .collect()
    }

    /// Texels decoded as `f32` values.
    #[must_use]
    pub fn as_f32(&self) -> Vec<f32> {
        self.storage
            .lock()
            .texels
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}

impl RenderTarget for MemoryRenderTarget {
    fn format(&self) -> PixelFormat {
        self.storage.lock().format
    }

    fn size(&self) -> (u32, u32) {
        let storage = self.storage.lock();
        (storage.width, storage.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        let mut storage = self.storage.lock();
        let len = width as usize * height as usize * storage.format.bytes_per_pixel();
        storage.width = width;
        storage.height = height;
        storage.texels = vec![0; len];
    }

    fn update_region(
        &mut self,
        region: TextureRegion,
        src_pitch: usize,
        src_bpp: usize,
        data: &[u8],
    ) {
        let mut storage = self.storage.lock();
        let bpp = storage.format.bytes_per_pixel();
        if src_bpp != bpp
            || region.x + region.width > storage.width
            || region.y + region.height > storage.height
        {
            warn!(
                "Ignoring render target update {region:?} with {src_bpp} bytes per texel on a {}x{} {} texture",
                storage.width,
                storage.height,
                storage.format.name()
            );
            return;
        }

        let row_bytes = region.width as usize * bpp;
        let width = storage.width as usize;
        for row in 0..region.height as usize {
            let src = row * src_pitch;
            let Some(source_row) = data.get(src..src + row_bytes) else {
                break;
            };
            let dst = ((region.y as usize + row) * width + region.x as usize) * bpp;
            storage.texels[dst..dst + row_bytes].copy_from_slice(source_row);
        }
        storage.updates += 1;
    }
}

/// Smallest texture side `s`, a multiple of `pixels_per_item`, for which
/// `s * s >= min_items * pixels_per_item`. Returns 0 if no such side up to
/// [`MAX_TEXTURE_SIZE`] exists.
#[must_use]
pub fn calculate_texture_base_size(min_items: usize, pixels_per_item: usize) -> u32 {
    if pixels_per_item == 0 {
        return 0;
    }
    let needed = min_items as u128 * pixels_per_item as u128;

    let mut side = (needed as f64).sqrt() as u128;
    while side * side < needed {
        side += 1;
    }
    while side > 0 && (side - 1) * (side - 1) >= needed {
        side -= 1;
    }

    let step = pixels_per_item as u128;
    let side = side.div_ceil(step) * step;
    if side > u128::from(MAX_TEXTURE_SIZE) {
        return 0;
    }
    side as u32
}

/// Per-cell height deltas since terrain creation.
#[derive(Debug, Clone, Default)]
pub struct DisplacementMap {
    num_vertices_x: usize,
    num_vertices_y: usize,
    cells: Vec<f16>,
}

impl DisplacementMap {
    /// Creates a zeroed map for the grid.
    #[must_use]
    pub fn new(num_vertices_x: usize, num_vertices_y: usize) -> Self {
        Self {
            num_vertices_x,
            num_vertices_y,
            cells: vec![f16::ZERO; num_vertices_x * num_vertices_y],
        }
    }

    /// Deltas in host order.
    #[must_use]
    pub fn cells(&self) -> &[f16] {
        &self.cells
    }

    /// Mutable deltas in host order.
    pub fn cells_mut(&mut self) -> &mut [f16] {
        &mut self.cells
    }

    /// Resets every delta to zero.
    pub fn clear(&mut self) {
        self.cells.fill(f16::ZERO);
    }

    /// Checks the target format and sizes it to the grid.
    pub fn prepare_target(&self, target: &mut dyn RenderTarget) -> Result<(), ConfigError> {
        if target.format() != PixelFormat::R16F {
            return Err(ConfigError::PixelFormat {
                target: "displacement",
                expected: PixelFormat::R16F.name(),
            });
        }
        let wanted = (self.num_vertices_x as u32, self.num_vertices_y as u32);
        if target.size() != wanted {
            debug!(
                "Resizing displacement target from {:?} to {wanted:?}",
                target.size()
            );
            target.resize(wanted.0, wanted.1);
        }
        Ok(())
    }

    /// Pushes the whole map in a single region update.
    pub fn push(&self, target: &mut dyn RenderTarget) {
        let bpp = PixelFormat::R16F.bytes_per_pixel();
        target.update_region(
            TextureRegion::full(self.num_vertices_x as u32, self.num_vertices_y as u32),
            self.num_vertices_x * bpp,
            bpp,
            bytemuck::cast_slice(&self.cells),
        );
    }
}

/// Packed particle texels.
#[derive(Debug, Clone)]
pub struct ParticleTexture {
    side: u32,
    pixels: Vec<f32>,
}

impl ParticleTexture {
    /// Allocates a texture for at least `max_particles` particles, or `None`
    /// if that would exceed [`MAX_TEXTURE_SIZE`].
    #[must_use]
    pub fn new(max_particles: usize) -> Option<Self> {
        let side = calculate_texture_base_size(max_particles, PIXELS_PER_PARTICLE);
        if side == 0 {
            return None;
        }
        let texels = side as usize * side as usize;
        Some(Self {
            side,
            pixels: vec![0.0; texels * 4],
        })
    }

    /// Texture side in texels.
    #[must_use]
    pub const fn side(&self) -> u32 {
        self.side
    }

    /// Maximum number of particles the texture holds.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.side as usize * self.side as usize / PIXELS_PER_PARTICLE
    }

    /// Packed floats.
    #[must_use]
    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    /// Packs `data`, truncated to [`Self::capacity`], and zeroes the rest.
    /// Returns the number of particles packed.
    pub fn pack(&mut self, data: &ParticleData) -> usize {
        self.pixels.fill(0.0);
        let count = data.len().min(self.capacity());
        for i in 0..count {
            let position = data.positions[i].as_vec3() * PARTICLE_POSITION_SCALE;
            let rotation = data.rotations[i];
            let texel = &mut self.pixels[i * FLOATS_PER_PARTICLE..(i + 1) * FLOATS_PER_PARTICLE];
            texel[0] = position.x;
            texel[1] = position.y;
            texel[2] = position.z;
            texel[3] = data.radii[i] as f32;
            texel[4] = rotation.x as f32;
            texel[5] = rotation.y as f32;
            texel[6] = rotation.z as f32;
            texel[7] = rotation.w as f32;
        }
        count
    }

    /// Checks the target format and sizes it to the texture.
    pub fn prepare_target(&self, target: &mut dyn RenderTarget) -> Result<(), ConfigError> {
        if target.format() != PixelFormat::Rgba32F {
            return Err(ConfigError::PixelFormat {
                target: "particles",
                expected: PixelFormat::Rgba32F.name(),
            });
        }
        if target.size() != (self.side, self.side) {
            target.resize(self.side, self.side);
        }
        Ok(())
    }

    /// Pushes the whole texture in a single region update.
    pub fn push(&self, target: &mut dyn RenderTarget) {
        let bpp = PixelFormat::Rgba32F.bytes_per_pixel();
        target.update_region(
            TextureRegion::full(self.side, self.side),
            self.side as usize * bpp,
            bpp,
            bytemuck::cast_slice(&self.pixels),
        );
    }
}

/// Material parameters describing where the terrain is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialBindings {
    /// Extent covered by the grid
    pub terrain_size: DVec2,
    /// World position of host vertex `(0, 0)`
    pub terrain_position: DVec3,
    /// Vertices along X
    pub num_vertices_x: u32,
    /// Vertices along Y
    pub num_vertices_y: u32,
    /// Distance between vertices
    pub cell_size: DVec2,
}

/// Receives terrain material parameters.
pub trait MaterialParameterSink {
    /// Replaces the bound parameters.
    fn set_bindings(&mut self, bindings: &MaterialBindings);
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DQuat;
    use proptest::prelude::*;

    #[test]
    fn test_texture_base_size_examples() {
        assert_eq!(calculate_texture_base_size(1000, 2), 46);
        assert_eq!(calculate_texture_base_size(2048, 2), 64);
        assert_eq!(calculate_texture_base_size(1, 2), 2);
        assert_eq!(calculate_texture_base_size(8192 * 8192 / 2, 2), 8192);
        assert_eq!(calculate_texture_base_size(8192 * 8192 / 2 + 1, 2), 0);
        assert_eq!(calculate_texture_base_size(10, 0), 0);
    }

    #[test]
    fn test_pack_particles() {
        let mut texture = ParticleTexture::new(4).expect("small");
        assert_eq!(texture.side(), 4);
        assert_eq!(texture.capacity(), 8);

        let rotation = DQuat::from_rotation_z(1.0);
        let data = ParticleData {
            positions: vec![DVec3::new(100.0, -200.0, 300.0)],
            radii: vec![0.25],
            rotations: vec![rotation],
        };
        assert_eq!(texture.pack(&data), 1);
        let px = texture.pixels();
        assert!((px[0] - 1.0).abs() < 1e-6);
        assert!((px[1] + 2.0).abs() < 1e-6);
        assert!((px[2] - 3.0).abs() < 1e-6);
        assert_eq!(px[3], 0.25);
        assert!((px[6] - rotation.z as f32).abs() < 1e-6);
        assert!((px[7] - rotation.w as f32).abs() < 1e-6);
        assert!(px[8..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_pack_truncates_and_zeroes() {
        let mut texture = ParticleTexture::new(1).expect("small");
        let data = ParticleData {
            positions: vec![DVec3::ONE; 5],
            radii: vec![1.0; 5],
            rotations: vec![DQuat::IDENTITY; 5],
        };
        assert_eq!(texture.pack(&data), texture.capacity());

        assert_eq!(texture.pack(&ParticleData::default()), 0);
        assert!(texture.pixels().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_displacement_push_single_update() {
        let mut map = DisplacementMap::new(3, 2);
        map.cells_mut()[4] = f16::from_f32(-1.5);
        let mut target = MemoryRenderTarget::new(PixelFormat::R16F, 1, 1);
        map.prepare_target(&mut target).expect("R16F");
        assert_eq!(target.size(), (3, 2));

        map.push(&mut target);
        assert_eq!(target.update_count(), 1);
        let texels = target.as_f16();
        assert_eq!(texels.len(), 6);
        assert_eq!(texels[4], f16::from_f32(-1.5));
        assert_eq!(texels[0], f16::ZERO);
    }

    #[test]
    fn test_wrong_formats_rejected() {
        let map = DisplacementMap::new(2, 2);
        let mut target = MemoryRenderTarget::new(PixelFormat::Rgba32F, 2, 2);
        assert!(matches!(
            map.prepare_target(&mut target),
            Err(ConfigError::PixelFormat { .. })
        ));

        let texture = ParticleTexture::new(2).expect("small");
        let mut target = MemoryRenderTarget::new(PixelFormat::R16F, 2, 2);
        assert!(matches!(
            texture.prepare_target(&mut target),
            Err(ConfigError::PixelFormat { .. })
        ));
    }

    #[test]
    fn test_particle_push_layout() {
        let mut texture = ParticleTexture::new(2).expect("small");
        let mut target = MemoryRenderTarget::new(PixelFormat::Rgba32F, 1, 1);
        texture.prepare_target(&mut target).expect("RGBA32F");
        texture.pack(&ParticleData {
            positions: vec![DVec3::new(0.0, 0.0, 50.0)],
            radii: vec![2.0],
            rotations: vec![DQuat::IDENTITY],
        });
        texture.push(&mut target);
        let floats = target.as_f32();
        assert_eq!(floats.len(), 16);
        assert_eq!(&floats[..8], &[0.0, 0.0, 0.5, 2.0, 0.0, 0.0, 0.0, 1.0]);
    }

    proptest! {
        #[test]
        fn prop_texture_base_size_is_minimal(min_items in 0usize..40_000_000, pixels in 1usize..8) {
            let side = calculate_texture_base_size(min_items, pixels) as u128;
            let needed = min_items as u128 * pixels as u128;
            let step = pixels as u128;
            if side == 0 {
                let largest = u128::from(MAX_TEXTURE_SIZE) / step * step;
                prop_assert!(needed == 0 || largest * largest < needed);
            } else {
                prop_assert_eq!(side % step, 0);
                prop_assert!(side * side >= needed);
                prop_assert!(side <= u128::from(MAX_TEXTURE_SIZE));
                prop_assert!(side < step || (side - step) * (side - step) < needed);
            }
        }
    }
}
