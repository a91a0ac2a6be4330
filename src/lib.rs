// SPDX-License-Identifier: GPL-3.0-or-later

//! Warp correction for single-projector planetarium domes.
//!
//! A projector aimed at a convex spherical mirror can illuminate most of a
//! dome, but the image it has to emit is heavily distorted. This crate takes
//! the installation geometry ([`MirrorConfig`]), derives the mirror optics
//! ([`optics::MirrorOptics`]), precomputes a warp mesh with per-vertex source
//! coordinates and brightness ([`DistortionMesh`]) and applies it to fisheye
//! rendered frames on the GPU. The same mesh answers the inverse question
//! "which source pixel is shown at this screen pixel" for pointing devices.

pub mod config;
pub mod gpu;
mod inverse;
pub mod mesh;
pub mod optics;

pub use config::MirrorConfig;
pub use mesh::{ DistortionMesh, MeshVertex };
pub use optics::MirrorOptics;

#[derive(thiserror::Error, Debug)]
pub enum DistorterError {
    #[error("{name} must be positive (got {value})")]
    InvalidRadius { name: &'static str, value: f64 },
    #[error("projector must sit strictly outside the mirror sphere (distance {dist}, mirror radius {radius})")]
    ProjectorInsideMirror { dist: f64, radius: f64 },
    #[error("the zenith direction has no reflection in this geometry")]
    ZenithUnreachable,
    #[error("screen size {0}x{1} is smaller than one mesh cell")]
    ScreenTooSmall(u32, u32),
    #[error("no compatible GPU adapter")]
    NoGpuAdapter,
    #[error("failed to initialize GPU device: {0}")]
    GpuInit(String),
    #[error("buffer size mismatch (expected {expected} bytes, got {got})")]
    BufferSizeMismatch { expected: usize, got: usize },
    #[error("GPU readback failed: {0}")]
    GpuReadback(String),
}

pub type Result<T> = std::result::Result<T, DistorterError>;

/// The top-level distorter: owns the optics, the mesh and (lazily) the GPU
/// renderer for one configuration and screen size.
pub struct MirrorDistorter {
    config: MirrorConfig,
    screen: (u32, u32),
    optics: MirrorOptics,
    mesh: DistortionMesh,
    renderer: Option<gpu::WarpRenderer>,
    renderer_failed: bool,
}

impl MirrorDistorter {
    pub fn new(config: MirrorConfig, screen_w: u32, screen_h: u32) -> Result<Self> {
        if screen_w < mesh::CELL_SIZE_PX || screen_h < mesh::CELL_SIZE_PX {
            return Err(DistorterError::ScreenTooSmall(screen_w, screen_h));
        }
        let optics = MirrorOptics::new(&config)?;
        let mesh = DistortionMesh::build(&optics, config.gamma_clamped(), screen_w, screen_h);
        log::info!(
            "built {}x{} distortion mesh for a {}x{} px screen",
            mesh.cols(),
            mesh.rows(),
            screen_w,
            screen_h
        );
        Ok(Self {
            config,
            screen: (screen_w, screen_h),
            optics,
            mesh,
            renderer: None,
            renderer_failed: false,
        })
    }

    /// Reconfigures the distorter. A no-op when nothing changed, so callers
    /// can feed it every frame; otherwise optics, mesh and renderer are
    /// rebuilt from scratch.
    pub fn init(&mut self, config: MirrorConfig, screen_w: u32, screen_h: u32) -> Result<()> {
        if self.config == config && self.screen == (screen_w, screen_h) {
            return Ok(());
        }
        let next = Self::new(config, screen_w, screen_h)?;
        *self = next;
        Ok(())
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn optics(&self) -> &MirrorOptics {
        &self.optics
    }

    pub fn mesh(&self) -> &DistortionMesh {
        &self.mesh
    }

    /// Warps one fisheye frame into the screen image.
    ///
    /// See [`gpu::WarpRenderer::warp_frame`] for the buffer contracts. The
    /// renderer is created on first use; a failed creation is remembered and
    /// not retried until the next successful [`init`](Self::init).
    pub fn distort(&mut self, frame: &[u8], output: &mut [u8]) -> Result<()> {
        if self.renderer.is_none() {
            if self.renderer_failed {
                return Err(DistorterError::NoGpuAdapter);
            }
            match gpu::WarpRenderer::new(&self.mesh) {
                Ok(renderer) => {
                    log::info!("initialized warp renderer for a {}x{} px screen", self.screen.0, self.screen.1);
                    self.renderer = Some(renderer);
                }
                Err(e) => {
                    log::error!("failed to initialize warp renderer: {e}");
                    self.renderer_failed = true;
                    return Err(e);
                }
            }
        }
        match &self.renderer {
            Some(renderer) => renderer.warp_frame(frame, output),
            None => Err(DistorterError::NoGpuAdapter),
        }
    }

    /// Source pixel shown at screen pixel `(x, y)`, `y` top-down.
    pub fn distort_xy(&self, x: u32, y: u32) -> (f64, f64) {
        self.mesh.source_pixel(x, y)
    }
}
