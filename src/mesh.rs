// SPDX-License-Identifier: GPL-3.0-or-later

//! Precomputed warp mesh covering the projector screen.
//!
//! One vertex every 16 px in each direction; for every vertex the inverse
//! mirror transform recovers the dome direction visible at that screen point,
//! the fisheye model locates it in the square source frame, and the Jacobian
//! gives the local area magnification driving the brightness equalization.
//! The mesh is plain data: building it touches no GPU and is deterministic,
//! identical inputs produce bit-identical meshes.

use nalgebra::Vector3;

use crate::optics::{ fisheye, MirrorOptics };

/// Mesh cell edge in screen pixels.
pub const CELL_SIZE_PX: u32 = 16;

/// One mesh vertex. Screen position is implied by the grid index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshVertex {
    /// Source texture coordinate, already scaled into `[0, texture_used]`.
    pub u: f32,
    pub v: f32,
    /// Brightness multiplier in `[0, 1]`; exactly 0 for vertices without a
    /// usable source sample.
    pub brightness: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistortionMesh {
    cols: usize,
    rows: usize,
    screen: (u32, u32),
    viewport_side: u32,
    texture_side: u32,
    texture_used: f32,
    /// Row-major, row 0 at the bottom of the screen.
    vertices: Vec<MeshVertex>,
}

impl DistortionMesh {
    /// Builds the mesh for a `screen_w` x `screen_h` px projector image.
    ///
    /// Screen coordinates are normalized by the screen height so the vertical
    /// extent is independent of the aspect ratio; the grid center coincides
    /// with the screen center. The screen must be at least one cell in each
    /// direction (see [`MirrorDistorter::new`](crate::MirrorDistorter::new)).
    pub fn build(optics: &MirrorOptics, gamma: f64, screen_w: u32, screen_h: u32) -> Self {
        let cols = (screen_w / CELL_SIZE_PX + 1) as usize;
        let rows = (screen_h / CELL_SIZE_PX + 1) as usize;
        let viewport_side = screen_w.min(screen_h);
        let texture_side = viewport_side.next_power_of_two();
        let texture_used = viewport_side as f64 / texture_side as f64;

        let w = screen_w as f64;
        let h = screen_h as f64;
        let cell = CELL_SIZE_PX as f64;

        let mut vertices = vec![MeshVertex { u: 0.0, v: 0.0, brightness: 0.0 }; cols * rows];
        let mut area = vec![0.0f64; cols * rows]; // |v_x × v_y| scratch, build-time only
        let mut area_max = 0.0f64;

        for j in 0..rows {
            for i in 0..cols {
                let idx = j * cols + i;
                let x = (i as f64 * cell - 0.5 * w) / h;
                let y = (j as f64 * cell - 0.5 * h) / h;
                let Some((v, v_x, v_y)) = optics.retransform_with_jacobian(x, y) else {
                    continue; // no reflected ray here, stays black
                };
                let mut a = v_x.cross(&v_y).norm();

                // The fisheye frame is centered on the dome zenith: x stays,
                // the up component becomes the (negated) optical axis.
                let uv = fisheye::project(Vector3::new(v.x, v.z, -v.y));
                if uv.clamped {
                    a = 0.0; // sample falls outside the rendered frame
                }
                vertices[idx].u = (uv.u * texture_used) as f32;
                vertices[idx].v = (uv.v * texture_used) as f32;
                area[idx] = a;
                area_max = area_max.max(a);
            }
        }

        // Equalize dome brightness: the most magnified vertex keeps full
        // brightness, everything else is dimmed relative to it.
        if area_max > 0.0 {
            for (vertex, &a) in vertices.iter_mut().zip(area.iter()) {
                vertex.brightness = if a > 0.0 { (a / area_max).powf(gamma) as f32 } else { 0.0 };
            }
        }

        Self {
            cols,
            rows,
            screen: (screen_w, screen_h),
            viewport_side,
            texture_side,
            texture_used: texture_used as f32,
            vertices,
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Screen size the mesh was built for, in pixels.
    pub fn screen(&self) -> (u32, u32) {
        self.screen
    }

    /// Edge of the square source frame actually carrying pixels.
    pub fn viewport_side(&self) -> u32 {
        self.viewport_side
    }

    /// Edge of the power-of-two texture the source frame is uploaded into.
    pub fn texture_side(&self) -> u32 {
        self.texture_side
    }

    /// `viewport_side / texture_side`; the stored u/v coordinates are already
    /// scaled by this.
    pub fn texture_used(&self) -> f32 {
        self.texture_used
    }

    pub fn vertices(&self) -> &[MeshVertex] {
        &self.vertices
    }

    #[inline]
    pub(crate) fn index(&self, i: usize, j: usize) -> usize {
        j * self.cols + i
    }

    pub fn vertex(&self, i: usize, j: usize) -> &MeshVertex {
        &self.vertices[self.index(i, j)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MirrorConfig;

    fn reference_mesh() -> (MirrorOptics, DistortionMesh) {
        let config = MirrorConfig::default();
        let optics = MirrorOptics::new(&config).unwrap();
        let mesh = DistortionMesh::build(&optics, config.gamma_clamped(), 320, 240);
        (optics, mesh)
    }

    #[test]
    fn grid_and_texture_dimensions() {
        let (_, mesh) = reference_mesh();
        assert_eq!(mesh.cols(), 21);
        assert_eq!(mesh.rows(), 16);
        assert_eq!(mesh.vertices().len(), 21 * 16);
        assert_eq!(mesh.viewport_side(), 240);
        assert_eq!(mesh.texture_side(), 256);
        assert!((mesh.texture_used() - 240.0 / 256.0).abs() < 1e-7);
    }

    #[test]
    fn brightness_bounds_and_black_vertices() {
        let (optics, mesh) = reference_mesh();
        for j in 0..mesh.rows() {
            for i in 0..mesh.cols() {
                let vertex = mesh.vertex(i, j);
                assert!((0.0..=1.0).contains(&vertex.brightness));
                assert!((0.0..=1.0).contains(&vertex.u));
                assert!((0.0..=1.0).contains(&vertex.v));

                // Cross-check against the optics: vertices without a usable
                // source sample must be exactly black.
                let x = (i as f64 * 16.0 - 160.0) / 240.0;
                let y = (j as f64 * 16.0 - 120.0) / 240.0;
                match optics.retransform_with_jacobian(x, y) {
                    None => assert_eq!(vertex.brightness, 0.0),
                    Some((v, _, _)) => {
                        let uv = fisheye::project(nalgebra::Vector3::new(v.x, v.z, -v.y));
                        if uv.clamped {
                            assert_eq!(vertex.brightness, 0.0);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn brightest_vertex_is_exactly_one() {
        let (_, mesh) = reference_mesh();
        assert!(mesh.vertices().iter().any(|v| v.brightness == 1.0));
        assert!(mesh.vertices().iter().any(|v| v.brightness > 0.0 && v.brightness < 1.0));
    }

    #[test]
    fn build_is_deterministic() {
        let config = MirrorConfig::default();
        let optics = MirrorOptics::new(&config).unwrap();
        let a = DistortionMesh::build(&optics, config.gamma_clamped(), 320, 240);
        let b = DistortionMesh::build(&optics, config.gamma_clamped(), 320, 240);
        assert_eq!(a, b);
    }
}
