// SPDX-License-Identifier: GPL-3.0-or-later

//! Screen pixel to source pixel lookup, for pointing devices.
//!
//! The GPU warps source to screen; hit testing needs the opposite direction.
//! Rather than solving the optics per query this interpolates the same mesh
//! the warp uses, so a click lands on exactly the pixel the warp took its
//! color from.

use crate::mesh::{ DistortionMesh, CELL_SIZE_PX };

impl DistortionMesh {
    /// Source pixel feeding screen pixel `(x, y)`.
    ///
    /// Input `y` runs top-down as window coordinates do; the returned
    /// coordinates are in pixels of the square source frame, origin at its
    /// bottom-left, range `[0, viewport_side]`. Out-of-range inputs are
    /// clamped to the screen.
    pub fn source_pixel(&self, x: u32, y: u32) -> (f64, f64) {
        let (w, h) = self.screen();
        let x = x.min(w.saturating_sub(1));
        let y = y.min(h.saturating_sub(1));
        let y_up = (h - 1 - y) as f64 / CELL_SIZE_PX as f64;
        let x = x as f64 / CELL_SIZE_PX as f64;

        let i = (x.floor() as usize).min(self.cols() - 2);
        let j = (y_up.floor() as usize).min(self.rows() - 2);
        let di = (x - i as f64).clamp(0.0, 1.0);
        let dj = (y_up - j as f64).clamp(0.0, 1.0);

        let v00 = self.vertex(i, j);
        let v10 = self.vertex(i + 1, j);
        let v01 = self.vertex(i, j + 1);
        let v11 = self.vertex(i + 1, j + 1);

        let u = (1.0 - di) * (1.0 - dj) * v00.u as f64
            + di * (1.0 - dj) * v10.u as f64
            + (1.0 - di) * dj * v01.u as f64
            + di * dj * v11.u as f64;
        let v = (1.0 - di) * (1.0 - dj) * v00.v as f64
            + di * (1.0 - dj) * v10.v as f64
            + (1.0 - di) * dj * v01.v as f64
            + di * dj * v11.v as f64;

        // Stored coordinates are texture u/v (scaled by texture_used);
        // multiplying by the texture edge recovers source pixels.
        let side = self.texture_side() as f64;
        (u * side, v * side)
    }
}
