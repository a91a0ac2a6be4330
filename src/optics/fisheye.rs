// SPDX-License-Identifier: GPL-3.0-or-later

//! The fixed fisheye camera model of the source image.
//!
//! This is a contract shared with the scene renderer: it must render its
//! square frame with exactly this projection so that directions recovered by
//! the mirror optics can be located inside that frame. The projection is
//! angular ("f-theta") with a hard 175° field of view and takes directions in
//! the camera frame, optical axis toward -z, image axes x (right) and y (up).

use nalgebra::Vector3;

/// Maximum field of view of the source fisheye render, in degrees.
pub const MAX_FOV_DEG: f64 = 175.0;

const ON_AXIS_EPS: f64 = 1e-12;

/// Result of projecting one direction into the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FisheyeUv {
    /// Texture coordinate in `[0,1]²` of the square source frame.
    pub u: f64,
    pub v: f64,
    /// True when the direction fell outside the 175° frame and the
    /// coordinate had to be clamped; such samples carry no usable pixels.
    pub clamped: bool,
}

/// Projects a camera-frame direction into the square fisheye image.
///
/// `v` does not have to be unit length; the mapping only depends on its
/// direction.
pub fn project(v: Vector3<f64>) -> FisheyeUv {
    let r = (v.x * v.x + v.y * v.y).sqrt();
    if r < ON_AXIS_EPS {
        // Looking straight down the optical axis (or straight behind it).
        return FisheyeUv { u: 0.5, v: 0.5, clamped: v.z >= 0.0 };
    }

    // a = angle from the optical axis / pi, in [0,1]
    let a = 0.5 + (v.z / r).atan() / std::f64::consts::PI;
    let f = a * (180.0 / MAX_FOV_DEG) / r;

    let u = 0.5 + v.x * f;
    let w = 0.5 + v.y * f;
    let clamped = !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&w);
    FisheyeUv { u: u.clamp(0.0, 1.0), v: w.clamp(0.0, 1.0), clamped }
}
