// SPDX-License-Identifier: GPL-3.0-or-later

//! Optics of a point projector illuminating a convex spherical mirror which
//! reflects onto a dome.
//!
//! All lengths are normalized by the mirror radius, so the mirror is the unit
//! sphere around the origin of the model frame and the projector sits at `P`
//! with `|P| > 1`. The forward transform maps a view direction (as seen from
//! the dome center) to projector image coordinates; the inverse transform is
//! closed-form and also yields the screen-to-dome Jacobian used for the
//! brightness correction.

pub mod dual;
pub mod fisheye;

use nalgebra::Vector3;

use dual::{ Dual2, Scalar, V3 };
use crate::{ DistorterError, MirrorConfig, Result };

/// Fixed bisection count of the forward transform. Bounded and branch-light
/// on purpose; more iterations buy accuracy nobody can see on a dome.
const BISECTION_ITERATIONS: u32 = 10;

const MIN_DIVISOR: f64 = 1e-12;

/// The derived, immutable optics model. Built once per [`MirrorConfig`] and
/// replaced wholesale on reconfiguration.
#[derive(Debug, Clone)]
pub struct MirrorOptics {
    /// Projector position relative to the mirror center, in mirror radii.
    p: Vector3<f64>,
    /// `|p|²`, cached.
    pp: f64,
    dome_center: Vector3<f64>,
    dome_radius: f64,
    zoom_factor: f64,
    /// Rotation in the y/z plane putting the zenith at the configured ordinate.
    cos_alpha: f64,
    sin_alpha: f64,
}

impl MirrorOptics {
    pub fn new(config: &MirrorConfig) -> Result<Self> {
        config.validate()?;

        let r = config.mirror_radius;
        let p = (config.projector_position - config.mirror_position) / r;
        let pp = p.norm_squared();

        let mut optics = Self {
            p,
            pp,
            dome_center: -config.mirror_position / r,
            dome_radius: config.dome_radius / r,
            zoom_factor: (pp - 1.0).sqrt() * config.scaling_factor,
            cos_alpha: 1.0,
            sin_alpha: 0.0,
        };

        // Solve the rotation angle so that the forward transform of straight
        // up lands at the configured image ordinate. The raw ratio is taken
        // before any divisor guard: an on-axis setup yields ±inf here, which
        // atan maps to ±pi/2 just fine.
        let (d, _) = optics
            .reflected_offset(Vector3::new(0.0, 1.0, 0.0))
            .ok_or(DistorterError::ZenithUnreachable)?;
        let alpha = (d.y / d.z).atan() - (config.zenith_y / optics.zoom_factor).atan();
        if !alpha.is_finite() {
            return Err(DistorterError::ZenithUnreachable);
        }
        optics.cos_alpha = alpha.cos();
        optics.sin_alpha = alpha.sin();
        Ok(optics)
    }

    pub fn zoom_factor(&self) -> f64 {
        self.zoom_factor
    }

    /// Maps a view direction to projector image coordinates `(xb, yb)`.
    ///
    /// The flag reports the visibility cone test: whether the projector can
    /// reach that dome point via the mirror at all. The coordinates of an
    /// invisible or degenerate direction are `(0, 0)` and carry no meaning;
    /// callers render such samples black instead of failing.
    pub fn transform(&self, v: Vector3<f64>) -> (f64, f64, bool) {
        let Some((d, visible)) = self.reflected_offset(v) else {
            return (0.0, 0.0, false);
        };
        let zb = self.cos_alpha * d.z + self.sin_alpha * d.y;
        if zb.abs() < MIN_DIVISOR {
            return (0.0, 0.0, false);
        }
        let yb = self.cos_alpha * d.y - self.sin_alpha * d.z;
        (
            self.zoom_factor * d.x / zb,
            self.zoom_factor * yb / zb,
            visible,
        )
    }

    /// Exact inverse of [`transform`](Self::transform): image coordinates back
    /// to the dome direction. `None` means no physically reflected ray exists
    /// for this pixel.
    pub fn retransform(&self, x: f64, y: f64) -> Option<Vector3<f64>> {
        let v = self.trace_screen_ray(x, y)?;
        Some(Vector3::new(v.x, v.y, v.z))
    }

    /// [`retransform`](Self::retransform) plus the partial derivatives of the
    /// result w.r.t. `x` and `y`, obtained by running the same closed-form
    /// code on dual numbers. `|v_x × v_y|` is the local area magnification.
    pub fn retransform_with_jacobian(
        &self,
        x: f64,
        y: f64,
    ) -> Option<(Vector3<f64>, Vector3<f64>, Vector3<f64>)> {
        let v = self.trace_screen_ray(Dual2::var_x(x), Dual2::var_y(y))?;
        Some((
            Vector3::new(v.x.v, v.y.v, v.z.v),
            Vector3::new(v.x.dx, v.y.dx, v.z.dx),
            Vector3::new(v.x.dy, v.y.dy, v.z.dy),
        ))
    }

    /// Shared forward path: dome hit, visibility cone test and the bisection
    /// for the reflection point Q on the unit mirror sphere. Returns the ray
    /// offset `Q - P` (still unrotated) and the visibility flag.
    fn reflected_offset(&self, v: Vector3<f64>) -> Option<(Vector3<f64>, bool)> {
        let norm = v.norm();
        if norm < MIN_DIVISOR {
            return None;
        }
        let s = self.dome_center + v * (self.dome_radius / norm);
        let smp = s - self.p;
        let p_smp = self.p.dot(&smp);
        let visible = (self.pp - 1.0) * smp.norm_squared() > p_smp * p_smp;

        let s_norm = s.norm();
        if s_norm < MIN_DIVISOR {
            return None;
        }
        let s_unit = s / s_norm;
        let p_unit = self.p / self.pp.sqrt();

        let mut t_min = 0.0;
        let mut t_max = 1.0;
        let mut q = p_unit;
        for _ in 0..BISECTION_ITERATIONS {
            let t = 0.5 * (t_min + t_max);
            q = (p_unit * t + s_unit * (1.0 - t)).normalize();
            // Law of reflection at Q, tested by the sign of
            // (unit(P-Q) - unit(S-Q)) · Q.
            let qp = (self.p - q).normalize();
            let qs = (s - q).normalize();
            if (qp - qs).dot(&q) > 0.0 {
                t_max = t;
            } else {
                t_min = t;
            }
        }
        Some((q - self.p, visible))
    }

    /// The closed-form inverse, generic over the scalar so the Jacobian comes
    /// from the identical algebra (see [`dual`]).
    fn trace_screen_ray<T: Scalar>(&self, x: T, y: T) -> Option<V3<T>> {
        let zoom = T::constant(self.zoom_factor);
        let cos_a = T::constant(self.cos_alpha);
        let sin_a = T::constant(self.sin_alpha);

        // Undo zoom and the zenith rotation; the unrotated ray has z = 1.
        let xs = x / zoom;
        let ys = y / zoom;
        let v = V3::new(xs, ys * cos_a + sin_a, cos_a - ys * sin_a);
        let p = V3::constant(self.p);

        let vv = v.dot(v);
        if !vv.value().is_finite() || vv.value() < MIN_DIVISOR {
            return None;
        }

        // Near root of |P + t·v|² = 1: the mirror hit facing the projector.
        let pv = p.dot(v);
        let discr = pv * pv - T::constant(self.pp - 1.0) * vv;
        if discr.value() < 0.0 {
            return None;
        }
        let q = p + v.scale((-pv - discr.sqrt()) / vv);

        // Reflect; on the unit sphere Q is its own normal.
        let two_vq = v.dot(q) + v.dot(q);
        let w = v - q.scale(two_vq);

        // Far root of the dome quadratic: the hit in front of the reflected ray.
        let mq = q - V3::constant(self.dome_center);
        let ww = w.dot(w);
        if ww.value() < MIN_DIVISOR {
            return None;
        }
        let b = mq.dot(w);
        let discr = b * b - ww * (mq.dot(mq) - T::constant(self.dome_radius * self.dome_radius));
        if discr.value() < 0.0 {
            return None;
        }
        let s = q + w.scale((discr.sqrt() - b) / ww);

        Some((s - V3::constant(self.dome_center)).scale(T::constant(1.0 / self.dome_radius)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The documented reference setup. Positions are given in the upstream
    /// key order (x, z, y): projector (0,-2,15), mirror (0,0,20).
    fn reference_config() -> MirrorConfig {
        MirrorConfig {
            projector_position: Vector3::new(0.0, 15.0, -2.0),
            mirror_position: Vector3::new(0.0, 20.0, 0.0),
            mirror_radius: 1.0,
            dome_radius: 25.0,
            zenith_y: 0.0,
            scaling_factor: 1.0,
            gamma: 0.45,
        }
    }

    fn angle_between(a: Vector3<f64>, b: Vector3<f64>) -> f64 {
        (a.normalize().dot(&b.normalize())).clamp(-1.0, 1.0).acos()
    }

    #[test]
    fn reference_scenario_round_trips() {
        let optics = MirrorOptics::new(&reference_config()).unwrap();
        let v = Vector3::new(0.0, 0.0, 1.0);
        let (xb, yb, visible) = optics.transform(v);
        assert!(visible);
        assert!(xb.is_finite() && yb.is_finite());

        let back = optics.retransform(xb, yb).expect("reference pixel must have a reflection");
        assert!(angle_between(v, back) < 5e-3, "round trip error {}", angle_between(v, back));
    }

    #[test]
    fn round_trip_over_visible_directions() {
        let optics = MirrorOptics::new(&reference_config()).unwrap();
        let dirs = [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.2, 0.1, 1.0),
            Vector3::new(-0.3, 0.2, 0.9),
            Vector3::new(0.1, 0.5, 0.8),
            Vector3::new(-0.1, -0.2, 1.1),
        ];
        for v in dirs {
            let (xb, yb, visible) = optics.transform(v);
            if !visible {
                continue;
            }
            let back = optics.retransform(xb, yb).expect("visible direction must retransform");
            assert!(
                angle_between(v, back) < 5e-3,
                "round trip error {} for {:?}",
                angle_between(v, back),
                v
            );
        }
    }

    #[test]
    fn zenith_is_not_reachable_by_the_reference_projector() {
        // The cone test must reject the dome point right behind the mirror.
        let optics = MirrorOptics::new(&reference_config()).unwrap();
        let (_, _, visible) = optics.transform(Vector3::new(0.0, 1.0, 0.0));
        assert!(!visible);
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let optics = MirrorOptics::new(&reference_config()).unwrap();
        let eps = 1e-6;
        // Base points taken from forward transforms of known-visible directions.
        let dirs = [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.2, 0.1, 1.0),
            Vector3::new(-0.3, 0.2, 0.9),
        ];
        for dir in dirs {
            let (x, y, visible) = optics.transform(dir);
            assert!(visible);
            let (v, v_x, v_y) = optics
                .retransform_with_jacobian(x, y)
                .expect("valid pixel must have a Jacobian");
            assert!((v - optics.retransform(x, y).unwrap()).norm() < 1e-12);

            let fd_x = (optics.retransform(x + eps, y).unwrap()
                - optics.retransform(x - eps, y).unwrap())
                / (2.0 * eps);
            let fd_y = (optics.retransform(x, y + eps).unwrap()
                - optics.retransform(x, y - eps).unwrap())
                / (2.0 * eps);
            assert!((v_x - fd_x).norm() < 1e-5, "dx mismatch {:?} vs {:?}", v_x, fd_x);
            assert!((v_y - fd_y).norm() < 1e-5, "dy mismatch {:?} vs {:?}", v_y, fd_y);
        }
    }

    #[test]
    fn zenith_alignment_without_lateral_offset() {
        // Mirror straight below the projector: the zenith must land on the
        // image ordinate axis at exactly zenith_y.
        let config = MirrorConfig {
            projector_position: Vector3::new(0.0, 3.0, 0.0),
            mirror_position: Vector3::new(0.0, 2.0, 0.0),
            mirror_radius: 0.25,
            dome_radius: 2.5,
            zenith_y: 0.125,
            scaling_factor: 0.8,
            gamma: 0.45,
        };
        let optics = MirrorOptics::new(&config).unwrap();
        let (xb, yb, _) = optics.transform(Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(xb, 0.0);
        assert!((yb - config.zenith_y).abs() < 1e-9, "yb = {yb}");
    }

    #[test]
    fn scale_invariance() {
        // With the mirror at the origin, scaling every length by k must not
        // change anything: only ratios to the mirror radius matter.
        let base = MirrorConfig {
            projector_position: Vector3::new(0.0, 3.0, -1.0),
            mirror_position: Vector3::zeros(),
            mirror_radius: 0.5,
            dome_radius: 5.0,
            zenith_y: 0.125,
            scaling_factor: 0.8,
            gamma: 0.45,
        };
        let k = 3.7;
        let scaled = MirrorConfig {
            projector_position: base.projector_position * k,
            mirror_radius: base.mirror_radius * k,
            dome_radius: base.dome_radius * k,
            ..base.clone()
        };
        let a = MirrorOptics::new(&base).unwrap();
        let b = MirrorOptics::new(&scaled).unwrap();

        for v in [Vector3::new(0.1, 0.2, 1.0), Vector3::new(-0.4, 0.1, 0.8)] {
            let (xa, ya, va) = a.transform(v);
            let (xb, yb, vb) = b.transform(v);
            assert!((xa - xb).abs() < 1e-9 && (ya - yb).abs() < 1e-9);
            assert_eq!(va, vb);
        }
        for (x, y) in [(0.0, 0.0), (0.2, -0.1), (-0.15, 0.3)] {
            match (a.retransform(x, y), b.retransform(x, y)) {
                (Some(ra), Some(rb)) => assert!((ra - rb).norm() < 1e-9),
                (None, None) => {}
                other => panic!("scale changed failure behavior: {other:?}"),
            }
        }
    }

    #[test]
    fn pixels_without_reflection_fail_quietly() {
        let optics = MirrorOptics::new(&reference_config()).unwrap();
        // A ray far off to the side misses the unit mirror sphere entirely.
        assert!(optics.retransform(1000.0, 0.0).is_none());
        assert!(optics.retransform_with_jacobian(1000.0, 0.0).is_none());
    }

    #[test]
    fn construction_rejects_invalid_geometry() {
        let config = MirrorConfig {
            projector_position: Vector3::new(0.0, 2.1, 0.0),
            mirror_position: Vector3::new(0.0, 2.0, 0.0),
            mirror_radius: 0.25,
            ..MirrorConfig::default()
        };
        assert!(MirrorOptics::new(&config).is_err());
    }
}
