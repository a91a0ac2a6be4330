// SPDX-License-Identifier: GPL-3.0-or-later

//! Two-lane forward-mode dual numbers.
//!
//! The closed-form mirror inverse needs its own Jacobian for the brightness
//! correction. Instead of hand-duplicating the algebra with differentiated
//! copies of every intermediate, the inverse is written once over [`Scalar`]
//! and run either on plain `f64` or on [`Dual2`], which drags the two partial
//! derivatives (w.r.t. the screen x and y) through the exact same code path.

use std::ops::{ Add, Div, Mul, Neg, Sub };

/// Scalar the reflection algebra is generic over.
pub trait Scalar:
    Copy
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    fn constant(v: f64) -> Self;
    fn sqrt(self) -> Self;
    /// The underlying value, used only for sign/threshold decisions.
    fn value(self) -> f64;
}

impl Scalar for f64 {
    #[inline] fn constant(v: f64) -> Self { v }
    #[inline] fn sqrt(self) -> Self { f64::sqrt(self) }
    #[inline] fn value(self) -> f64 { self }
}

/// `v + dx·εx + dy·εy` with `εx² = εy² = εx·εy = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dual2 {
    pub v: f64,
    pub dx: f64,
    pub dy: f64,
}

impl Dual2 {
    /// Seeds the first derivative lane: the screen x coordinate.
    #[inline]
    pub fn var_x(v: f64) -> Self { Self { v, dx: 1.0, dy: 0.0 } }

    /// Seeds the second derivative lane: the screen y coordinate.
    #[inline]
    pub fn var_y(v: f64) -> Self { Self { v, dx: 0.0, dy: 1.0 } }
}

impl Add for Dual2 {
    type Output = Self;
    #[inline]
    fn add(self, o: Self) -> Self {
        Self { v: self.v + o.v, dx: self.dx + o.dx, dy: self.dy + o.dy }
    }
}

impl Sub for Dual2 {
    type Output = Self;
    #[inline]
    fn sub(self, o: Self) -> Self {
        Self { v: self.v - o.v, dx: self.dx - o.dx, dy: self.dy - o.dy }
    }
}

impl Mul for Dual2 {
    type Output = Self;
    #[inline]
    fn mul(self, o: Self) -> Self {
        Self {
            v: self.v * o.v,
            dx: self.dx * o.v + self.v * o.dx,
            dy: self.dy * o.v + self.v * o.dy,
        }
    }
}

impl Div for Dual2 {
    type Output = Self;
    #[inline]
    fn div(self, o: Self) -> Self {
        let inv = 1.0 / o.v;
        let v = self.v * inv;
        Self {
            v,
            dx: (self.dx - v * o.dx) * inv,
            dy: (self.dy - v * o.dy) * inv,
        }
    }
}

impl Neg for Dual2 {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self { Self { v: -self.v, dx: -self.dx, dy: -self.dy } }
}

impl Scalar for Dual2 {
    #[inline]
    fn constant(v: f64) -> Self { Self { v, dx: 0.0, dy: 0.0 } }

    #[inline]
    fn sqrt(self) -> Self {
        let s = self.v.sqrt();
        let d = 0.5 / s;
        Self { v: s, dx: self.dx * d, dy: self.dy * d }
    }

    #[inline]
    fn value(self) -> f64 { self.v }
}

/// Minimal 3-vector over a generic [`Scalar`].
///
/// `nalgebra` stays the vocabulary type on the public API; this exists only
/// so the inverse transform can run on dual numbers without implementing the
/// full simba scalar stack for [`Dual2`].
#[derive(Debug, Clone, Copy)]
pub struct V3<T: Scalar> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T: Scalar> V3<T> {
    #[inline]
    pub fn new(x: T, y: T, z: T) -> Self { Self { x, y, z } }

    #[inline]
    pub fn constant(v: nalgebra::Vector3<f64>) -> Self {
        Self::new(T::constant(v.x), T::constant(v.y), T::constant(v.z))
    }

    #[inline]
    pub fn dot(self, o: Self) -> T {
        self.x * o.x + self.y * o.y + self.z * o.z
    }

    #[inline]
    pub fn scale(self, s: T) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

impl<T: Scalar> Add for V3<T> {
    type Output = Self;
    #[inline]
    fn add(self, o: Self) -> Self { Self::new(self.x + o.x, self.y + o.y, self.z + o.z) }
}

impl<T: Scalar> Sub for V3<T> {
    type Output = Self;
    #[inline]
    fn sub(self, o: Self) -> Self { Self::new(self.x - o.x, self.y - o.y, self.z - o.z) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool { (a - b).abs() < 1e-12 }

    #[test]
    fn product_rule() {
        let x = Dual2::var_x(3.0);
        let y = Dual2::var_y(5.0);
        let p = x * y; // d(xy)/dx = y, d(xy)/dy = x
        assert!(close(p.v, 15.0));
        assert!(close(p.dx, 5.0));
        assert!(close(p.dy, 3.0));
    }

    #[test]
    fn quotient_and_sqrt() {
        let x = Dual2::var_x(2.0);
        let q = Dual2::constant(1.0) / x; // d(1/x)/dx = -1/x²
        assert!(close(q.dx, -0.25));

        let s = x.sqrt(); // d(√x)/dx = 1/(2√x)
        assert!(close(s.v, 2.0f64.sqrt()));
        assert!(close(s.dx, 0.5 / 2.0f64.sqrt()));
    }
}
