use std::f64::consts::PI;

use glam::DVec3;

/// Smoothing kernels for a fixed support radius `h`, with the
/// normalization constants precomputed.
///
/// * `poly6` for density and normalization sums,
/// * the spiky gradient for every pairwise force,
/// * the Akinci 2013 cohesion and adhesion kernels for surface tension.
#[derive(Debug, Clone, Copy)]
pub struct Kernels {
    h: f64,
    h2: f64,
    poly6: f64,
    poly6_at_zero: f64,
    spiky_grad: f64,
    cohesion: f64,
    cohesion_offset: f64,
    adhesion: f64,
}

impl Kernels {
    pub fn new(h: f64) -> Self {
        let h2 = h * h;
        let h3 = h2 * h;
        let h6 = h3 * h3;
        let h9 = h6 * h3;
        let poly6 = 315.0 / (64.0 * PI * h9);

        Self {
            h,
            h2,
            poly6,
            poly6_at_zero: poly6 * h6,
            spiky_grad: -45.0 / (PI * h6),
            cohesion: 32.0 / (PI * h9),
            cohesion_offset: h6 / 64.0,
            adhesion: 0.007 / h.powf(3.25),
        }
    }

    pub fn radius(&self) -> f64 {
        self.h
    }

    pub fn poly6(&self, r: DVec3) -> f64 {
        let r2 = r.length_squared();
        if r2 >= self.h2 {
            return 0.0;
        }
        let d = self.h2 - r2;
        self.poly6 * d * d * d
    }

    /// `poly6` at zero distance; every particle's own contribution.
    pub fn poly6_at_zero(&self) -> f64 {
        self.poly6_at_zero
    }

    /// Gradient of the spiky kernel with respect to the first particle,
    /// for `r = x_i - x_j`. Points from `i` towards `j`.
    pub fn spiky_gradient(&self, r: DVec3) -> DVec3 {
        let len = r.length();
        if len >= self.h || len <= f64::EPSILON {
            return DVec3::ZERO;
        }
        let d = self.h - len;
        r * (self.spiky_grad * d * d / len)
    }

    pub fn cohesion(&self, r: f64) -> f64 {
        if r <= 0.0 || r >= self.h {
            return 0.0;
        }
        let d = self.h - r;
        let term = d * d * d * r * r * r;
        if 2.0 * r > self.h {
            self.cohesion * term
        } else {
            self.cohesion * (2.0 * term - self.cohesion_offset)
        }
    }

    pub fn adhesion(&self, r: f64) -> f64 {
        if 2.0 * r <= self.h || r >= self.h {
            return 0.0;
        }
        let base = -4.0 * r * r / self.h + 6.0 * r - 2.0 * self.h;
        self.adhesion * base.max(0.0).powf(0.25)
    }
}
