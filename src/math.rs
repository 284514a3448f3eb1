//! Minimal 3D math for pose and clip-plane records.
//!
//! Everything here is plain-old-data (`bytemuck::Pod`) so the wire records in
//! [`crate::protocol`] that embed these types have an exact, padding-free
//! layout. Matrices are row-major, matching the record layout the compositor
//! expects.

use std::ops::{Add, Mul, Sub};

use bytemuck::{Pod, Zeroable};

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);
    pub const UP: Self = Self::new(0.0, 1.0, 0.0);
    pub const FORWARD: Self = Self::new(0.0, 0.0, 1.0);
    pub const RIGHT: Self = Self::new(1.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Rotates a vector by this quaternion.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let tx = self.x * 2.0;
        let ty = self.y * 2.0;
        let tz = self.z * 2.0;
        let txx = self.x * tx;
        let tyy = self.y * ty;
        let tzz = self.z * tz;
        let txy = self.x * ty;
        let txz = self.x * tz;
        let tyz = self.y * tz;
        let twx = self.w * tx;
        let twy = self.w * ty;
        let twz = self.w * tz;

        Vec3::new(
            (1.0 - (tyy + tzz)) * v.x + (txy - twz) * v.y + (txz + twy) * v.z,
            (txy + twz) * v.x + (1.0 - (txx + tzz)) * v.y + (tyz - twx) * v.z,
            (txz - twy) * v.x + (tyz + twx) * v.y + (1.0 - (txx + tyy)) * v.z,
        )
    }

    pub fn normalized(self) -> Self {
        let n = (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt();
        if n <= f32::EPSILON {
            return Self::IDENTITY;
        }
        Self::new(self.x / n, self.y / n, self.z / n, self.w / n)
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Quat {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y + self.y * rhs.w + self.z * rhs.x - self.x * rhs.z,
            self.w * rhs.z + self.z * rhs.w + self.x * rhs.y - self.y * rhs.x,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }
}

/// Row-major 4x4 matrix; element `(row, col)` lives at `row * 4 + col`.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Mat4(pub [f32; 16]);

impl Mat4 {
    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.0[row * 4 + col]
    }

    /// Perspective projection from a vertical field of view in degrees.
    ///
    /// Matches the convention the compositor uses: the horizontal field of
    /// view is derived from the vertical one through the aspect ratio.
    pub fn perspective(v_fov_deg: f32, aspect: f32, z_near: f32, z_far: f32) -> Self {
        let v_fov_rad = v_fov_deg.to_radians();
        let h_fov_rad = 2.0 * ((v_fov_rad * 0.5).tan() * aspect).atan();
        let w = 1.0 / (h_fov_rad * 0.5).tan();
        let h = 1.0 / (v_fov_rad * 0.5).tan();
        let q0 = (z_far + z_near) / (z_near - z_far);
        let q1 = 2.0 * (z_far * z_near) / (z_near - z_far);

        Self([
            w, 0.0, 0.0, 0.0, //
            0.0, h, 0.0, 0.0, //
            0.0, 0.0, q0, q1, //
            0.0, 0.0, -1.0, 0.0,
        ])
    }

    pub fn translate(v: Vec3) -> Self {
        let mut m = Self::IDENTITY;
        m.0[3] = v.x;
        m.0[7] = v.y;
        m.0[11] = v.z;
        m
    }

    pub fn rotate(q: Quat) -> Self {
        let (qx, qy, qz, qw) = (q.x, q.y, q.z, q.w);
        Self([
            1.0 - 2.0 * qy * qy - 2.0 * qz * qz,
            2.0 * qx * qy - 2.0 * qz * qw,
            2.0 * qx * qz + 2.0 * qy * qw,
            0.0,
            2.0 * qx * qy + 2.0 * qz * qw,
            1.0 - 2.0 * qx * qx - 2.0 * qz * qz,
            2.0 * qy * qz - 2.0 * qx * qw,
            0.0,
            2.0 * qx * qz - 2.0 * qy * qw,
            2.0 * qy * qz + 2.0 * qx * qw,
            1.0 - 2.0 * qx * qx - 2.0 * qy * qy,
            0.0,
            0.0,
            0.0,
            0.0,
            1.0,
        ])
    }

    pub fn scale(v: Vec3) -> Self {
        let mut m = Self::IDENTITY;
        m.0[0] = v.x;
        m.0[5] = v.y;
        m.0[10] = v.z;
        m
    }

    pub fn trs(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self::translate(translation) * Self::rotate(rotation) * Self::scale(scale)
    }

    /// Transforms a position, including translation and perspective divide.
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let m = &self.0;
        let x = m[0] * p.x + m[1] * p.y + m[2] * p.z + m[3];
        let y = m[4] * p.x + m[5] * p.y + m[6] * p.z + m[7];
        let z = m[8] * p.x + m[9] * p.y + m[10] * p.z + m[11];
        let w = m[12] * p.x + m[13] * p.y + m[14] * p.z + m[15];
        if (w - 1.0).abs() <= f32::EPSILON || w.abs() <= f32::EPSILON {
            Vec3::new(x, y, z)
        } else {
            Vec3::new(x / w, y / w, z / w)
        }
    }

    /// Transforms a direction; translation does not apply.
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        let m = &self.0;
        Vec3::new(
            m[0] * v.x + m[1] * v.y + m[2] * v.z,
            m[4] * v.x + m[5] * v.y + m[6] * v.z,
            m[8] * v.x + m[9] * v.y + m[10] * v.z,
        )
    }

    /// Extracts the rotation of an orthonormal transform.
    pub fn rotation(&self) -> Quat {
        let m = |r: usize, c: usize| self.at(r, c);
        let trace = m(0, 0) + m(1, 1) + m(2, 2);

        let q = if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0;
            Quat::new(
                (m(2, 1) - m(1, 2)) / s,
                (m(0, 2) - m(2, 0)) / s,
                (m(1, 0) - m(0, 1)) / s,
                0.25 * s,
            )
        } else if m(0, 0) > m(1, 1) && m(0, 0) > m(2, 2) {
            let s = (1.0 + m(0, 0) - m(1, 1) - m(2, 2)).sqrt() * 2.0;
            Quat::new(
                0.25 * s,
                (m(0, 1) + m(1, 0)) / s,
                (m(0, 2) + m(2, 0)) / s,
                (m(2, 1) - m(1, 2)) / s,
            )
        } else if m(1, 1) > m(2, 2) {
            let s = (1.0 + m(1, 1) - m(0, 0) - m(2, 2)).sqrt() * 2.0;
            Quat::new(
                (m(0, 1) + m(1, 0)) / s,
                0.25 * s,
                (m(1, 2) + m(2, 1)) / s,
                (m(0, 2) - m(2, 0)) / s,
            )
        } else {
            let s = (1.0 + m(2, 2) - m(0, 0) - m(1, 1)).sqrt() * 2.0;
            Quat::new(
                (m(0, 2) + m(2, 0)) / s,
                (m(1, 2) + m(2, 1)) / s,
                0.25 * s,
                (m(1, 0) - m(0, 1)) / s,
            )
        };
        q.normalized()
    }

    /// Rotates a quaternion into the space described by this matrix.
    pub fn rotate_quaternion(&self, q: Quat) -> Quat {
        (self.rotation() * q).normalized()
    }
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Mat4 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let mut out = [0.0f32; 16];
        for row in 0..4 {
            for col in 0..4 {
                let mut acc = 0.0;
                for k in 0..4 {
                    acc += self.at(row, k) * rhs.at(k, col);
                }
                out[row * 4 + col] = acc;
            }
        }
        Self(out)
    }
}
