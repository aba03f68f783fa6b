//! Normal reconstruction for the packed normal encodings.
//!
//! These are lossy format contracts: the math reproduces what the writer assumed.

use glam::Vec3;

/// Two bytes of a sphere-mapped normal to a unit vector.
pub fn decode_sphere_mapped(bx: u8, by: u8) -> Vec3 {
    let ex = f32::from(bx) / 255.0;
    let ey = f32::from(by) / 255.0;

    let mut nx = ex * 2.0 - 1.0;
    let mut ny = ey * 2.0 - 1.0;
    let nz = 1.0f32;
    let nw = -1.0f32;

    let l = (nx * -nx) + (ny * -ny) + (nz * -nw);
    let sqrt_l = l.sqrt();
    nx *= sqrt_l;
    ny *= sqrt_l;

    Vec3::new(nx * 2.0, ny * 2.0, l * 2.0 - 1.0)
}

/// Two bytes of an octahedral (oct16) normal to a unit vector.
pub fn decode_oct16(bx: u8, by: u8) -> Vec3 {
    let u = (f32::from(bx) / 255.0) * 2.0 - 1.0;
    let v = (f32::from(by) / 255.0) * 2.0 - 1.0;

    let z = 1.0 - u.abs() - v.abs();

    let (x, y) = if z >= 0.0 {
        (u, v)
    } else {
        // lower hemisphere folds across the diagonals; |u| + |v| > 1 keeps both signs non-zero
        (
            -(v / v.signum() - 1.0) / u.signum(),
            -(u / u.signum() - 1.0) / v.signum(),
        )
    };

    let length = (x * x + y * y + z * z).sqrt();
    Vec3::new(x / length, y / length, z / length)
}
