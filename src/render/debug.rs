//! Debug overlay helpers for the clip-plane debug feature.

use crate::math::{Mat4, Vec3};

const MARKER_SCALE: f32 = 0.1;

/// Frame counter plus wall-clock-style elapsed time, burned into the pass
/// target so captures can be lined up against compositor logs.
pub fn frame_stamp_text(frame_index: u64, elapsed_seconds: f64) -> String {
    let total_millis = (elapsed_seconds.max(0.0) * 1000.0) as u64;
    let millis = total_millis % 1000;
    let seconds = (total_millis / 1000) % 60;
    let minutes = (total_millis / 60_000) % 60;
    let hours = total_millis / 3_600_000;
    format!("{frame_index} {hours:02}:{minutes:02}:{seconds:02}:{millis:03}")
}

/// Small box at the HMD position so the spectator view shows where the
/// player's head is.
pub fn marker_transform(hmd_to_world: Mat4) -> Mat4 {
    hmd_to_world * Mat4::scale(Vec3 { x: MARKER_SCALE, y: MARKER_SCALE, z: MARKER_SCALE })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_stamp_formats_elapsed_time() {
        assert_eq!(frame_stamp_text(0, 0.0), "0 00:00:00:000");
        assert_eq!(frame_stamp_text(12, 61.25), "12 00:01:01:250");
        assert_eq!(frame_stamp_text(7, 3_723.5), "7 01:02:03:500");
    }

    #[test]
    fn marker_scales_around_the_hmd() {
        let hmd = Mat4::translate(Vec3 { x: 1.0, y: 2.0, z: 3.0 });
        let marker = marker_transform(hmd);
        let origin = marker.transform_point(Vec3::ZERO);
        assert!((origin.x - 1.0).abs() < 1e-6);
        let unit = marker.transform_point(Vec3 { x: 1.0, y: 0.0, z: 0.0 });
        assert!((unit.x - 1.1).abs() < 1e-6);
    }
}
