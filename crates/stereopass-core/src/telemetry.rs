//! Head pose diagnostics: quaternion to roll/pitch/yaw conversion.

use std::f32::consts::PI;

/// Orientation as intrinsic roll/pitch/yaw, in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerAngles {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl EulerAngles {
    /// Convert a unit quaternion `(w, x, y, z)` with the standard
    /// aerospace formulas. Pitch is clamped to ±90° at the gimbal-lock
    /// singularity (|sin(pitch)| >= 1).
    pub fn from_quaternion(w: f32, x: f32, y: f32, z: f32) -> Self {
        let sinr_cosp = 2.0 * (w * x + y * z);
        let cosr_cosp = 1.0 - 2.0 * (x * x + y * y);
        let roll = sinr_cosp.atan2(cosr_cosp);

        let sinp = 2.0 * (w * y - z * x);
        let pitch = if sinp.abs() >= 1.0 {
            (PI / 2.0).copysign(sinp)
        } else {
            sinp.asin()
        };

        let siny_cosp = 2.0 * (w * z + x * y);
        let cosy_cosp = 1.0 - 2.0 * (y * y + z * z);
        let yaw = siny_cosp.atan2(cosy_cosp);

        Self { roll, pitch, yaw }
    }

    /// Same angles in degrees, for log output.
    pub fn to_degrees(self) -> (f32, f32, f32) {
        (
            self.roll.to_degrees(),
            self.pitch.to_degrees(),
            self.yaw.to_degrees(),
        )
    }
}

/// Compact one-line form used by the periodic pose log.
pub fn format_rpy(angles: EulerAngles) -> String {
    let (roll, pitch, yaw) = angles.to_degrees();
    format!("RPY: R={roll:.1}° P={pitch:.1}° Y={yaw:.1}°")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f32 = 1e-4;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < TOL, "{a} != {b}");
    }

    #[test]
    fn identity_quaternion_is_zero_angles() {
        let e = EulerAngles::from_quaternion(1.0, 0.0, 0.0, 0.0);
        assert_close(e.roll, 0.0);
        assert_close(e.pitch, 0.0);
        assert_close(e.yaw, 0.0);
    }

    #[test]
    fn ninety_degree_yaw() {
        // Rotation of 90° about z: (cos45, 0, 0, sin45).
        let half = (PI / 4.0).sin();
        let e = EulerAngles::from_quaternion((PI / 4.0).cos(), 0.0, 0.0, half);
        let (_, _, yaw) = e.to_degrees();
        assert!((yaw - 90.0).abs() < 1e-3);
        assert_close(e.roll, 0.0);
        assert_close(e.pitch, 0.0);
    }

    #[test]
    fn ninety_degree_pitch_is_near_vertical() {
        // 90° about y; float rounding may land on either side of the
        // singularity, so only the angle is checked, loosely.
        let half = (PI / 4.0).sin();
        let e = EulerAngles::from_quaternion((PI / 4.0).cos(), 0.0, half, 0.0);
        assert!((e.pitch - PI / 2.0).abs() < 1e-3, "{}", e.pitch);
    }

    #[test]
    fn gimbal_lock_clamps_pitch() {
        // Slightly over-unit quaternions push sin(pitch) past 1; the
        // clamp must pin pitch to exactly ±90°.
        let e = EulerAngles::from_quaternion(0.71, 0.0, 0.71, 0.0);
        assert_eq!(e.pitch, PI / 2.0);

        let e = EulerAngles::from_quaternion(0.71, 0.0, -0.71, 0.0);
        assert_eq!(e.pitch, -PI / 2.0);
    }

    #[test]
    fn rpy_log_line_format() {
        let line = format_rpy(EulerAngles::from_quaternion(1.0, 0.0, 0.0, 0.0));
        assert_eq!(line, "RPY: R=0.0° P=0.0° Y=0.0°");
    }
}
