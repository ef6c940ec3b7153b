// Wheel speed computation for the 4-motor drivetrains
// Speeds are signed motor units in -127..=127.

/// Largest speed a motor accepts
pub const MAX_WHEEL_SPEED: i16 = 127;

/// Offset between the drive angle and the first wheel axis, in degrees
const STAR_WHEEL_OFFSET_DEG: f32 = 135.0;

/// Heading below this lateral error is treated as straight ahead or back
const HEADING_EPSILON: f32 = 0.001;

/// Scale all wheels down by the same factor when the fastest one exceeds
/// `limit` (itself capped at 127), so the direction of travel is kept.
/// Results are truncated toward zero.
fn rescale(wheels: [f32; 4], limit: u8) -> [i8; 4] {
    let limit = f64::from(limit).min(MAX_WHEEL_SPEED as f64);
    let max = wheels.iter().fold(0.0f64, |m, &w| m.max(f64::from(w).abs()));
    wheels.map(|w| {
        // In f64 the product is exact, so the fastest wheel lands on the limit
        let w = f64::from(w);
        let scaled = if max > limit { w * limit / max } else { w };
        scaled
            .trunc()
            .clamp(-(MAX_WHEEL_SPEED as f64), MAX_WHEEL_SPEED as f64) as i8
    })
}

/// Differential (tank) drive with a lateral component for mecanum wheels.
///
/// Wheel order: left 1, left 2, right 1, right 2. Right wheels are mounted
/// mirrored, so their sign is inverted.
pub fn differential_wheel_speeds(left: i16, right: i16, lateral: i16, limit: u8) -> [i8; 4] {
    let clamp = |v: i32| v.clamp(-(MAX_WHEEL_SPEED as i32), MAX_WHEEL_SPEED as i32) as f32;
    let (left, right, lateral) = (left as i32, right as i32, lateral as i32);
    rescale(
        [
            clamp(left - lateral),
            clamp(left + lateral),
            clamp(-right + lateral),
            clamp(-right - lateral),
        ],
        limit,
    )
}

/// Omni drive with four wheels at 90 degree spacing.
///
/// * `speed` - translational speed
/// * `angle_deg` - direction of travel, 0 = forward, positive clockwise
/// * `rotation` - added to every wheel, turns the robot in place
pub fn star_wheel_speeds(speed: f32, angle_deg: f32, rotation: f32, limit: u8) -> [i8; 4] {
    let theta = (angle_deg + STAR_WHEEL_OFFSET_DEG).to_radians();
    let (sin, cos) = theta.sin_cos();
    rescale(
        [
            -speed * cos + rotation,
            -speed * sin + rotation,
            speed * sin + rotation,
            speed * cos + rotation,
        ],
        limit,
    )
}

/// Wrap an angle in degrees to [-180, 180]
pub fn normalize_angle(deg: f32) -> f32 {
    let mut angle = deg % 360.0;
    if angle > 180.0 {
        angle -= 360.0;
    } else if angle < -180.0 {
        angle += 360.0;
    }
    angle
}

/// Direction in degrees that removes a position error (x lateral, y forward)
pub fn heading_to(error_x: f32, error_y: f32) -> f32 {
    if error_x.abs() > HEADING_EPSILON {
        error_x.atan2(error_y).to_degrees()
    } else if error_y > 0.0 {
        0.0
    } else {
        -180.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_differential_straight_is_rescaled() {
        assert_eq!(differential_wheel_speeds(100, 100, 0, 50), [50, 50, -50, -50]);
    }

    #[test]
    fn test_differential_within_limit_unchanged() {
        assert_eq!(differential_wheel_speeds(30, 20, 10, 127), [20, 40, -10, -30]);
    }

    #[test]
    fn test_differential_keeps_ratio() {
        // 120/60 -> 100/50 under a limit of 100
        let wheels = differential_wheel_speeds(120, 60, 0, 100);
        assert_eq!(wheels, [100, 100, -50, -50]);
    }

    #[test]
    fn test_differential_clamps_before_scaling() {
        // 200 and 300 both clamp to 127 before the limit applies
        assert_eq!(differential_wheel_speeds(200, -300, 0, 127), [127, 127, 127, 127]);
    }

    #[test]
    fn test_limit_above_motor_range_is_capped() {
        // 255 acts as 127, so nothing at the cap is scaled down
        assert_eq!(differential_wheel_speeds(127, 127, 127, 255), [0, 127, 0, -127]);
        // 100 + 100 clamps to 127 and is not rescaled past it
        assert_eq!(differential_wheel_speeds(100, -100, 100, 255), [0, 127, 127, 0]);
    }

    #[test]
    fn test_rescale_truncates_toward_zero() {
        // 90 * 100 / 127 = 70.9 and 30 * 100 / 127 = 23.6
        assert_eq!(differential_wheel_speeds(120, 0, 30, 100), [70, 100, 23, -23]);
        assert_eq!(differential_wheel_speeds(120, 90, 0, 100), [100, 100, -75, -75]);
    }

    #[test]
    fn test_star_pure_rotation() {
        assert_eq!(star_wheel_speeds(0.0, 0.0, 50.0, 127), [50, 50, 50, 50]);
    }

    #[test]
    fn test_star_forward_is_symmetric() {
        let wheels = star_wheel_speeds(100.0, 0.0, 0.0, 127);
        // At 135 deg: cos = -sin, so wheels pair up with opposite signs
        assert_eq!(wheels[0], -wheels[3]);
        assert_eq!(wheels[1], -wheels[2]);
        assert_eq!(wheels[0], wheels[2]);
        assert!(wheels.iter().all(|w| w.abs() == 70));
    }

    #[test]
    fn test_star_rescale_keeps_direction() {
        let wheels = star_wheel_speeds(100.0, 0.0, 100.0, 30);
        let max = wheels.iter().map(|w| w.abs()).max().unwrap();
        assert_eq!(max, 30);
        assert!(wheels.iter().all(|&w| w >= 0));
    }

    #[test]
    fn test_normalize_angle() {
        assert_eq!(normalize_angle(190.0), -170.0);
        assert_eq!(normalize_angle(-190.0), 170.0);
        assert_eq!(normalize_angle(540.0), 180.0);
        assert_eq!(normalize_angle(45.0), 45.0);
    }

    #[test]
    fn test_heading_to() {
        assert_eq!(heading_to(0.0, 1.0), 0.0);
        assert_eq!(heading_to(0.0, -1.0), -180.0);
        assert!((heading_to(1.0, 0.0) - 90.0).abs() < 1e-4);
        assert!((heading_to(1.0, 1.0) - 45.0).abs() < 1e-4);
    }
}
