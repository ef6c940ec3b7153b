// Drivetrains on top of motor boards
//
// Provides:
// - Wheel speed kinematics for differential and star (omni) layouts
// - Motor groups binding four motors to a layout

pub mod group;
pub mod kinematics;

pub use group::{MotorGroup, MotorGroupDifferential, MotorGroupStar, MotorSlot, PidController};
pub use kinematics::{differential_wheel_speeds, normalize_angle, star_wheel_speeds};
