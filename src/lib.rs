#![cfg_attr(not(any(feature = "std", test)), no_std)]
//! Current, temperature and speed estimation for brushed DC motors without
//! current sensors, protection limits built on those estimates, and PID
//! loops to drive them.
//!
//! A [`SmartMotors`] owns every motor and controller bank model. Something
//! must call [`SmartMotors::sample_step`] every `sample_period_ms` and
//! [`SmartMotors::slew_step`] every `slew_period_ms`, either the application's
//! own scheduler or, with the `std` feature, [`SmartMotorRuntime`].
pub mod bank;
pub mod config;
pub mod current;
pub mod hardware;
pub mod motor;
pub mod pid;
pub mod protection;
pub mod slew;
pub mod system;
pub mod thermal;
mod util;

#[cfg(feature = "std")]
pub mod error;
#[cfg(feature = "std")]
pub mod runtime;

#[cfg(test)]
mod testing;

/// Motor ports on a controller.
pub const MOTOR_COUNT: usize = 10;
pub const MOTOR_MAX_CMD: i16 = 127;
pub const MOTOR_MIN_CMD: i16 = -127;
/// Requested commands below this magnitude are treated as 0.
pub const MOTOR_DEADBAND: i16 = 10;

/// Command counts per slew invocation.
pub const DEFAULT_SLEW_RATE: i16 = 10;
/// Effectively no slew limiting.
pub const FAST_SLEW_RATE: i16 = 256;
/// Amps, default threshold for the direct current limit.
pub const DEFAULT_LIMIT_CURRENT: f32 = 1.0;

pub use bank::{BankId, ControllerBank};
pub use config::{MotorSlot, SmartMotorConfig, Timing};
pub use hardware::{MotorIo, SensorInput, SensorPort};
pub use motor::{EncoderSource, MotorKind, MotorModel};
pub use pid::{Constants, PidConfig, PidController, PidPool};
pub use protection::{CommandLimit, LimitMode};
pub use system::{SetMotorOptions, SmartMotors, StatusReport};

#[cfg(feature = "std")]
pub use error::TaskError;
#[cfg(feature = "std")]
pub use runtime::{SmartMotorRuntime, TaskHandle, TaskRegistry};
