//! Startup configuration, realized into a live [`SmartMotors`].
use crate::hardware::MotorIo;
use crate::motor::{EncoderSource, MotorKind};
use crate::system::SmartMotors;
use crate::MOTOR_COUNT;

/// Milliseconds between sampling invocations, one motor per invocation.
pub const DEFAULT_SAMPLE_PERIOD_MS: u32 = 10;
/// Milliseconds between slew limiter passes, about the rate motor values
/// reach the hardware.
pub const DEFAULT_SLEW_PERIOD_MS: u32 = 15;
/// Below this the battery is considered lost and all motors are stopped.
pub const DEFAULT_MIN_BATTERY_MV: u32 = 3000;

/// What is plugged into a motor port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorSlot {
    pub kind: MotorKind,
    pub encoder: EncoderSource,
}

impl MotorSlot {
    pub fn new(kind: MotorKind, encoder: EncoderSource) -> Self {
        MotorSlot { kind, encoder }
    }

    pub fn unencoded(kind: MotorKind) -> Self {
        MotorSlot::new(kind, EncoderSource::None)
    }
}

impl Default for MotorSlot {
    fn default() -> Self {
        MotorSlot::unencoded(MotorKind::Undefined)
    }
}

/// Ports 1 and 10 are driven directly, the others through a three wire
/// controller with a compressed response.
pub fn is_three_wire_port(index: usize) -> bool {
    index > 0 && index < MOTOR_COUNT - 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub sample_period_ms: u32,
    pub slew_period_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            sample_period_ms: DEFAULT_SAMPLE_PERIOD_MS,
            slew_period_ms: DEFAULT_SLEW_PERIOD_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmartMotorConfig {
    pub(crate) slots: [MotorSlot; MOTOR_COUNT],
    pub(crate) scaled_drive: [bool; MOTOR_COUNT],
    pub(crate) timing: Timing,
    pub(crate) min_battery_mv: u32,
}

impl SmartMotorConfig {
    pub fn new() -> Self {
        SmartMotorConfig {
            slots: [MotorSlot::default(); MOTOR_COUNT],
            scaled_drive: core::array::from_fn(is_three_wire_port),
            timing: Timing::default(),
            min_battery_mv: DEFAULT_MIN_BATTERY_MV,
        }
    }

    /// Realize a `SmartMotors` from the configuration, reading the initial
    /// encoder positions from `io`.
    pub fn realize<H: MotorIo>(&self, io: H) -> SmartMotors<H> {
        SmartMotors::new(io, self)
    }

    pub fn set_motor(&mut self, index: usize, slot: MotorSlot) -> &mut Self {
        match self.slots.get_mut(index) {
            Some(s) => *s = slot,
            None => log::warn!("No motor port {}", index),
        }
        self
    }

    pub fn set_scaled_drive(&mut self, index: usize, scaled: bool) -> &mut Self {
        match self.scaled_drive.get_mut(index) {
            Some(s) => *s = scaled,
            None => log::warn!("No motor port {}", index),
        }
        self
    }

    pub fn set_sample_period_ms(&mut self, period_ms: u32) -> &mut Self {
        self.timing.sample_period_ms = period_ms.max(1);
        self
    }

    pub fn set_slew_period_ms(&mut self, period_ms: u32) -> &mut Self {
        self.timing.slew_period_ms = period_ms.max(1);
        self
    }

    pub fn set_min_battery_mv(&mut self, min_battery_mv: u32) -> &mut Self {
        self.min_battery_mv = min_battery_mv;
        self
    }
}

impl Default for SmartMotorConfig {
    fn default() -> Self {
        SmartMotorConfig::new()
    }
}
