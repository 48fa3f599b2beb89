//! Interfaces to the I/O layer. The library never touches registers itself,
//! it consumes decoded values and writes commands through these traits.

/// Number of digital pins a status LED may be bound to.
pub const DIGITAL_PIN_COUNT: u8 = 12;
/// Number of analog input pins.
pub const ANALOG_PIN_COUNT: u8 = 8;
/// Full scale of an analog reading, used to reverse absolute sensors.
pub const ANALOG_FULL_SCALE: i32 = 4095;

/// Level written to a status LED pin to light it, the LEDs are active low.
pub const LED_ON: bool = false;
pub const LED_OFF: bool = true;

pub(crate) fn is_digital_pin(pin: u8) -> bool {
    pin < DIGITAL_PIN_COUNT
}

pub(crate) fn is_analog_pin(pin: u8) -> bool {
    pin < ANALOG_PIN_COUNT
}

/// Everything the motor library needs from the board.
///
/// Motor ports are slot indices in `0..MOTOR_COUNT`. Implementations are
/// expected to be cheap and non-blocking, they are called from the periodic
/// tasks.
pub trait MotorIo {
    /// Tick count of the encoder attached to the motor on `port`.
    fn motor_position(&mut self, port: usize) -> i32;
    /// Raw analog reading, `0..=ANALOG_FULL_SCALE`.
    fn analog_read(&mut self, pin: u8) -> i32;
    /// Main battery voltage in millivolts.
    fn main_battery_mv(&mut self) -> u32;
    /// Write a signed command in `MOTOR_MIN_CMD..=MOTOR_MAX_CMD`.
    fn motor_set(&mut self, port: usize, value: i16);
    fn digital_write(&mut self, pin: u8, high: bool);
    /// Monotonic milliseconds, wrapping allowed.
    fn now_ms(&mut self) -> u32;
}

/// A position sensor a PID loop may be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorPort {
    /// Absolute sensor such as a potentiometer, reversed by complementing.
    Analog(u8),
    /// Incremental sensor such as a quadrature encoder, reversed by negation.
    Digital(u8),
}

impl SensorPort {
    /// Applies a sensor reversal to a raw reading.
    pub fn reverse(self, raw: i32) -> i32 {
        match self {
            SensorPort::Analog(_) => ANALOG_FULL_SCALE - raw,
            SensorPort::Digital(_) => -raw,
        }
    }
}

pub trait SensorInput {
    fn sensor_value(&mut self, port: SensorPort) -> i32;
}
