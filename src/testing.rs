//! Scriptable I/O for tests.
use crate::hardware::{MotorIo, SensorInput, SensorPort, ANALOG_PIN_COUNT, DIGITAL_PIN_COUNT};
use crate::MOTOR_COUNT;

pub(crate) fn init_logs() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

#[derive(Debug, Clone)]
pub(crate) struct MockIo {
    pub positions: [i32; MOTOR_COUNT],
    pub analog: [i32; ANALOG_PIN_COUNT as usize],
    pub digital_in: [i32; DIGITAL_PIN_COUNT as usize],
    pub battery_mv: u32,
    pub now: u32,
    /// Last value written to each motor
    pub motors: [i16; MOTOR_COUNT],
    pub writes: Vec<(usize, i16)>,
    pub pins: [Option<bool>; DIGITAL_PIN_COUNT as usize],
}

impl MockIo {
    pub fn new() -> Self {
        MockIo {
            positions: [0; MOTOR_COUNT],
            analog: [0; ANALOG_PIN_COUNT as usize],
            digital_in: [0; DIGITAL_PIN_COUNT as usize],
            battery_mv: 7200,
            now: 0,
            motors: [0; MOTOR_COUNT],
            writes: Vec::new(),
            pins: [None; DIGITAL_PIN_COUNT as usize],
        }
    }
}

impl MotorIo for MockIo {
    fn motor_position(&mut self, port: usize) -> i32 {
        self.positions[port]
    }

    fn analog_read(&mut self, pin: u8) -> i32 {
        self.analog[pin as usize]
    }

    fn main_battery_mv(&mut self) -> u32 {
        self.battery_mv
    }

    fn motor_set(&mut self, port: usize, value: i16) {
        self.motors[port] = value;
        self.writes.push((port, value));
    }

    fn digital_write(&mut self, pin: u8, high: bool) {
        self.pins[pin as usize] = Some(high);
    }

    fn now_ms(&mut self) -> u32 {
        self.now
    }
}

impl SensorInput for MockIo {
    fn sensor_value(&mut self, port: SensorPort) -> i32 {
        match port {
            SensorPort::Analog(pin) => self.analog[pin as usize],
            SensorPort::Digital(pin) => self.digital_in[pin as usize],
        }
    }
}
