use smartmotor::hardware::{SensorInput, SensorPort, DIGITAL_PIN_COUNT, LED_ON};
use smartmotor::{MotorIo, MOTOR_COUNT};

/// Board I/O backed by the simulated rig.
#[derive(Debug, Clone)]
pub struct SimIo {
    /// Last command written to each port
    pub commands: [i16; MOTOR_COUNT],
    /// Encoder ticks on each port
    pub positions: [i32; MOTOR_COUNT],
    pub battery_mv: u32,
    pub now_ms: u32,
    pins: [bool; DIGITAL_PIN_COUNT as usize],
}

impl SimIo {
    pub fn new(battery_mv: u32) -> Self {
        SimIo {
            commands: [0; MOTOR_COUNT],
            positions: [0; MOTOR_COUNT],
            battery_mv,
            now_ms: 0,
            pins: [!LED_ON; DIGITAL_PIN_COUNT as usize],
        }
    }

    pub fn led_lit(&self, pin: u8) -> bool {
        self.pins.get(pin as usize).map_or(false, |level| *level == LED_ON)
    }
}

impl MotorIo for SimIo {
    fn motor_position(&mut self, port: usize) -> i32 {
        self.positions.get(port).copied().unwrap_or(0)
    }

    fn analog_read(&mut self, _pin: u8) -> i32 {
        0
    }

    fn main_battery_mv(&mut self) -> u32 {
        self.battery_mv
    }

    fn motor_set(&mut self, port: usize, value: i16) {
        if let Some(command) = self.commands.get_mut(port) {
            *command = value;
        }
    }

    fn digital_write(&mut self, pin: u8, high: bool) {
        if let Some(level) = self.pins.get_mut(pin as usize) {
            *level = high;
        }
    }

    fn now_ms(&mut self) -> u32 {
        self.now_ms
    }
}

/// Encoders on the digital pins read the motor port of the same number.
impl SensorInput for SimIo {
    fn sensor_value(&mut self, port: SensorPort) -> i32 {
        match port {
            SensorPort::Digital(pin) => self.motor_position(pin as usize),
            SensorPort::Analog(pin) => self.analog_read(pin),
        }
    }
}
