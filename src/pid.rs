//! Position/velocity PID loops with a linearized output.
//!
//! There is no time step in the update, loops must be updated at a fixed
//! rate for the gains to mean anything.
use core::cell::Cell;

use libm::{fabsf, powf};

use crate::hardware::{SensorInput, SensorPort};
use crate::util::{clip_magnitude, sgn_cmd};
use crate::MOTOR_MAX_CMD;

/// Controllers a pool hands out before refusing.
pub const MAX_PID: usize = 4;

pub const LUT_SIZE: usize = 128;
pub const LUT_FACTOR: f32 = 20.;
pub const LUT_OFFSET: i16 = 10;

/// Largest drive the integral term alone may produce.
pub const INTEGRAL_DRIVE_MAX: f32 = 0.25;
pub const DEFAULT_ERROR_THRESHOLD: f32 = 10.;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Constants {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Constant added to the drive, for example to hold an arm up
    pub kbias: f32,
}

impl Constants {
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Constants {
            kp,
            ki,
            kd,
            kbias: 0.,
        }
    }

    pub fn with_bias(self, kbias: f32) -> Self {
        Constants { kbias, ..self }
    }

    /// Maximum magnitude of the integral, zero when there is no integral gain.
    pub fn integral_limit(&self) -> f32 {
        if self.ki != 0. {
            fabsf(INTEGRAL_DRIVE_MAX / self.ki)
        } else {
            0.
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorBinding {
    pub port: SensorPort,
    pub reversed: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct PidConfig {
    constants: Constants,
    sensor: Option<SensorBinding>,
    error_threshold: f32,
}

impl PidConfig {
    /// A loop driven by an error the caller calculates.
    pub fn new(constants: Constants) -> Self {
        PidConfig {
            constants,
            sensor: None,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
        }
    }

    pub fn set_sensor(&mut self, port: SensorPort, reversed: bool) -> &mut Self {
        self.sensor = Some(SensorBinding { port, reversed });
        self
    }

    pub fn set_error_threshold(&mut self, threshold: f32) -> &mut Self {
        self.error_threshold = fabsf(threshold);
        self
    }
}

/// Compensates the non linear speed response of a motor to its command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriveLut([i16; LUT_SIZE]);

impl DriveLut {
    /// Power curve through `factor`, a factor of 1 or less is linear.
    pub fn new(factor: f32) -> Self {
        let top = (LUT_SIZE - 1) as f32;
        let mut lut = [0i16; LUT_SIZE];
        for (i, entry) in lut.iter_mut().enumerate() {
            *entry = if factor <= 1. {
                i as i16
            } else if (i as i16) < LUT_OFFSET / 2 {
                i as i16 * 2
            } else {
                let x = powf(factor, i as f32 / top);
                ((x - 1.) / (factor - 1.) * (top - LUT_OFFSET as f32) + LUT_OFFSET as f32) as i16
            };
        }
        DriveLut(lut)
    }

    /// Linearized command for `cmd`, the sign is kept.
    pub fn apply(&self, cmd: i16) -> i16 {
        let index = (cmd.unsigned_abs() as usize).min(LUT_SIZE - 1);
        self.0[index] * sgn_cmd(cmd)
    }
}

impl Default for DriveLut {
    fn default() -> Self {
        DriveLut::new(LUT_FACTOR)
    }
}

/// Hands out at most `MAX_PID` controllers, all sharing one drive table.
#[derive(Debug)]
pub struct PidPool {
    lut: DriveLut,
    lut_factor: f32,
    issued: Cell<usize>,
}

impl PidPool {
    pub fn new() -> Self {
        PidPool::with_lut_factor(LUT_FACTOR)
    }

    pub fn with_lut_factor(lut_factor: f32) -> Self {
        PidPool {
            lut: DriveLut::new(lut_factor),
            lut_factor,
            issued: Cell::new(0),
        }
    }

    /// Rebuild the drive table.
    pub fn make_lut(&mut self) {
        self.lut = DriveLut::new(self.lut_factor);
    }

    pub fn lut(&self) -> &DriveLut {
        &self.lut
    }

    pub fn remaining(&self) -> usize {
        MAX_PID - self.issued.get()
    }

    /// A new controller, or `None` once the pool is used up.
    pub fn controller(&self, config: PidConfig) -> Option<PidController<'_>> {
        let issued = self.issued.get();
        if issued >= MAX_PID {
            log::warn!("All {} PID controllers in use", MAX_PID);
            return None;
        }
        self.issued.set(issued + 1);
        Some(PidController::new(config, &self.lut))
    }
}

impl Default for PidPool {
    fn default() -> Self {
        PidPool::new()
    }
}

#[derive(Clone, Debug)]
pub struct PidController<'a> {
    constants: Constants,
    sensor: Option<SensorBinding>,
    pub enabled: bool,

    error: f32,
    last_error: f32,
    integral: f32,
    integral_limit: f32,
    derivative: f32,
    error_threshold: f32,

    sensor_value: i32,
    target_value: f32,

    /// In the range +/- 1
    drive: f32,
    drive_raw: i16,
    drive_cmd: i16,

    lut: &'a DriveLut,
}

impl<'a> PidController<'a> {
    fn new(config: PidConfig, lut: &'a DriveLut) -> Self {
        PidController {
            constants: config.constants,
            sensor: config.sensor,
            enabled: true,
            error: 0.,
            last_error: 0.,
            integral: 0.,
            integral_limit: config.constants.integral_limit(),
            derivative: 0.,
            error_threshold: config.error_threshold,
            sensor_value: 0,
            target_value: 0.,
            drive: 0.,
            drive_raw: 0,
            drive_cmd: 0,
            lut,
        }
    }

    pub fn set_target(&mut self, target: f32) {
        self.target_value = target;
    }

    pub fn target(&self) -> f32 {
        self.target_value
    }

    /// Supply the error for a loop without a sensor, used by the next update.
    pub fn set_error(&mut self, error: f32) {
        self.error = error;
    }

    pub fn error(&self) -> f32 {
        self.error
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn integral_limit(&self) -> f32 {
        self.integral_limit
    }

    pub fn derivative(&self) -> f32 {
        self.derivative
    }

    pub fn drive(&self) -> f32 {
        self.drive
    }

    pub fn drive_raw(&self) -> i16 {
        self.drive_raw
    }

    pub fn sensor_value(&self) -> i32 {
        self.sensor_value
    }

    /// Linearized command from the last update.
    pub fn output(&self) -> i16 {
        self.drive_cmd
    }

    /// Read the bound sensor, if any, and run one update.
    pub fn update(&mut self, sensors: &mut impl SensorInput) -> i16 {
        if self.enabled {
            if let Some(SensorBinding { port, reversed }) = self.sensor {
                let raw = sensors.sensor_value(port);
                self.sensor_value = if reversed { port.reverse(raw) } else { raw };
                self.error = self.target_value - self.sensor_value as f32;
            }
        }
        self.step()
    }

    /// Run one update on the error given to `set_error`.
    pub fn update_external(&mut self) -> i16 {
        self.step()
    }

    fn step(&mut self) -> i16 {
        if !self.enabled {
            self.error = 0.;
            self.last_error = 0.;
            self.integral = 0.;
            self.derivative = 0.;
            self.drive = 0.;
            self.drive_raw = 0;
            self.drive_cmd = 0;
            return 0;
        }

        let Constants { kp, ki, kd, kbias } = self.constants;

        if fabsf(self.error) < self.error_threshold {
            self.error = 0.;
        }

        if ki != 0. {
            self.integral = clip_magnitude(self.integral + self.error, self.integral_limit);
        } else {
            self.integral = 0.;
        }

        self.derivative = self.error - self.last_error;
        self.last_error = self.error;

        self.drive = clip_magnitude(
            kp * self.error + ki * self.integral + kd * self.derivative + kbias,
            1.,
        );
        self.drive_raw = (self.drive * MOTOR_MAX_CMD as f32) as i16;
        self.drive_cmd = self.lut.apply(self.drive_raw);
        self.drive_cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::ANALOG_FULL_SCALE;
    use crate::testing::{init_logs, MockIo};

    fn external(constants: Constants) -> PidConfig {
        PidConfig::new(constants)
    }

    #[test]
    fn lut_is_monotonic_and_odd() {
        let lut = DriveLut::default();
        let mut last = lut.apply(0);
        assert_eq!(last, 0);
        for x in 1..=MOTOR_MAX_CMD {
            let y = lut.apply(x);
            assert!(y >= last, "lut({}) = {} < {}", x, y, last);
            assert_eq!(lut.apply(-x), -y);
            last = y;
        }
        assert_eq!(lut.apply(4), 8);
        assert_eq!(lut.apply(MOTOR_MAX_CMD), MOTOR_MAX_CMD);
    }

    #[test]
    fn flat_factor_is_linear() {
        let lut = DriveLut::new(1.);
        for x in -127..=127 {
            assert_eq!(lut.apply(x), x);
        }
    }

    #[test]
    fn pool_is_bounded() {
        init_logs();
        let pool = PidPool::new();
        let constants = Constants::new(0.01, 0., 0.);
        let controllers: Vec<_> = (0..MAX_PID)
            .map(|_| pool.controller(external(constants)))
            .collect();
        assert!(controllers.iter().all(Option::is_some));
        assert_eq!(pool.remaining(), 0);
        assert!(pool.controller(external(constants)).is_none());
    }

    #[test]
    fn integral_stays_bounded() {
        let pool = PidPool::new();
        let constants = Constants::new(0.001, 0.002, 0.);
        let mut pid = pool.controller(external(constants)).unwrap();
        assert!((pid.integral_limit() - 125.).abs() < 1e-3);
        let mut seed: u32 = 12345;
        for i in 0..5000 {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let error = (seed >> 16) as f32 - 32768. + if i < 2500 { 20000. } else { -20000. };
            pid.set_error(error);
            pid.update_external();
            assert!(fabsf(pid.integral()) <= pid.integral_limit());
        }
    }

    #[test]
    fn zero_integral_gain_keeps_integral_at_zero() {
        let pool = PidPool::new();
        let mut pid = pool.controller(external(Constants::new(0.001, 0., 0.))).unwrap();
        for _ in 0..100 {
            pid.set_error(500.);
            pid.update_external();
            assert_eq!(pid.integral(), 0.);
        }
    }

    #[test]
    fn error_inside_deadband_is_zero() {
        let pool = PidPool::new();
        let mut pid = pool.controller(external(Constants::new(0.01, 0.001, 0.))).unwrap();
        pid.set_error(9.);
        assert_eq!(pid.update_external(), 0);
        assert_eq!(pid.error(), 0.);
        assert_eq!(pid.integral(), 0.);

        pid.set_error(-10.);
        pid.update_external();
        assert_eq!(pid.error(), -10.);
    }

    #[test]
    fn drive_is_clamped_and_linearized() {
        let pool = PidPool::new();
        let mut pid = pool.controller(external(Constants::new(1., 0., 0.))).unwrap();
        pid.set_error(1000.);
        assert_eq!(pid.update_external(), MOTOR_MAX_CMD);
        assert_eq!(pid.drive(), 1.);
        pid.set_error(-1000.);
        assert_eq!(pid.update_external(), -MOTOR_MAX_CMD);
        assert_eq!(pid.output(), -MOTOR_MAX_CMD);

        // Partial drive goes through the table
        let mut pid = pool.controller(external(Constants::new(0.002, 0., 0.))).unwrap();
        pid.set_error(100.);
        let cmd = pid.update_external();
        assert_eq!(pid.drive_raw(), 25);
        assert_eq!(cmd, pool.lut().apply(25));
        assert!(cmd < 25);
    }

    #[test]
    fn bias_is_added() {
        let pool = PidPool::new();
        let constants = Constants::new(0., 0., 0.).with_bias(0.5);
        let mut pid = pool.controller(external(constants)).unwrap();
        pid.update_external();
        assert_eq!(pid.drive_raw(), 63);
    }

    #[test]
    fn derivative_is_error_difference() {
        let pool = PidPool::new();
        let mut pid = pool.controller(external(Constants::new(0., 0., 0.001))).unwrap();
        pid.set_error(100.);
        pid.update_external();
        assert_eq!(pid.derivative(), 100.);
        pid.set_error(40.);
        pid.update_external();
        assert_eq!(pid.derivative(), -60.);
    }

    #[test]
    fn disabled_controller_is_zeroed() {
        let pool = PidPool::new();
        let mut pid = pool.controller(external(Constants::new(0.01, 0.01, 0.01))).unwrap();
        pid.set_error(500.);
        assert_ne!(pid.update_external(), 0);
        pid.enabled = false;
        pid.set_error(500.);
        assert_eq!(pid.update_external(), 0);
        assert_eq!(pid.error(), 0.);
        assert_eq!(pid.integral(), 0.);
        assert_eq!(pid.derivative(), 0.);
        assert_eq!(pid.drive(), 0.);
        assert_eq!(pid.output(), 0);
    }

    #[test]
    fn reversed_sensors() {
        let pool = PidPool::new();
        let mut io = MockIo::new();
        io.analog[1] = 1000;
        io.digital_in[3] = 250;

        let mut config = PidConfig::new(Constants::new(0.001, 0., 0.));
        config.set_sensor(SensorPort::Analog(1), true);
        let mut pot = pool.controller(config).unwrap();
        pot.set_target(3000.);
        pot.update(&mut io);
        assert_eq!(pot.sensor_value(), ANALOG_FULL_SCALE - 1000);
        assert_eq!(pot.error(), 3000. - 3095.);

        let mut config = PidConfig::new(Constants::new(0.001, 0., 0.));
        config.set_sensor(SensorPort::Digital(3), true);
        let mut enc = pool.controller(config).unwrap();
        enc.set_target(0.);
        enc.update(&mut io);
        assert_eq!(enc.sensor_value(), -250);
        assert_eq!(enc.error(), 250.);

        let mut config = PidConfig::new(Constants::new(0.001, 0., 0.));
        config.set_sensor(SensorPort::Digital(3), false);
        let mut fwd = pool.controller(config).unwrap();
        fwd.update(&mut io);
        assert_eq!(fwd.error(), -250.);
    }

    #[test]
    fn rebuilt_lut_matches() {
        let mut pool = PidPool::new();
        let before = pool.lut().clone();
        pool.make_lut();
        assert_eq!(pool.lut(), &before);
    }
}
