//! The live motor tables and the two periodic invocations that drive them.
use core::fmt;

use crate::bank::{BankId, ControllerBank, BANK_COUNT, BANK_MOTORS, POWER_EXPANDER_OUTPUTS};
use crate::config::{is_three_wire_port, SmartMotorConfig, Timing};
use crate::hardware::{is_analog_pin, is_digital_pin, MotorIo, LED_OFF, LED_ON};
use crate::motor::{EncoderSource, MotorModel};
use crate::protection::{CommandLimit, LimitMode};
use crate::{MOTOR_COUNT, MOTOR_DEADBAND, MOTOR_MAX_CMD, MOTOR_MIN_CMD};

/// Options for [`SmartMotors::set_motor_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetMotorOptions {
    /// Write to the hardware now instead of waiting for the slew limiter.
    pub immediate: bool,
}

/// Owns every motor and bank model together with the I/O they are read
/// from and written to.
pub struct SmartMotors<H: MotorIo> {
    io: H,
    motors: [MotorModel; MOTOR_COUNT],
    banks: [ControllerBank; BANK_COUNT],
    mode: LimitMode,
    timing: Timing,
    min_battery_mv: u32,
    /// Next motor the sampling invocation visits
    next_motor: usize,
    /// Volts, from the most recent sample
    v_battery: f32,
    battery_fail_safe: bool,
}

impl<H: MotorIo> SmartMotors<H> {
    pub(crate) fn new(mut io: H, config: &SmartMotorConfig) -> Self {
        let mut motors: [MotorModel; MOTOR_COUNT] = core::array::from_fn(|port| {
            let slot = config.slots[port];
            let position = match slot.encoder {
                EncoderSource::None => 0,
                EncoderSource::Quadrature { .. } | EncoderSource::Integrated { .. } => {
                    io.motor_position(port)
                }
                EncoderSource::Sensor { pin } => io.analog_read(pin),
            };
            let mut m = MotorModel::new(port, slot.kind, slot.encoder, position);
            m.scaled_drive = config.scaled_drive[port];
            m
        });

        let mut banks = BankId::ALL.map(ControllerBank::new);
        for m in motors.iter_mut().filter(|m| m.is_defined()) {
            let (bank, slot) = if m.port < BANK_MOTORS {
                (BankId::Cortex0, m.port)
            } else {
                (BankId::Cortex1, m.port - BANK_MOTORS)
            };
            banks[bank.index()].motors[slot] = Some(m.port);
            m.bank = Some(bank);
        }

        log::info!(
            "Smart motors initialized, {} of {} ports classified",
            motors.iter().filter(|m| m.is_defined()).count(),
            MOTOR_COUNT
        );

        SmartMotors {
            io,
            motors,
            banks,
            mode: LimitMode::Off,
            timing: config.timing,
            min_battery_mv: config.min_battery_mv,
            next_motor: 0,
            v_battery: 0.,
            battery_fail_safe: false,
        }
    }

    pub fn io(&self) -> &H {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut H {
        &mut self.io
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn limit_mode(&self) -> LimitMode {
        self.mode
    }

    pub fn motor(&self, index: usize) -> Option<&MotorModel> {
        self.motors.get(index)
    }

    pub fn motors(&self) -> &[MotorModel] {
        &self.motors
    }

    pub fn bank(&self, bank: BankId) -> &ControllerBank {
        &self.banks[bank.index()]
    }

    /// Motor speed in rpm, 0 for an unknown port.
    pub fn speed(&self, index: usize) -> f32 {
        self.motor(index).map_or(0., |m| m.rpm)
    }

    /// Current magnitude in amps, 0 for an unknown port.
    pub fn current(&self, index: usize) -> f32 {
        self.motor(index).map_or(0., MotorModel::absolute_current)
    }

    /// Current in amps, negative when driven in reverse.
    pub fn signed_current(&self, index: usize) -> f32 {
        self.motor(index).map_or(0., |m| m.current)
    }

    pub fn temperature(&self, index: usize) -> f32 {
        self.motor(index).map_or(0., |m| m.thermal.temperature)
    }

    /// Raw command limit, `MOTOR_MAX_CMD_UNDEFINED` when unrestricted.
    pub fn limit_cmd(&self, index: usize) -> i16 {
        self.motor(index).map_or(0, |m| m.limit_cmd.as_raw())
    }

    pub fn controller_current(&self, bank: BankId) -> f32 {
        self.bank(bank).current
    }

    pub fn controller_temperature(&self, bank: BankId) -> f32 {
        self.bank(bank).thermal.temperature
    }

    fn motor_mut(&mut self, index: usize) -> Option<&mut MotorModel> {
        let m = self.motors.get_mut(index);
        if m.is_none() {
            log::warn!("No motor port {}", index);
        }
        m
    }

    /// Override the free running speed of a classified motor.
    pub fn set_free_rpm(&mut self, index: usize, rpm: i16) {
        if rpm <= 0 {
            log::warn!("Free rpm must be positive, got {}", rpm);
            return;
        }
        if let Some(m) = self.motor_mut(index) {
            if m.is_defined() {
                m.set_free_rpm(rpm as f32);
            }
        }
    }

    pub fn set_slew_rate(&mut self, index: usize, rate: i16) {
        if rate <= 0 {
            log::warn!("Slew rate must be positive, got {}", rate);
            return;
        }
        if let Some(m) = self.motor_mut(index) {
            m.motor_slew = rate;
        }
    }

    /// Threshold in amps for the direct current limit.
    pub fn set_limit_current(&mut self, index: usize, current: f32) {
        if let Some(m) = self.motor_mut(index) {
            m.limit_current = current;
        }
    }

    /// Bind a status LED to a bank. Several banks may share one pin.
    pub fn set_controller_status_led(&mut self, bank: BankId, pin: u8) {
        if !is_digital_pin(pin) {
            log::warn!("No digital pin {}", pin);
            return;
        }
        self.banks[bank.index()].status_led = Some(pin);
        self.io.digital_write(pin, LED_OFF);
    }

    /// Bind the analog pin wired to the power expander status output.
    pub fn set_power_expander_status_port(&mut self, pin: u8) {
        if !is_analog_pin(pin) {
            log::warn!("No analog pin {}", pin);
            return;
        }
        self.banks[BankId::PowerExpander.index()].status_port = Some(pin);
    }

    pub fn enable_ptc_monitor(&mut self) {
        self.set_limit_mode(LimitMode::Ptc);
    }

    pub fn disable_ptc_monitor(&mut self) {
        if self.mode == LimitMode::Ptc {
            self.set_limit_mode(LimitMode::Off);
        }
    }

    pub fn enable_current_monitor(&mut self) {
        self.set_limit_mode(LimitMode::Current);
    }

    pub fn disable_current_monitor(&mut self) {
        if self.mode == LimitMode::Current {
            self.set_limit_mode(LimitMode::Off);
        }
    }

    fn set_limit_mode(&mut self, mode: LimitMode) {
        if mode == self.mode {
            return;
        }
        log::info!("Limit mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        // Stale limits from the previous scheme must not linger
        for m in self.motors.iter_mut() {
            m.limit_cmd = CommandLimit::Unrestricted;
            m.limit_tripped = false;
        }
        for bank in self.banks.iter_mut() {
            bank.current_tripped = false;
        }
    }

    /// Request a motor command, it reaches the hardware through the slew
    /// limiter.
    pub fn set_motor(&mut self, index: usize, value: i16) {
        self.set_motor_with(index, value, SetMotorOptions::default());
    }

    pub fn set_motor_with(&mut self, index: usize, value: i16, options: SetMotorOptions) {
        let mut value = value.clamp(MOTOR_MIN_CMD, MOTOR_MAX_CMD);
        if value.abs() < MOTOR_DEADBAND {
            value = 0;
        }
        let Some(m) = self.motors.get_mut(index) else {
            log::warn!("No motor port {}", index);
            return;
        };
        m.motor_cmd = value;
        if options.immediate {
            m.motor_out = value;
            self.io.motor_set(index, value);
        }
    }

    /// Share the master's encoder with a mechanically coupled slave.
    pub fn link_motors(&mut self, master: usize, slave: usize) {
        if master >= MOTOR_COUNT || slave >= MOTOR_COUNT {
            log::warn!("Cannot link motor {} to {}", slave, master);
            return;
        }
        let m = &self.motors[master];
        if !m.encoder.is_valid() {
            log::warn!("Motor {} has no encoder to share", master);
            return;
        }
        let (eport, encoder, ticks_per_rev, enc, oldenc) =
            (m.eport, m.encoder, m.ticks_per_rev, m.enc, m.oldenc);

        let s = &mut self.motors[slave];
        s.eport = eport;
        s.encoder = encoder;
        s.ticks_per_rev = ticks_per_rev;
        s.enc = enc;
        s.oldenc = oldenc;
        log::info!("Motor {} linked to the encoder of motor {}", slave, master);
    }

    /// Scale a quadrature encoder's ticks per revolution for external gearing.
    pub fn set_encoder_gearing(&mut self, index: usize, ratio: f32) {
        if !(ratio > 0. && ratio.is_finite()) {
            log::warn!("Bad gear ratio {}", ratio);
            return;
        }
        if let Some(m) = self.motor_mut(index) {
            match m.encoder {
                EncoderSource::Quadrature { .. } => m.ticks_per_rev *= ratio,
                _ => log::warn!("Motor {} gearing only applies to a quadrature encoder", index),
            }
        }
    }

    /// Use an analog sensor such as a potentiometer for speed feedback.
    /// `reversed` flips the sign of the computed speed.
    pub fn set_rpm_sensor(&mut self, index: usize, pin: u8, ticks_per_rev: f32, reversed: bool) {
        if !is_analog_pin(pin) || ticks_per_rev == 0. || !ticks_per_rev.is_finite() {
            log::warn!("Bad rpm sensor, pin {} ticks {}", pin, ticks_per_rev);
            return;
        }
        if index >= MOTOR_COUNT {
            log::warn!("No motor port {}", index);
            return;
        }
        let position = self.io.analog_read(pin);
        let m = &mut self.motors[index];
        m.encoder = EncoderSource::Sensor { pin };
        m.eport = index;
        m.ticks_per_rev = if reversed { -ticks_per_rev } else { ticks_per_rev };
        m.enc = position;
        m.oldenc = position;
    }

    /// Move motors on three wire ports to the power expander, at most four.
    /// Each motor leaves its cortex bank.
    pub fn add_power_expander(&mut self, ports: &[usize]) {
        if ports.len() > POWER_EXPANDER_OUTPUTS {
            log::warn!("Power expander only has {} outputs", POWER_EXPANDER_OUTPUTS);
        }
        for &port in ports.iter().take(POWER_EXPANDER_OUTPUTS) {
            let Some(m) = self.motors.get(port) else {
                log::warn!("No motor port {}", port);
                continue;
            };
            if !m.is_defined() || !is_three_wire_port(port) {
                log::warn!("Motor {} cannot move to the power expander", port);
                continue;
            }
            let old = m.bank;
            if old == Some(BankId::PowerExpander) {
                continue;
            }
            if !self.banks[BankId::PowerExpander.index()].insert(port) {
                log::warn!("Power expander full, motor {} stays", port);
                continue;
            }
            if let Some(old) = old {
                self.banks[old.index()].remove(port);
            }
            self.motors[port].bank = Some(BankId::PowerExpander);
            log::info!("Motor {} moved to the power expander", port);
        }
    }

    /// Nominal time for one full pass over every motor.
    fn nominal_pass_ms(&self) -> u32 {
        self.timing.sample_period_ms * MOTOR_COUNT as u32
    }

    /// One sampling invocation. Estimates one motor, round robin, and after
    /// the last motor updates the banks. Returns true when a pass completed.
    pub fn sample_step(&mut self) -> bool {
        let v_battery = self.io.main_battery_mv() as f32 / 1000.;
        self.v_battery = v_battery;
        let now = self.io.now_ms();
        let nominal = self.nominal_pass_ms();

        let index = self.next_motor;
        self.next_motor = (index + 1) % MOTOR_COUNT;

        let mut dt_ms = nominal;
        let m = &mut self.motors[index];
        if m.is_defined() {
            dt_ms = m
                .last_update_ms
                .map_or(nominal, |last| now.wrapping_sub(last))
                .max(1);
            m.last_update_ms = Some(now);
            m.delay_ms = dt_ms;

            match m.encoder {
                EncoderSource::None => {
                    m.simulate_speed();
                }
                EncoderSource::Quadrature { .. } | EncoderSource::Integrated { .. } => {
                    let sample = self.io.motor_position(m.eport);
                    m.update_speed(sample, dt_ms);
                }
                EncoderSource::Sensor { pin } => {
                    let sample = self.io.analog_read(pin);
                    m.update_speed(sample, dt_ms);
                }
            }

            m.estimate_current(v_battery);
            m.thermal.step(m.current, dt_ms);

            match self.mode {
                LimitMode::Off => {}
                LimitMode::Ptc => {
                    let bank_tripped = m
                        .bank
                        .map_or(false, |b| self.banks[b.index()].ptc_tripped);
                    m.monitor_ptc(bank_tripped, v_battery);
                }
                LimitMode::Current => {
                    let bank_tripped = m
                        .bank
                        .map_or(false, |b| self.banks[b.index()].current_tripped);
                    m.monitor_current(bank_tripped, v_battery);
                }
            }
        }

        if self.next_motor != 0 {
            return false;
        }
        self.complete_pass(dt_ms);
        true
    }

    fn complete_pass(&mut self, dt_ms: u32) {
        let expander = &mut self.banks[BankId::PowerExpander.index()];
        if let Some(pin) = expander.status_port {
            let raw = self.io.analog_read(pin);
            expander.check_supply(raw);
        }

        for bank in self.banks.iter_mut() {
            bank.aggregate_current(&self.motors);
            bank.update_temperature(dt_ms);
            match self.mode {
                LimitMode::Off => {}
                LimitMode::Ptc => bank.monitor_ptc(&mut self.motors, self.v_battery),
                LimitMode::Current => bank.monitor_current(&mut self.motors, self.v_battery),
            }
        }

        self.update_status_leds();
    }

    fn update_status_leds(&mut self) {
        for pin in self.banks.iter().filter_map(|b| b.status_led) {
            self.io.digital_write(pin, LED_OFF);
        }
        for bank in self.banks.iter() {
            if let Some(pin) = bank.status_led {
                if bank.is_faulted(&self.motors) {
                    self.io.digital_write(pin, LED_ON);
                }
            }
        }
    }

    /// One slew limiter invocation, the only place motor commands reach the
    /// hardware apart from immediate writes.
    pub fn slew_step(&mut self) {
        let mv = self.io.main_battery_mv();
        if mv < self.min_battery_mv {
            if !self.battery_fail_safe {
                log::error!("Battery at {} mV, stopping all motors", mv);
                self.battery_fail_safe = true;
            }
            for m in self.motors.iter_mut() {
                m.motor_req = 0;
                if m.motor_out != 0 {
                    m.motor_out = 0;
                    self.io.motor_set(m.port, 0);
                }
            }
            return;
        }
        if self.battery_fail_safe {
            log::info!("Battery restored at {} mV", mv);
            self.battery_fail_safe = false;
        }

        let limiting = self.mode != LimitMode::Off;
        for m in self.motors.iter_mut() {
            if let Some(value) = m.slew_step(limiting) {
                self.io.motor_set(m.port, value);
            }
        }
    }

    pub fn status_report(&self) -> StatusReport<'_> {
        StatusReport {
            motors: &self.motors,
            banks: &self.banks,
        }
    }

    /// Log the status of every bank and its motors.
    pub fn log_status(&self) {
        for bank in self.banks.iter() {
            log::info!("{}", BankLine(bank));
            for m in bank.members().filter_map(|i| self.motors.get(i)) {
                log::info!("{}", MotorLine(m));
            }
        }
    }
}

/// Bank and motor status, one line per device.
pub struct StatusReport<'a> {
    motors: &'a [MotorModel],
    banks: &'a [ControllerBank],
}

struct BankLine<'a>(&'a ControllerBank);

impl fmt::Display for BankLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{} - Current:{:5.2} Temp:{:6.2} Status:{:2}",
            b.id.label(),
            b.current,
            b.thermal.temperature,
            b.ptc_tripped as u8 + ((b.current_tripped as u8) << 1)
        )
    }
}

struct MotorLine<'a>(&'a MotorModel);

impl fmt::Display for MotorLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "      Motor Port: {} - Current:{:5.2} Temp:{:6.2} Status:{:2}",
            m.port + 1,
            m.current,
            m.thermal.temperature,
            m.ptc_tripped as u8 + ((m.limit_tripped as u8) << 1)
        )
    }
}

impl fmt::Display for StatusReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bank in self.banks {
            writeln!(f, "{}", BankLine(bank))?;
            for m in bank.members().filter_map(|i| self.motors.get(i)) {
                writeln!(f, "{}", MotorLine(m))?;
            }
        }
        Ok(())
    }
}

impl<H: MotorIo> fmt::Debug for SmartMotors<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmartMotors")
            .field("mode", &self.mode)
            .field("timing", &self.timing)
            .field("next_motor", &self.next_motor)
            .finish()
    }
}
