//! Decides how far each motor's command may go.
//!
//! Two independent schemes are available and only one runs at a time. The
//! PTC scheme watches the estimated PTC temperatures of motors and banks and
//! limits the command once a device would trip. The current scheme compares
//! the filtered current against a fixed threshold.
use libm::fabsf;

use crate::bank::ControllerBank;
use crate::motor::MotorModel;
use crate::thermal::TEMP_TRIP;
use crate::util::sgn_cmd;

/// Once tripped the temperature must drop this far below the trip point.
pub const TEMP_HYST: f32 = 10.0;
/// A current trip releases once the filtered current falls below this
/// fraction of the threshold.
pub const CURRENT_RELEASE_RATIO: f32 = 0.9;
/// Amps above which a motor counts towards sharing a bank's safe current.
pub const ACTIVE_CURRENT: f32 = 0.1;

/// Raw value reported for an unrestricted command limit.
pub const MOTOR_MAX_CMD_UNDEFINED: i16 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitMode {
    Off,
    /// Limit using the estimated PTC temperatures
    Ptc,
    /// Limit using the filtered current against `limit_current`
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandLimit {
    Unrestricted,
    /// Signed maximum command, the sign is the direction it was solved for
    Max(i16),
}

impl CommandLimit {
    pub fn as_raw(self) -> i16 {
        match self {
            CommandLimit::Unrestricted => MOTOR_MAX_CMD_UNDEFINED,
            CommandLimit::Max(cmd) => cmd,
        }
    }

    /// The command actually requested of the hardware for `cmd`.
    ///
    /// A limit only ever reduces magnitude in its own direction. A command in
    /// the opposite direction is a reversal in progress and is never blocked.
    pub fn apply(self, cmd: i16) -> i16 {
        match self {
            CommandLimit::Unrestricted => cmd,
            CommandLimit::Max(limit) => {
                if cmd.abs() <= limit.abs() {
                    cmd
                } else if limit == 0 || sgn_cmd(cmd) == sgn_cmd(limit) {
                    limit
                } else {
                    cmd
                }
            }
        }
    }
}

/// PTC trip state machine with hysteresis.
pub fn ptc_transition(tripped: bool, temperature: f32) -> bool {
    if !tripped {
        temperature > TEMP_TRIP
    } else {
        temperature >= TEMP_TRIP - TEMP_HYST
    }
}

impl MotorModel {
    /// PTC limiting for one motor. A tripped bank owns the limit while it
    /// remains tripped.
    pub fn monitor_ptc(&mut self, bank_tripped: bool, v_battery: f32) {
        let was_tripped = self.ptc_tripped;
        self.ptc_tripped = ptc_transition(self.ptc_tripped, self.thermal.temperature);
        if self.ptc_tripped != was_tripped {
            if self.ptc_tripped {
                log::error!(
                    "Motor {} PTC tripped at {} deg C",
                    self.port,
                    self.thermal.temperature
                );
            } else {
                log::info!("Motor {} PTC reset", self.port);
            }
        }

        if bank_tripped {
            return;
        }

        if self.ptc_tripped {
            self.target_current = self.safe_current;
            self.limit_cmd = CommandLimit::Max(self.safe_command(v_battery));
        } else {
            self.limit_cmd = CommandLimit::Unrestricted;
        }
    }

    /// Fixed threshold limiting on the filtered current.
    ///
    /// Once tripped the limit holds until the current drops well below the
    /// threshold, the controls usually need backing off or the motor needs to
    /// speed up first. This stops the limiter oscillating. A tripped bank
    /// owns the limit while it remains tripped.
    pub fn monitor_current(&mut self, bank_tripped: bool, v_battery: f32) {
        let filtered = fabsf(self.filtered_current);
        if !self.limit_tripped {
            if filtered > self.limit_current {
                log::warn!("Motor {} current limit tripped at {} A", self.port, filtered);
                self.limit_tripped = true;
            }
        } else if filtered < self.limit_current * CURRENT_RELEASE_RATIO {
            log::info!("Motor {} current limit released", self.port);
            self.limit_tripped = false;
        }

        if bank_tripped {
            return;
        }

        self.target_current = self.limit_current;
        if self.limit_tripped {
            self.limit_cmd = CommandLimit::Max(self.safe_command(v_battery));
        } else {
            self.limit_cmd = CommandLimit::Unrestricted;
        }
    }
}

impl ControllerBank {
    /// PTC limiting for a bank. While tripped the bank's safe current is
    /// shared among its members, this is recalculated every pass.
    pub fn monitor_ptc(&mut self, motors: &mut [MotorModel], v_battery: f32) {
        let was_tripped = self.ptc_tripped;
        self.ptc_tripped = ptc_transition(self.ptc_tripped, self.thermal.temperature);
        if self.ptc_tripped != was_tripped {
            if self.ptc_tripped {
                log::error!(
                    "Bank {:?} PTC tripped at {} deg C",
                    self.id,
                    self.thermal.temperature
                );
            } else {
                log::info!("Bank {:?} PTC reset", self.id);
            }
        }

        if !self.ptc_tripped {
            return;
        }
        self.share_safe_current(motors, v_battery, |m| m.ptc_tripped.then_some(m.safe_current));
    }

    /// Fixed threshold limiting on the bank's summed current, with the same
    /// release ratio as the motor current limit.
    pub fn monitor_current(&mut self, motors: &mut [MotorModel], v_battery: f32) {
        if !self.current_tripped {
            if self.current > self.safe_current {
                log::warn!(
                    "Bank {:?} current limit tripped at {} A",
                    self.id,
                    self.current
                );
                self.current_tripped = true;
            }
        } else if self.current < self.safe_current * CURRENT_RELEASE_RATIO {
            log::info!("Bank {:?} current limit released", self.id);
            self.current_tripped = false;
        }

        if !self.current_tripped {
            return;
        }
        self.share_safe_current(motors, v_battery, |m| m.limit_tripped.then_some(m.limit_current));
    }

    /// Share the safe current evenly among the members drawing current and
    /// limit every member to its share. `own_limit` gives a motor's own
    /// tripped limit, the lower of the two is used.
    fn share_safe_current(
        &self,
        motors: &mut [MotorModel],
        v_battery: f32,
        own_limit: impl Fn(&MotorModel) -> Option<f32>,
    ) {
        let active = self
            .members()
            .filter_map(|index| motors.get(index))
            .filter(|m| fabsf(m.current) > ACTIVE_CURRENT)
            .count()
            .max(1);
        let share = self.safe_current / active as f32;

        for index in self.members() {
            if let Some(m) = motors.get_mut(index) {
                m.target_current = match own_limit(m) {
                    Some(limit) if limit < share => limit,
                    _ => share,
                };
                m.limit_cmd = CommandLimit::Max(m.safe_command(v_battery));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::BankId;
    use crate::motor::{EncoderSource, MotorKind};

    fn motor(port: usize) -> MotorModel {
        MotorModel::new(port, MotorKind::Motor393Torque, EncoderSource::None, 0)
    }

    #[test]
    fn limit_clips_same_direction() {
        assert_eq!(CommandLimit::Max(40).apply(100), 40);
        assert_eq!(CommandLimit::Max(-40).apply(-100), -40);
        assert_eq!(CommandLimit::Max(40).apply(30), 30);
        assert_eq!(CommandLimit::Unrestricted.apply(-127), -127);
        assert_eq!(CommandLimit::Unrestricted.as_raw(), MOTOR_MAX_CMD_UNDEFINED);
    }

    #[test]
    fn limit_never_blocks_reversal() {
        assert_eq!(CommandLimit::Max(40).apply(-100), -100);
        assert_eq!(CommandLimit::Max(-40).apply(100), 100);
    }

    #[test]
    fn zero_limit_stops_either_direction() {
        assert_eq!(CommandLimit::Max(0).apply(100), 0);
        assert_eq!(CommandLimit::Max(0).apply(-100), 0);
    }

    #[test]
    fn ptc_hysteresis() {
        let mut tripped = false;
        for t in [50., 90., 99.9, 100.] {
            tripped = ptc_transition(tripped, t);
            assert!(!tripped);
        }
        tripped = ptc_transition(tripped, 100.5);
        assert!(tripped);
        // Below the trip point is not enough
        tripped = ptc_transition(tripped, 95.);
        assert!(tripped);
        tripped = ptc_transition(tripped, 90.);
        assert!(tripped);
        tripped = ptc_transition(tripped, 89.9);
        assert!(!tripped);
    }

    #[test]
    fn ptc_never_releases_inside_band() {
        let mut tripped = ptc_transition(false, TEMP_TRIP + 1.);
        assert!(tripped);
        for i in 0..1000 {
            let t = if i % 2 == 0 {
                TEMP_TRIP - TEMP_HYST / 2.
            } else {
                TEMP_TRIP + 1.
            };
            tripped = ptc_transition(tripped, t);
            assert!(tripped);
        }
    }

    #[test]
    fn tripped_motor_gets_safe_command() {
        let mut m = motor(0);
        m.motor_out = 127;
        m.thermal.temperature = 101.;
        m.monitor_ptc(false, 7.2);
        assert!(m.ptc_tripped);
        assert_eq!(m.target_current, m.safe_current);
        assert_eq!(m.limit_cmd, CommandLimit::Max(m.safe_command(7.2)));

        m.thermal.temperature = 85.;
        m.monitor_ptc(false, 7.2);
        assert!(!m.ptc_tripped);
        assert_eq!(m.limit_cmd, CommandLimit::Unrestricted);
    }

    #[test]
    fn tripped_bank_owns_motor_limit() {
        let mut m = motor(0);
        m.limit_cmd = CommandLimit::Max(12);
        m.thermal.temperature = 50.;
        m.monitor_ptc(true, 7.2);
        assert_eq!(m.limit_cmd, CommandLimit::Max(12));
    }

    #[test]
    fn current_limit_hysteresis() {
        let mut m = motor(0);
        m.motor_out = 127;
        m.limit_current = 1.0;

        m.filtered_current = 1.05;
        m.monitor_current(false, 7.2);
        assert!(m.limit_tripped);
        assert!(matches!(m.limit_cmd, CommandLimit::Max(_)));

        m.filtered_current = 0.95;
        m.monitor_current(false, 7.2);
        assert!(m.limit_tripped);

        m.filtered_current = -0.89;
        m.monitor_current(false, 7.2);
        assert!(!m.limit_tripped);
        assert_eq!(m.limit_cmd, CommandLimit::Unrestricted);
    }

    #[test]
    fn bank_shares_safe_current_among_active_motors() {
        let mut motors = [motor(0), motor(1), motor(2)];
        let mut bank = ControllerBank::new(BankId::Cortex0);
        for (slot, m) in motors.iter_mut().enumerate() {
            bank.motors[slot] = Some(m.port);
            m.motor_out = 100;
        }
        motors[0].current = 1.5;
        motors[1].current = -1.5;
        motors[2].current = 0.05;

        bank.thermal.temperature = 105.;
        bank.monitor_ptc(&mut motors, 7.2);
        assert!(bank.ptc_tripped);
        // Two active motors share 3A
        for m in &motors {
            assert_eq!(m.target_current, 1.5);
            assert!(matches!(m.limit_cmd, CommandLimit::Max(_)));
        }

        // A motor whose own PTC has tripped keeps the lower of the two
        motors[1].ptc_tripped = true;
        bank.monitor_ptc(&mut motors, 7.2);
        assert_eq!(motors[1].target_current, motors[1].safe_current);
        assert_eq!(motors[0].target_current, 1.5);

        bank.safe_current = 1.;
        bank.monitor_ptc(&mut motors, 7.2);
        assert_eq!(motors[0].target_current, 0.5);
    }

    #[test]
    fn tripped_bank_owns_motor_current_limit() {
        let mut m = motor(0);
        m.limit_current = 1.0;
        m.limit_cmd = CommandLimit::Max(12);
        m.filtered_current = 0.2;
        m.monitor_current(true, 7.2);
        assert_eq!(m.limit_cmd, CommandLimit::Max(12));
        assert!(!m.limit_tripped);
    }

    #[test]
    fn bank_current_limit_hysteresis() {
        let mut motors = [motor(0), motor(1)];
        let mut bank = ControllerBank::new(BankId::Cortex0);
        for (slot, m) in motors.iter_mut().enumerate() {
            bank.motors[slot] = Some(m.port);
            m.motor_out = 127;
            m.current = 2.;
        }

        bank.current = bank.safe_current * 1.2;
        bank.monitor_current(&mut motors, 7.2);
        assert!(bank.current_tripped);
        for m in &motors {
            assert_eq!(m.target_current, bank.safe_current / 2.);
            assert!(matches!(m.limit_cmd, CommandLimit::Max(_)));
        }

        // Below the threshold is not enough
        bank.current = bank.safe_current * 0.95;
        bank.monitor_current(&mut motors, 7.2);
        assert!(bank.current_tripped);

        bank.current = bank.safe_current * 0.89;
        bank.monitor_current(&mut motors, 7.2);
        assert!(!bank.current_tripped);
    }

    #[test]
    fn bank_current_share_keeps_lower_motor_limit() {
        let mut motors = [motor(0), motor(1)];
        let mut bank = ControllerBank::new(BankId::Cortex1);
        bank.motors[0] = Some(0);
        bank.motors[1] = Some(1);
        motors[0].current = 2.;
        motors[1].current = 2.;
        motors[1].limit_tripped = true;
        motors[1].limit_current = 0.5;

        bank.current = 4.;
        bank.monitor_current(&mut motors, 7.2);
        assert_eq!(motors[0].target_current, 1.5);
        assert_eq!(motors[1].target_current, 0.5);
    }

    #[test]
    fn idle_tripped_bank_does_not_divide_by_zero() {
        let mut motors = [motor(0)];
        let mut bank = ControllerBank::new(BankId::Cortex1);
        bank.motors[0] = Some(0);
        bank.thermal.temperature = 150.;
        bank.monitor_ptc(&mut motors, 7.2);
        assert_eq!(motors[0].target_current, bank.safe_current);
    }
}
