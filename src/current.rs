//! Motor current estimated from the PWM duty cycle and the motor speed.
//!
//! The winding is an RL circuit. During the on phase of each PWM cycle it is
//! driven by the battery less the back emf, during the off phase the current
//! decays through the flyback diode. If the decay reaches zero the diode
//! clamps it there for the remainder of the cycle.
//!
//! The model and its constants follow Chris Siegert's (vamfun) analysis of
//! the vex motors.
use libm::{expf, fabsf, logf};

use crate::motor::MotorModel;
use crate::util::{clip_magnitude, sgn, sgn_cmd};
use crate::{MOTOR_MAX_CMD, MOTOR_MIN_CMD};

/// Ohms, wiring and controller resistance in series with the motor
pub const R_SYS: f32 = 0.3;
/// Hz
pub const PWM_FREQ: f32 = 1150.;
/// Volts, flyback diode forward drop
pub const V_DIODE: f32 = 0.75;

/// Weight of the previous value in the filtered current.
pub const CURRENT_FILTER_WEIGHT: f32 = 0.8;

/// Below this command magnitude the direction is taken from the speed.
const DIRECTION_CMD_THRESHOLD: i16 = 10;

impl MotorModel {
    /// The command as seen by the winding, compensated for the compressed
    /// response of externally driven ports.
    fn drive_command(&self) -> i16 {
        let mut cmd = self.motor_out as i32;
        if self.scaled_drive {
            cmd = (cmd * 128) / 90;
        }
        cmd.clamp(MOTOR_MIN_CMD as i32, MOTOR_MAX_CMD as i32) as i16
    }

    /// Estimate the average current over one PWM cycle at `v_battery` volts.
    pub fn estimate_current(&mut self, v_battery: f32) -> f32 {
        let cmd = self.drive_command();

        // Near zero command the speed gives a steadier direction
        let dir = if cmd.abs() > DIRECTION_CMD_THRESHOLD {
            sgn_cmd(cmd) as f32
        } else {
            sgn(self.rpm)
        };

        let duty_on = cmd.abs() as f32 / MOTOR_MAX_CMD as f32;

        let lambda = self.r_motor / (PWM_FREQ * self.l_motor);
        let c1 = expf(-lambda * duty_on);
        let c2 = expf(-lambda * (1. - duty_on));

        // Clip back emf, the motor may be driven faster than free speed
        let v_bemf = clip_magnitude(self.ke_motor * self.rpm, self.v_bemf_max);

        // Steady state currents of the on and off phases
        let i_ss_on = (v_battery * dir - v_bemf) / (self.r_motor + R_SYS);
        let i_ss_off = -(V_DIODE * dir + v_bemf) / self.r_motor;

        // Trial current at the start of the cycle
        let i_0 = (i_ss_on * (1. - c1) * c2 + i_ss_off * (1. - c2)) / (1. - c1 * c2);

        let duty_off = if i_0 * dir < 0. {
            // Without the diode the current would cross zero during the off
            // phase, so it is clamped there and the next cycle starts at zero
            let i_max = i_ss_on * (1. - c1);
            let crossing = -logf(-i_ss_off / (i_max - i_ss_off)) / lambda;
            if crossing.is_finite() {
                crossing.clamp(0., 1. - duty_on)
            } else {
                1. - duty_on
            }
        } else {
            1. - duty_on
        };

        let i_bar = i_ss_on * duty_on + i_ss_off * duty_off;
        log::debug!(
            "Motor {} cmd {} rpm {} current {}",
            self.port,
            cmd,
            self.rpm,
            i_bar
        );

        self.current = i_bar;
        self.filtered_current =
            self.filtered_current * CURRENT_FILTER_WEIGHT + i_bar * (1. - CURRENT_FILTER_WEIGHT);
        if fabsf(self.current) > self.peak_current {
            self.peak_current = fabsf(self.current);
        }
        i_bar
    }

    /// The command that holds the motor at `target_current` at its present
    /// speed, found by inverting the electrical model.
    ///
    /// Command and speed must share a sign. While the motor reverses the back
    /// emf adds to the battery and no command in the existing direction keeps
    /// the current down; the full command in that direction is returned and
    /// the current is allowed to go higher until the motor has turned around.
    pub fn safe_command(&self, v_battery: f32) -> i16 {
        let max = MOTOR_MAX_CMD as f32;
        let drop = self.target_current * (self.r_motor + R_SYS) + V_DIODE;
        let bemf = self.rpm * self.ke_motor;

        let mut cmd = if self.motor_out >= 0 {
            if self.rpm >= 0. {
                ((max * (bemf + drop) / (v_battery + V_DIODE)) as i32).min(MOTOR_MAX_CMD as i32)
            } else {
                MOTOR_MAX_CMD as i32
            }
        } else if self.rpm <= 0. {
            ((max * (bemf - drop) / (v_battery + V_DIODE)) as i32).max(MOTOR_MIN_CMD as i32)
        } else {
            MOTOR_MIN_CMD as i32
        };

        if self.target_current == 0. {
            cmd = 0;
        }

        if self.scaled_drive {
            cmd = (cmd * 90) / 128;
        }
        log::debug!("Motor {} safe command {}", self.port, cmd);
        cmd as i16
    }
}

#[cfg(test)]
mod tests {
    use crate::motor::{EncoderSource, MotorKind, MotorModel};

    fn motor() -> MotorModel {
        MotorModel::new(0, MotorKind::Motor393Torque, EncoderSource::None, 0)
    }

    #[test]
    fn idle_motor_draws_nothing() {
        let mut m = motor();
        for _ in 0..50 {
            m.estimate_current(7.2);
        }
        assert!(m.current.abs() < 1e-6);
        assert!(m.filtered_current.abs() < 1e-6);
    }

    #[test]
    fn stalled_motor_at_full_command() {
        let mut m = motor();
        m.motor_out = 127;
        let i = m.estimate_current(7.2);
        // All of the cycle is on phase, battery across motor plus system resistance
        assert!((i - 7.2 / (1.5 + 0.3)).abs() < 1e-3);

        let mut m = motor();
        m.motor_out = -127;
        let i = m.estimate_current(7.2);
        assert!((i + 4.0).abs() < 1e-3);
        assert!((m.peak_current - 4.0).abs() < 1e-3);
    }

    #[test]
    fn free_running_motor_draws_little() {
        let mut m = motor();
        m.motor_out = 127;
        m.rpm = m.rpm_free;
        let i = m.estimate_current(7.2);
        assert!(i > 0.);
        assert!(i < 0.3);
    }

    #[test]
    fn back_emf_is_clipped() {
        let mut fast = motor();
        fast.motor_out = 127;
        fast.rpm = fast.rpm_free * 3.;
        let mut free = motor();
        free.motor_out = 127;
        free.rpm = free.rpm_free;
        assert!((fast.estimate_current(7.2) - free.estimate_current(7.2)).abs() < 1e-6);
    }

    #[test]
    fn filtered_current_converges_geometrically() {
        let mut m = motor();
        m.motor_out = 127;
        let target = m.clone().estimate_current(7.2);
        let mut gap = target;
        for _ in 0..20 {
            m.estimate_current(7.2);
            gap *= 0.8;
            assert!(((target - m.filtered_current) - gap).abs() < 1e-4);
        }
    }

    #[test]
    fn partial_duty_with_diode_clamp() {
        let mut m = motor();
        m.motor_out = 20;
        m.rpm = 60.;
        let i = m.estimate_current(7.2);
        assert!(i.is_finite());
        assert!(i >= -0.5 && i < 4.0);
    }

    #[test]
    fn safe_command_inverts_model() {
        let mut m = motor();
        m.motor_out = 100;
        m.target_current = 0.9;
        let cmd = m.safe_command(7.2);
        assert_eq!(cmd, 37);

        // Running the model at that command lands near the target
        m.motor_out = cmd;
        let i = m.estimate_current(7.2);
        assert!((i - 0.9).abs() < 0.2);

        m.motor_out = -100;
        assert_eq!(m.safe_command(7.2), -37);
    }

    #[test]
    fn safe_command_during_reversal_is_full_scale() {
        let mut m = motor();
        m.target_current = 0.9;
        m.motor_out = 50;
        m.rpm = -40.;
        assert_eq!(m.safe_command(7.2), 127);
        m.motor_out = -50;
        m.rpm = 40.;
        assert_eq!(m.safe_command(7.2), -127);
    }

    #[test]
    fn zero_target_current_stops_motor() {
        let mut m = motor();
        m.motor_out = 90;
        m.target_current = 0.;
        assert_eq!(m.safe_command(7.2), 0);
    }

    #[test]
    fn scaled_drive_compresses_safe_command() {
        let mut m = motor();
        m.scaled_drive = true;
        m.motor_out = 90;
        m.target_current = 0.9;
        assert_eq!(m.safe_command(7.2), 37 * 90 / 128);
        // 90 on a scaled port is full drive to the winding
        m.motor_out = 90;
        let i = m.estimate_current(7.2);
        assert!((i - 4.0).abs() < 1e-3);
    }
}
