//! Ramps the hardware command towards the requested command.
use crate::motor::MotorModel;

impl MotorModel {
    /// One slew limiter step for this motor. `limiting` is true while a
    /// protection scheme is enabled.
    ///
    /// Returns the new hardware command if it changed and must be written.
    pub fn slew_step(&mut self, limiting: bool) -> Option<i16> {
        self.motor_req = if limiting {
            self.limit_cmd.apply(self.motor_cmd)
        } else {
            self.motor_cmd
        };

        let out = self.motor_out;
        if out == self.motor_req {
            return None;
        }

        let next = if self.motor_req > out {
            out.saturating_add(self.motor_slew).min(self.motor_req)
        } else {
            out.saturating_sub(self.motor_slew).max(self.motor_req)
        };
        self.motor_out = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use crate::motor::{EncoderSource, MotorKind, MotorModel};
    use crate::protection::CommandLimit;
    use crate::FAST_SLEW_RATE;

    fn motor() -> MotorModel {
        MotorModel::new(0, MotorKind::Motor393Torque, EncoderSource::None, 0)
    }

    #[test]
    fn steps_by_slew_rate_without_overshoot() {
        for slew in [1, 7, 10, 64, FAST_SLEW_RATE] {
            for (from, to) in [(0, 127), (127, -127), (-50, 33), (90, 90)] {
                let mut m = motor();
                m.motor_slew = slew;
                m.motor_out = from;
                m.motor_cmd = to;

                let delta = (to as i32 - from as i32).abs();
                let expected_steps = (delta + slew as i32 - 1) / slew as i32;
                let mut steps = 0;
                while let Some(next) = m.slew_step(false) {
                    steps += 1;
                    assert!((next as i32 - from as i32).abs() <= slew as i32 * steps);
                    assert!(steps <= expected_steps);
                }
                assert_eq!(m.motor_out, to);
                assert_eq!(steps, expected_steps);
            }
        }
    }

    #[test]
    fn single_step_never_exceeds_rate() {
        let mut m = motor();
        m.motor_slew = 10;
        m.motor_cmd = -127;
        m.motor_out = 127;
        let mut last = m.motor_out;
        while m.slew_step(false).is_some() {
            assert!((m.motor_out as i32 - last as i32).abs() <= 10);
            last = m.motor_out;
        }
    }

    #[test]
    fn written_command_respects_limit() {
        for limit in [0, 5, 37, 100, -20, -90] {
            for cmd in [127, 60, -127, -60] {
                let mut m = motor();
                m.motor_slew = 13;
                m.motor_cmd = cmd;
                m.limit_cmd = CommandLimit::Max(limit);
                // Start from rest in the limit's direction
                for _ in 0..40 {
                    m.slew_step(true);
                    let same_direction = limit == 0 || (cmd > 0) == (limit > 0);
                    if same_direction {
                        assert!(m.motor_out.abs() <= limit.abs());
                    }
                }
            }
        }
    }

    #[test]
    fn limit_ignored_when_protection_disabled() {
        let mut m = motor();
        m.motor_slew = FAST_SLEW_RATE;
        m.motor_cmd = 127;
        m.limit_cmd = CommandLimit::Max(40);
        assert_eq!(m.slew_step(false), Some(127));
    }

    #[test]
    fn reversal_passes_limit() {
        let mut m = motor();
        m.motor_slew = FAST_SLEW_RATE;
        m.motor_out = 60;
        m.motor_cmd = -100;
        m.limit_cmd = CommandLimit::Max(40);
        assert_eq!(m.slew_step(true), Some(-100));
    }

    #[test]
    fn no_write_when_settled() {
        let mut m = motor();
        m.motor_cmd = 0;
        assert_eq!(m.slew_step(true), None);
    }
}
