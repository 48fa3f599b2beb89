//! Virtual PTC temperature, a single pole lag driven by current squared.
//!
//! The PTC devices protecting motors and controller banks are resettable
//! fuses. We can not measure them, so their temperature is estimated from
//! the hold current and time-to-trip figures on their data sheets.

/// 72 deg F expressed in deg C.
pub const TEMP_AMBIENT: f32 = (72.0 - 32.0) * 5. / 9.;
/// Reference temperature of the data sheet figures, deg C.
pub const TEMP_REF: f32 = 25.0;
/// Temperature at which a PTC trips, deg C.
pub const TEMP_TRIP: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalConstants {
    /// Steady state temperature rise per amp squared
    pub c1: f32,
    /// Inverse time constant, per millisecond
    pub c2: f32,
}

impl ThermalConstants {
    /// Derive constants from PTC data sheet values.
    ///
    /// `hold_current` is the current at which the device should never trip,
    /// `time_to_trip` the seconds to trip at five times that current and
    /// `k_tau` a safety factor, usually 0.5 ~ 0.8. Lower is more conservative.
    pub fn from_ptc(hold_current: f32, time_to_trip: f32, k_tau: f32) -> Self {
        let tau = k_tau * time_to_trip * 5. * 5.;
        ThermalConstants {
            c1: (TEMP_TRIP - TEMP_REF) / (hold_current * hold_current),
            c2: 1. / (tau * 1000.),
        }
    }

    /// HR16-400, used in the cortex and the power expander.
    pub fn cortex() -> Self {
        Self::from_ptc(3.0, 1.7, 0.5)
    }

    /// HR30-090, used in the 393. Hold current raised slightly to slow the trip.
    pub fn motor_393() -> Self {
        Self::from_ptc(1.0, 7.1, 0.5)
    }

    /// HR16-075, used in the 269 and the three wire motor.
    pub fn motor_269() -> Self {
        Self::from_ptc(0.75, 2.0, 0.5)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ThermalState {
    pub constants: ThermalConstants,
    pub ambient: f32,
    pub temperature: f32,
}

impl ThermalState {
    pub fn new(constants: ThermalConstants) -> Self {
        ThermalState {
            constants,
            ambient: TEMP_AMBIENT,
            temperature: TEMP_AMBIENT,
        }
    }

    /// Advance the model by `dt_ms` with `current` flowing.
    pub fn step(&mut self, current: f32, dt_ms: u32) -> f32 {
        let ThermalConstants { c1, c2 } = self.constants;
        let rate = c2 * (current * current * c1 - (self.temperature - self.ambient));
        self.temperature += rate * dt_ms as f32;
        self.temperature
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settles_at_ambient_without_current() {
        let mut state = ThermalState::new(ThermalConstants::motor_393());
        state.temperature = 80.;
        for _ in 0..10_000 {
            state.step(0., 100);
        }
        assert!((state.temperature - TEMP_AMBIENT).abs() < 0.1);
    }

    #[test]
    fn hold_current_settles_below_trip() {
        let constants = ThermalConstants::motor_393();
        let mut state = ThermalState::new(constants);
        for _ in 0..20_000 {
            state.step(1.0, 100);
        }
        // Steady state rise is i^2 * c1 = trip - ref, so from ambient we stay below trip
        let expected = TEMP_AMBIENT + (TEMP_TRIP - TEMP_REF);
        assert!((state.temperature - expected).abs() < 0.5);
        assert!(state.temperature < TEMP_TRIP);
    }

    #[test]
    fn five_times_hold_current_trips() {
        let mut state = ThermalState::new(ThermalConstants::motor_269());
        let mut elapsed_ms = 0;
        while state.temperature < TEMP_TRIP && elapsed_ms < 60_000 {
            state.step(5. * 0.75, 10);
            elapsed_ms += 10;
        }
        assert!(state.temperature >= TEMP_TRIP);
        // Conservative, trips no later than the data sheet time
        assert!(elapsed_ms <= 2_000);
    }
}
