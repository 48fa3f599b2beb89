//! Controller banks, groups of motor outputs behind one PTC.
use libm::fabsf;

use crate::motor::MotorModel;
use crate::thermal::{ThermalConstants, ThermalState};

pub const BANK_COUNT: usize = 3;
/// Slots per bank, the power expander only uses four of them.
pub const BANK_MOTORS: usize = 5;
pub const POWER_EXPANDER_OUTPUTS: usize = 4;

/// Amps. The cortex and power expander are rated for 4A, we stay below that.
pub const SAFE_CURRENT_BANK: f32 = 3.0;

/// Analog counts per volt on the power expander status output.
pub const PE_COUNTS_PER_VOLT: f32 = 270.0;
/// Below this the power expander PTC has tripped, works for old and new units.
pub const PE_MIN_VOLTS: f32 = 3.0;
/// Temperature forced on a power expander that lost its supply.
const PE_TRIPPED_TEMPERATURE: f32 = 110.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankId {
    /// Cortex ports 1 - 5
    Cortex0,
    /// Cortex ports 6 - 10
    Cortex1,
    PowerExpander,
}

impl BankId {
    pub const ALL: [BankId; BANK_COUNT] = [BankId::Cortex0, BankId::Cortex1, BankId::PowerExpander];

    pub fn index(self) -> usize {
        match self {
            BankId::Cortex0 => 0,
            BankId::Cortex1 => 1,
            BankId::PowerExpander => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BankId::Cortex0 => "Cortex ports 1 - 5 ",
            BankId::Cortex1 => "Cortex ports 6 - 10",
            BankId::PowerExpander => "Power Expander     ",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerBank {
    pub id: BankId,
    /// Indices of member motors
    pub motors: [Option<usize>; BANK_MOTORS],
    /// Amps, always positive as it flows from the battery
    pub current: f32,
    pub peak_current: f32,
    pub safe_current: f32,
    pub thermal: ThermalState,
    pub ptc_tripped: bool,
    /// Summed current over `safe_current`, only used in current mode
    pub current_tripped: bool,
    /// Digital pin of an LED lit while anything on the bank is tripped
    pub status_led: Option<u8>,
    /// Analog pin reading the power expander's supply after its PTC
    pub status_port: Option<u8>,
}

impl ControllerBank {
    pub fn new(id: BankId) -> Self {
        ControllerBank {
            id,
            motors: [None; BANK_MOTORS],
            current: 0.,
            peak_current: 0.,
            safe_current: SAFE_CURRENT_BANK,
            thermal: ThermalState::new(ThermalConstants::cortex()),
            ptc_tripped: false,
            current_tripped: false,
            status_led: None,
            status_port: None,
        }
    }

    pub fn members(&self) -> impl Iterator<Item = usize> + '_ {
        self.motors.iter().flatten().copied()
    }

    pub fn contains(&self, motor: usize) -> bool {
        self.members().any(|m| m == motor)
    }

    /// Number of slots that may hold a motor.
    pub fn capacity(&self) -> usize {
        match self.id {
            BankId::PowerExpander => POWER_EXPANDER_OUTPUTS,
            _ => BANK_MOTORS,
        }
    }

    /// Put `motor` in the first free slot. Returns false if the bank is full.
    pub(crate) fn insert(&mut self, motor: usize) -> bool {
        let capacity = self.capacity();
        match self.motors[..capacity].iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(motor);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, motor: usize) {
        for slot in self.motors.iter_mut() {
            if *slot == Some(motor) {
                *slot = None;
            }
        }
    }

    /// Sum of member motor current magnitudes.
    pub fn aggregate_current(&mut self, motors: &[MotorModel]) -> f32 {
        self.current = self
            .members()
            .filter_map(|index| motors.get(index))
            .filter(|m| m.is_defined())
            .map(|m| fabsf(m.current))
            .sum();
        if self.current > self.peak_current {
            self.peak_current = self.current;
        }
        self.current
    }

    pub fn update_temperature(&mut self, dt_ms: u32) -> f32 {
        self.thermal.step(self.current, dt_ms)
    }

    /// True if the bank or any of its motors is tripped.
    pub fn is_faulted(&self, motors: &[MotorModel]) -> bool {
        self.ptc_tripped
            || self.current_tripped
            || self
                .members()
                .filter_map(|index| motors.get(index))
                .any(|m| m.ptc_tripped || m.limit_tripped)
    }

    /// Check the power expander supply from a raw status port reading. A
    /// supply below `PE_MIN_VOLTS` means the PTC has opened, the bank is
    /// treated as tripped and its safe current dropped to zero for good.
    pub fn check_supply(&mut self, raw: i32) -> bool {
        let volts = raw as f32 / PE_COUNTS_PER_VOLT;
        if volts < PE_MIN_VOLTS {
            if self.safe_current != 0. {
                log::error!("{:?} lost power, supply {} V", self.id, volts);
            }
            self.thermal.temperature = PE_TRIPPED_TEMPERATURE;
            self.safe_current = 0.;
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::{EncoderSource, MotorKind};

    fn motors() -> [MotorModel; 3] {
        [
            MotorModel::new(0, MotorKind::Motor393Torque, EncoderSource::None, 0),
            MotorModel::new(1, MotorKind::Motor269, EncoderSource::None, 0),
            MotorModel::unclassified(2),
        ]
    }

    #[test]
    fn current_is_sum_of_magnitudes() {
        let mut motors = motors();
        motors[0].current = 1.25;
        motors[1].current = -0.5;
        motors[2].current = 9.;
        let mut bank = ControllerBank::new(BankId::Cortex0);
        bank.motors = [Some(0), Some(1), Some(2), None, None];
        assert!((bank.aggregate_current(&motors) - 1.75).abs() < 1e-6);
        assert!((bank.peak_current - 1.75).abs() < 1e-6);

        motors[0].current = 0.;
        bank.aggregate_current(&motors);
        assert!((bank.current - 0.5).abs() < 1e-6);
        assert!((bank.peak_current - 1.75).abs() < 1e-6);
    }

    #[test]
    fn power_expander_holds_four() {
        let mut bank = ControllerBank::new(BankId::PowerExpander);
        for m in 0..POWER_EXPANDER_OUTPUTS {
            assert!(bank.insert(m));
        }
        assert!(!bank.insert(7));
        bank.remove(2);
        assert!(!bank.contains(2));
        assert!(bank.insert(7));
        assert!(bank.contains(7));
    }

    #[test]
    fn fault_reflects_members() {
        let mut motors = motors();
        let mut bank = ControllerBank::new(BankId::Cortex1);
        bank.motors[0] = Some(1);
        assert!(!bank.is_faulted(&motors));
        motors[1].limit_tripped = true;
        assert!(bank.is_faulted(&motors));

        motors[1].limit_tripped = false;
        bank.current_tripped = true;
        assert!(bank.is_faulted(&motors));
    }

    #[test]
    fn lost_supply_trips_bank_for_good() {
        let mut bank = ControllerBank::new(BankId::PowerExpander);
        assert!(bank.check_supply(7 * 270));
        assert_eq!(bank.safe_current, SAFE_CURRENT_BANK);
        assert!(!bank.check_supply(100));
        assert_eq!(bank.safe_current, 0.);
        assert_eq!(bank.thermal.temperature, 110.);
        assert!(bank.check_supply(7 * 270));
        assert_eq!(bank.safe_current, 0.);
    }
}
