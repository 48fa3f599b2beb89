//! Per-motor physical model and speed estimation.
use libm::fabsf;

use crate::bank::BankId;
use crate::protection::CommandLimit;
use crate::thermal::{ThermalConstants, ThermalState};
use crate::util::sgn;
use crate::{DEFAULT_LIMIT_CURRENT, DEFAULT_SLEW_RATE};

/// Nominal battery voltage the motor data was measured at.
pub const V_NOMINAL: f32 = 7.2;

/// Ticks per revolution marking a motor with no speed feedback.
pub const NO_ENCODER_TPR: f32 = -1.;
/// Ticks per revolution of a quadrature encoder.
pub const TPR_QUAD: f32 = 360.0;
/// Rough figure for a potentiometer geared 1:1 to the motor.
pub const TPR_POT: f32 = 6000.0;

/// Percent of free speed against percent of command, in steps of 16 counts.
const SPEED_TABLE: [f32; 10] = [0., 26., 58., 77., 85., 92., 95., 98., 100., 100.];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorKind {
    /// Servos, flashlights and empty ports. Never estimated or aggregated.
    Undefined,
    Motor269,
    /// 393 with the high torque gearing
    Motor393Torque,
    /// 393 with the high speed gearing
    Motor393Speed,
    /// 393 with the turbo gearing
    Motor393Turbo,
}

/// Physical constants fixed at classification time.
#[derive(Debug, Clone, Copy)]
pub struct MotorConstants {
    /// Amps
    pub i_free: f32,
    /// Amps
    pub i_stall: f32,
    /// Ohms
    pub r_motor: f32,
    /// Henries
    pub l_motor: f32,
    /// Volts per rpm
    pub ke_motor: f32,
    pub rpm_free: f32,
    /// Ticks per revolution of the integrated encoder for this gearing
    pub ime_ticks_per_rev: f32,
    /// Amps, the current the motor PTC tolerates indefinitely
    pub safe_current: f32,
    pub thermal: ThermalConstants,
}

impl MotorConstants {
    fn from_data(i_free: f32, i_stall: f32, rpm_free: f32, safe_current: f32) -> Self {
        MotorConstants {
            i_free,
            i_stall,
            r_motor: V_NOMINAL / i_stall,
            l_motor: 0.000650,
            ke_motor: back_emf_constant(i_free, i_stall, rpm_free),
            rpm_free,
            ime_ticks_per_rev: 0.,
            safe_current,
            thermal: ThermalConstants::motor_393(),
        }
    }

    /// Same motor behind a faster gear train.
    fn geared(self, ratio: f32) -> Self {
        MotorConstants {
            ke_motor: self.ke_motor / ratio,
            rpm_free: self.rpm_free * ratio,
            ..self
        }
    }
}

pub(crate) fn back_emf_constant(i_free: f32, i_stall: f32, rpm_free: f32) -> f32 {
    V_NOMINAL * (1. - i_free / i_stall) / rpm_free
}

impl MotorKind {
    pub fn constants(self) -> Option<MotorConstants> {
        let m393 = MotorConstants::from_data(0.2, 4.8, 110., 0.90);
        match self {
            MotorKind::Undefined => None,
            MotorKind::Motor393Torque => Some(MotorConstants {
                ime_ticks_per_rev: 627.2,
                ..m393
            }),
            MotorKind::Motor393Speed => Some(MotorConstants {
                ime_ticks_per_rev: 392.,
                ..m393.geared(1.6)
            }),
            MotorKind::Motor393Turbo => Some(MotorConstants {
                ime_ticks_per_rev: 261.333,
                ..m393.geared(2.4)
            }),
            MotorKind::Motor269 => Some(MotorConstants {
                ime_ticks_per_rev: 240.448,
                thermal: ThermalConstants::motor_269(),
                ..MotorConstants::from_data(0.18, 2.88, 120., 0.75)
            }),
        }
    }
}

/// Where a motor's speed feedback comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderSource {
    /// Speed is simulated from the command.
    None,
    /// Quadrature encoder read through the motor position of `port`.
    Quadrature { id: u8 },
    /// Integrated motor encoder read through the motor position of `port`.
    Integrated { id: u8 },
    /// Raw analog reading, for example a potentiometer on a lift.
    Sensor { pin: u8 },
}

impl EncoderSource {
    pub fn is_valid(self) -> bool {
        self != EncoderSource::None
    }
}

#[derive(Debug, Clone)]
pub struct MotorModel {
    pub port: usize,
    /// Port whose position is read for speed, differs from `port` when linked
    pub eport: usize,
    pub kind: MotorKind,
    pub bank: Option<BankId>,
    /// Command goes through an external controller with a compressed response
    pub scaled_drive: bool,

    /// Requested by the application
    pub motor_cmd: i16,
    /// Requested after protection limiting
    pub motor_req: i16,
    /// Last value written to the hardware
    pub motor_out: i16,
    pub motor_slew: i16,

    pub limit_tripped: bool,
    pub limit_cmd: CommandLimit,
    /// Amps, threshold for the direct current limit
    pub limit_current: f32,

    pub encoder: EncoderSource,
    pub ticks_per_rev: f32,
    pub enc: i32,
    pub oldenc: i32,
    pub delta: f32,
    pub rpm: f32,

    pub i_free: f32,
    pub i_stall: f32,
    pub r_motor: f32,
    pub l_motor: f32,
    pub ke_motor: f32,
    pub rpm_free: f32,
    pub v_bemf_max: f32,

    /// Estimated instantaneous current, amps
    pub current: f32,
    /// Low pass filtered current used by the current limiter
    pub filtered_current: f32,
    pub peak_current: f32,

    pub safe_current: f32,
    /// Current the safe command is solved for while limiting
    pub target_current: f32,

    pub thermal: ThermalState,
    pub ptc_tripped: bool,

    pub last_update_ms: Option<u32>,
    /// Time between the two most recent samples
    pub delay_ms: u32,
}

impl MotorModel {
    /// A motor slot that does not take part in estimation.
    pub fn unclassified(port: usize) -> Self {
        MotorModel {
            port,
            eport: port,
            kind: MotorKind::Undefined,
            bank: None,
            scaled_drive: false,
            motor_cmd: 0,
            motor_req: 0,
            motor_out: 0,
            motor_slew: DEFAULT_SLEW_RATE,
            limit_tripped: false,
            limit_cmd: CommandLimit::Unrestricted,
            limit_current: DEFAULT_LIMIT_CURRENT,
            encoder: EncoderSource::None,
            ticks_per_rev: NO_ENCODER_TPR,
            enc: 0,
            oldenc: 0,
            delta: 0.,
            rpm: 0.,
            i_free: 0.,
            i_stall: 0.,
            r_motor: 0.,
            l_motor: 0.,
            ke_motor: 0.,
            rpm_free: 0.,
            v_bemf_max: 0.,
            current: 0.,
            filtered_current: 0.,
            peak_current: 0.,
            safe_current: 0.,
            target_current: 0.,
            thermal: ThermalState::new(ThermalConstants::motor_393()),
            ptc_tripped: false,
            last_update_ms: None,
            delay_ms: 0,
        }
    }

    /// Classify the motor on `port`, unknown kinds are forced to `Undefined`.
    pub fn new(port: usize, kind: MotorKind, encoder: EncoderSource, position: i32) -> Self {
        let mut m = MotorModel::unclassified(port);
        if let Some(c) = kind.constants() {
            m.kind = kind;
            m.i_free = c.i_free;
            m.i_stall = c.i_stall;
            m.r_motor = c.r_motor;
            m.l_motor = c.l_motor;
            m.ke_motor = c.ke_motor;
            m.rpm_free = c.rpm_free;
            m.safe_current = c.safe_current;
            m.limit_current = c.safe_current;
            m.thermal = ThermalState::new(c.thermal);
            m.ticks_per_rev = c.ime_ticks_per_rev;
        }

        m.encoder = encoder;
        match encoder {
            EncoderSource::None => {
                m.ticks_per_rev = NO_ENCODER_TPR;
                m.enc = 0;
                m.oldenc = 0;
            }
            EncoderSource::Quadrature { .. } => {
                m.ticks_per_rev = TPR_QUAD;
                m.enc = position;
                m.oldenc = position;
            }
            EncoderSource::Integrated { .. } => {
                m.enc = position;
                m.oldenc = position;
            }
            EncoderSource::Sensor { .. } => {
                m.ticks_per_rev = TPR_POT;
                m.enc = position;
                m.oldenc = position;
            }
        }

        m.target_current = m.safe_current;
        m.v_bemf_max = m.ke_motor * m.rpm_free;
        m
    }

    pub fn is_defined(&self) -> bool {
        self.kind != MotorKind::Undefined
    }

    /// Speed from a fresh encoder or sensor sample taken `dt_ms` after the last.
    pub fn update_speed(&mut self, sample: i32, dt_ms: u32) -> f32 {
        self.enc = sample;
        self.delta = self.enc.wrapping_sub(self.oldenc) as f32;
        self.oldenc = self.enc;
        // No feedback, nothing to divide by
        if self.ticks_per_rev == NO_ENCODER_TPR || self.ticks_per_rev == 0. {
            return self.rpm;
        }
        let dt_ms = dt_ms.max(1) as f32;
        self.rpm = (1000. / dt_ms) * self.delta * 60. / self.ticks_per_rev;
        self.rpm
    }

    /// Plausible speed for a motor without feedback, from its hardware command.
    ///
    /// Assumes the motor runs at 90% of the speed the command would give it
    /// unloaded. Setting this too slow only trips the current limiters.
    pub fn simulate_speed(&mut self) -> f32 {
        let cmd = self.motor_out;
        let magnitude = (cmd.unsigned_abs() as usize).min(crate::MOTOR_MAX_CMD as usize);
        let index = magnitude >> 4;
        let fraction = (magnitude - (index << 4)) as f32 / 16.;
        let scale = self.rpm_free / 100. * 0.90;
        let speed = SPEED_TABLE[index] + (SPEED_TABLE[index + 1] - SPEED_TABLE[index]) * fraction;
        self.rpm = sgn(cmd as f32) * speed * scale;
        self.rpm
    }

    /// Change the free running speed, the back emf constant follows.
    pub fn set_free_rpm(&mut self, rpm_free: f32) {
        self.rpm_free = rpm_free;
        self.ke_motor = back_emf_constant(self.i_free, self.i_stall, rpm_free);
        self.v_bemf_max = self.ke_motor * self.rpm_free;
    }

    pub fn absolute_current(&self) -> f32 {
        fabsf(self.current)
    }
}
