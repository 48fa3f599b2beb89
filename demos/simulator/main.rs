use std::f32::consts::PI;

use eframe;

mod gui;
mod io;
mod physics;

use gui::{BankReadout, Gui, MotorReadout, RIG_MOTORS};
use io::SimIo;
use physics::{BrushedMotor, MotorRig};
use smartmotor::{
    hardware::SensorPort,
    motor::TPR_QUAD,
    BankId, Constants, EncoderSource, LimitMode, MotorKind, MotorSlot, PidConfig,
    PidController, PidPool, SmartMotorConfig, SmartMotors,
};

/// Physics step, milliseconds.
const STEP_MS: u32 = 1;
/// Position loop period, milliseconds.
const PID_PERIOD_MS: u32 = 20;
/// Digital pin of the bank status LED.
const STATUS_LED: u8 = 0;

struct App {
    time_ms: u32,
    // Fraction of a physics step carried to the next frame
    carry_s: f32,
    gui: Gui,
    rig: MotorRig,
    motors: SmartMotors<SimIo>,
    position: PidController<'static>,
}

fn realize_motors(battery_mv: u32) -> SmartMotors<SimIo> {
    let mut config = SmartMotorConfig::new();
    config
        .set_motor(
            0,
            MotorSlot::new(MotorKind::Motor393Torque, EncoderSource::Quadrature { id: 0 }),
        )
        .set_motor(1, MotorSlot::unencoded(MotorKind::Motor393Torque))
        .set_scaled_drive(1, false);
    let mut motors = config.realize(SimIo::new(battery_mv));
    motors.set_controller_status_led(BankId::Cortex0, STATUS_LED);
    motors
}

impl App {
    pub fn new(pool: &'static PidPool) -> Option<Self> {
        let gui = Gui::new();
        let battery_mv = (gui.battery_volts * 1000.) as u32;

        let mut config = PidConfig::new(Constants::new(0.004, 0.0004, 0.01));
        config.set_sensor(SensorPort::Digital(0), false);

        Some(App {
            time_ms: 0,
            carry_s: 0.,
            rig: MotorRig::new(&[BrushedMotor::motor_393(); RIG_MOTORS], gui.battery_volts),
            motors: realize_motors(battery_mv),
            position: pool.controller(config)?,
            gui,
        })
    }

    fn step_simulation(&mut self) {
        self.time_ms = self.time_ms.wrapping_add(STEP_MS);

        let io = self.motors.io_mut();
        io.now_ms = self.time_ms;
        for i in 0..RIG_MOTORS {
            self.rig.set_command(i, io.commands[i]);
        }
        self.rig.step(STEP_MS as f32 / 1000.);
        for i in 0..RIG_MOTORS {
            io.positions[i] = (self.rig.angle(i) / (2. * PI) * TPR_QUAD) as i32;
        }

        let timing = self.motors.timing();
        if self.time_ms % timing.sample_period_ms == 0 {
            self.motors.sample_step();
        }
        if self.time_ms % timing.slew_period_ms == 0 {
            self.motors.slew_step();
        }
        if self.gui.hold_position && self.time_ms % PID_PERIOD_MS == 0 {
            let cmd = self.position.update(self.motors.io_mut());
            self.motors.set_motor(0, cmd);
        }
    }

    fn apply_controls(&mut self) {
        match self.gui.limit_mode {
            LimitMode::Off => {
                self.motors.disable_ptc_monitor();
                self.motors.disable_current_monitor();
            }
            LimitMode::Ptc => self.motors.enable_ptc_monitor(),
            LimitMode::Current => self.motors.enable_current_monitor(),
        }

        let battery_mv = (self.gui.battery_volts * 1000.) as u32;
        self.motors.io_mut().battery_mv = battery_mv;
        self.rig.set_supply_voltage(self.gui.battery_volts);

        self.position.enabled = self.gui.hold_position;
        self.position.set_target(self.gui.position_target);
        for i in 0..RIG_MOTORS {
            self.motors.set_limit_current(i, self.gui.limit_current);
            self.rig.set_load_torque(i, -self.gui.load_torque[i]);
            if !(i == 0 && self.gui.hold_position) {
                self.motors.set_motor(i, self.gui.commands[i]);
            }
        }

        if self.gui.impulse.triggered {
            self.rig.apply_impulse(0, self.gui.impulse.value);
        }
        if self.gui.status_requested {
            self.motors.log_status();
        }
        if self.gui.reset_requested {
            self.rig.reset();
            self.motors = realize_motors(battery_mv);
            self.time_ms = 0;
            self.carry_s = 0.;
            self.gui.clear_history();
        }
    }

    fn readouts(&self) -> ([MotorReadout; RIG_MOTORS], BankReadout) {
        let motors = std::array::from_fn(|i| {
            let m = self.motors.motor(i);
            MotorReadout {
                angle: self.rig.angle(i),
                true_rpm: self.rig.rpm(i),
                true_current: self.rig.current(i),
                rpm: self.motors.speed(i),
                current: self.motors.signed_current(i),
                temperature: self.motors.temperature(i),
                command: self.motors.io().commands[i],
                limit_cmd: self.motors.limit_cmd(i),
                ptc_tripped: m.map_or(false, |m| m.ptc_tripped),
                limit_tripped: m.map_or(false, |m| m.limit_tripped),
            }
        });
        let bank = self.motors.bank(BankId::Cortex0);
        let bank = BankReadout {
            current: bank.current,
            temperature: bank.thermal.temperature,
            tripped: bank.ptc_tripped || bank.current_tripped,
            led_lit: self.motors.io().led_lit(STATUS_LED),
        };
        (motors, bank)
    }
}

impl eframe::App for App {
    fn update(&mut self, ctx: &eframe::egui::Context, _: &mut eframe::Frame) {
        if !self.gui.paused {
            // If we aren't paused, keep repainting so the simulation can run.
            ctx.request_repaint();
            self.carry_s += self.gui.dilation * ctx.input().predicted_dt;
            let step_s = STEP_MS as f32 / 1000.;
            while self.carry_s >= step_s {
                self.carry_s -= step_s;
                self.step_simulation();
            }
        }

        let (motors, bank) = self.readouts();
        self.gui.update(self.time_ms as f32 / 1000., motors, bank);
        self.gui.show(ctx);
        self.apply_controls();
    }
}

fn main() {
    env_logger::init();

    let pool: &'static PidPool = Box::leak(Box::new(PidPool::new()));
    let Some(app) = App::new(pool) else {
        log::error!("No PID controller available");
        return;
    };

    let native_options = eframe::NativeOptions::default();
    eframe::run_native(
        "Smart Motor Simulator",
        native_options,
        Box::new(|_| Box::new(app)),
    );
}
