use std::collections::VecDeque;

use eframe::egui::{
    plot::{Arrows, Line, Plot, Value, Values},
    *,
};

use smartmotor::LimitMode;

/// Simulated motors on the bench.
pub const RIG_MOTORS: usize = 2;
/// Samples of history kept for the plots.
const HISTORY: usize = 2000;

#[derive(Debug, Clone, Copy)]
pub struct TriggerValue<T> {
    pub value: T,
    pub triggered: bool,
}

/// What the bench knows about one motor, simulated and estimated.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotorReadout {
    pub angle: f32,
    pub true_rpm: f32,
    pub true_current: f32,
    pub rpm: f32,
    pub current: f32,
    pub temperature: f32,
    pub command: i16,
    pub limit_cmd: i16,
    pub ptc_tripped: bool,
    pub limit_tripped: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BankReadout {
    pub current: f32,
    pub temperature: f32,
    pub tripped: bool,
    pub led_lit: bool,
}

pub struct Gui {
    pub reset_requested: bool,
    pub paused: bool,
    // Time dilation factor
    pub dilation: f32,
    pub commands: [i16; RIG_MOTORS],
    pub hold_position: bool,
    pub position_target: f32,
    pub limit_mode: LimitMode,
    pub limit_current: f32,
    pub battery_volts: f32,
    pub load_torque: [f32; RIG_MOTORS],
    pub impulse: TriggerValue<f32>,
    pub status_requested: bool,
    time_s: f32,
    motors: [MotorReadout; RIG_MOTORS],
    bank: BankReadout,
    temperatures: [VecDeque<Value>; RIG_MOTORS + 1],
    currents: [VecDeque<Value>; RIG_MOTORS],
}

impl Gui {
    pub fn new() -> Self {
        Gui {
            reset_requested: false,
            paused: false,
            dilation: 1.,
            commands: [0; RIG_MOTORS],
            hold_position: false,
            position_target: 0.,
            limit_mode: LimitMode::Ptc,
            limit_current: smartmotor::DEFAULT_LIMIT_CURRENT,
            battery_volts: 7.6,
            load_torque: [0.; RIG_MOTORS],
            impulse: TriggerValue {
                value: 0.,
                triggered: false,
            },
            status_requested: false,
            time_s: 0.,
            motors: [MotorReadout::default(); RIG_MOTORS],
            bank: BankReadout::default(),
            temperatures: Default::default(),
            currents: Default::default(),
        }
    }

    pub fn update(&mut self, time_s: f32, motors: [MotorReadout; RIG_MOTORS], bank: BankReadout) {
        self.time_s = time_s;
        self.motors = motors;
        self.bank = bank;

        for (history, m) in self.currents.iter_mut().zip(motors.iter()) {
            push(history, Value::new(time_s, m.current));
        }
        for (history, t) in self
            .temperatures
            .iter_mut()
            .zip(motors.iter().map(|m| m.temperature).chain([bank.temperature]))
        {
            push(history, Value::new(time_s, t));
        }
    }

    pub fn clear_history(&mut self) {
        self.temperatures.iter_mut().for_each(VecDeque::clear);
        self.currents.iter_mut().for_each(VecDeque::clear);
    }

    pub fn show(&mut self, ctx: &Context) {
        // Reset quantities representing per-frame events
        self.reset_requested = false;
        self.impulse.triggered = false;
        self.status_requested = false;

        SidePanel::left("controls").show(ctx, |ui| {
            ui.heading("Commands");
            show_commands(
                ui,
                &mut self.commands,
                &mut self.hold_position,
                &mut self.position_target,
            );

            ui.heading("Protection");
            show_protection(
                ui,
                &mut self.limit_mode,
                &mut self.limit_current,
                &mut self.battery_volts,
            );

            ui.heading("Perturbations");
            show_perturbations(ui, &mut self.load_torque, &mut self.impulse);

            ui.heading("Status");
            show_status(ui, self.time_s, &self.motors, &self.bank);
            if ui.button("Log status").clicked() {
                self.status_requested = true;
            }

            ui.heading("Time Controls");
            show_time_controls(
                ui,
                &mut self.reset_requested,
                &mut self.paused,
                &mut self.dilation,
            );
        });
        CentralPanel::default().show(ctx, |ui| {
            show_rotors(ui, &self.motors);
            show_history(ui, &self.temperatures, &self.currents);
        });
    }
}

fn push(history: &mut VecDeque<Value>, value: Value) {
    if history.len() == HISTORY {
        history.pop_front();
    }
    history.push_back(value);
}

fn show_commands(
    ui: &mut Ui,
    commands: &mut [i16; RIG_MOTORS],
    hold_position: &mut bool,
    position_target: &mut f32,
) {
    Grid::new("command_grid").show(ui, |ui| {
        for (i, command) in commands.iter_mut().enumerate() {
            ui.label(format!("Port {}: ", i + 1));
            ui.add(DragValue::new(command).clamp_range(-127..=127));
            ui.end_row();
        }

        ui.label("Hold port 1 at: ");
        ui.add(
            DragValue::new(position_target)
                .suffix(" [ticks]")
                .speed(1.0),
        );
        ui.checkbox(hold_position, "Enabled");
        ui.end_row();
    });
}

fn show_protection(
    ui: &mut Ui,
    limit_mode: &mut LimitMode,
    limit_current: &mut f32,
    battery_volts: &mut f32,
) {
    ui.horizontal(|ui| {
        ui.radio_value(limit_mode, LimitMode::Off, "Off");
        ui.radio_value(limit_mode, LimitMode::Ptc, "PTC");
        ui.radio_value(limit_mode, LimitMode::Current, "Current");
    });
    Grid::new("protection_grid").show(ui, |ui| {
        ui.label("Current limit: ");
        ui.add(
            DragValue::new(limit_current)
                .suffix(" [A]")
                .clamp_range(0.0..=5.0)
                .speed(0.01),
        );
        ui.end_row();

        ui.label("Battery: ");
        ui.add(
            DragValue::new(battery_volts)
                .suffix(" [V]")
                .clamp_range(0.0..=9.0)
                .speed(0.01),
        );
        ui.end_row();
    });
}

fn show_perturbations(
    ui: &mut Ui,
    load_torque: &mut [f32; RIG_MOTORS],
    impulse: &mut TriggerValue<f32>,
) {
    Grid::new("perturbation_grid").show(ui, |ui| {
        for (i, torque) in load_torque.iter_mut().enumerate() {
            ui.label(format!("Load port {}: ", i + 1));
            ui.add(DragValue::new(torque).suffix(" [N m]").speed(0.01));
            ui.end_row();
        }

        ui.label("Impulse port 1: ");
        ui.add(
            DragValue::new(&mut impulse.value)
                .suffix(" [N m s]")
                .speed(0.001),
        );
        if ui.button("Apply").clicked() {
            impulse.triggered = true;
        }
        ui.end_row();
    });
}

fn show_status(ui: &mut Ui, time_s: f32, motors: &[MotorReadout], bank: &BankReadout) {
    ui.label(format!("Time: {:.2} [s]", time_s));
    Grid::new("status_grid").show(ui, |ui| {
        ui.label("");
        for i in 0..motors.len() {
            ui.label(format!("Port {}", i + 1));
        }
        ui.end_row();

        let rows: [(&str, fn(&MotorReadout) -> String); 8] = [
            ("Speed [rpm]", |m| format!("{:7.1}", m.true_rpm)),
            ("Estimated [rpm]", |m| format!("{:7.1}", m.rpm)),
            ("Current [A]", |m| format!("{:5.2}", m.true_current)),
            ("Estimated [A]", |m| format!("{:5.2}", m.current)),
            ("PTC [deg C]", |m| format!("{:6.2}", m.temperature)),
            ("Command", |m| format!("{}", m.command)),
            ("Limit", |m| format!("{}", m.limit_cmd)),
            ("Tripped", |m| {
                format!("ptc {} limit {}", m.ptc_tripped, m.limit_tripped)
            }),
        ];
        for (label, value) in rows {
            ui.label(label);
            for m in motors {
                ui.label(value(m));
            }
            ui.end_row();
        }
    });
    ui.label(format!(
        "Bank: {:5.2} [A] {:6.2} [deg C] tripped {}",
        bank.current, bank.temperature, bank.tripped
    ));
    ui.label(if bank.led_lit { "Status LED on" } else { "Status LED off" });
}

fn show_time_controls(ui: &mut Ui, resetting: &mut bool, paused: &mut bool, dilation: &mut f32) {
    ui.horizontal(|ui| {
        if ui.button("Reset").clicked() {
            *resetting = true;
        }

        if ui
            .button(if *paused { "Resume" } else { "Pause" })
            .clicked()
        {
            *paused = !*paused;
        }

        ui.label("Time dilation: ");
        ui.add(
            DragValue::new(dilation)
                .suffix(" [-]")
                .speed(0.01)
                .clamp_range(0.0..=10.0),
        );
    });
}

fn show_rotors(ui: &mut Ui, motors: &[MotorReadout]) {
    Plot::new("rotor_plot")
        .view_aspect(2.0)
        .data_aspect(1.0)
        .allow_drag(false)
        .allow_zoom(false)
        .allow_boxed_zoom(false)
        .allow_scroll(false)
        .show_axes([false, false])
        .show_x(false)
        .show_y(false)
        .show(ui, |plot_ui| {
            for (i, m) in motors.iter().enumerate() {
                let x = 2.5 * i as f64;
                let color = if m.ptc_tripped || m.limit_tripped {
                    Color32::RED
                } else {
                    Color32::BLACK
                };
                plot_ui.arrows(
                    Arrows::new(
                        Values::from_values(vec![Value::new(x, 0.0)]),
                        Values::from_values(vec![Value::new(
                            x + m.angle.cos() as f64,
                            m.angle.sin() as f64,
                        )]),
                    )
                    .color(color),
                );
            }
        });
}

fn show_history(
    ui: &mut Ui,
    temperatures: &[VecDeque<Value>],
    currents: &[VecDeque<Value>],
) {
    let colors = [Color32::BLUE, Color32::GREEN, Color32::RED];
    Plot::new("temperature_plot")
        .view_aspect(3.0)
        .show(ui, |plot_ui| {
            for (history, color) in temperatures.iter().zip(colors) {
                plot_ui.line(
                    Line::new(Values::from_values(history.iter().copied().collect())).color(color),
                );
            }
        });
    Plot::new("current_plot")
        .view_aspect(3.0)
        .show(ui, |plot_ui| {
            for (history, color) in currents.iter().zip(colors) {
                plot_ui.line(
                    Line::new(Values::from_values(history.iter().copied().collect())).color(color),
                );
            }
        });
}
