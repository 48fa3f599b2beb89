use std::f32::consts::PI;

use rapier2d::prelude::*;

/// Electrical and mechanical figures of a simulated brushed motor.
#[derive(Debug, Clone, Copy)]
pub struct BrushedMotor {
    /// Ohms, winding plus wiring
    pub resistance: f32,
    /// Volt seconds per radian, also the torque constant in N m per amp
    pub back_emf: f32,
    /// N m s per radian
    pub friction: f32,
    /// kg m^2, rotor plus gearing reflected to the output
    pub inertia: f32,
}

impl BrushedMotor {
    /// Close to a 393 with the torque gearing, 1.67 N m at stall.
    pub fn motor_393() -> Self {
        let free_speed = 110. * 2. * PI / 60.;
        BrushedMotor {
            resistance: 1.8,
            back_emf: 7.2 * (1. - 0.2 / 4.8) / free_speed,
            friction: 0.01,
            inertia: 0.01,
        }
    }
}

struct Rotor {
    motor: BrushedMotor,
    handle: RigidBodyHandle,
    duty: f32,
    current: f32,
    /// Accumulated angle, the body's own rotation wraps
    angle: f32,
    load_torque: Real,
    impulse: Option<Real>,
}

/// A row of independent rotors, each driven by one motor port.
pub struct MotorRig {
    supply_voltage: f32,
    rotors: Vec<Rotor>,
    physics_pipeline: PhysicsPipeline,
    rigid_bodies: RigidBodySet,
    island_manager: IslandManager,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhase,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
}

impl MotorRig {
    pub fn new(motors: &[BrushedMotor], supply_voltage: f32) -> Self {
        let mut rigid_bodies = RigidBodySet::new();

        let rotors = motors
            .iter()
            .enumerate()
            .map(|(i, motor)| {
                let body = RigidBodyBuilder::dynamic()
                    .translation(vector![i as Real, 0.0])
                    .additional_mass_properties(MassProperties::new(
                        point![0.0, 0.0],
                        1.0,
                        motor.inertia,
                    ))
                    .build();
                Rotor {
                    motor: *motor,
                    handle: rigid_bodies.insert(body),
                    duty: 0.,
                    current: 0.,
                    angle: 0.,
                    load_torque: 0.,
                    impulse: None,
                }
            })
            .collect();

        MotorRig {
            supply_voltage,
            rotors,
            physics_pipeline: PhysicsPipeline::new(),
            rigid_bodies,
            island_manager: IslandManager::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
        }
    }

    pub fn step(&mut self, dt: Real) {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.set_inv_dt(1.0 / dt);

        for rotor in self.rotors.iter_mut() {
            let body = &mut self.rigid_bodies[rotor.handle];
            if let Some(impulse) = rotor.impulse.take() {
                body.apply_torque_impulse(impulse, true);
            }
            body.reset_torques(true);

            // The winding inductance is ignored, current follows the voltage
            let omega = body.angvel();
            let v_bemf = rotor.motor.back_emf * omega;
            rotor.current = (rotor.duty * self.supply_voltage - v_bemf) / rotor.motor.resistance;
            if rotor.duty == 0. {
                // Open circuit, the controller does not brake
                rotor.current = 0.;
            }

            body.add_torque(rotor.current * rotor.motor.back_emf, true);
            body.add_torque(-omega * rotor.motor.friction, true);
            body.add_torque(rotor.load_torque, true);
        }

        self.physics_pipeline.step(
            &vector![0.0, 0.0],
            &integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &(),
        );

        for rotor in self.rotors.iter_mut() {
            rotor.angle += self.rigid_bodies[rotor.handle].angvel() * dt;
        }
    }

    pub fn set_supply_voltage(&mut self, volts: f32) {
        self.supply_voltage = volts;
    }

    /// Drive rotor `index` with a motor command in -127..=127.
    pub fn set_command(&mut self, index: usize, command: i16) {
        if let Some(rotor) = self.rotors.get_mut(index) {
            rotor.duty = command as f32 / 127.;
        }
    }

    /// A load opposing the rotor, in N m.
    pub fn set_load_torque(&mut self, index: usize, torque: Real) {
        if let Some(rotor) = self.rotors.get_mut(index) {
            rotor.load_torque = torque;
        }
    }

    pub fn apply_impulse(&mut self, index: usize, impulse: Real) {
        if let Some(rotor) = self.rotors.get_mut(index) {
            rotor.impulse = Some(impulse);
        }
    }

    pub fn current(&self, index: usize) -> f32 {
        self.rotors.get(index).map_or(0., |r| r.current)
    }

    /// Accumulated angle in radians.
    pub fn angle(&self, index: usize) -> f32 {
        self.rotors.get(index).map_or(0., |r| r.angle)
    }

    pub fn rpm(&self, index: usize) -> f32 {
        self.rotors
            .get(index)
            .map_or(0., |r| self.rigid_bodies[r.handle].angvel() * 60. / (2. * PI))
    }

    pub fn reset(&mut self) {
        for rotor in self.rotors.iter_mut() {
            let body = &mut self.rigid_bodies[rotor.handle];
            rotor.impulse = None;
            rotor.load_torque = 0.;
            rotor.duty = 0.;
            rotor.current = 0.;
            rotor.angle = 0.;
            body.set_rotation(0.0, true);
            body.set_angvel(0.0, true);
        }
    }
}
