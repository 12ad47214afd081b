//! In-memory physics environment and fixtures for unit tests.

use crate::script::params::VehicleScriptParams;
use crate::script::rig::{AttachmentDef, PoseDef, RigScript};
use crate::vehicle::control::VehicleControlState;
use crate::vehicle::external::{
    ChassisDesc, OperatingParams, PhysicsEnvironment, PhysicsObjectId, VehicleController,
};
use nalgebra::{Isometry3, Point3, Translation3, Vector3};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// What the mock controller saw, and what it reports back. Tests write
/// `operating`, `contacts` and `surface_friction` to script the simulation.
#[derive(Debug)]
pub struct ControllerLog {
    pub operating: OperatingParams,
    pub updates: Vec<VehicleControlState>,
    pub booster_calls: usize,
    pub contacts: Vec<Option<Point3<f32>>>,
    pub engine_disabled: bool,
    pub surface_friction: f32,
    pub wheels: Vec<PhysicsObjectId>,
    /// Parameters as of creation or the latest update.
    pub params: Option<VehicleScriptParams>,
}

impl Default for ControllerLog {
    fn default() -> Self {
        Self {
            operating: OperatingParams::default(),
            updates: Vec::new(),
            booster_calls: 0,
            contacts: Vec::new(),
            engine_disabled: false,
            surface_friction: 1.0,
            wheels: Vec::new(),
            params: None,
        }
    }
}

pub struct MockController {
    params: VehicleScriptParams,
    wheels: Vec<PhysicsObjectId>,
    log: Rc<RefCell<ControllerLog>>,
}

impl VehicleController for MockController {
    fn update(&mut self, _dt: f32, controls: &VehicleControlState) {
        let mut log = self.log.borrow_mut();
        log.updates.push(*controls);
        log.params = Some(self.params.clone());
    }

    fn operating_params(&self) -> OperatingParams {
        self.log.borrow().operating
    }

    fn vehicle_params(&self) -> &VehicleScriptParams {
        &self.params
    }

    fn vehicle_params_for_change(&mut self) -> &mut VehicleScriptParams {
        &mut self.params
    }

    fn wheel_count(&self) -> usize {
        self.wheels.len()
    }

    fn wheel(&self, index: usize) -> Option<PhysicsObjectId> {
        self.wheels.get(index).copied()
    }

    fn wheel_contact_point(&self, index: usize) -> Option<Point3<f32>> {
        self.log.borrow().contacts.get(index).copied().flatten()
    }

    fn update_booster(&mut self, _dt: f32) -> f32 {
        self.log.borrow_mut().booster_calls += 1;
        0.0
    }

    fn set_engine_disabled(&mut self, disabled: bool) {
        self.log.borrow_mut().engine_disabled = disabled;
    }

    fn is_engine_disabled(&self) -> bool {
        self.log.borrow().engine_disabled
    }

    fn surface_friction(&self, _material: u32) -> f32 {
        self.log.borrow().surface_friction
    }
}

#[derive(Default)]
pub struct MockEnvironment {
    pub bodies: HashMap<PhysicsObjectId, Isometry3<f32>>,
    pub velocities: HashMap<PhysicsObjectId, Vector3<f32>>,
    pub controller_log: Rc<RefCell<ControllerLog>>,
    pub refuse_chassis: bool,
    pub refuse_controller: bool,
    /// Build this many wheels instead of what the parameters ask for.
    pub wheel_count_override: Option<usize>,
    pub woken: Vec<PhysicsObjectId>,
    pub teardown: Vec<&'static str>,
    next_id: u64,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_body(&mut self, transform: Isometry3<f32>) -> PhysicsObjectId {
        self.next_id += 1;
        let id = PhysicsObjectId(self.next_id);
        self.bodies.insert(id, transform);
        id
    }
}

impl PhysicsEnvironment for MockEnvironment {
    fn create_chassis(&mut self, desc: &ChassisDesc) -> Option<PhysicsObjectId> {
        if self.refuse_chassis {
            return None;
        }
        Some(self.add_body(desc.transform))
    }

    fn create_vehicle_controller(
        &mut self,
        chassis: PhysicsObjectId,
        params: &VehicleScriptParams,
    ) -> Option<Box<dyn VehicleController>> {
        if self.refuse_controller {
            return None;
        }
        let chassis_transform = *self.bodies.get(&chassis)?;
        let count = self.wheel_count_override.unwrap_or(params.wheel_count());

        let mut wheels = Vec::with_capacity(count);
        for i in 0..count {
            let axle = &params.axles[(i / 2).min(params.axles.len() - 1)];
            let side = if i % 2 == 0 { -1.0 } else { 1.0 };
            let local = axle.offset + axle.wheel_offset * side;
            let transform = chassis_transform * Translation3::from(local);
            wheels.push(self.add_body(transform));
        }

        {
            let mut log = self.controller_log.borrow_mut();
            log.wheels = wheels.clone();
            log.params = Some(params.clone());
        }
        Some(Box::new(MockController {
            params: params.clone(),
            wheels,
            log: Rc::clone(&self.controller_log),
        }))
    }

    fn destroy_vehicle_controller(&mut self, controller: Box<dyn VehicleController>) {
        for wheel in (0..controller.wheel_count()).filter_map(|i| controller.wheel(i)) {
            self.bodies.remove(&wheel);
        }
        self.teardown.push("controller");
    }

    fn destroy_body(&mut self, body: PhysicsObjectId) {
        self.bodies.remove(&body);
        self.teardown.push("body");
    }

    fn body_transform(&self, body: PhysicsObjectId) -> Option<Isometry3<f32>> {
        self.bodies.get(&body).copied()
    }

    fn set_body_transform(&mut self, body: PhysicsObjectId, transform: &Isometry3<f32>) {
        if let Some(slot) = self.bodies.get_mut(&body) {
            *slot = *transform;
        }
    }

    fn set_body_velocity(&mut self, body: PhysicsObjectId, velocity: &Vector3<f32>) {
        self.velocities.insert(body, *velocity);
    }

    fn wake(&mut self, body: PhysicsObjectId) {
        self.woken.push(body);
    }
}

/// Two axles, half-second throttle ramp, otherwise defaults.
pub fn standard_params() -> VehicleScriptParams {
    let mut params = VehicleScriptParams::default();
    params.engine.throttle_time = 0.5;
    params
}

/// Jeep-like rig: left wheels at x = 0.8, right at -0.8, front axle z = 1.4,
/// rear z = -1.3, 0.3 m of travel, and every pose parameter the core looks up.
pub fn standard_rig() -> RigScript {
    let corners = [
        ("fl", 0.8, 1.4),
        ("fr", -0.8, 1.4),
        ("rl", 0.8, -1.3),
        ("rr", -0.8, -1.3),
    ];

    let pose = |name: String, min: f32, max: f32, looping: bool| PoseDef {
        name,
        min,
        max,
        looping,
    };

    let mut rig = RigScript::default();
    for (corner, _, _) in corners {
        rig.poses
            .push(pose(format!("vehicle_wheel_{corner}_height"), 0.0, 1.0, false));
    }
    for (corner, _, _) in corners {
        rig.poses
            .push(pose(format!("vehicle_wheel_{corner}_spin"), -180.0, 180.0, true));
    }
    rig.poses.push(pose("vehicle_steer".into(), -1.0, 1.0, false));
    rig.poses.push(pose("vehicle_action".into(), 0.0, 1.0, false));
    rig.poses.push(pose("vehicle_gauge".into(), 0.0, 1.0, false));

    for (corner, x, z) in corners {
        rig.attachments.push(AttachmentDef {
            name: format!("wheel_{corner}"),
            pose: Some(format!("vehicle_wheel_{corner}_height")),
            origin: Vector3::new(x, 0.0, z),
            extended: Vector3::new(x, -0.3, z),
        });
    }
    rig
}
