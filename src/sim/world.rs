// src/sim/world.rs

use crate::script::params::VehicleScriptParams;
use crate::sim::raycast_vehicle::RaycastVehicle;
use crate::vehicle::control::VehicleControlState;
use crate::vehicle::external::{
    ChassisDesc, OperatingParams, PhysicsEnvironment, PhysicsObjectId, VehicleController,
};
use nalgebra::{Isometry3, Point3, Vector3};
use rapier3d::prelude::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, warn};

const GROUP_GROUND: Group = Group::from_bits_truncate(0b0001);
const GROUP_CHASSIS: Group = Group::from_bits_truncate(0b0010);

/// Bodies past this distance from the origin are considered exploded.
const WORLD_LIMIT: f32 = 1_000.0;

pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    pub pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub joints: ImpulseJointSet,
    pub multibody_joints: MultibodyJointSet,
    pub ccd: CCDSolver,
    pub query_pipeline: QueryPipeline,
    vehicles: HashMap<PhysicsObjectId, RaycastVehicle>, // chassis → vehicle
    surfaces: Vec<f32>,                                 // surface id → friction
}

pub fn object_id(handle: RigidBodyHandle) -> PhysicsObjectId {
    let (index, generation) = handle.into_raw_parts();
    PhysicsObjectId(((generation as u64) << 32) | index as u64)
}

pub fn body_handle(id: PhysicsObjectId) -> RigidBodyHandle {
    RigidBodyHandle::from_raw_parts(id.0 as u32, (id.0 >> 32) as u32)
}

impl PhysicsWorld {
    /// Empty world with a large flat ground whose top surface is at y = 0.
    pub fn new(ground_friction: f32) -> Self {
        let mut world = Self {
            gravity: vector![0.0, -9.81, 0.0],
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            vehicles: HashMap::new(),
            surfaces: Vec::new(),
        };

        world.add_static_box(
            vector![500.0, 1.0, 500.0],
            vector![0.0, -1.0, 0.0],
            ground_friction,
        );
        debug!(
            bodies = world.bodies.len(),
            colliders = world.colliders.len(),
            "ground inserted"
        );
        world
    }

    /// Fixed box with its own surface. Returns the surface id that wheels
    /// report as their skid material when sliding on it.
    pub fn add_static_box(&mut self, half_extents: Vector<Real>, center: Vector<Real>, friction: f32) -> u32 {
        let surface = self.surfaces.len() as u32;
        self.surfaces.push(friction);

        let body = RigidBodyBuilder::fixed().translation(center).build();
        let handle = self.bodies.insert(body);
        let collider = ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            .collision_groups(InteractionGroups::new(GROUP_GROUND, GROUP_CHASSIS))
            .friction(friction)
            .restitution(0.0)
            .user_data(surface as u128)
            .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        surface
    }

    pub fn surface_friction(&self, surface: u32) -> f32 {
        self.surfaces.get(surface as usize).copied().unwrap_or(1.0)
    }

    pub fn vehicle(&self, chassis: PhysicsObjectId) -> Option<&RaycastVehicle> {
        self.vehicles.get(&chassis)
    }

    pub fn vehicle_mut(&mut self, chassis: PhysicsObjectId) -> Option<&mut RaycastVehicle> {
        self.vehicles.get_mut(&chassis)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn contains_body(&self, id: PhysicsObjectId) -> bool {
        self.bodies.contains(body_handle(id))
    }

    // ============================================================
    // Bodies
    // ============================================================

    pub fn create_chassis(&mut self, desc: &ChassisDesc) -> PhysicsObjectId {
        let he = desc.half_extents;
        let mass = desc.mass.max(1.0);
        // box inertia from half extents
        let inertia = vector![
            mass / 3.0 * (he.y * he.y + he.z * he.z),
            mass / 3.0 * (he.x * he.x + he.z * he.z),
            mass / 3.0 * (he.x * he.x + he.y * he.y)
        ];

        let rb = RigidBodyBuilder::dynamic()
            .position(desc.transform)
            .linear_damping(0.05)
            .angular_damping(0.5)
            .additional_mass_properties(MassProperties::new(
                Point3::from(desc.mass_center),
                mass,
                inertia,
            ))
            .ccd_enabled(true)
            .build();
        let handle = self.bodies.insert(rb);

        let collider = ColliderBuilder::cuboid(he.x, he.y, he.z)
            .density(0.0)
            .collision_groups(InteractionGroups::new(
                GROUP_CHASSIS,
                GROUP_GROUND | GROUP_CHASSIS,
            ))
            .friction(0.3)
            .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);

        let id = object_id(handle);
        debug!(?id, mass, "chassis created");
        id
    }

    /// Build the raycast vehicle for `chassis`, one kinematic body per wheel.
    /// Returns the wheel ids, or `None` if the chassis does not exist.
    pub fn create_vehicle(
        &mut self,
        chassis: PhysicsObjectId,
        params: &VehicleScriptParams,
    ) -> Option<Vec<PhysicsObjectId>> {
        let chassis_handle = body_handle(chassis);
        let chassis_pose = *self.bodies.get(chassis_handle)?.position();

        let mut wheel_bodies = Vec::with_capacity(params.wheel_count());
        for i in 0..params.wheel_count() {
            let (_, mount, _) = RaycastVehicle::wheel_layout(params, i);
            let rb = RigidBodyBuilder::kinematic_position_based()
                .position(chassis_pose * Isometry3::translation(mount.x, mount.y, mount.z))
                .build();
            let handle = self.bodies.insert(rb);
            wheel_bodies.push((handle, object_id(handle)));
        }

        let ids = wheel_bodies.iter().map(|(_, id)| *id).collect();
        self.vehicles.insert(
            chassis,
            RaycastVehicle::new(chassis_handle, params.clone(), wheel_bodies),
        );
        Some(ids)
    }

    /// Remove a vehicle and its wheel bodies. The chassis stays.
    pub fn destroy_vehicle(&mut self, chassis: PhysicsObjectId) {
        if let Some(vehicle) = self.vehicles.remove(&chassis) {
            for wheel in &vehicle.wheels {
                self.remove_handle(wheel.body);
            }
        }
    }

    /// Chassis whose vehicle owns `wheel`.
    pub fn chassis_of_wheel(&self, wheel: PhysicsObjectId) -> Option<PhysicsObjectId> {
        self.vehicles
            .iter()
            .find(|(_, v)| v.wheels.iter().any(|w| w.id == wheel))
            .map(|(chassis, _)| *chassis)
    }

    pub fn remove_body(&mut self, id: PhysicsObjectId) {
        self.destroy_vehicle(id);
        self.remove_handle(body_handle(id));
    }

    fn remove_handle(&mut self, handle: RigidBodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            true,
        );
    }

    pub fn body_transform(&self, id: PhysicsObjectId) -> Option<Isometry3<f32>> {
        self.bodies.get(body_handle(id)).map(|b| *b.position())
    }

    pub fn set_body_transform(&mut self, id: PhysicsObjectId, transform: &Isometry3<f32>) {
        if let Some(body) = self.bodies.get_mut(body_handle(id)) {
            body.set_position(*transform, true);
        }
    }

    pub fn set_body_velocity(&mut self, id: PhysicsObjectId, velocity: &Vector3<f32>) {
        if let Some(body) = self.bodies.get_mut(body_handle(id)) {
            body.set_linvel(*velocity, true);
            body.set_angvel(Vector3::zeros(), true);
        }
    }

    pub fn linear_velocity(&self, id: PhysicsObjectId) -> Option<Vector3<f32>> {
        self.bodies.get(body_handle(id)).map(|b| *b.linvel())
    }

    pub fn wake(&mut self, id: PhysicsObjectId) {
        if let Some(body) = self.bodies.get_mut(body_handle(id)) {
            body.wake_up(true);
        }
    }

    // ============================================================
    // Step
    // ============================================================

    pub fn step(&mut self, dt: Real) {
        // 1) Suspension, drive and tire impulses against the current scene.
        self.query_pipeline.update(&self.colliders);
        for vehicle in self.vehicles.values_mut() {
            vehicle.apply_forces(
                &mut self.bodies,
                &self.colliders,
                &self.query_pipeline,
                &self.surfaces,
                dt,
            );
        }

        // 2) Rigid-body step.
        self.pipeline.step(
            &self.gravity,
            &IntegrationParameters {
                dt,
                ..IntegrationParameters::default()
            },
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );

        // 3) Wheels follow their chassis.
        for vehicle in self.vehicles.values_mut() {
            vehicle.sync_wheels(&mut self.bodies, dt);
        }

        // 4) Safety: pull exploded bodies back to a sane spot.
        for (_, body) in self.bodies.iter_mut() {
            let pos = *body.translation();
            let bad = !pos.iter().all(|c| c.is_finite()) || pos.iter().any(|c| c.abs() > WORLD_LIMIT);
            if bad {
                body.set_translation(vector![0.0, 1.0, 0.0], true);
                body.set_linvel(Vector3::zeros(), true);
                body.set_angvel(Vector3::zeros(), true);
                warn!(x = pos.x, y = pos.y, z = pos.z, "reset exploding body");
            }
        }
    }
}

// ==============================================================================
// Vehicle-core adapters
// ==============================================================================

/// [`PhysicsEnvironment`] over a shared [`PhysicsWorld`].
#[derive(Clone)]
pub struct SimEnvironment {
    world: Rc<RefCell<PhysicsWorld>>,
}

impl SimEnvironment {
    pub fn new(world: Rc<RefCell<PhysicsWorld>>) -> Self {
        Self { world }
    }

    pub fn world(&self) -> &Rc<RefCell<PhysicsWorld>> {
        &self.world
    }
}

impl PhysicsEnvironment for SimEnvironment {
    fn create_chassis(&mut self, desc: &ChassisDesc) -> Option<PhysicsObjectId> {
        Some(self.world.borrow_mut().create_chassis(desc))
    }

    fn create_vehicle_controller(
        &mut self,
        chassis: PhysicsObjectId,
        params: &VehicleScriptParams,
    ) -> Option<Box<dyn VehicleController>> {
        let wheels = self.world.borrow_mut().create_vehicle(chassis, params)?;
        Some(Box::new(SimVehicleController {
            world: Rc::clone(&self.world),
            chassis,
            params: params.clone(),
            params_dirty: false,
            wheels,
        }))
    }

    fn destroy_vehicle_controller(&mut self, controller: Box<dyn VehicleController>) {
        let mut world = self.world.borrow_mut();
        let chassis = controller.wheel(0).and_then(|w| world.chassis_of_wheel(w));
        if let Some(chassis) = chassis {
            world.destroy_vehicle(chassis);
        }
    }

    fn destroy_body(&mut self, body: PhysicsObjectId) {
        self.world.borrow_mut().remove_body(body);
    }

    fn body_transform(&self, body: PhysicsObjectId) -> Option<Isometry3<f32>> {
        self.world.borrow().body_transform(body)
    }

    fn set_body_transform(&mut self, body: PhysicsObjectId, transform: &Isometry3<f32>) {
        self.world.borrow_mut().set_body_transform(body, transform);
    }

    fn set_body_velocity(&mut self, body: PhysicsObjectId, velocity: &Vector3<f32>) {
        self.world.borrow_mut().set_body_velocity(body, velocity);
    }

    fn wake(&mut self, body: PhysicsObjectId) {
        self.world.borrow_mut().wake(body);
    }
}

/// [`VehicleController`] driving one [`RaycastVehicle`]. Parameter edits are
/// pushed to the simulation on the next update.
pub struct SimVehicleController {
    world: Rc<RefCell<PhysicsWorld>>,
    chassis: PhysicsObjectId,
    params: VehicleScriptParams,
    params_dirty: bool,
    wheels: Vec<PhysicsObjectId>,
}

impl VehicleController for SimVehicleController {
    fn update(&mut self, _dt: f32, controls: &VehicleControlState) {
        let mut world = self.world.borrow_mut();
        let Some(vehicle) = world.vehicle_mut(self.chassis) else {
            return;
        };
        vehicle.controls = *controls;
        if self.params_dirty {
            vehicle.set_params(self.params.clone());
            self.params_dirty = false;
        }
    }

    fn operating_params(&self) -> OperatingParams {
        self.world
            .borrow()
            .vehicle(self.chassis)
            .map(RaycastVehicle::operating_params)
            .unwrap_or_default()
    }

    fn vehicle_params(&self) -> &VehicleScriptParams {
        &self.params
    }

    fn vehicle_params_for_change(&mut self) -> &mut VehicleScriptParams {
        self.params_dirty = true;
        &mut self.params
    }

    fn wheel_count(&self) -> usize {
        self.wheels.len()
    }

    fn wheel(&self, index: usize) -> Option<PhysicsObjectId> {
        self.wheels.get(index).copied()
    }

    fn wheel_contact_point(&self, index: usize) -> Option<Point3<f32>> {
        self.world
            .borrow()
            .vehicle(self.chassis)
            .and_then(|v| v.wheels.get(index))
            .and_then(|w| w.contact)
    }

    fn update_booster(&mut self, dt: f32) -> f32 {
        self.world
            .borrow_mut()
            .vehicle_mut(self.chassis)
            .map_or(0.0, |v| v.update_booster(dt))
    }

    fn set_engine_disabled(&mut self, disabled: bool) {
        if let Some(vehicle) = self.world.borrow_mut().vehicle_mut(self.chassis) {
            vehicle.set_engine_disabled(disabled);
        }
    }

    fn is_engine_disabled(&self) -> bool {
        self.world
            .borrow()
            .vehicle(self.chassis)
            .is_some_and(RaycastVehicle::is_engine_disabled)
    }

    fn surface_friction(&self, material: u32) -> f32 {
        self.world.borrow().surface_friction(material)
    }
}
