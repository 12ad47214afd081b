//! Services the vehicle core consumes but does not implement: the rigid-body
//! simulation and its vehicle controller, the animated model's pose
//! parameters and attachments, sound playback and particle effects.

use crate::script::params::VehicleScriptParams;
use crate::vehicle::control::VehicleControlState;
use nalgebra::{Isometry3, Point3, Vector3};
use serde::Serialize;

/// Opaque handle to a rigid body owned by the physics environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PhysicsObjectId(pub u64);

/// Index returned by [`PoseRig::lookup_pose_parameter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoseIndex(pub usize);

/// What the physics step reports about the vehicle after each update.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct OperatingParams {
    /// Signed forward speed, meters per second.
    pub speed: f32,
    pub engine_rpm: f32,
    pub gear: i32,
    /// Seconds until the booster can fire again.
    pub boost_delay: f32,
    /// Booster charge in percent: `100` ready, `0` spent.
    pub boost_time_left: f32,
    /// Lateral slide speed of the worst wheel, meters per second.
    pub skid_speed: f32,
    /// Surface under the sliding wheel; see [`VehicleController::surface_friction`].
    pub skid_material: u32,
    /// Degrees, positive to the right.
    pub steering_angle: f32,
    /// Bit `i` set when wheel `i` touches the ground.
    pub wheels_in_contact: u32,
    pub wheels_not_in_contact: u32,
    pub is_torque_boosting: bool,
}

impl OperatingParams {
    pub fn wheel_in_contact(&self, wheel: usize) -> bool {
        self.wheels_in_contact & (1 << wheel) != 0
    }
}

/// The simulation's per-vehicle controller.
pub trait VehicleController {
    /// Latch controls for the next simulation step.
    fn update(&mut self, dt: f32, controls: &VehicleControlState);
    fn operating_params(&self) -> OperatingParams;
    fn vehicle_params(&self) -> &VehicleScriptParams;
    fn vehicle_params_for_change(&mut self) -> &mut VehicleScriptParams;
    fn wheel_count(&self) -> usize;
    fn wheel(&self, index: usize) -> Option<PhysicsObjectId>;
    /// World-space ground contact of a wheel, if it touches the ground.
    fn wheel_contact_point(&self, index: usize) -> Option<Point3<f32>>;
    /// Advance the booster by `dt`, returning the boost seconds remaining.
    fn update_booster(&mut self, dt: f32) -> f32;
    fn set_engine_disabled(&mut self, disabled: bool);
    fn is_engine_disabled(&self) -> bool;
    fn surface_friction(&self, _material: u32) -> f32 {
        1.0
    }
}

/// Chassis construction request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChassisDesc {
    pub transform: Isometry3<f32>,
    pub half_extents: Vector3<f32>,
    pub mass: f32,
    pub mass_center: Vector3<f32>,
}

/// Body creation and transform access in the simulation.
pub trait PhysicsEnvironment {
    fn create_chassis(&mut self, desc: &ChassisDesc) -> Option<PhysicsObjectId>;
    fn create_vehicle_controller(
        &mut self,
        chassis: PhysicsObjectId,
        params: &VehicleScriptParams,
    ) -> Option<Box<dyn VehicleController>>;
    /// Tear down a controller and its wheel bodies. Must run before the
    /// chassis it drives is destroyed.
    fn destroy_vehicle_controller(&mut self, controller: Box<dyn VehicleController>);
    fn destroy_body(&mut self, body: PhysicsObjectId);
    fn body_transform(&self, body: PhysicsObjectId) -> Option<Isometry3<f32>>;
    fn set_body_transform(&mut self, body: PhysicsObjectId, transform: &Isometry3<f32>);
    fn set_body_velocity(&mut self, body: PhysicsObjectId, velocity: &Vector3<f32>);
    fn wake(&mut self, body: PhysicsObjectId);
}

/// Pose parameters and attachments of the vehicle's animated model.
pub trait PoseRig {
    fn lookup_pose_parameter(&self, name: &str) -> Option<PoseIndex>;
    /// Set a pose parameter, returning the value after range handling.
    fn set_pose_parameter(&mut self, index: PoseIndex, value: f32) -> f32;
    fn pose_parameter(&self, index: PoseIndex) -> f32;
    /// Attachment transform in the model's local space at the current pose.
    fn attachment(&self, name: &str) -> Option<Isometry3<f32>>;
}

pub trait SoundEmitter {
    fn play_sound(&mut self, name: &str);
    fn play_looping_sound(&mut self, name: &str);
    fn stop_sound(&mut self, name: &str, fade: f32);
}

pub trait EffectDispatcher {
    fn dispatch(&mut self, name: &str, origin: Point3<f32>, direction: Vector3<f32>, scale: f32);
}
