//! Four-wheel vehicle core: turns driver or scripted input into controls for
//! the simulation's vehicle controller, and turns the controller's results
//! back into telemetry, skid and dust effects and model pose parameters.

use crate::error::VehicleError;
use crate::script::params::VehicleScriptParams;
use crate::vehicle::control::{AnalogBias, DriverTuning, UserCommand, VehicleControlState};
use crate::vehicle::external::{
    ChassisDesc, EffectDispatcher, OperatingParams, PhysicsEnvironment, PhysicsObjectId, PoseIndex,
    PoseRig, VehicleController,
};
use crate::vehicle::math::{approach, remap_val_clamped, MPS_TO_MPH};
use crate::vehicle::steering::SteeringController;
use crate::vehicle::throttle::{ThrottleController, ThrottleLimits, SPEED_THROTTLE_AS_BRAKE};
use nalgebra::{Isometry3, UnitQuaternion, Vector3};
use rand::Rng;
use tracing::{debug, info, warn};

/// Lateral slide, m/s, that counts as a skid at speed.
pub const DEFAULT_SKID_THRESHOLD: f32 = 0.254;
/// Below this speed (m/s) the skid threshold ramps up to avoid chatter.
const SKID_RAMP_SPEED: f32 = DEFAULT_SKID_THRESHOLD / 0.15;
/// mph above which wheels kick up dust on surfaces that allow it.
pub const DUST_SPEED: f32 = 10.0;
/// mph at the top of the speedometer.
pub const GAUGE_MAX_SPEED: f32 = 100.0;
/// Seconds the turbo sound is held after a boost starts.
pub const MIN_TURBO_SOUND_TIME: f32 = 2.75;
const AUTO_THROTTLE_SPEED_FRACTION: f32 = 0.75;
const STEER_POSE_BLEND: f32 = 0.2;
const DEFAULT_CHASSIS_MASS: f32 = 1200.0;

pub const WHEEL_ATTACHMENTS: [&str; 4] = ["wheel_fl", "wheel_fr", "wheel_rl", "wheel_rr"];

pub const POSE_PARAMETERS: [&str; 11] = [
    "vehicle_wheel_fl_height",
    "vehicle_wheel_fr_height",
    "vehicle_wheel_rl_height",
    "vehicle_wheel_rr_height",
    "vehicle_wheel_fl_spin",
    "vehicle_wheel_fr_spin",
    "vehicle_wheel_rl_spin",
    "vehicle_wheel_rr_spin",
    "vehicle_steer",
    "vehicle_action",
    "vehicle_gauge",
];
const POSE_WHEEL_HEIGHT: usize = 0;
const POSE_WHEEL_SPIN: usize = 4;
const POSE_STEER: usize = 8;
const POSE_ACTION: usize = 9;
const POSE_GAUGE: usize = 10;

const VISUAL_WHEELS: usize = 4;

/// Skid threshold (m/s of lateral slide) at a given signed speed (m/s).
/// While a skid is already under way the plain default applies, so a skid
/// does not flicker off as the car slows.
pub fn skid_threshold(speed: f32, skidding: bool) -> f32 {
    let threshold = if skidding {
        DEFAULT_SKID_THRESHOLD
    } else {
        speed * 0.15
    };
    if threshold < DEFAULT_SKID_THRESHOLD {
        remap_val_clamped(
            speed.abs(),
            0.0,
            SKID_RAMP_SPEED,
            DEFAULT_SKID_THRESHOLD * 8.0,
            DEFAULT_SKID_THRESHOLD,
        )
    } else {
        threshold
    }
}

/// Last known world transform of a wheel body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelVisualState {
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
}

impl Default for WheelVisualState {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }
}

pub struct VehiclePhysicsCore {
    params: VehicleScriptParams,
    controls: VehicleControlState,
    limits: ThrottleLimits,
    telemetry: OperatingParams,
    controller: Option<Box<dyn VehicleController>>,
    body: Option<PhysicsObjectId>,

    wheels: Vec<PhysicsObjectId>,
    wheel_visuals: [WheelVisualState; VISUAL_WHEELS],
    wheel_base_height: [f32; VISUAL_WHEELS],
    wheel_total_height: [f32; VISUAL_WHEELS],
    poses: [Option<PoseIndex>; POSE_PARAMETERS.len()],

    analog_bias: AnalogBias,
    speed: f32,
    rpm: f32,
    has_boost: bool,
    boost_remaining: f32,
    last_boost: bool,
    turbo_timer: f32,
    skidding: bool,
    skid_friction: f32,

    action_value: f32,
    action_speed: f32,
    action_scale: f32,

    is_on: bool,
    engine_disabled: bool,
    handbrake_locked: bool,
}

impl Default for VehiclePhysicsCore {
    fn default() -> Self {
        Self::new()
    }
}

impl VehiclePhysicsCore {
    pub fn new() -> Self {
        Self {
            params: VehicleScriptParams::default(),
            controls: VehicleControlState::default(),
            limits: ThrottleLimits::default(),
            telemetry: OperatingParams::default(),
            controller: None,
            body: None,
            wheels: Vec::new(),
            wheel_visuals: [WheelVisualState::default(); VISUAL_WHEELS],
            wheel_base_height: [0.0; VISUAL_WHEELS],
            wheel_total_height: [0.0; VISUAL_WHEELS],
            poses: [None; POSE_PARAMETERS.len()],
            analog_bias: AnalogBias::default(),
            speed: 0.0,
            rpm: 0.0,
            has_boost: false,
            boost_remaining: 0.0,
            last_boost: false,
            turbo_timer: 0.0,
            skidding: false,
            skid_friction: 1.0,
            action_value: 0.0,
            action_speed: 0.0,
            action_scale: 1.0,
            is_on: false,
            engine_disabled: false,
            handbrake_locked: false,
        }
    }

    // ============================================================
    // Lifecycle
    // ============================================================

    /// Neutral controls and pose parameter lookup.
    pub fn spawn(&mut self, rig: &dyn PoseRig) {
        self.controls = VehicleControlState {
            has_brake_pedal: true,
            ..VehicleControlState::default()
        };
        self.limits = ThrottleLimits::default();
        self.analog_bias.reset();
        self.action_value = 0.0;
        self.action_speed = 0.0;
        self.action_scale = 1.0;

        for (slot, name) in self.poses.iter_mut().zip(POSE_PARAMETERS) {
            *slot = rig.lookup_pose_parameter(name);
            if slot.is_none() {
                warn!(pose = name, "model has no pose parameter");
            }
        }
    }

    fn set_pose(&self, rig: &mut dyn PoseRig, pose: usize, value: f32) {
        if let Some(index) = self.poses[pose] {
            rig.set_pose_parameter(index, value);
        }
    }

    fn sample_wheel_attachments(
        rig: &dyn PoseRig,
    ) -> Result<[Vector3<f32>; VISUAL_WHEELS], VehicleError> {
        let mut out = [Vector3::zeros(); VISUAL_WHEELS];
        for (slot, name) in out.iter_mut().zip(WHEEL_ATTACHMENTS) {
            *slot = rig
                .attachment(name)
                .ok_or(VehicleError::MissingAttachment(name))?
                .translation
                .vector;
        }
        Ok(out)
    }

    /// Derive the wheel layout from the model, then create the chassis and
    /// the vehicle controller. On error nothing is left in the environment.
    pub fn initialize(
        &mut self,
        env: &mut dyn PhysicsEnvironment,
        rig: &mut dyn PoseRig,
        script: &VehicleScriptParams,
        transform: &Isometry3<f32>,
    ) -> Result<(), VehicleError> {
        script.validate()?;
        let mut params = script.clone();

        // Wheels fully up.
        for i in 0..VISUAL_WHEELS {
            self.set_pose(rig, POSE_WHEEL_HEIGHT + i, 0.0);
        }
        let base = Self::sample_wheel_attachments(&*rig)?;

        // Wheels fully down.
        for i in 0..VISUAL_WHEELS {
            self.set_pose(rig, POSE_WHEEL_HEIGHT + i, 1.0);
        }
        let extended = Self::sample_wheel_attachments(&*rig)?;

        for i in 0..VISUAL_WHEELS {
            self.set_pose(rig, POSE_WHEEL_HEIGHT + i, 0.0);
            self.wheel_base_height[i] = base[i].y;
            self.wheel_total_height[i] = (base[i].y - extended[i].y).abs();
        }

        for (axle, (left, right)) in [(0, 1), (2, 3)].into_iter().enumerate() {
            let Some(derived) = params.axles.get_mut(axle) else {
                continue;
            };
            let center = (base[left] + base[right]) * 0.5;
            derived.offset = center;
            derived.wheel_offset = base[right] - center;
            derived.travel = (self.wheel_total_height[left] + self.wheel_total_height[right]) * 0.5;
        }

        let body = &params.body;
        let chassis = env
            .create_chassis(&ChassisDesc {
                transform: *transform,
                half_extents: body.hull_half_extents,
                mass: if body.mass_override > 0.0 {
                    body.mass_override
                } else {
                    DEFAULT_CHASSIS_MASS
                },
                mass_center: body.mass_center_override,
            })
            .ok_or(VehicleError::ChassisCreation)?;

        let Some(mut controller) = env.create_vehicle_controller(chassis, &params) else {
            env.destroy_body(chassis);
            return Err(VehicleError::ControllerCreation);
        };

        let expected = params.wheel_count();
        let actual = controller.wheel_count();
        if actual != expected {
            env.destroy_vehicle_controller(controller);
            env.destroy_body(chassis);
            return Err(VehicleError::WheelCountMismatch { expected, actual });
        }

        self.wheels = (0..actual.min(VISUAL_WHEELS))
            .filter_map(|i| controller.wheel(i))
            .collect();
        for (visual, wheel) in self.wheel_visuals.iter_mut().zip(&self.wheels) {
            if let Some(iso) = env.body_transform(*wheel) {
                visual.position = iso.translation.vector;
                visual.rotation = iso.rotation;
            }
        }

        controller.set_engine_disabled(self.engine_disabled);
        self.has_boost = params.engine.has_boost();
        self.controller = Some(controller);
        self.body = Some(chassis);
        self.params = params;

        info!(
            chassis = ?chassis,
            wheels = actual,
            has_boost = self.has_boost,
            "vehicle physics initialized"
        );
        Ok(())
    }

    /// Tear down the controller, then the chassis.
    pub fn release(&mut self, env: &mut dyn PhysicsEnvironment) {
        if let Some(controller) = self.controller.take() {
            env.destroy_vehicle_controller(controller);
        }
        if let Some(body) = self.body.take() {
            env.destroy_body(body);
        }
        self.wheels.clear();
    }

    /// Replace the tuning wholesale, keeping the wheel layout derived at
    /// initialization.
    pub fn reload_params(&mut self, script: &VehicleScriptParams) -> Result<(), VehicleError> {
        script.validate()?;
        let mut params = script.clone();
        for (new, old) in params.axles.iter_mut().zip(&self.params.axles) {
            new.offset = old.offset;
            new.wheel_offset = old.wheel_offset;
            new.travel = old.travel;
        }
        if let Some(controller) = self.controller.as_mut() {
            *controller.vehicle_params_for_change() = params.clone();
        }
        self.has_boost = params.engine.has_boost();
        self.params = params;
        Ok(())
    }

    /// Move every wheel body by `relative` so the wheels stay attached to a
    /// chassis that was just teleported.
    pub fn teleport(&mut self, env: &mut dyn PhysicsEnvironment, relative: &Isometry3<f32>) {
        let Some(controller) = self.controller.as_ref() else {
            return;
        };
        for wheel in (0..controller.wheel_count()).filter_map(|i| controller.wheel(i)) {
            if let Some(current) = env.body_transform(wheel) {
                env.set_body_transform(wheel, &(relative * current));
            }
        }
        if let Some(body) = self.body {
            env.wake(body);
        }
    }

    // ============================================================
    // Per tick
    // ============================================================

    /// Step the controller with the current controls and refresh telemetry,
    /// effects and poses. Returns whether the vehicle is switched on.
    pub fn think(
        &mut self,
        now: f32,
        dt: f32,
        rig: &mut dyn PoseRig,
        effects: &mut dyn EffectDispatcher,
    ) -> bool {
        let Some(controller) = self.controller.as_mut() else {
            return false;
        };

        let car_state = controller.operating_params();
        self.telemetry = car_state;
        self.speed = car_state.speed * MPS_TO_MPH;
        self.rpm = car_state.engine_rpm;

        if self.engine_disabled {
            self.controls.throttle = 0.0;
            self.controls.boost = 0.0;
            self.controls.handbrake = true;
        }
        controller.update(dt, &self.controls);
        self.boost_remaining = controller.update_booster(dt);

        // Turbo sound is held for a minimum time after each boost starts.
        if car_state.is_torque_boosting && !self.last_boost {
            self.last_boost = true;
            self.turbo_timer = now + MIN_TURBO_SOUND_TIME;
            debug!(now, "boost started");
        } else if !car_state.is_torque_boosting && self.last_boost && now >= self.turbo_timer {
            self.last_boost = false;
            debug!(now, "boost finished");
        }

        let threshold = skid_threshold(car_state.speed, self.skidding);
        let skid = car_state.skid_speed > threshold && self.is_on;
        let mut rng = rand::thread_rng();
        let up = Vector3::y();

        if skid {
            if !self.skidding {
                self.skidding = true;
                self.skid_friction = controller.surface_friction(car_state.skid_material);
                debug!(skid_speed = car_state.skid_speed, threshold, "skid started");
            }
            for wheel in 0..controller.wheel_count() {
                if let Some(contact) = controller.wheel_contact_point(wheel) {
                    effects.dispatch("WheelDust", contact, up, rng.gen_range(0.8..1.2));
                }
            }
        } else if self.skidding {
            self.skidding = false;
            debug!("skid stopped");
        }

        if self.is_on && self.speed.abs() > DUST_SPEED && self.params.steering.dust_cloud {
            for wheel in 0..controller.wheel_count() {
                if car_state.wheel_in_contact(wheel) {
                    if let Some(contact) = controller.wheel_contact_point(wheel) {
                        effects.dispatch("WheelDust", contact, up, rng.gen_range(0.5..1.0));
                    }
                }
            }
        }

        if let Some(steer) = self.poses[POSE_STEER] {
            let degrees = self.params.steering.degrees_slow;
            let physical = if degrees > 0.0 {
                car_state.steering_angle / degrees
            } else {
                0.0
            };
            let current = rig.pose_parameter(steer);
            rig.set_pose_parameter(steer, current + (physical - current) * STEER_POSE_BLEND);
        }

        self.action_value += self.action_speed * self.action_scale * dt;
        self.set_pose(rig, POSE_ACTION, self.action_value);
        self.set_pose(rig, POSE_GAUGE, self.speed.abs() / GAUGE_MAX_SPEED);

        self.is_on
    }

    /// Physics callback for one body. Wheel callbacks update the cached wheel
    /// transform and the wheel height/spin poses and are reported as
    /// consumed; anything else is left to the entity.
    pub fn vphysics_update(
        &mut self,
        object: PhysicsObjectId,
        transform: &Isometry3<f32>,
        entity_transform: &Isometry3<f32>,
        rig: &mut dyn PoseRig,
    ) -> bool {
        let Some(wheel) = self.wheels.iter().position(|w| *w == object) else {
            return false;
        };

        self.wheel_visuals[wheel] = WheelVisualState {
            position: transform.translation.vector,
            rotation: transform.rotation,
        };

        let local = entity_transform.inv_mul(transform);
        let total = self.wheel_total_height[wheel];
        let height = if total > 0.0 {
            (self.wheel_base_height[wheel] - local.translation.vector.y) / total
        } else {
            0.0
        };
        self.set_pose(rig, POSE_WHEEL_HEIGHT + wheel, height);

        let (spin, _, _) = local.rotation.euler_angles();
        self.set_pose(rig, POSE_WHEEL_SPIN + wheel, -spin.to_degrees());
        true
    }

    /// Translate one tick of driver input into controls.
    pub fn update_driver_controls(&mut self, cmd: &UserCommand, dt: f32, tuning: &DriverTuning) {
        let Some(controller) = self.controller.as_ref() else {
            return;
        };
        let car_state = controller.operating_params();
        let speed = car_state.speed * MPS_TO_MPH;
        let buttons = cmd.buttons;
        let side_move = cmd.side_move;
        let mut forward_move = cmd.forward_move;

        // Steering hard at speed while holding some throttle keeps the throttle pinned.
        if tuning.auto_throttle
            && forward_move > 0.0
            && speed.abs() > self.params.engine.max_speed * AUTO_THROTTLE_SPEED_FRACTION
            && side_move.abs() > forward_move
        {
            forward_move = side_move.abs();
        }
        forward_move = self.analog_bias.apply(forward_move, side_move, tuning);

        let forward = buttons.forward || forward_move > 0.0;
        let reverse = !forward && (buttons.back || forward_move < 0.0);
        let controls = &mut self.controls;
        let braking = controls.has_brake_pedal
            && ((forward && speed < -SPEED_THROTTLE_AS_BRAKE)
                || (reverse && speed > SPEED_THROTTLE_AS_BRAKE));

        let steering = SteeringController::new(&self.params);
        if buttons.move_left != buttons.move_right {
            steering.turn(
                controls,
                speed.abs(),
                &car_state,
                buttons.move_left,
                braking,
                forward || reverse,
                dt,
            );
        } else if side_move != 0.0 {
            steering.analog(controls, speed.abs(), side_move, tuning, dt);
        } else {
            steering.rest_to_center(controls, speed.abs(), dt);
        }

        controls.boost = 0.0;
        controls.handbrake = self.handbrake_locked;
        controls.handbrake_left = false;
        controls.handbrake_right = false;

        let throttle = ThrottleController::new(&self.params, tuning);
        let analog = |axis: f32| Some((axis.abs() / tuning.stick_extent).clamp(0.0, 1.0));
        let throttle_active = if forward {
            let fraction = if buttons.forward { None } else { analog(forward_move) };
            throttle.forward(controls, speed, self.limits, fraction, dt)
        } else if reverse {
            let fraction = if buttons.back { None } else { analog(forward_move) };
            throttle.reverse(controls, speed, self.limits, fraction, dt)
        } else {
            throttle.release(controls);
            false
        };

        if buttons.speed && throttle_active && !self.engine_disabled {
            controls.boost = 1.0;
        }

        if buttons.jump {
            controls.handbrake = true;
            if controls.has_brake_pedal {
                let side = if side_move != 0.0 {
                    side_move / tuning.stick_extent
                } else if buttons.move_left != buttons.move_right {
                    if buttons.move_left { -1.0 } else { 1.0 }
                } else {
                    0.0
                };
                controls.handbrake_left = side < -0.5;
                controls.handbrake_right = side > 0.5;
            }
        }

        if self.engine_disabled {
            controls.throttle = 0.0;
            controls.handbrake = true;
        }

        // A locked handbrake holds against the driver until released.
        if self.handbrake_locked {
            controls.throttle = 0.0;
            controls.steering = 0.0;
            controls.boost = 0.0;
        }
    }

    // ============================================================
    // Scripted / NPC controls
    // ============================================================

    pub fn set_throttle(&mut self, throttle: f32) {
        if self.handbrake_locked {
            return;
        }
        self.controls.throttle =
            throttle.clamp(self.limits.max_reverse_throttle, self.limits.max_throttle);
    }

    /// Set steering outright, or approach it by `rate` when `rate` is non-zero.
    pub fn set_steering(&mut self, steering: f32, rate: f32) {
        if self.handbrake_locked {
            return;
        }
        let steering = steering.clamp(-1.0, 1.0);
        self.controls.steering = if rate == 0.0 {
            steering
        } else {
            approach(steering, self.controls.steering, rate)
        };
    }

    pub fn set_steering_degrees(&mut self, degrees: f32) {
        let apply = |params: &mut VehicleScriptParams| {
            params.steering.degrees_slow = degrees;
            params.steering.degrees_fast = degrees;
            params.steering.degrees_boost = degrees;
        };
        apply(&mut self.params);
        if let Some(controller) = self.controller.as_mut() {
            apply(controller.vehicle_params_for_change());
        }
    }

    pub fn set_action(&mut self, speed: f32) {
        self.action_speed = speed;
    }

    pub fn set_max_throttle(&mut self, max: f32) {
        self.limits.max_throttle = max;
    }

    pub fn set_max_reverse_throttle(&mut self, max: f32) {
        self.limits.max_reverse_throttle = max;
    }

    pub fn set_has_brake_pedal(&mut self, has: bool) {
        self.controls.has_brake_pedal = has;
    }

    /// Locks the handbrake and zeroes throttle and steering until
    /// [`Self::release_handbrake`].
    pub fn set_handbrake(&mut self, on: bool) {
        if !on {
            self.release_handbrake();
            return;
        }
        self.handbrake_locked = true;
        self.controls.handbrake = true;
        self.controls.throttle = 0.0;
        self.controls.steering = 0.0;
    }

    pub fn release_handbrake(&mut self) {
        self.handbrake_locked = false;
        self.controls.handbrake = false;
    }

    pub fn set_boost(&mut self, boost: f32) {
        if !self.engine_disabled {
            self.controls.boost = boost;
        }
    }

    pub fn set_disable_engine(&mut self, disabled: bool) {
        self.engine_disabled = disabled;
        if let Some(controller) = self.controller.as_mut() {
            controller.set_engine_disabled(disabled);
        }
        if disabled {
            self.controls.throttle = 0.0;
            self.controls.boost = 0.0;
            self.controls.handbrake = true;
        } else {
            self.controls.handbrake = self.handbrake_locked;
        }
    }

    pub fn turn_on(&mut self) {
        if self.engine_disabled {
            return;
        }
        self.is_on = true;
    }

    /// Switch off and park: throttle cut, handbrake locked.
    pub fn turn_off(&mut self) {
        self.is_on = false;
        self.set_handbrake(true);
    }

    // ============================================================
    // Accessors
    // ============================================================

    pub fn controls(&self) -> &VehicleControlState {
        &self.controls
    }

    pub fn limits(&self) -> ThrottleLimits {
        self.limits
    }

    pub fn telemetry(&self) -> &OperatingParams {
        &self.telemetry
    }

    pub fn params(&self) -> &VehicleScriptParams {
        &self.params
    }

    pub fn body(&self) -> Option<PhysicsObjectId> {
        self.body
    }

    /// Wheel bodies, in controller order.
    pub fn wheels(&self) -> &[PhysicsObjectId] {
        &self.wheels
    }

    pub fn has_controller(&self) -> bool {
        self.controller.is_some()
    }

    /// Signed speed in mph from the last think.
    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn rpm(&self) -> f32 {
        self.rpm
    }

    pub fn gear(&self) -> i32 {
        self.telemetry.gear
    }

    pub fn has_boost(&self) -> bool {
        self.has_boost
    }

    pub fn boost_remaining(&self) -> f32 {
        self.boost_remaining
    }

    /// Boosting for sound purposes, including the minimum turbo hold time.
    pub fn is_boosting(&self) -> bool {
        self.last_boost
    }

    /// Friction of the surface under an ongoing skid.
    pub fn skid_friction(&self) -> Option<f32> {
        self.skidding.then_some(self.skid_friction)
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    pub fn is_engine_disabled(&self) -> bool {
        self.engine_disabled
    }

    pub fn is_handbrake_locked(&self) -> bool {
        self.handbrake_locked
    }

    pub fn action_value(&self) -> f32 {
        self.action_value
    }

    pub fn wheel_visual(&self, wheel: usize) -> Option<&WheelVisualState> {
        self.wheel_visuals.get(wheel).filter(|_| wheel < self.wheels.len())
    }

    pub fn wheel_base_height(&self, wheel: usize) -> f32 {
        self.wheel_base_height[wheel]
    }

    pub fn wheel_total_height(&self, wheel: usize) -> f32 {
        self.wheel_total_height[wheel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::events::{EventRecorder, VehicleEvent};
    use crate::sim::rig::ScriptedRig;
    use crate::vehicle::control::DriverButtons;
    use crate::vehicle::testing::{standard_params, standard_rig, MockEnvironment};
    use nalgebra::{Point3, Translation3};

    struct Harness {
        core: VehiclePhysicsCore,
        env: MockEnvironment,
        rig: ScriptedRig,
        effects: EventRecorder,
    }

    fn harness() -> Harness {
        let mut core = VehiclePhysicsCore::new();
        let mut env = MockEnvironment::new();
        let mut rig = ScriptedRig::new(&standard_rig());
        core.spawn(&rig);
        core.initialize(&mut env, &mut rig, &standard_params(), &Isometry3::identity())
            .unwrap();
        core.turn_on();
        Harness {
            core,
            env,
            rig,
            effects: EventRecorder::new(),
        }
    }

    impl Harness {
        fn think(&mut self, now: f32, dt: f32) -> bool {
            self.core.think(now, dt, &mut self.rig, &mut self.effects)
        }

        fn set_speed_mph(&self, mph: f32) {
            self.env.controller_log.borrow_mut().operating.speed = mph / MPS_TO_MPH;
        }
    }

    #[test]
    fn initialize_derives_wheel_layout_from_rig() {
        let h = harness();
        let axles = &h.core.params().axles;
        assert!((axles[0].offset - Vector3::new(0.0, 0.0, 1.4)).norm() < 1e-6);
        assert!((axles[0].wheel_offset - Vector3::new(-0.8, 0.0, 0.0)).norm() < 1e-6);
        assert!((axles[1].offset - Vector3::new(0.0, 0.0, -1.3)).norm() < 1e-6);
        assert!((axles[0].travel - 0.3).abs() < 1e-6);
        assert!((h.core.wheel_total_height(2) - 0.3).abs() < 1e-6);
        assert_eq!(h.core.wheel_base_height(0), 0.0);
        assert!(h.core.body().is_some());
        assert!(h.env.controller_log.borrow().params.is_some());
    }

    #[test]
    fn missing_rear_attachments_fail_initialization() {
        let mut rig_script = standard_rig();
        rig_script
            .attachments
            .retain(|a| a.name != "wheel_rl" && a.name != "wheel_rr");
        let mut rig = ScriptedRig::new(&rig_script);
        let mut env = MockEnvironment::new();
        let mut core = VehiclePhysicsCore::new();
        core.spawn(&rig);

        let err = core
            .initialize(&mut env, &mut rig, &standard_params(), &Isometry3::identity())
            .unwrap_err();
        assert!(matches!(err, VehicleError::MissingAttachment("wheel_rl")));
        assert!(!core.has_controller());
        assert!(env.bodies.is_empty());
        assert!(!core.think(0.0, 0.1, &mut rig, &mut EventRecorder::new()));
    }

    #[test]
    fn controller_refusal_removes_chassis() {
        let mut rig = ScriptedRig::new(&standard_rig());
        let mut env = MockEnvironment::new();
        env.refuse_controller = true;
        let mut core = VehiclePhysicsCore::new();
        core.spawn(&rig);
        let err = core
            .initialize(&mut env, &mut rig, &standard_params(), &Isometry3::identity())
            .unwrap_err();
        assert!(matches!(err, VehicleError::ControllerCreation));
        assert!(env.bodies.is_empty());
    }

    #[test]
    fn think_without_controller_is_a_no_op() {
        let mut core = VehiclePhysicsCore::new();
        core.turn_on();
        let mut rig = ScriptedRig::new(&standard_rig());
        assert!(!core.think(0.0, 0.1, &mut rig, &mut EventRecorder::new()));
    }

    #[test]
    fn think_steps_controller_with_current_controls() {
        let mut h = harness();
        h.core.release_handbrake();
        h.core.set_throttle(0.6);
        assert!(h.think(0.0, 0.1));
        let log = h.env.controller_log.borrow();
        assert_eq!(log.updates.len(), 1);
        assert_eq!(log.updates[0].throttle, 0.6);
        assert_eq!(log.booster_calls, 1);
    }

    #[test]
    fn throttle_button_ramps_to_full_in_five_ticks() {
        let mut h = harness();
        let cmd = UserCommand::digital(DriverButtons {
            forward: true,
            ..Default::default()
        });
        for _ in 0..5 {
            h.core.update_driver_controls(&cmd, 0.1, &DriverTuning::default());
        }
        assert_eq!(h.core.controls().throttle, 1.0);
    }

    #[test]
    fn reverse_button_while_rolling_forward_brakes() {
        let mut h = harness();
        h.set_speed_mph(20.0);
        let cmd = UserCommand::digital(DriverButtons {
            back: true,
            ..Default::default()
        });
        h.core.update_driver_controls(&cmd, 0.1, &DriverTuning::default());
        let controls = h.core.controls();
        assert_eq!(controls.throttle, 0.0);
        assert!(controls.brake > 0.0);
        assert!(controls.brake_pedal);

        h.set_speed_mph(0.0);
        h.core.update_driver_controls(&cmd, 0.1, &DriverTuning::default());
        assert!(h.core.controls().throttle < 0.0);
    }

    #[test]
    fn no_input_centers_steering_and_drops_throttle() {
        let mut h = harness();
        h.core.release_handbrake();
        h.core.set_steering(0.5, 0.0);
        h.core.set_throttle(0.5);
        h.core.update_driver_controls(&UserCommand::default(), 10.0, &DriverTuning::default());
        assert_eq!(h.core.controls().steering, 0.0);
        assert_eq!(h.core.controls().throttle, 0.0);
    }

    #[test]
    fn boost_button_needs_active_throttle() {
        let mut h = harness();
        let tuning = DriverTuning::default();
        let idle_boost = UserCommand::digital(DriverButtons {
            speed: true,
            ..Default::default()
        });
        h.core.update_driver_controls(&idle_boost, 0.1, &tuning);
        assert_eq!(h.core.controls().boost, 0.0);

        let boost = UserCommand::digital(DriverButtons {
            forward: true,
            speed: true,
            ..Default::default()
        });
        h.core.update_driver_controls(&boost, 0.1, &tuning);
        assert_eq!(h.core.controls().boost, 1.0);

        h.core.set_disable_engine(true);
        h.core.update_driver_controls(&boost, 0.1, &tuning);
        assert_eq!(h.core.controls().boost, 0.0);
        assert_eq!(h.core.controls().throttle, 0.0);
        assert!(h.core.controls().handbrake);
    }

    #[test]
    fn jump_applies_side_handbrake() {
        let mut h = harness();
        let cmd = UserCommand {
            buttons: DriverButtons {
                jump: true,
                ..Default::default()
            },
            side_move: -300.0,
            ..Default::default()
        };
        h.core.update_driver_controls(&cmd, 0.1, &DriverTuning::default());
        let controls = h.core.controls();
        assert!(controls.handbrake);
        assert!(controls.handbrake_left);
        assert!(!controls.handbrake_right);

        h.core.update_driver_controls(&UserCommand::default(), 0.1, &DriverTuning::default());
        assert!(!h.core.controls().handbrake);
    }

    #[test]
    fn auto_throttle_keeps_throttle_in_hard_turns() {
        let mut h = harness();
        h.set_speed_mph(h.core.params().engine.max_speed * 0.9);
        let cmd = UserCommand {
            forward_move: 40.0,
            side_move: 400.0,
            ..Default::default()
        };
        h.core.update_driver_controls(&cmd, 10.0, &DriverTuning::default());
        // Full deflection worth of throttle, less the turn reduction at speed.
        let reduce = h.core.params().steering.turn_throttle_reduce_fast;
        let expected = 1.0 - h.core.controls().steering.abs() * reduce;
        assert!((h.core.controls().throttle - expected).abs() < 1e-5);
    }

    #[test]
    fn handbrake_is_sticky_until_released() {
        let mut h = harness();
        h.core.release_handbrake();
        h.core.set_throttle(0.7);
        h.core.set_steering(0.4, 0.0);
        h.core.set_handbrake(true);
        assert_eq!(h.core.controls().throttle, 0.0);
        assert_eq!(h.core.controls().steering, 0.0);

        h.core.set_throttle(0.7);
        h.core.set_steering(0.4, 0.0);
        assert_eq!(h.core.controls().throttle, 0.0);
        assert_eq!(h.core.controls().steering, 0.0);

        h.core.release_handbrake();
        h.core.set_throttle(0.7);
        assert_eq!(h.core.controls().throttle, 0.7);
    }

    #[test]
    fn locked_handbrake_holds_against_driver_input() {
        let mut h = harness();
        h.core.set_handbrake(true);
        let cmd = UserCommand::digital(DriverButtons {
            forward: true,
            move_right: true,
            speed: true,
            ..Default::default()
        });
        for _ in 0..5 {
            h.core.update_driver_controls(&cmd, 0.1, &DriverTuning::default());
        }
        h.think(0.0, 0.1);

        let last = *h.env.controller_log.borrow().updates.last().unwrap();
        assert!(last.handbrake);
        assert_eq!(last.throttle, 0.0);
        assert_eq!(last.steering, 0.0);
        assert_eq!(last.boost, 0.0);

        h.core.release_handbrake();
        h.core.update_driver_controls(&cmd, 0.1, &DriverTuning::default());
        assert!(h.core.controls().throttle > 0.0);
        assert!(h.core.controls().steering > 0.0);
    }

    #[test]
    fn disabled_engine_ignores_boost_and_parks_every_think() {
        let mut h = harness();
        h.core.release_handbrake();
        h.core.set_disable_engine(true);
        assert!(h.env.controller_log.borrow().engine_disabled);
        h.core.set_boost(1.0);
        assert_eq!(h.core.controls().boost, 0.0);

        h.think(0.0, 0.1);
        let last = *h.env.controller_log.borrow().updates.last().unwrap();
        assert_eq!(last.throttle, 0.0);
        assert!(last.handbrake);

        h.core.set_disable_engine(false);
        h.core.set_boost(1.0);
        assert_eq!(h.core.controls().boost, 1.0);
        assert!(!h.core.controls().handbrake);
    }

    #[test]
    fn turn_off_parks_the_vehicle() {
        let mut h = harness();
        h.core.release_handbrake();
        h.core.set_throttle(1.0);
        h.core.turn_off();
        assert!(!h.core.is_on());
        assert!(h.core.is_handbrake_locked());
        assert_eq!(h.core.controls().throttle, 0.0);
        assert!(!h.think(0.0, 0.1));
    }

    #[test]
    fn skid_threshold_falls_to_default_then_scales_with_speed() {
        let speeds = [0.0, 0.5, 1.0, 1.5];
        for pair in speeds.windows(2) {
            assert!(skid_threshold(pair[1], false) <= skid_threshold(pair[0], false));
        }
        assert_eq!(skid_threshold(0.0, false), DEFAULT_SKID_THRESHOLD * 8.0);
        let cutoff = DEFAULT_SKID_THRESHOLD / 0.15;
        assert!((skid_threshold(cutoff, false) - DEFAULT_SKID_THRESHOLD).abs() < 1e-6);
        assert_eq!(skid_threshold(-0.2, true), DEFAULT_SKID_THRESHOLD);
        assert!((skid_threshold(20.0, false) - 3.0).abs() < 1e-5);
    }

    #[test]
    fn skid_starts_and_stops_with_dust_at_contacts() {
        let mut h = harness();
        {
            let mut log = h.env.controller_log.borrow_mut();
            log.operating.speed = 10.0;
            log.operating.skid_speed = 2.0;
            log.operating.skid_material = 3;
            log.surface_friction = 0.3;
            log.contacts = vec![Some(Point3::new(1.0, 0.0, 1.0)), None, None, None];
        }
        h.think(0.0, 0.1);
        assert_eq!(h.core.skid_friction(), Some(0.3));
        let dust: Vec<_> = h
            .effects
            .drain()
            .into_iter()
            .filter(|e| matches!(e, VehicleEvent::Effect { origin, .. } if *origin == [1.0, 0.0, 1.0]))
            .collect();
        assert_eq!(dust.len(), 1);

        h.env.controller_log.borrow_mut().operating.skid_speed = 0.0;
        h.think(0.1, 0.1);
        assert_eq!(h.core.skid_friction(), None);
    }

    #[test]
    fn ambient_dust_needs_speed_and_dust_cloud_surface() {
        let mut h = harness();
        {
            let mut log = h.env.controller_log.borrow_mut();
            log.operating.speed = 20.0 / MPS_TO_MPH;
            log.operating.wheels_in_contact = 0b0001;
            log.contacts = vec![Some(Point3::origin()); 4];
        }
        h.think(0.0, 0.1);
        assert!(h.effects.drain().is_empty());

        let mut params = h.core.params().clone();
        params.steering.dust_cloud = true;
        h.core.reload_params(&params).unwrap();
        h.think(0.1, 0.1);
        assert_eq!(h.effects.drain().len(), 1);
    }

    #[test]
    fn turbo_flag_held_for_minimum_time() {
        let mut h = harness();
        h.env.controller_log.borrow_mut().operating.is_torque_boosting = true;
        h.think(10.0, 0.1);
        assert!(h.core.is_boosting());

        h.env.controller_log.borrow_mut().operating.is_torque_boosting = false;
        h.think(11.0, 0.1);
        assert!(h.core.is_boosting());
        h.think(12.8, 0.1);
        assert!(!h.core.is_boosting());
    }

    #[test]
    fn steer_pose_blends_toward_physical_angle() {
        let mut h = harness();
        let steer = h.rig.lookup_pose_parameter("vehicle_steer").unwrap();
        let degrees = h.core.params().steering.degrees_slow;

        h.env.controller_log.borrow_mut().operating.steering_angle = degrees;
        h.think(0.0, 0.1);
        assert!((h.rig.pose_parameter(steer) - 0.2).abs() < 1e-6);

        // Already matching: fixed point.
        h.env.controller_log.borrow_mut().operating.steering_angle = 0.35 * degrees;
        let physical = (0.35 * degrees) / degrees;
        h.rig.set_pose_parameter(steer, physical);
        h.think(0.1, 0.1);
        assert_eq!(h.rig.pose_parameter(steer), physical);
    }

    #[test]
    fn action_and_gauge_poses() {
        let mut h = harness();
        h.core.set_action(0.5);
        h.set_speed_mph(50.0);
        h.think(0.0, 0.2);
        h.think(0.2, 0.2);
        let action = h.rig.lookup_pose_parameter("vehicle_action").unwrap();
        let gauge = h.rig.lookup_pose_parameter("vehicle_gauge").unwrap();
        assert!((h.rig.pose_parameter(action) - 0.2).abs() < 1e-6);
        assert!((h.rig.pose_parameter(gauge) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn wheel_callback_drives_height_pose_and_is_consumed() {
        let mut h = harness();
        let wheel = h.env.controller_log.borrow().wheels[2];
        let chassis = h.core.body().unwrap();
        let entity = Isometry3::translation(5.0, 1.0, 0.0);
        let base = h.core.wheel_base_height(2);

        // Halfway down its travel, in entity space.
        let local = Isometry3::translation(0.8, base - 0.15, -1.3);
        let world = entity * local;
        assert!(h.core.vphysics_update(wheel, &world, &entity, &mut h.rig));
        let height = h.rig.lookup_pose_parameter("vehicle_wheel_rl_height").unwrap();
        assert!((h.rig.pose_parameter(height) - 0.5).abs() < 1e-5);
        assert_eq!(h.core.wheel_visual(2).unwrap().position, world.translation.vector);

        assert!(!h.core.vphysics_update(chassis, &entity, &entity, &mut h.rig));
        assert!(!h
            .core
            .vphysics_update(PhysicsObjectId(9999), &entity, &entity, &mut h.rig));
    }

    #[test]
    fn teleport_moves_wheels_rigidly_and_wakes_chassis() {
        let mut h = harness();
        let wheels = h.env.controller_log.borrow().wheels.clone();
        let before: Vec<_> = wheels.iter().map(|w| h.env.bodies[w]).collect();

        let relative = Isometry3::from_parts(
            Translation3::new(10.0, 0.0, -4.0),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 1.2),
        );
        h.core.teleport(&mut h.env, &relative);

        for (wheel, old) in wheels.iter().zip(before) {
            let new = h.env.bodies[wheel];
            let expected = relative * old;
            assert!((new.translation.vector - expected.translation.vector).norm() < 1e-5);
        }
        assert_eq!(h.env.woken, vec![h.core.body().unwrap()]);
    }

    #[test]
    fn reload_keeps_derived_layout_and_updates_controller() {
        let mut h = harness();
        let offset = h.core.params().axles[0].offset;
        let mut params = standard_params();
        params.engine.horsepower = 999.0;
        h.core.reload_params(&params).unwrap();
        assert_eq!(h.core.params().engine.horsepower, 999.0);
        assert_eq!(h.core.params().axles[0].offset, offset);

        h.think(0.0, 0.1);
        let log = h.env.controller_log.borrow();
        let seen = log.params.as_ref().unwrap();
        assert_eq!(seen.engine.horsepower, 999.0);
        assert_eq!(seen.axles[0].offset, offset);
    }

    #[test]
    fn steering_degrees_apply_to_all_speeds() {
        let mut h = harness();
        h.core.set_steering_degrees(12.0);
        let s = &h.core.params().steering;
        assert_eq!((s.degrees_slow, s.degrees_fast, s.degrees_boost), (12.0, 12.0, 12.0));
    }

    #[test]
    fn release_destroys_controller_before_chassis() {
        let mut h = harness();
        h.core.release(&mut h.env);
        assert_eq!(h.env.teardown, vec!["controller", "body"]);
        assert!(!h.core.has_controller());
    }
}
