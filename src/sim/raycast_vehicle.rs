// ==============================================================================
// raycast_vehicle.rs — RAYCAST SUSPENSION VEHICLE (rapier3d)
// ==============================================================================
// One dynamic chassis body plus one kinematic body per wheel. Each step:
// 1) cast a ray down from every wheel mount, compute compression and the
//    spring/damper load,
// 2) build a contact patch per grounded wheel and ask the tire model for
//    drive/brake and lateral impulses,
// 3) apply everything to the chassis at the contact points.
// After the rigid-body step the wheel bodies are placed from the chassis pose,
// the suspension compression, the steering angle and the accumulated spin, and
// the operating telemetry is refreshed.
//
// Conventions: +Y up, +Z forward, +X left. Steering is positive to the right.
// ==============================================================================

use crate::script::params::VehicleScriptParams;
use crate::sim::tire::{self, ContactPatch, WheelDemand};
use crate::vehicle::control::VehicleControlState;
use crate::vehicle::external::{OperatingParams, PhysicsObjectId};
use crate::vehicle::math::{remap_val_clamped, MPS_TO_MPH};
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use rapier3d::prelude::{
    ColliderSet, QueryFilter, QueryPipeline, Ray, RigidBodyHandle, RigidBodySet,
};

const GRAVITY: f32 = 9.81;
const HP_TO_WATTS: f32 = 745.7;
/// Power-limited drive force is computed as if going at least this fast (m/s).
const MIN_DRIVE_SPEED: f32 = 4.0;
/// Brake applied with no pedal and no throttle.
const ROLLING_RESISTANCE: f32 = 0.02;
/// Rear lateral grip with the handbrake pulled.
const HANDBRAKE_GRIP: f32 = 0.35;
const RPM_PER_RAD_S: f32 = 60.0 / std::f32::consts::TAU;

#[derive(Debug, Clone)]
pub struct WheelState {
    pub body: RigidBodyHandle,
    pub id: PhysicsObjectId,
    pub axle: usize,
    pub left: bool,
    pub mount: Vector3<f32>,        // chassis local, wheel center at full compression
    pub radius: f32,
    pub travel: f32,                // m between full compression and full droop
    pub compression: f32,           // m, 0 = full droop
    pub contact: Option<Point3<f32>>,
    pub surface: u32,
    pub spin: f32,                  // radians
    pub lateral_speed: f32,         // m/s at the contact
}

impl WheelState {
    /// Wheel pose in chassis space.
    fn local_pose(&self, steer: f32) -> Isometry3<f32> {
        let center = self.mount - Vector3::y() * (self.travel - self.compression);
        let steer_rot = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -steer);
        let spin_rot = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), self.spin);
        Isometry3::from_parts(Translation3::from(center), steer_rot * spin_rot)
    }
}

pub struct RaycastVehicle {
    pub chassis: RigidBodyHandle,
    pub params: VehicleScriptParams,
    pub controls: VehicleControlState,
    pub wheels: Vec<WheelState>,
    operating: OperatingParams,
    gear: usize,
    boost_remaining: f32,           // seconds of active boost left
    boost_cooldown: f32,            // seconds until boost is ready again
    engine_disabled: bool,
}

impl RaycastVehicle {
    /// `wheel_bodies` are the kinematic wheel bodies in axle order, left first.
    pub fn new(
        chassis: RigidBodyHandle,
        params: VehicleScriptParams,
        wheel_bodies: Vec<(RigidBodyHandle, PhysicsObjectId)>,
    ) -> Self {
        let wheels = wheel_bodies
            .into_iter()
            .enumerate()
            .map(|(i, (body, id))| {
                let (axle, mount, left) = Self::wheel_layout(&params, i);
                let axle_params = &params.axles[axle];
                WheelState {
                    body,
                    id,
                    axle,
                    left,
                    mount,
                    radius: axle_params.wheel.radius.max(0.05),
                    travel: axle_params.travel.max(0.05),
                    compression: 0.0,
                    contact: None,
                    surface: 0,
                    spin: 0.0,
                    lateral_speed: 0.0,
                }
            })
            .collect();

        Self {
            chassis,
            params,
            controls: VehicleControlState::default(),
            wheels,
            operating: OperatingParams {
                boost_time_left: 100.0,
                ..OperatingParams::default()
            },
            gear: 0,
            boost_remaining: 0.0,
            boost_cooldown: 0.0,
            engine_disabled: false,
        }
    }

    /// Axle index, chassis-space mount and side of wheel `i`.
    pub fn wheel_layout(params: &VehicleScriptParams, i: usize) -> (usize, Vector3<f32>, bool) {
        let per_axle = params.wheels_per_axle.max(1);
        let axle = (i / per_axle).min(params.axles.len().saturating_sub(1));
        let a = &params.axles[axle];
        if per_axle == 1 {
            return (axle, a.offset, true);
        }
        let left = i % per_axle == 0;
        let mount = if left {
            a.offset - a.wheel_offset
        } else {
            a.offset + a.wheel_offset
        };
        (axle, mount, left)
    }

    /// Swap in new tuning, keeping wheel bodies and mounts.
    pub fn set_params(&mut self, params: VehicleScriptParams) {
        for wheel in &mut self.wheels {
            if let Some(axle) = params.axles.get(wheel.axle) {
                wheel.radius = axle.wheel.radius.max(0.05);
                wheel.travel = axle.travel.max(0.05);
                wheel.compression = wheel.compression.min(wheel.travel);
            }
        }
        self.gear = self.gear.min(params.engine.gear_ratios.len().saturating_sub(1));
        self.params = params;
    }

    pub fn operating_params(&self) -> OperatingParams {
        self.operating
    }

    pub fn set_engine_disabled(&mut self, disabled: bool) {
        self.engine_disabled = disabled;
    }

    pub fn is_engine_disabled(&self) -> bool {
        self.engine_disabled
    }

    fn is_boosting(&self) -> bool {
        self.boost_remaining > 0.0
    }

    /// Top forward speed right now, m/s.
    fn top_speed(&self) -> f32 {
        let engine = &self.params.engine;
        let mph = if self.is_boosting() && engine.boost.max_speed > 0.0 {
            engine.boost.max_speed
        } else {
            engine.max_speed
        };
        mph / MPS_TO_MPH
    }

    /// Front wheel angle, radians, positive to the right.
    fn steer_angle(&self, speed_mph: f32) -> f32 {
        let s = &self.params.steering;
        let max_degrees = if self.is_boosting() {
            s.degrees_boost
        } else {
            remap_val_clamped(speed_mph.abs(), s.speed_slow, s.speed_fast, s.degrees_slow, s.degrees_fast)
        };
        let input = self.controls.steering.clamp(-1.0, 1.0);
        let shaped = input.signum() * input.abs().powf(s.steering_exponent.max(0.1));
        (shaped * max_degrees).to_radians()
    }

    // ============================================================
    // Booster
    // ============================================================

    /// Advance boost timers by `dt` and fire a boost if one is requested and
    /// ready. Returns the seconds of boost remaining.
    pub fn update_booster(&mut self, dt: f32) -> f32 {
        let boost = &self.params.engine.boost;
        if self.boost_remaining > 0.0 {
            self.boost_remaining -= dt;
            if self.boost_remaining <= 0.0 {
                self.boost_remaining = 0.0;
                self.boost_cooldown = boost.delay;
            }
        } else if self.boost_cooldown > 0.0 {
            self.boost_cooldown = (self.boost_cooldown - dt).max(0.0);
        } else if self.controls.boost > 0.0
            && !self.engine_disabled
            && self.params.engine.has_boost()
            && boost.duration > 0.0
        {
            self.boost_remaining = boost.duration;
        }

        self.operating.boost_delay = self.boost_cooldown;
        self.operating.boost_time_left = if self.boost_remaining > 0.0 && boost.duration > 0.0 {
            100.0 * self.boost_remaining / boost.duration
        } else if self.boost_cooldown > 0.0 && boost.delay > 0.0 {
            100.0 * (1.0 - self.boost_cooldown / boost.delay)
        } else {
            100.0
        };
        self.operating.is_torque_boosting = self.boost_remaining > 0.0;
        self.boost_remaining
    }

    // ============================================================
    // Forces (before the rigid-body step)
    // ============================================================

    pub fn apply_forces(
        &mut self,
        bodies: &mut RigidBodySet,
        colliders: &ColliderSet,
        query_pipeline: &QueryPipeline,
        surfaces: &[f32],
        dt: f32,
    ) {
        let Some(body) = bodies.get(self.chassis) else {
            return;
        };
        let pos = *body.position();
        let mass = body.mass();
        let linvel = *body.linvel();
        let up = pos.rotation * Vector3::y();
        let chassis_forward = pos.rotation * Vector3::z();
        let ground_n = Vector3::y();

        let wheel_count = self.wheels.len().max(1) as f32;
        let mass_share = mass / wheel_count;
        let speed = linvel.dot(&chassis_forward);
        let speed_mph = speed * MPS_TO_MPH;
        let steer = self.steer_angle(speed_mph);

        let engine = &self.params.engine;
        let throttle = if self.engine_disabled {
            0.0
        } else {
            self.controls.throttle
        };

        // power-limited drive, cut at the speed caps
        let mut power = engine.horsepower * HP_TO_WATTS;
        if self.is_boosting() {
            power *= self.params.engine.boost.force.max(1.0);
        }
        let over_cap = (throttle > 0.0 && speed >= self.top_speed())
            || (throttle < 0.0 && -speed >= engine.max_reverse_speed / MPS_TO_MPH);
        let drive_total = if over_cap {
            0.0
        } else {
            throttle * power / speed.abs().max(MIN_DRIVE_SPEED)
        };
        let torque_sum: f32 = self
            .wheels
            .iter()
            .map(|w| self.params.axles[w.axle].torque_factor.max(0.0))
            .sum::<f32>()
            .max(1e-3);

        // above top speed without boost the autobrake bleeds speed off
        let autobrake = if !self.is_boosting()
            && speed_mph > engine.max_speed * engine.autobrake_speed_gain
        {
            engine.autobrake_speed_factor
        } else {
            0.0
        };

        let filter = QueryFilter::default().exclude_rigid_body(self.chassis);
        let mut impulses: Vec<(Vector3<f32>, Point3<f32>)> = Vec::new();
        let mut skid_speed = 0.0f32;
        let mut skid_surface = 0;

        for wheel in self.wheels.iter_mut() {
            let axle = &self.params.axles[wheel.axle];
            let origin = pos * Point3::from(wheel.mount);
            let ray = Ray::new(origin, -up);
            let max_dist = wheel.travel + wheel.radius;

            wheel.contact = None;
            wheel.lateral_speed = 0.0;

            let Some((collider, toi)) =
                query_pipeline.cast_ray(bodies, colliders, &ray, max_dist, true, filter)
            else {
                wheel.compression = 0.0;
                continue;
            };

            let hit_point = origin + -up * toi;
            wheel.compression = (max_dist - toi).clamp(0.0, wheel.travel);
            wheel.contact = Some(hit_point);
            wheel.surface = colliders
                .get(collider)
                .map_or(0, |c| c.user_data as u32);
            let surface_friction = surfaces.get(wheel.surface as usize).copied().unwrap_or(1.0);

            // ----------------------------------------------------
            // Spring + damper
            // ----------------------------------------------------
            let Some(body) = bodies.get(self.chassis) else {
                continue;
            };
            let point_vel = body.velocity_at_point(&hit_point);
            let suspension_vel = point_vel.dot(&up);
            let s = &axle.suspension;
            let k = s.spring_constant.max(0.0);
            let damping = if suspension_vel < 0.0 {
                s.spring_damping_compression
            } else {
                s.spring_damping
            };
            let spring = mass_share * k * wheel.compression;
            let damper = -mass_share * damping * 2.0 * k.sqrt() * suspension_vel;
            let mut normal_force = (spring + damper).max(0.0);
            if s.max_body_force > 0.0 {
                normal_force = normal_force.min(s.max_body_force);
            }
            impulses.push((up * (normal_force * dt), hit_point));

            // ----------------------------------------------------
            // Tire
            // ----------------------------------------------------
            let wheel_steer = if wheel.axle == 0 { steer } else { 0.0 };
            let steer_rot = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -wheel_steer);
            let heading = pos.rotation * (steer_rot * Vector3::z());
            let flat = heading - ground_n * heading.dot(&ground_n);
            let forward = if flat.norm() > 1e-6 {
                flat.normalize()
            } else {
                chassis_forward
            };
            let side = forward.cross(&ground_n);

            let patch = ContactPatch {
                forward,
                side,
                v_long: point_vel.dot(&forward),
                v_lat: point_vel.dot(&side),
                normal_force,
                mu: surface_friction * axle.wheel.friction_scale,
            };

            let rear = wheel.axle > 0;
            let handbrake = rear
                && (self.controls.handbrake
                    || (self.controls.handbrake_left && wheel.left)
                    || (self.controls.handbrake_right && !wheel.left));
            let pedal = (self.controls.brake * axle.brake_factor * 2.0).clamp(0.0, 1.0);
            let brake = if handbrake {
                1.0
            } else if throttle == 0.0 && pedal == 0.0 {
                ROLLING_RESISTANCE.max(autobrake)
            } else {
                pedal.max(autobrake)
            };
            let demand = WheelDemand {
                drive_force: drive_total * axle.torque_factor.max(0.0) / torque_sum,
                brake,
                lateral_grip: if handbrake && self.params.steering.skid_allowed {
                    HANDBRAKE_GRIP
                } else {
                    1.0
                },
            };

            let apply_point = hit_point + ground_n * (wheel.radius * 0.25);
            let long = tire::longitudinal_impulse(&patch, &demand, mass_share, dt);
            let lat = tire::lateral_impulse(&patch, &demand, mass_share, dt);
            impulses.push((long + lat, apply_point));

            wheel.lateral_speed = patch.v_lat;
            if patch.v_lat.abs() > skid_speed {
                skid_speed = patch.v_lat.abs();
                skid_surface = wheel.surface;
            }
        }

        let body_params = &self.params.body;
        let Some(body) = bodies.get_mut(self.chassis) else {
            return;
        };
        for (impulse, point) in impulses {
            body.apply_impulse_at_point(impulse, point, true);
        }
        if body_params.add_gravity != 0.0 {
            body.apply_impulse(-Vector3::y() * (GRAVITY * body_params.add_gravity * mass * dt), true);
        }
        if body_params.keep_upright_torque > 0.0 {
            let correction = up.cross(&Vector3::y());
            body.apply_torque_impulse(correction * (body_params.keep_upright_torque * mass * dt), true);
        }
        let max_angvel = body_params.max_angular_velocity.to_radians();
        let angvel = *body.angvel();
        if max_angvel > 0.0 && angvel.norm() > max_angvel {
            body.set_angvel(angvel.normalize() * max_angvel, true);
        }

        self.operating.skid_speed = skid_speed;
        self.operating.skid_material = skid_surface;
    }

    // ============================================================
    // After the rigid-body step
    // ============================================================

    /// Place the wheel bodies and refresh telemetry.
    pub fn sync_wheels(&mut self, bodies: &mut RigidBodySet, dt: f32) {
        let Some(body) = bodies.get(self.chassis) else {
            return;
        };
        let pos = *body.position();
        let forward = pos.rotation * Vector3::z();
        let speed = body.linvel().dot(&forward);
        let speed_mph = speed * MPS_TO_MPH;
        let steer = self.steer_angle(speed_mph);

        let mut in_contact = 0u32;
        let mut not_in_contact = 0u32;
        for (i, wheel) in self.wheels.iter_mut().enumerate() {
            let locked = wheel.axle > 0
                && (self.controls.handbrake
                    || (self.controls.handbrake_left && wheel.left)
                    || (self.controls.handbrake_right && !wheel.left));
            if !locked {
                wheel.spin = (wheel.spin + speed / wheel.radius * dt) % std::f32::consts::TAU;
            }
            if wheel.contact.is_some() {
                in_contact |= 1 << i;
            } else {
                not_in_contact |= 1 << i;
            }

            let wheel_steer = if wheel.axle == 0 { steer } else { 0.0 };
            let world = pos * wheel.local_pose(wheel_steer);
            if let Some(wheel_body) = bodies.get_mut(wheel.body) {
                wheel_body.set_position(world, true);
            }
        }

        // automatic gearbox
        let engine = &self.params.engine;
        let radius = self.wheels.first().map_or(0.4, |w| w.radius);
        let wheel_rpm = speed.abs() / radius * RPM_PER_RAD_S;
        let gears = engine.gear_ratios.len().max(1);
        let ratio = |gear: usize| engine.gear_ratios.get(gear).copied().unwrap_or(1.0) * engine.axle_ratio;
        let mut rpm = wheel_rpm * ratio(self.gear);
        if engine.auto_transmission {
            if rpm > engine.shift_up_rpm && self.gear + 1 < gears {
                self.gear += 1;
            } else if rpm < engine.shift_down_rpm && self.gear > 0 {
                self.gear -= 1;
            }
            rpm = wheel_rpm * ratio(self.gear);
        }

        self.operating.speed = speed;
        self.operating.engine_rpm = rpm.clamp(0.0, engine.max_rpm);
        self.operating.gear = if speed < -0.5 && self.controls.throttle < 0.0 {
            -1
        } else {
            self.gear as i32
        };
        self.operating.steering_angle = steer.to_degrees();
        self.operating.wheels_in_contact = in_contact;
        self.operating.wheels_not_in_contact = not_in_contact;
    }
}
