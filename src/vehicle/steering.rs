//! Steering response: speed-dependent turn and self-centering rates.
//!
//! All speeds are unsigned mph. Every path ends in [`approach`], so the
//! steering value can only move toward its target and stays in `[-1, 1]`.

use crate::script::params::VehicleScriptParams;
use crate::vehicle::control::{DriverTuning, VehicleControlState};
use crate::vehicle::external::OperatingParams;
use crate::vehicle::math::{approach, remap_val_clamped, sign};

pub struct SteeringController<'a> {
    params: &'a VehicleScriptParams,
}

impl<'a> SteeringController<'a> {
    pub fn new(params: &'a VehicleScriptParams) -> Self {
        Self { params }
    }

    /// Self-centering rate at this speed, before any boost/throttle scaling.
    pub fn rest_rate(&self, speed: f32) -> f32 {
        let s = &self.params.steering;
        remap_val_clamped(
            speed,
            s.speed_slow,
            s.speed_fast,
            s.steering_rest_rate_slow,
            s.steering_rest_rate_fast,
        )
    }

    pub fn turn_rate(&self, speed: f32) -> f32 {
        let s = &self.params.steering;
        remap_val_clamped(
            speed,
            s.speed_slow,
            s.speed_fast,
            s.steering_rate_slow,
            s.steering_rate_fast,
        )
    }

    /// Boosting for steering purposes: torque boost is on, or a boost is
    /// recharging while the car is still above its normal top speed.
    pub fn is_boosting(&self, speed: f32, telemetry: &OperatingParams) -> bool {
        let engine = &self.params.engine;
        let recovering = telemetry.boost_time_left != 0.0 && telemetry.boost_time_left != 100.0;
        telemetry.is_torque_boosting
            || (recovering && speed > engine.max_speed * engine.autobrake_speed_gain)
    }

    /// Digital turn toward full left or full right.
    #[allow(clippy::too_many_arguments)]
    pub fn turn(
        &self,
        controls: &mut VehicleControlState,
        speed: f32,
        telemetry: &OperatingParams,
        turn_left: bool,
        braking: bool,
        throttling: bool,
        dt: f32,
    ) {
        let s = &self.params.steering;
        let engine = &self.params.engine;
        let target = if turn_left { -1.0 } else { 1.0 };

        let mut rest_rate = self.rest_rate(speed);
        if speed > engine.max_speed {
            rest_rate = remap_val_clamped(
                speed,
                engine.max_speed,
                engine.boost.max_speed,
                s.steering_rest_rate_fast,
                s.steering_rest_rate_fast * 0.5,
            );
        }

        let boosting = self.is_boosting(speed, telemetry);
        if boosting {
            rest_rate *= s.boost_steering_rest_rate_factor;
        } else if throttling {
            rest_rate *= s.throttle_steering_rest_rate_factor;
        }

        let mut rate = self.turn_rate(speed);
        if rate.abs() < rest_rate && sign(target) != sign(controls.steering) {
            rate = rest_rate;
        }

        if boosting {
            rate *= s.boost_steering_rate_factor;
        } else if braking {
            rate *= s.brake_steering_rate_factor;
        }

        controls.steering = approach(target, controls.steering, rate * dt);
        controls.analog_steering = false;
    }

    /// No steering input: return toward center at the rest rate.
    pub fn rest_to_center(&self, controls: &mut VehicleControlState, speed: f32, dt: f32) {
        controls.steering = approach(0.0, controls.steering, self.rest_rate(speed) * dt);
    }

    /// Proportional steering from an analog stick.
    pub fn analog(
        &self,
        controls: &mut VehicleControlState,
        speed: f32,
        side_move: f32,
        tuning: &DriverTuning,
        dt: f32,
    ) {
        let deflection = (side_move.abs() / tuning.stick_extent).clamp(0.0, 1.0);
        let adjusted = remap_val_clamped(deflection, tuning.steering_deadzone, 1.0, 0.0, 1.0);
        let rate = self.turn_rate(speed) * self.params.steering.throttle_steering_rest_rate_factor;

        controls.steering = approach(sign(side_move) * adjusted, controls.steering, rate * dt);
        controls.analog_steering = true;
    }
}
