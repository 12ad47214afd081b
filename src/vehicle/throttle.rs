//! Throttle and brake from forward/back intent.
//!
//! Pressing against the direction of travel brakes first (when the vehicle
//! has a brake pedal); throttle only crosses zero once the car has slowed
//! below [`SPEED_THROTTLE_AS_BRAKE`].

use crate::script::params::VehicleScriptParams;
use crate::vehicle::control::{BRAKE_MAX_VALUE, DriverTuning, VehicleControlState};
use crate::vehicle::math::{approach, remap_val_clamped};

/// mph of travel against the requested direction that turns throttle into brake.
pub const SPEED_THROTTLE_AS_BRAKE: f32 = 2.0;
const BRAKE_BACK_FORWARD_SCALAR: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleLimits {
    pub max_throttle: f32,
    pub max_reverse_throttle: f32,
}

impl Default for ThrottleLimits {
    fn default() -> Self {
        Self {
            max_throttle: 1.0,
            max_reverse_throttle: -1.0,
        }
    }
}

pub struct ThrottleController<'a> {
    params: &'a VehicleScriptParams,
    tuning: &'a DriverTuning,
}

impl<'a> ThrottleController<'a> {
    pub fn new(params: &'a VehicleScriptParams, tuning: &'a DriverTuning) -> Self {
        Self { params, tuning }
    }

    /// Throttle head-room lost to steering at this speed.
    fn turn_reduction(&self, speed: f32, steering: f32) -> f32 {
        let s = &self.params.steering;
        steering.abs()
            * remap_val_clamped(
                speed.abs(),
                s.speed_slow,
                s.speed_fast,
                s.turn_throttle_reduce_slow,
                s.turn_throttle_reduce_fast,
            )
    }

    fn brake_against_travel(&self, controls: &mut VehicleControlState, dt: f32) {
        controls.brake = approach(
            BRAKE_MAX_VALUE,
            controls.brake,
            self.tuning.brake_rate * BRAKE_BACK_FORWARD_SCALAR * dt,
        );
        controls.brake_pedal = true;
        controls.throttle = 0.0;
    }

    /// Forward intent. `analog` is the stick fraction in `[0, 1]`, `None` for
    /// a digital button. `speed` is signed mph. Returns whether throttle is
    /// being applied (as opposed to braking against reverse travel).
    pub fn forward(
        &self,
        controls: &mut VehicleControlState,
        speed: f32,
        limits: ThrottleLimits,
        analog: Option<f32>,
        dt: f32,
    ) -> bool {
        if speed < -SPEED_THROTTLE_AS_BRAKE && controls.has_brake_pedal {
            self.brake_against_travel(controls, dt);
            return false;
        }

        if controls.throttle < 0.0 {
            controls.throttle = 0.0;
        }
        let max = (limits.max_throttle.max(0.1) - self.turn_reduction(speed, controls.steering))
            .max(0.0);
        let target = analog.map_or(max, |fraction| max * fraction);

        controls.throttle = approach(
            target,
            controls.throttle,
            self.params.engine.throttle_rate() * dt,
        );
        controls.brake = 0.0;
        controls.brake_pedal = false;
        true
    }

    /// Reverse intent; mirror of [`Self::forward`].
    pub fn reverse(
        &self,
        controls: &mut VehicleControlState,
        speed: f32,
        limits: ThrottleLimits,
        analog: Option<f32>,
        dt: f32,
    ) -> bool {
        if speed > SPEED_THROTTLE_AS_BRAKE && controls.has_brake_pedal {
            self.brake_against_travel(controls, dt);
            return false;
        }

        if controls.throttle > 0.0 {
            controls.throttle = 0.0;
        }
        let max = (limits.max_reverse_throttle.min(-0.1)
            + self.turn_reduction(speed, controls.steering))
        .min(0.0);
        let target = analog.map_or(max, |fraction| max * fraction);

        controls.throttle = approach(
            target,
            controls.throttle,
            self.params.engine.throttle_rate() * dt,
        );
        controls.brake = 0.0;
        controls.brake_pedal = false;
        true
    }

    /// No forward/back intent.
    pub fn release(&self, controls: &mut VehicleControlState) {
        controls.throttle = 0.0;
        controls.brake = 0.0;
        controls.brake_pedal = false;
    }
}
