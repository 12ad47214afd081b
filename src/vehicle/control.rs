//! Control inputs: the per-tick actuation handed to the physics controller,
//! the raw driver command it is derived from, and the driver tuning knobs.

use serde::{Deserialize, Serialize};

/// Upper bound of `VehicleControlState::brake`.
pub const BRAKE_MAX_VALUE: f32 = 1.0;

/// Side deflection (stick units) below which a centered stick releases the
/// analog throttle bias.
const BIAS_RELEASE_SIDE: f32 = 200.0;

/// Actuation for one physics step. Written by driver translation or the
/// scripted setters, consumed once per tick by the vehicle controller.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct VehicleControlState {
    pub throttle: f32,
    pub steering: f32,
    pub brake: f32,
    pub boost: f32,
    pub handbrake: bool,
    pub handbrake_left: bool,
    pub handbrake_right: bool,
    /// Brake applied by pressing against the direction of travel.
    pub brake_pedal: bool,
    pub has_brake_pedal: bool,
    pub analog_steering: bool,
}

/// Digital buttons of a driver command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverButtons {
    pub forward: bool,
    pub back: bool,
    pub move_left: bool,
    pub move_right: bool,
    /// Handbrake.
    pub jump: bool,
    /// Boost.
    pub speed: bool,
}

/// One tick of driver input. Analog axes are in stick units,
/// `[-stick_extent, stick_extent]`; zero means the stick is centered or absent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct UserCommand {
    pub buttons: DriverButtons,
    pub forward_move: f32,
    pub side_move: f32,
}

impl UserCommand {
    /// Buttons-only command, as a keyboard produces.
    pub fn digital(buttons: DriverButtons) -> Self {
        Self {
            buttons,
            ..Self::default()
        }
    }
}

/// Shared driver-assist tuning, the same for every vehicle on the server.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverTuning {
    /// Fraction of stick travel ignored around center when steering.
    pub steering_deadzone: f32,
    /// Opposite-direction stick travel tolerated before an analog throttle
    /// bias flips.
    pub throttle_bias: f32,
    /// Stick value substituted while the bias holds.
    pub throttle_spoof: f32,
    pub auto_throttle: bool,
    /// Brake ramp, units per second.
    pub brake_rate: f32,
    pub stick_extent: f32,
}

impl Default for DriverTuning {
    fn default() -> Self {
        Self {
            steering_deadzone: 0.0,
            throttle_bias: 100.0,
            throttle_spoof: 200.0,
            auto_throttle: true,
            brake_rate: 1.5,
            stick_extent: 400.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ThrottleBias {
    #[default]
    None,
    Forward,
    Reverse,
}

/// Keeps an analog stick committed to its current direction until it is
/// pushed decisively the other way.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalogBias {
    bias: ThrottleBias,
}

impl AnalogBias {
    pub fn bias(&self) -> ThrottleBias {
        self.bias
    }

    pub fn reset(&mut self) {
        self.bias = ThrottleBias::None;
    }

    /// Filter one tick of analog forward input.
    pub fn apply(&mut self, forward: f32, side: f32, tuning: &DriverTuning) -> f32 {
        if forward == 0.0 && side.abs() < BIAS_RELEASE_SIDE {
            self.bias = ThrottleBias::None;
            return 0.0;
        }

        match self.bias {
            ThrottleBias::None => {
                if forward > 0.0 {
                    self.bias = ThrottleBias::Forward;
                } else if forward < 0.0 {
                    self.bias = ThrottleBias::Reverse;
                }
                forward
            }
            ThrottleBias::Forward => {
                if forward <= -tuning.throttle_bias {
                    self.bias = ThrottleBias::Reverse;
                    forward
                } else if forward <= 0.0 {
                    tuning.throttle_spoof
                } else {
                    forward
                }
            }
            ThrottleBias::Reverse => {
                if forward >= tuning.throttle_bias {
                    self.bias = ThrottleBias::Forward;
                    forward
                } else if forward >= 0.0 {
                    -tuning.throttle_spoof
                } else {
                    forward
                }
            }
        }
    }
}
