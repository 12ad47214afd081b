//! The `vehicle_sounds` block: engine gear bands, per-state sounds, crash
//! sounds and skid sounds.

use crate::error::ScriptError;
use crate::script::keyvalues::KvBlock;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Number of engine sound gears (`SS_GEAR_0` .. `SS_GEAR_4`).
pub const SOUND_GEAR_COUNT: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundState {
    None,
    Shutdown,
    ShutdownWater,
    StartWater,
    StartIdle,
    Idle,
    Gear(u8),
    GearResume(u8),
    Slowdown,
    /// Sound slot used by `Slowdown` when slowing from high speed. Never
    /// entered as a state.
    SlowdownHighspeed,
    Turbo,
    Reverse,
}

impl SoundState {
    /// Looping states keep their sound running until the next transition;
    /// the rest play a one-shot on entry.
    pub fn is_looping(self) -> bool {
        !matches!(
            self,
            SoundState::None
                | SoundState::Shutdown
                | SoundState::ShutdownWater
                | SoundState::StartWater
                | SoundState::StartIdle
        )
    }
}

impl fmt::Display for SoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoundState::None => write!(f, "SS_NONE"),
            SoundState::Shutdown => write!(f, "SS_SHUTDOWN"),
            SoundState::ShutdownWater => write!(f, "SS_SHUTDOWN_WATER"),
            SoundState::StartWater => write!(f, "SS_START_WATER"),
            SoundState::StartIdle => write!(f, "SS_START_IDLE"),
            SoundState::Idle => write!(f, "SS_IDLE"),
            SoundState::Gear(n) => write!(f, "SS_GEAR_{n}"),
            SoundState::GearResume(n) => write!(f, "SS_GEAR_{n}_RESUME"),
            SoundState::Slowdown => write!(f, "SS_SLOWDOWN"),
            SoundState::SlowdownHighspeed => write!(f, "SS_SLOWDOWN_HIGHSPEED"),
            SoundState::Turbo => write!(f, "SS_TURBO"),
            SoundState::Reverse => write!(f, "SS_REVERSE"),
        }
    }
}

impl FromStr for SoundState {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let state = match upper.as_str() {
            "SS_NONE" => SoundState::None,
            "SS_SHUTDOWN" => SoundState::Shutdown,
            "SS_SHUTDOWN_WATER" => SoundState::ShutdownWater,
            "SS_START_WATER" => SoundState::StartWater,
            "SS_START_IDLE" => SoundState::StartIdle,
            "SS_IDLE" => SoundState::Idle,
            "SS_SLOWDOWN" => SoundState::Slowdown,
            "SS_SLOWDOWN_HIGHSPEED" => SoundState::SlowdownHighspeed,
            "SS_TURBO" => SoundState::Turbo,
            "SS_REVERSE" => SoundState::Reverse,
            other => {
                let gear = other
                    .strip_prefix("SS_GEAR_")
                    .ok_or_else(|| ScriptError::UnknownSoundState(s.to_string()))?;
                let (digits, resume) = match gear.strip_suffix("_RESUME") {
                    Some(d) => (d, true),
                    None => (gear, false),
                };
                let n: u8 = digits
                    .parse()
                    .ok()
                    .filter(|n| *n < SOUND_GEAR_COUNT)
                    .ok_or_else(|| ScriptError::UnknownSoundState(s.to_string()))?;
                if resume {
                    SoundState::GearResume(n)
                } else {
                    SoundState::Gear(n)
                }
            }
        };
        Ok(state)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoundGear {
    /// Upper bound of this gear as a fraction of the engine's top speed.
    pub max_speed: f32,
    pub speed_approach_factor: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateSound {
    pub sound: Option<String>,
    /// Seconds the state must be held before a non-forced change.
    pub min_time: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrashSound {
    /// mph the vehicle must have been doing before the impact.
    pub min_speed: f32,
    /// mph lost in one tick.
    pub min_speed_change: f32,
    pub sound: String,
    /// Highest sound gear this entry applies to. `0` disables the entry.
    pub gear_limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrictionClass {
    Low,
    Normal,
    High,
}

impl FrictionClass {
    pub fn from_friction(friction: f32) -> Self {
        if friction < 0.4 {
            FrictionClass::Low
        } else if friction < 0.9 {
            FrictionClass::Normal
        } else {
            FrictionClass::High
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VehicleSoundScript {
    pub gears: Vec<SoundGear>,
    pub states: HashMap<SoundState, StateSound>,
    pub crash_sounds: Vec<CrashSound>,
    pub skid_low_friction: Option<String>,
    pub skid_normal_friction: Option<String>,
    pub skid_high_friction: Option<String>,
}

impl VehicleSoundScript {
    pub fn from_block(block: KvBlock<'_>) -> Result<Self, ScriptError> {
        let mut script = Self::default();

        for gear in block.blocks("gear") {
            script.gears.push(SoundGear {
                max_speed: gear.f32_or("max_speed", 1.0)?,
                speed_approach_factor: gear.f32_or("speed_approach_factor", 1.0)?,
            });
        }
        if script.gears.len() > SOUND_GEAR_COUNT as usize {
            return Err(ScriptError::TooManyGears(script.gears.len()));
        }

        for state in block.blocks("state") {
            let name = state
                .text("name")
                .ok_or(ScriptError::MissingBlock("state name"))?;
            let key: SoundState = name.parse()?;
            script.states.insert(
                key,
                StateSound {
                    sound: state.text("sound").map(str::to_string),
                    min_time: state.f32_or("min_time", 0.0)?,
                },
            );
        }

        for crash in block.blocks("crashsound") {
            let Some(sound) = crash.text("sound") else {
                continue;
            };
            script.crash_sounds.push(CrashSound {
                min_speed: crash.f32_or("min_speed", 0.0)?,
                min_speed_change: crash.f32_or("min_speed_change", 0.0)?,
                sound: sound.to_string(),
                gear_limit: crash.f32_or("gear_limit", 0.0)?.max(0.0) as u32,
            });
        }

        script.skid_low_friction = block.text("skid_lowfriction").map(str::to_string);
        script.skid_normal_friction = block.text("skid_normalfriction").map(str::to_string);
        script.skid_high_friction = block.text("skid_highfriction").map(str::to_string);
        Ok(script)
    }

    pub fn sound(&self, state: SoundState) -> Option<&str> {
        self.states.get(&state).and_then(|s| s.sound.as_deref())
    }

    pub fn min_time(&self, state: SoundState) -> f32 {
        self.states.get(&state).map_or(0.0, |s| s.min_time)
    }

    /// Sound gear for a speed fraction: the first band whose upper bound
    /// contains it, else the top gear.
    pub fn gear_for_speed(&self, speed_fraction: f32) -> u8 {
        let last = self.gears.len().saturating_sub(1);
        let index = self
            .gears
            .iter()
            .position(|g| speed_fraction <= g.max_speed)
            .unwrap_or(last);
        index as u8
    }

    pub fn skid_sound(&self, friction: f32) -> Option<&str> {
        match FrictionClass::from_friction(friction) {
            FrictionClass::Low => self.skid_low_friction.as_deref(),
            FrictionClass::Normal => self.skid_normal_friction.as_deref(),
            FrictionClass::High => self.skid_high_friction.as_deref(),
        }
    }
}
