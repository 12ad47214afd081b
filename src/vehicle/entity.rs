//! A drivable vehicle in the world: the physics core, the engine sound
//! director and the collaborators they talk to, behind one lifecycle.

use crate::error::VehicleError;
use crate::script::registry::VehicleScript;
use crate::script::sounds::SoundState;
use crate::vehicle::audio::{SoundUpdateInfo, VehicleAudioDirector};
use crate::vehicle::control::{DriverTuning, UserCommand};
use crate::vehicle::external::{
    EffectDispatcher, PhysicsEnvironment, PhysicsObjectId, PoseRig, SoundEmitter,
};
use crate::vehicle::physics::{VehiclePhysicsCore, POSE_PARAMETERS};
use nalgebra::{Isometry3, Vector3};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Named inputs that map triggers and scripted sequences onto a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "input", content = "value", rename_all = "snake_case")]
pub enum EntityInput {
    Throttle(f32),
    Steering(f32),
    Action(f32),
    HandBrakeOn,
    HandBrakeOff,
    TurnOn,
    TurnOff,
    EnableEngine,
    DisableEngine,
}

pub struct VehicleEntity {
    core: VehiclePhysicsCore,
    audio: VehicleAudioDirector,
    script: Arc<VehicleScript>,
    rig: Box<dyn PoseRig>,
    sounds: Box<dyn SoundEmitter>,
    effects: Box<dyn EffectDispatcher>,
    transform: Isometry3<f32>,
    always_think: bool,
    has_thought: bool,
    driver: Option<UserCommand>,
    in_water: bool,
    was_on: bool,
    removed: bool,
}

impl VehicleEntity {
    pub fn new(
        script: Arc<VehicleScript>,
        transform: Isometry3<f32>,
        rig: Box<dyn PoseRig>,
        sounds: Box<dyn SoundEmitter>,
        effects: Box<dyn EffectDispatcher>,
    ) -> Self {
        Self {
            core: VehiclePhysicsCore::new(),
            audio: VehicleAudioDirector::new(script.sounds.clone()),
            script,
            rig,
            sounds,
            effects,
            transform,
            always_think: true,
            has_thought: false,
            driver: None,
            in_water: false,
            was_on: false,
            removed: false,
        }
    }

    /// Build the physics side. On failure the entity is marked removed and
    /// must be dropped by its owner.
    pub fn spawn(&mut self, env: &mut dyn PhysicsEnvironment) -> Result<(), VehicleError> {
        self.core.spawn(&*self.rig);
        let result = self.core.initialize(
            env,
            &mut *self.rig,
            &self.script.params,
            &self.transform,
        );
        match &result {
            Ok(()) => info!(script = %self.script.name, "vehicle spawned"),
            Err(error) => {
                warn!(script = %self.script.name, %error, "vehicle failed to initialize");
                self.removed = true;
            }
        }
        result
    }

    /// One simulation tick. Returns whether the engine is on.
    pub fn think(&mut self, now: f32, dt: f32, tuning: &DriverTuning) -> bool {
        if self.removed {
            return false;
        }
        if !self.always_think && self.has_thought {
            return self.core.is_on();
        }
        self.has_thought = true;

        if let Some(cmd) = self.driver {
            self.core.update_driver_controls(&cmd, dt, tuning);
        }

        let on = self
            .core
            .think(now, dt, &mut *self.rig, &mut *self.effects);

        if on && !self.was_on {
            self.audio.start(now, self.in_water, &mut *self.sounds);
        }
        if on || self.was_on {
            let info = self.sound_update_info(on);
            self.audio.update(now, &info, &mut *self.sounds);
        }
        self.audio.check_crash(self.core.speed(), &mut *self.sounds);
        self.audio
            .update_skid(self.core.skid_friction(), &mut *self.sounds);

        self.was_on = on;
        on
    }

    fn sound_update_info(&self, on: bool) -> SoundUpdateInfo {
        let max_speed = self.core.params().engine.max_speed;
        let controls = self.core.controls();
        SoundUpdateInfo {
            speed_fraction: if max_speed > 0.0 {
                self.core.speed().abs() / max_speed
            } else {
                0.0
            },
            throttle_down: controls.throttle > 0.0,
            reverse: controls.throttle < 0.0,
            turbo: self.core.is_boosting(),
            in_water: self.in_water,
            exit: !on,
        }
    }

    /// Move the vehicle. Wheels are carried along by the same rigid
    /// transform as the chassis.
    pub fn teleport(
        &mut self,
        env: &mut dyn PhysicsEnvironment,
        transform: Isometry3<f32>,
        velocity: Option<Vector3<f32>>,
    ) {
        if let Some(body) = self.core.body() {
            let old = env.body_transform(body).unwrap_or(self.transform);
            let relative = transform * old.inverse();
            env.set_body_transform(body, &transform);
            if let Some(velocity) = velocity {
                env.set_body_velocity(body, &velocity);
            }
            self.core.teleport(env, &relative);
        }
        self.transform = transform;
    }

    /// Physics callback. Wheel bodies are handled by the core; the chassis
    /// moves the entity.
    pub fn vphysics_update(&mut self, object: PhysicsObjectId, transform: &Isometry3<f32>) {
        if self
            .core
            .vphysics_update(object, transform, &self.transform, &mut *self.rig)
        {
            return;
        }
        if Some(object) == self.core.body() {
            self.transform = *transform;
        }
    }

    /// Deliver the callbacks for every body this vehicle owns, chassis first
    /// so wheel poses are measured against the new chassis transform.
    pub fn sync_from_physics(&mut self, env: &dyn PhysicsEnvironment) {
        let Some(body) = self.core.body() else {
            return;
        };
        if let Some(transform) = env.body_transform(body) {
            self.vphysics_update(body, &transform);
        }
        let wheels = self.core.wheels().to_vec();
        for wheel in wheels {
            if let Some(transform) = env.body_transform(wheel) {
                self.vphysics_update(wheel, &transform);
            }
        }
    }

    pub fn accept_input(&mut self, input: EntityInput) {
        match input {
            EntityInput::Throttle(value) => self.core.set_throttle(value),
            EntityInput::Steering(value) => self.core.set_steering(value, 0.0),
            EntityInput::Action(value) => self.core.set_action(value),
            EntityInput::HandBrakeOn => self.core.set_handbrake(true),
            EntityInput::HandBrakeOff => self.core.release_handbrake(),
            EntityInput::TurnOn => self.core.turn_on(),
            EntityInput::TurnOff => self.core.turn_off(),
            EntityInput::EnableEngine => self.core.set_disable_engine(false),
            EntityInput::DisableEngine => self.core.set_disable_engine(true),
        }
    }

    /// A driver takes the wheel: engine on, handbrake off.
    pub fn enter(&mut self) {
        self.driver = Some(UserCommand::default());
        self.core.turn_on();
        self.core.release_handbrake();
    }

    /// The driver leaves: engine off, parked.
    pub fn exit(&mut self) {
        self.driver = None;
        self.core.turn_off();
    }

    /// Latest command from the driver. Ignored while nobody is driving.
    pub fn set_driver_command(&mut self, cmd: UserCommand) {
        if self.driver.is_some() {
            self.driver = Some(cmd);
        }
    }

    /// Swap in a re-parsed script, keeping the physics bodies.
    pub fn reload_script(&mut self, script: Arc<VehicleScript>) -> Result<(), VehicleError> {
        self.core.reload_params(&script.params)?;
        self.audio.reload(script.sounds.clone());
        self.script = script;
        Ok(())
    }

    /// Silence the vehicle and release its bodies, controller first.
    pub fn remove(&mut self, env: &mut dyn PhysicsEnvironment) {
        self.audio.stop(&mut *self.sounds);
        self.core.release(env);
        self.removed = true;
    }

    /// Named pose parameter values, for the model on the client.
    pub fn pose_values(&self) -> Vec<(&'static str, f32)> {
        POSE_PARAMETERS
            .iter()
            .filter_map(|name| {
                let index = self.rig.lookup_pose_parameter(name)?;
                Some((*name, self.rig.pose_parameter(index)))
            })
            .collect()
    }

    pub fn set_always_think(&mut self, always: bool) {
        self.always_think = always;
    }

    pub fn set_in_water(&mut self, in_water: bool) {
        self.in_water = in_water;
    }

    pub fn core(&self) -> &VehiclePhysicsCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut VehiclePhysicsCore {
        &mut self.core
    }

    pub fn audio_state(&self) -> SoundState {
        self.audio.state()
    }

    pub fn script(&self) -> &Arc<VehicleScript> {
        &self.script
    }

    pub fn transform(&self) -> &Isometry3<f32> {
        &self.transform
    }

    pub fn has_driver(&self) -> bool {
        self.driver.is_some()
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }
}
