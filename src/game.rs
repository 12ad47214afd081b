// ==============================================================================
// game.rs — THE SIMULATION SIDE OF THE SERVER
// ==============================================================================
// Owns the rapier world, the script cache and one vehicle per connected
// player. Runs on the main task only: the vehicles hold Rc handles into the
// world and are not Send.
//
// Tick order:
// 1) script flush, leaves, joins
// 2) driver commands and entity inputs
// 3) vehicle thinks (controls → controller)
// 4) world step
// 5) physics callbacks (chassis, then wheels)
// 6) snapshot
// ==============================================================================

use crate::config::ServerConfig;
use crate::error::VehicleError;
use crate::script::registry::ScriptRegistry;
use crate::script::rig::RigScript;
use crate::sim::events::EventRecorder;
use crate::sim::rig::ScriptedRig;
use crate::sim::world::{PhysicsWorld, SimEnvironment};
use crate::spawn::SpawnManager;
use crate::state::{PoseValue, Snapshot, TickInputs, VehicleSnapshot};
use crate::vehicle::entity::VehicleEntity;
use nalgebra::Isometry3;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{info, warn};

struct HostedVehicle {
    entity: VehicleEntity,
    sounds: EventRecorder,
    effects: EventRecorder,
}

pub struct GameWorld {
    config: ServerConfig,
    world: Rc<RefCell<PhysicsWorld>>,
    env: SimEnvironment,
    scripts: ScriptRegistry,
    spawns: SpawnManager,
    vehicles: HashMap<String, HostedVehicle>,
    tick: u64,
}

impl GameWorld {
    pub fn new(config: ServerConfig) -> Self {
        let world = Rc::new(RefCell::new(PhysicsWorld::new(config.ground_friction)));
        Self {
            env: SimEnvironment::new(Rc::clone(&world)),
            scripts: ScriptRegistry::new(config.script_dir.clone()),
            spawns: SpawnManager::new(config.spawn_points.clone()),
            world,
            config,
            vehicles: HashMap::new(),
            tick: 0,
        }
    }

    /// Simulation time in seconds, derived from the tick count.
    pub fn clock(&self) -> f64 {
        self.tick as f64 / f64::from(self.config.tick_rate)
    }

    pub fn world(&self) -> &Rc<RefCell<PhysicsWorld>> {
        &self.world
    }

    pub fn vehicle(&self, player_id: &str) -> Option<&VehicleEntity> {
        self.vehicles.get(player_id).map(|v| &v.entity)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Build a vehicle for `player_id` at its spawn point and put the player
    /// in the driver's seat.
    pub fn spawn_vehicle(&mut self, player_id: &str) -> Result<(), VehicleError> {
        let script = self.scripts.get(&self.config.default_script)?;
        let spawn = self.spawns.allocate_spawn(player_id);
        let [x, y, z] = spawn.position;

        let rig = ScriptedRig::new(script.rig.as_ref().unwrap_or(&RigScript::default()));
        let sounds = EventRecorder::new();
        let effects = EventRecorder::new();
        let mut entity = VehicleEntity::new(
            script,
            Isometry3::translation(x, y, z),
            Box::new(rig),
            Box::new(sounds.clone()),
            Box::new(effects.clone()),
        );

        if let Err(err) = entity.spawn(&mut self.env) {
            self.spawns.release(player_id);
            return Err(err);
        }
        entity.enter();
        info!(player = %player_id, x, y, z, "vehicle ready");

        self.vehicles.insert(
            player_id.to_string(),
            HostedVehicle {
                entity,
                sounds,
                effects,
            },
        );
        Ok(())
    }

    pub fn remove_vehicle(&mut self, player_id: &str) {
        if let Some(mut vehicle) = self.vehicles.remove(player_id) {
            vehicle.entity.remove(&mut self.env);
            info!(player = %player_id, "vehicle removed");
        }
        self.spawns.release(player_id);
    }

    /// `vehicle_flushscript`: re-read every script and hot-swap the tuning
    /// into live vehicles built from it.
    pub fn flush_scripts(&mut self) {
        for script in self.scripts.flush() {
            for (id, vehicle) in self.vehicles.iter_mut() {
                if vehicle.entity.script().name != script.name {
                    continue;
                }
                if let Err(error) = vehicle.entity.reload_script(script.clone()) {
                    warn!(player = %id, %error, "script reload rejected");
                }
            }
        }
    }

    pub fn tick(&mut self, inputs: TickInputs) -> Snapshot {
        let dt = self.config.tick_dt();
        let now = self.clock() as f32;

        if inputs.flush_scripts {
            self.flush_scripts();
        }
        for id in &inputs.leaves {
            self.remove_vehicle(id);
        }
        for id in &inputs.joins {
            if let Err(error) = self.spawn_vehicle(id) {
                warn!(player = %id, %error, "could not spawn vehicle");
            }
        }

        for (id, cmd) in inputs.commands {
            if let Some(vehicle) = self.vehicles.get_mut(&id) {
                vehicle.entity.set_driver_command(cmd);
            }
        }
        for (id, input) in inputs.entity_inputs {
            if let Some(vehicle) = self.vehicles.get_mut(&id) {
                vehicle.entity.accept_input(input);
            }
        }

        for vehicle in self.vehicles.values_mut() {
            if let Some(water) = self.config.water_height {
                let y = vehicle.entity.transform().translation.vector.y;
                vehicle.entity.set_in_water(y < water);
            }
            vehicle.entity.think(now, dt, &self.config.driver);
        }

        self.world.borrow_mut().step(dt);

        for vehicle in self.vehicles.values_mut() {
            vehicle.entity.sync_from_physics(&self.env);
        }

        self.tick += 1;
        self.snapshot()
    }

    fn snapshot(&self) -> Snapshot {
        let mut vehicles: Vec<VehicleSnapshot> = self
            .vehicles
            .iter()
            .map(|(id, vehicle)| {
                let entity = &vehicle.entity;
                let core = entity.core();
                let transform = entity.transform();
                let t = transform.translation.vector;
                let q = transform.rotation.coords;

                let mut events = vehicle.sounds.drain();
                events.extend(vehicle.effects.drain());

                VehicleSnapshot {
                    id: id.clone(),
                    position: [t.x, t.y, t.z],
                    rotation: [q.x, q.y, q.z, q.w],
                    speed: core.speed(),
                    rpm: core.rpm(),
                    gear: core.gear(),
                    boost_remaining: core.boost_remaining(),
                    engine_on: core.is_on(),
                    audio_state: entity.audio_state().to_string(),
                    poses: entity
                        .pose_values()
                        .into_iter()
                        .map(|(name, value)| PoseValue { name, value })
                        .collect(),
                    events,
                }
            })
            .collect();
        vehicles.sort_by(|a, b| a.id.cmp(&b.id));

        Snapshot {
            tick: self.tick,
            vehicles,
        }
    }
}
