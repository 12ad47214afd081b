//! Rapier-backed implementations of the services the vehicle core consumes:
//! the rigid-body world and its raycast vehicles, the scripted pose rig, and
//! the recorder that collects sounds and effects for snapshots.

pub mod events;
pub mod raycast_vehicle;
pub mod rig;
pub mod tire;
pub mod world;

pub use events::{EventRecorder, VehicleEvent};
pub use rig::ScriptedRig;
pub use world::{PhysicsWorld, SimEnvironment};
