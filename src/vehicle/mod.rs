//! The vehicle core: control translation, the physics core that drives an
//! external vehicle controller, the engine sound director and the entity
//! that ties them together.

pub mod audio;
pub mod control;
pub mod entity;
pub mod external;
pub mod math;
pub mod physics;
pub mod steering;
pub mod throttle;

#[cfg(test)]
pub mod testing;

pub use audio::{SoundUpdateInfo, VehicleAudioDirector};
pub use control::{DriverTuning, UserCommand, VehicleControlState};
pub use entity::{EntityInput, VehicleEntity};
pub use physics::VehiclePhysicsCore;
