//! Vehicle script loading.

pub mod keyvalues;
pub mod params;
pub mod registry;
pub mod rig;
pub mod sounds;

pub use params::VehicleScriptParams;
pub use registry::{ScriptRegistry, VehicleScript};
pub use rig::RigScript;
pub use sounds::{SoundState, VehicleSoundScript};
