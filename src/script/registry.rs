use crate::error::ScriptError;
use crate::script::keyvalues::{parse, KvBlock};
use crate::script::params::VehicleScriptParams;
use crate::script::rig::RigScript;
use crate::script::sounds::VehicleSoundScript;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything one vehicle script file describes.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleScript {
    pub name: String,
    pub params: VehicleScriptParams,
    pub sounds: VehicleSoundScript,
    pub rig: Option<RigScript>,
}

impl VehicleScript {
    pub fn parse(name: &str, text: &str) -> Result<Self, ScriptError> {
        let root = parse(text)?;
        let root = KvBlock::new(&root);

        let vehicle = root.block("vehicle").ok_or(ScriptError::MissingBlock("vehicle"))?;
        let params = VehicleScriptParams::from_block(vehicle)?;
        let sounds = match root.block("vehicle_sounds") {
            Some(block) => VehicleSoundScript::from_block(block)?,
            None => VehicleSoundScript::default(),
        };
        let rig = root.block("rig").map(RigScript::from_block).transpose()?;

        Ok(Self {
            name: name.to_string(),
            params,
            sounds,
            rig,
        })
    }

    pub fn load(name: &str, path: &Path) -> Result<Self, ScriptError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(name, &text)
    }
}

/// Parsed scripts, cached by name so every vehicle of a type shares one copy.
pub struct ScriptRegistry {
    root: PathBuf,
    scripts: HashMap<String, Arc<VehicleScript>>,
}

impl ScriptRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scripts: HashMap::new(),
        }
    }

    pub fn get(&mut self, name: &str) -> Result<Arc<VehicleScript>, ScriptError> {
        if let Some(script) = self.scripts.get(name) {
            return Ok(Arc::clone(script));
        }
        let script = Arc::new(VehicleScript::load(name, &self.root.join(name))?);
        info!(script = %name, axles = script.params.axles.len(), "vehicle script loaded");
        self.scripts.insert(name.to_string(), Arc::clone(&script));
        Ok(script)
    }

    /// Re-read every cached script from disk. Scripts that fail to parse keep
    /// their previous contents. Returns the scripts that were replaced.
    pub fn flush(&mut self) -> Vec<Arc<VehicleScript>> {
        let mut reloaded = Vec::new();
        for (name, cached) in self.scripts.iter_mut() {
            match VehicleScript::load(name, &self.root.join(name)) {
                Ok(script) => {
                    *cached = Arc::new(script);
                    reloaded.push(Arc::clone(cached));
                }
                Err(err) => warn!(script = %name, error = %err, "script flush failed, keeping old copy"),
            }
        }
        info!(count = reloaded.len(), "vehicle scripts flushed");
        reloaded
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vehicle-scripts-{tag}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn caches_and_flushes() {
        let dir = scratch_dir("flush");
        let path = dir.join("buggy.txt");
        fs::write(&path, r#""vehicle" { "engine" { "horsepower" "100" } "axle" {} "axle" {} }"#).unwrap();

        let mut registry = ScriptRegistry::new(&dir);
        let first = registry.get("buggy.txt").unwrap();
        let again = registry.get("buggy.txt").unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.params.engine.horsepower, 100.0);

        fs::write(&path, r#""vehicle" { "engine" { "horsepower" "250" } "axle" {} "axle" {} }"#).unwrap();
        let reloaded = registry.flush();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].params.engine.horsepower, 250.0);
        assert_eq!(registry.get("buggy.txt").unwrap().params.engine.horsepower, 250.0);

        fs::write(&path, r#""vehicle" { "#).unwrap();
        assert!(registry.flush().is_empty());
        assert_eq!(registry.get("buggy.txt").unwrap().params.engine.horsepower, 250.0);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let mut registry = ScriptRegistry::new(scratch_dir("missing"));
        let err = registry.get("nope.txt").unwrap_err();
        assert!(matches!(err, ScriptError::Io { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn script_without_vehicle_block_is_rejected() {
        let err = VehicleScript::parse("x", r#""vehicle_sounds" {}"#).unwrap_err();
        assert!(matches!(err, ScriptError::MissingBlock("vehicle")));
    }
}
