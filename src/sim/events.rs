//! Sound and effect sink that records calls so the host can ship them to
//! clients with the tick snapshot.

use crate::vehicle::external::{EffectDispatcher, SoundEmitter};
use nalgebra::{Point3, Vector3};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VehicleEvent {
    PlaySound { name: String },
    PlayLoopingSound { name: String },
    StopSound { name: String, fade: f32 },
    Effect {
        name: String,
        origin: [f32; 3],
        direction: [f32; 3],
        scale: f32,
    },
}

/// Cheap to clone; clones share one event list.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Rc<RefCell<Vec<VehicleEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<VehicleEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub fn snapshot(&self) -> Vec<VehicleEvent> {
        self.events.borrow().clone()
    }

    fn push(&self, event: VehicleEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl SoundEmitter for EventRecorder {
    fn play_sound(&mut self, name: &str) {
        self.push(VehicleEvent::PlaySound { name: name.to_string() });
    }

    fn play_looping_sound(&mut self, name: &str) {
        self.push(VehicleEvent::PlayLoopingSound { name: name.to_string() });
    }

    fn stop_sound(&mut self, name: &str, fade: f32) {
        self.push(VehicleEvent::StopSound {
            name: name.to_string(),
            fade,
        });
    }
}

impl EffectDispatcher for EventRecorder {
    fn dispatch(&mut self, name: &str, origin: Point3<f32>, direction: Vector3<f32>, scale: f32) {
        self.push(VehicleEvent::Effect {
            name: name.to_string(),
            origin: [origin.x, origin.y, origin.z],
            direction: [direction.x, direction.y, direction.z],
            scale,
        });
    }
}
