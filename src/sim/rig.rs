//! Pose rig driven by the script's `rig` block.

use crate::script::rig::{AttachmentDef, PoseDef, RigScript};
use crate::vehicle::external::{PoseIndex, PoseRig};
use nalgebra::Isometry3;

struct PoseSlot {
    def: PoseDef,
    value: f32,
}

struct Attachment {
    def: AttachmentDef,
    pose: Option<usize>,
}

pub struct ScriptedRig {
    poses: Vec<PoseSlot>,
    attachments: Vec<Attachment>,
}

impl ScriptedRig {
    pub fn new(script: &RigScript) -> Self {
        let poses: Vec<PoseSlot> = script
            .poses
            .iter()
            .map(|def| PoseSlot {
                value: def.min.max(0.0).min(def.max),
                def: def.clone(),
            })
            .collect();

        let attachments = script
            .attachments
            .iter()
            .map(|def| Attachment {
                pose: def.pose.as_deref().and_then(|name| {
                    poses.iter().position(|p| p.def.name.eq_ignore_ascii_case(name))
                }),
                def: def.clone(),
            })
            .collect();

        Self { poses, attachments }
    }

    fn normalized(&self, index: usize) -> f32 {
        let slot = &self.poses[index];
        let width = slot.def.max - slot.def.min;
        if width == 0.0 {
            0.0
        } else {
            (slot.value - slot.def.min) / width
        }
    }
}

impl PoseRig for ScriptedRig {
    fn lookup_pose_parameter(&self, name: &str) -> Option<PoseIndex> {
        self.poses
            .iter()
            .position(|p| p.def.name.eq_ignore_ascii_case(name))
            .map(PoseIndex)
    }

    fn set_pose_parameter(&mut self, index: PoseIndex, value: f32) -> f32 {
        let Some(slot) = self.poses.get_mut(index.0) else {
            return 0.0;
        };
        let PoseDef { min, max, looping, .. } = slot.def;
        slot.value = if looping && max > min {
            min + (value - min).rem_euclid(max - min)
        } else {
            value.clamp(min.min(max), max.max(min))
        };
        slot.value
    }

    fn pose_parameter(&self, index: PoseIndex) -> f32 {
        self.poses.get(index.0).map_or(0.0, |p| p.value)
    }

    fn attachment(&self, name: &str) -> Option<Isometry3<f32>> {
        let attachment = self
            .attachments
            .iter()
            .find(|a| a.def.name.eq_ignore_ascii_case(name))?;
        let t = attachment.pose.map_or(0.0, |i| self.normalized(i));
        let position = attachment.def.origin.lerp(&attachment.def.extended, t);
        Some(Isometry3::translation(position.x, position.y, position.z))
    }
}
