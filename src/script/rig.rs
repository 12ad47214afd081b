//! The optional `rig` block: a minimal description of the vehicle model's
//! animated skeleton. Each attachment slides linearly between two local
//! positions as its driving pose parameter moves across its range.

use crate::error::ScriptError;
use crate::script::keyvalues::KvBlock;
use nalgebra::Vector3;

#[derive(Debug, Clone, PartialEq)]
pub struct PoseDef {
    pub name: String,
    pub min: f32,
    pub max: f32,
    /// Values wrap around the range instead of clamping (wheel spin).
    pub looping: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentDef {
    pub name: String,
    /// Pose parameter that moves the attachment. `None` pins it at `origin`.
    pub pose: Option<String>,
    /// Local position with the pose parameter at its minimum.
    pub origin: Vector3<f32>,
    /// Local position with the pose parameter at its maximum.
    pub extended: Vector3<f32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RigScript {
    pub poses: Vec<PoseDef>,
    pub attachments: Vec<AttachmentDef>,
}

impl RigScript {
    pub fn from_block(block: KvBlock<'_>) -> Result<Self, ScriptError> {
        let mut rig = Self::default();
        for pose in block.blocks("pose") {
            let name = pose.text("name").ok_or(ScriptError::MissingBlock("pose name"))?;
            rig.poses.push(PoseDef {
                name: name.to_string(),
                min: pose.f32_or("min", 0.0)?,
                max: pose.f32_or("max", 1.0)?,
                looping: pose.bool_or("loop", false)?,
            });
        }
        for attachment in block.blocks("attachment") {
            let name = attachment
                .text("name")
                .ok_or(ScriptError::MissingBlock("attachment name"))?;
            let origin = attachment.vec3("origin")?.unwrap_or_else(Vector3::zeros);
            rig.attachments.push(AttachmentDef {
                name: name.to_string(),
                pose: attachment.text("pose").map(str::to_string),
                origin,
                extended: attachment.vec3("extended")?.unwrap_or(origin),
            });
        }
        Ok(rig)
    }
}
