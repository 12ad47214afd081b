// ==============================================================================
// tire.rs — PER-CONTACT TIRE IMPULSES (drive, brake, lateral grip)
// ==============================================================================
// Impulse-domain tire model for the raycast vehicle:
// - Longitudinal: engine drive force (driven wheels only) plus a brake impulse
//   that opposes the contact's forward velocity, both limited by traction.
// - Lateral: "brush-lite" grip that cancels sideways slip, Coulomb-clamped to
//   mu * Fz * dt and softened as the slip angle saturates.
//
// No wheel angular velocity state is tracked; slip is implied by demand vs
// capacity. This file does NOT apply impulses; the vehicle does.
// ==============================================================================

use nalgebra::Vector3;

/// Lateral slide below this (m/s) gets no correction.
const LATERAL_DEADZONE: f32 = 0.02;
/// Slip angle (radians) past which lateral grip is at its floor.
const SLIP_ANGLE_SATURATION: f32 = 0.6;
/// Forward speed (m/s) below which the brake holds the car instead of scaling.
const BRAKE_HOLD_SPEED: f32 = 0.05;

/// Measured state of one grounded wheel.
#[derive(Debug, Clone, Copy)]
pub struct ContactPatch {
    pub forward: Vector3<f32>,      // wheel heading projected on the ground
    pub side: Vector3<f32>,         // forward x ground normal
    pub v_long: f32,                // contact velocity along forward (m/s)
    pub v_lat: f32,                 // contact velocity along side (m/s)
    pub normal_force: f32,          // N
    pub mu: f32,                    // surface friction * wheel friction scale
}

/// Per-wheel demand for this step.
#[derive(Debug, Clone, Copy, Default)]
pub struct WheelDemand {
    pub drive_force: f32,           // N along forward, signed
    pub brake: f32,                 // 0..1
    pub lateral_grip: f32,          // 0..1, reduced by handbrake slides
}

/// Longitudinal impulse at the contact.
pub fn longitudinal_impulse(
    patch: &ContactPatch,
    demand: &WheelDemand,
    mass_share: f32,
    dt: f32,
) -> Vector3<f32> {
    let max_traction = patch.mu * patch.normal_force;
    let drive = demand.drive_force.clamp(-max_traction, max_traction) * dt;

    // brake cancels v_long (never pushes forward)
    let mut brake = 0.0;
    if demand.brake > 0.0 && patch.v_long.abs() > BRAKE_HOLD_SPEED {
        let desired = -patch.v_long * mass_share * demand.brake;
        let max_brake = max_traction * dt;
        brake = desired.clamp(-max_brake, max_brake);
    }

    // engine fights a locked brake at a crawl
    let drive = if demand.brake > 0.3 && patch.v_long.abs() < 1.0 {
        drive * 0.25
    } else {
        drive
    };

    patch.forward * (drive + brake)
}

/// Lateral impulse at the contact.
pub fn lateral_impulse(
    patch: &ContactPatch,
    demand: &WheelDemand,
    mass_share: f32,
    dt: f32,
) -> Vector3<f32> {
    if patch.v_lat.abs() < LATERAL_DEADZONE {
        return Vector3::zeros();
    }

    let desired = -patch.v_lat * mass_share * demand.lateral_grip;

    // Coulomb clamp
    let max_lat = patch.mu * patch.normal_force * dt;
    let mut impulse = desired.clamp(-max_lat, max_lat);

    // slip factor
    let alpha = patch.v_lat.atan2(patch.v_long.abs().max(1.0));
    impulse *= (1.0 - alpha.abs() / SLIP_ANGLE_SATURATION).clamp(0.2, 1.0);

    // braking trades lateral authority
    impulse *= (1.0 - demand.brake * 0.6).clamp(0.3, 1.0);

    patch.side * impulse
}
