//! Tuning constants for one vehicle model, read from the `vehicle` block of a
//! vehicle script.
//!
//! Units: speeds in miles per hour, lengths in meters, masses in kilograms,
//! rates in units per second.

use crate::error::ScriptError;
use crate::script::keyvalues::KvBlock;
use nalgebra::Vector3;

pub const MAX_AXLES: usize = 4;
pub const MAX_WHEELS_PER_AXLE: usize = 2;
pub const MAX_GEARS: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct BodyParams {
    /// Overrides the mass computed from the hull; `0` keeps the computed mass.
    pub mass_override: f32,
    pub mass_center_override: Vector3<f32>,
    /// Extra downward acceleration, as a fraction of gravity.
    pub add_gravity: f32,
    pub tilt_force: f32,
    pub tilt_force_height: f32,
    pub counter_torque_factor: f32,
    pub keep_upright_torque: f32,
    /// Degrees per second.
    pub max_angular_velocity: f32,
    pub hull_half_extents: Vector3<f32>,
}

impl Default for BodyParams {
    fn default() -> Self {
        Self {
            mass_override: 0.0,
            mass_center_override: Vector3::zeros(),
            add_gravity: 0.0,
            tilt_force: 0.0,
            tilt_force_height: 0.0,
            counter_torque_factor: 1.0,
            keep_upright_torque: 0.0,
            max_angular_velocity: 720.0,
            hull_half_extents: Vector3::new(1.0, 0.5, 2.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WheelParams {
    pub radius: f32,
    pub mass: f32,
    pub inertia: f32,
    pub damping: f32,
    pub rot_damping: f32,
    pub friction_scale: f32,
    pub material: Option<String>,
    pub skid_material: Option<String>,
    pub brake_material: Option<String>,
}

impl Default for WheelParams {
    fn default() -> Self {
        Self {
            radius: 0.4,
            mass: 25.0,
            inertia: 0.5,
            damping: 0.0,
            rot_damping: 0.0,
            friction_scale: 1.0,
            material: None,
            skid_material: None,
            brake_material: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuspensionParams {
    pub spring_constant: f32,
    pub spring_damping: f32,
    pub stabilizer_constant: f32,
    pub spring_damping_compression: f32,
    pub max_body_force: f32,
}

impl Default for SuspensionParams {
    fn default() -> Self {
        Self {
            spring_constant: 80.0,
            spring_damping: 0.6,
            stabilizer_constant: 0.0,
            spring_damping_compression: 0.6,
            max_body_force: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AxleParams {
    /// Axle center in vehicle space. Derived from the model's wheel
    /// attachments at initialization for the first two axles.
    pub offset: Vector3<f32>,
    /// Right wheel position relative to `offset`.
    pub wheel_offset: Vector3<f32>,
    /// Vertical wheel travel between full compression and full droop.
    /// Derived from the rig like `offset`.
    pub travel: f32,
    pub wheel: WheelParams,
    pub suspension: SuspensionParams,
    pub torque_factor: f32,
    pub brake_factor: f32,
}

impl Default for AxleParams {
    fn default() -> Self {
        Self {
            offset: Vector3::zeros(),
            wheel_offset: Vector3::zeros(),
            travel: 0.0,
            wheel: WheelParams::default(),
            suspension: SuspensionParams::default(),
            torque_factor: 1.0,
            brake_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoostParams {
    pub force: f32,
    /// Seconds of boost per activation.
    pub duration: f32,
    /// Seconds before boost can be used again.
    pub delay: f32,
    pub max_speed: f32,
    pub torque_boost: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineParams {
    pub horsepower: f32,
    pub max_speed: f32,
    pub max_reverse_speed: f32,
    pub max_rpm: f32,
    pub axle_ratio: f32,
    /// Seconds to ramp throttle from zero to full. `0` is instant.
    pub throttle_time: f32,
    pub gear_ratios: Vec<f32>,
    pub shift_up_rpm: f32,
    pub shift_down_rpm: f32,
    pub auto_transmission: bool,
    pub boost: BoostParams,
    pub autobrake_speed_gain: f32,
    pub autobrake_speed_factor: f32,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            horsepower: 200.0,
            max_speed: 40.0,
            max_reverse_speed: 10.0,
            max_rpm: 4000.0,
            axle_ratio: 4.0,
            throttle_time: 0.0,
            gear_ratios: vec![2.5, 1.5, 1.0],
            shift_up_rpm: 3000.0,
            shift_down_rpm: 1000.0,
            auto_transmission: true,
            boost: BoostParams::default(),
            autobrake_speed_gain: 1.0,
            autobrake_speed_factor: 0.0,
        }
    }
}

impl EngineParams {
    /// Throttle ramp in units per second.
    pub fn throttle_rate(&self) -> f32 {
        if self.throttle_time > 0.0 {
            1.0 / self.throttle_time
        } else {
            10_000.0
        }
    }

    pub fn has_boost(&self) -> bool {
        self.boost.delay > 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SteeringParams {
    pub degrees_slow: f32,
    pub degrees_fast: f32,
    pub degrees_boost: f32,
    pub steering_exponent: f32,
    pub speed_slow: f32,
    pub speed_fast: f32,
    pub steering_rate_slow: f32,
    pub steering_rate_fast: f32,
    pub steering_rest_rate_slow: f32,
    pub steering_rest_rate_fast: f32,
    pub turn_throttle_reduce_slow: f32,
    pub turn_throttle_reduce_fast: f32,
    pub brake_steering_rate_factor: f32,
    pub throttle_steering_rest_rate_factor: f32,
    pub boost_steering_rest_rate_factor: f32,
    pub boost_steering_rate_factor: f32,
    pub power_slide_accel: f32,
    pub skid_allowed: bool,
    pub dust_cloud: bool,
}

impl Default for SteeringParams {
    fn default() -> Self {
        Self {
            degrees_slow: 45.0,
            degrees_fast: 20.0,
            degrees_boost: 10.0,
            steering_exponent: 1.0,
            speed_slow: 10.0,
            speed_fast: 30.0,
            steering_rate_slow: 4.0,
            steering_rate_fast: 2.0,
            steering_rest_rate_slow: 4.0,
            steering_rest_rate_fast: 2.0,
            turn_throttle_reduce_slow: 0.0,
            turn_throttle_reduce_fast: 0.0,
            brake_steering_rate_factor: 1.0,
            throttle_steering_rest_rate_factor: 1.0,
            boost_steering_rest_rate_factor: 1.0,
            boost_steering_rate_factor: 1.0,
            power_slide_accel: 0.0,
            skid_allowed: true,
            dust_cloud: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleScriptParams {
    pub wheels_per_axle: usize,
    pub body: BodyParams,
    pub engine: EngineParams,
    pub steering: SteeringParams,
    pub axles: Vec<AxleParams>,
}

impl Default for VehicleScriptParams {
    fn default() -> Self {
        Self {
            wheels_per_axle: 2,
            body: BodyParams::default(),
            engine: EngineParams::default(),
            steering: SteeringParams::default(),
            axles: vec![AxleParams::default(), AxleParams::default()],
        }
    }
}

impl VehicleScriptParams {
    pub fn wheel_count(&self) -> usize {
        self.axles.len() * self.wheels_per_axle
    }

    /// Reads the `vehicle` block. Keys absent from the script keep their
    /// defaults; malformed values and impossible layouts are rejected.
    pub fn from_block(vehicle: KvBlock<'_>) -> Result<Self, ScriptError> {
        let mut params = Self {
            wheels_per_axle: vehicle.f32_or("wheelsperaxle", 2.0)? as usize,
            axles: Vec::new(),
            ..Self::default()
        };

        if params.wheels_per_axle == 0 || params.wheels_per_axle > MAX_WHEELS_PER_AXLE {
            return Err(ScriptError::TooManyWheelsPerAxle(params.wheels_per_axle));
        }

        if let Some(body) = vehicle.block("body") {
            params.body = parse_body(body)?;
        }
        if let Some(engine) = vehicle.block("engine") {
            params.engine = parse_engine(engine)?;
        }
        if let Some(steering) = vehicle.block("steering") {
            params.steering = parse_steering(steering)?;
        }
        for axle in vehicle.blocks("axle") {
            params.axles.push(parse_axle(axle)?);
        }
        if params.axles.is_empty() {
            return Err(ScriptError::MissingBlock("axle"));
        }

        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ScriptError> {
        if self.axles.len() > MAX_AXLES {
            return Err(ScriptError::TooManyAxles(self.axles.len()));
        }
        if self.engine.gear_ratios.len() > MAX_GEARS {
            return Err(ScriptError::TooManyGears(self.engine.gear_ratios.len()));
        }
        let steering = &self.steering;
        if steering.speed_slow > steering.speed_fast {
            return Err(ScriptError::InvertedRange {
                what: "steering speed",
                slow: steering.speed_slow,
                fast: steering.speed_fast,
            });
        }

        let rates = [
            ("throttletime", self.engine.throttle_time),
            ("slowsteeringrate", steering.steering_rate_slow),
            ("faststeeringrate", steering.steering_rate_fast),
            ("steeringrestrateslow", steering.steering_rest_rate_slow),
            ("steeringrestratefast", steering.steering_rest_rate_fast),
            ("brakesteeringratefactor", steering.brake_steering_rate_factor),
            ("throttlesteeringrestratefactor", steering.throttle_steering_rest_rate_factor),
            ("booststeeringrestratefactor", steering.boost_steering_rest_rate_factor),
            ("booststeeringratefactor", steering.boost_steering_rate_factor),
        ];
        if let Some(&(key, value)) = rates.iter().find(|(_, v)| *v < 0.0) {
            return Err(ScriptError::NegativeRate { key, value });
        }
        Ok(())
    }
}

fn parse_body(block: KvBlock<'_>) -> Result<BodyParams, ScriptError> {
    let d = BodyParams::default();
    Ok(BodyParams {
        mass_override: block.f32_or("massoverride", d.mass_override)?,
        mass_center_override: block
            .vec3("masscenteroverride")?
            .unwrap_or(d.mass_center_override),
        add_gravity: block.f32_or("addgravity", d.add_gravity)?,
        tilt_force: block.f32_or("tiltforce", d.tilt_force)?,
        tilt_force_height: block.f32_or("tiltforceheight", d.tilt_force_height)?,
        counter_torque_factor: block.f32_or("countertorquefactor", d.counter_torque_factor)?,
        keep_upright_torque: block.f32_or("keepuprighttorque", d.keep_upright_torque)?,
        max_angular_velocity: block.f32_or("maxangularvelocity", d.max_angular_velocity)?,
        hull_half_extents: block.vec3("hullextents")?.unwrap_or(d.hull_half_extents),
    })
}

fn parse_engine(block: KvBlock<'_>) -> Result<EngineParams, ScriptError> {
    let d = EngineParams::default();
    let gear_ratios = block
        .texts("gear")
        .map(|g| crate::script::keyvalues::parse_f32("gear", g))
        .collect::<Result<Vec<_>, _>>()?;

    let boost = match block.block("boost") {
        Some(boost) => BoostParams {
            force: boost.f32_or("force", 0.0)?,
            duration: boost.f32_or("duration", 0.0)?,
            delay: boost.f32_or("delay", 0.0)?,
            max_speed: boost.f32_or("maxspeed", 0.0)?,
            torque_boost: boost.bool_or("torqueboost", false)?,
        },
        None => BoostParams::default(),
    };

    Ok(EngineParams {
        horsepower: block.f32_or("horsepower", d.horsepower)?,
        max_speed: block.f32_or("maxspeed", d.max_speed)?,
        max_reverse_speed: block.f32_or("maxreversespeed", d.max_reverse_speed)?,
        max_rpm: block.f32_or("maxrpm", d.max_rpm)?,
        axle_ratio: block.f32_or("axleratio", d.axle_ratio)?,
        throttle_time: block.f32_or("throttletime", d.throttle_time)?,
        gear_ratios: if gear_ratios.is_empty() {
            d.gear_ratios
        } else {
            gear_ratios
        },
        shift_up_rpm: block.f32_or("shiftuprpm", d.shift_up_rpm)?,
        shift_down_rpm: block.f32_or("shiftdownrpm", d.shift_down_rpm)?,
        auto_transmission: block.bool_or("autotransmission", d.auto_transmission)?,
        boost,
        autobrake_speed_gain: block.f32_or("autobrakespeedgain", d.autobrake_speed_gain)?,
        autobrake_speed_factor: block.f32_or("autobrakespeedfactor", d.autobrake_speed_factor)?,
    })
}

fn parse_steering(block: KvBlock<'_>) -> Result<SteeringParams, ScriptError> {
    let d = SteeringParams::default();
    Ok(SteeringParams {
        degrees_slow: block.f32_or("degreesslow", d.degrees_slow)?,
        degrees_fast: block.f32_or("degreesfast", d.degrees_fast)?,
        degrees_boost: block.f32_or("degreesboost", d.degrees_boost)?,
        steering_exponent: block.f32_or("steeringexponent", d.steering_exponent)?,
        speed_slow: block.f32_or("slowcarspeed", d.speed_slow)?,
        speed_fast: block.f32_or("fastcarspeed", d.speed_fast)?,
        steering_rate_slow: block.f32_or("slowsteeringrate", d.steering_rate_slow)?,
        steering_rate_fast: block.f32_or("faststeeringrate", d.steering_rate_fast)?,
        steering_rest_rate_slow: block.f32_or("steeringrestrateslow", d.steering_rest_rate_slow)?,
        steering_rest_rate_fast: block.f32_or("steeringrestratefast", d.steering_rest_rate_fast)?,
        turn_throttle_reduce_slow: block
            .f32_or("turnthrottlereduceslow", d.turn_throttle_reduce_slow)?,
        turn_throttle_reduce_fast: block
            .f32_or("turnthrottlereducefast", d.turn_throttle_reduce_fast)?,
        brake_steering_rate_factor: block
            .f32_or("brakesteeringratefactor", d.brake_steering_rate_factor)?,
        throttle_steering_rest_rate_factor: block.f32_or(
            "throttlesteeringrestratefactor",
            d.throttle_steering_rest_rate_factor,
        )?,
        boost_steering_rest_rate_factor: block
            .f32_or("booststeeringrestratefactor", d.boost_steering_rest_rate_factor)?,
        boost_steering_rate_factor: block
            .f32_or("booststeeringratefactor", d.boost_steering_rate_factor)?,
        power_slide_accel: block.f32_or("powerslideaccel", d.power_slide_accel)?,
        skid_allowed: block.bool_or("skidallowed", d.skid_allowed)?,
        dust_cloud: block.bool_or("dustcloud", d.dust_cloud)?,
    })
}

fn parse_axle(block: KvBlock<'_>) -> Result<AxleParams, ScriptError> {
    let wheel = match block.block("wheel") {
        Some(w) => {
            let d = WheelParams::default();
            WheelParams {
                radius: w.f32_or("radius", d.radius)?,
                mass: w.f32_or("mass", d.mass)?,
                inertia: w.f32_or("inertia", d.inertia)?,
                damping: w.f32_or("damping", d.damping)?,
                rot_damping: w.f32_or("rotdamping", d.rot_damping)?,
                friction_scale: w.f32_or("frictionscale", d.friction_scale)?,
                material: w.text("material").map(str::to_string),
                skid_material: w.text("skidmaterial").map(str::to_string),
                brake_material: w.text("brakematerial").map(str::to_string),
            }
        }
        None => WheelParams::default(),
    };

    let suspension = match block.block("suspension") {
        Some(s) => {
            let d = SuspensionParams::default();
            SuspensionParams {
                spring_constant: s.f32_or("springconstant", d.spring_constant)?,
                spring_damping: s.f32_or("springdamping", d.spring_damping)?,
                stabilizer_constant: s.f32_or("stabilizerconstant", d.stabilizer_constant)?,
                spring_damping_compression: s
                    .f32_or("springdampingcompression", d.spring_damping_compression)?,
                max_body_force: s.f32_or("maxbodyforce", d.max_body_force)?,
            }
        }
        None => SuspensionParams::default(),
    };

    // Axles past the second have no wheel attachments on the model, so the
    // script may place them directly.
    let d = AxleParams::default();
    Ok(AxleParams {
        offset: block.vec3("offset")?.unwrap_or_else(Vector3::zeros),
        wheel_offset: block.vec3("wheeloffset")?.unwrap_or_else(Vector3::zeros),
        travel: block.f32_or("travel", 0.0)?,
        wheel,
        suspension,
        torque_factor: block.f32_or("torquefactor", d.torque_factor)?,
        brake_factor: block.f32_or("brakefactor", d.brake_factor)?,
    })
}
