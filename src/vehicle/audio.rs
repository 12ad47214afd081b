//! Engine sound state machine plus crash and skid sounds.
//!
//! The director owns the discrete sound state and the one looping engine
//! sound that goes with it. Looping engine sounds are only started and
//! stopped when the state actually changes.

use crate::script::sounds::{SoundState, VehicleSoundScript};
use crate::vehicle::external::SoundEmitter;
use tracing::debug;

/// Fade applied to the outgoing engine loop on every state change.
const STATE_FADE_TIME: f32 = 0.25;
const SKID_FADE_TIME: f32 = 0.5;
/// Speed fraction under which a slowing engine settles back to idle.
const IDLE_SPEED_FRACTION: f32 = 0.02;
/// Slowing from above this speed fraction uses the high-speed slowdown sound.
const HIGHSPEED_SLOWDOWN_FRACTION: f32 = 0.5;

/// Per-tick inputs to the sound state machine.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SoundUpdateInfo {
    /// Absolute speed over the engine's top speed.
    pub speed_fraction: f32,
    pub throttle_down: bool,
    pub reverse: bool,
    pub turbo: bool,
    pub in_water: bool,
    /// Driver left or the engine was switched off.
    pub exit: bool,
}

pub struct VehicleAudioDirector {
    sounds: VehicleSoundScript,
    state: SoundState,
    state_entered: f32,
    /// Engine sound currently looping, if any.
    active_loop: Option<String>,
    active_skid: Option<String>,
    sound_gear: u8,
    /// mph at the previous crash check.
    last_speed: f32,
    pitch: f32,
}

impl VehicleAudioDirector {
    pub fn new(sounds: VehicleSoundScript) -> Self {
        Self {
            sounds,
            state: SoundState::None,
            state_entered: 0.0,
            active_loop: None,
            active_skid: None,
            sound_gear: 0,
            last_speed: 0.0,
            pitch: 0.0,
        }
    }

    pub fn state(&self) -> SoundState {
        self.state
    }

    pub fn state_entered(&self) -> f32 {
        self.state_entered
    }

    pub fn sound_gear(&self) -> u8 {
        self.sound_gear
    }

    /// Smoothed engine pitch in speed-fraction units.
    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn active_loop(&self) -> Option<&str> {
        self.active_loop.as_deref()
    }

    /// Swap in a reloaded sound script. The running loop keeps playing until
    /// the next state change.
    pub fn reload(&mut self, sounds: VehicleSoundScript) {
        self.sounds = sounds;
    }

    /// Engine start. Ignored unless the engine is currently silent.
    pub fn start(&mut self, now: f32, in_water: bool, emitter: &mut dyn SoundEmitter) {
        if !matches!(
            self.state,
            SoundState::None | SoundState::Shutdown | SoundState::ShutdownWater
        ) {
            return;
        }
        let state = if in_water {
            SoundState::StartWater
        } else {
            SoundState::StartIdle
        };
        self.enter(state, now, 0.0, emitter);
    }

    /// Evaluate at most one transition for this tick.
    pub fn update(&mut self, now: f32, info: &SoundUpdateInfo, emitter: &mut dyn SoundEmitter) {
        self.sound_gear = self.sounds.gear_for_speed(info.speed_fraction);
        let factor = self
            .sounds
            .gears
            .get(self.sound_gear as usize)
            .map_or(1.0, |g| g.speed_approach_factor)
            .clamp(0.0, 1.0);
        self.pitch += (info.speed_fraction - self.pitch) * factor;

        if let Some(forced) = self.forced_state(info) {
            self.enter(forced, now, info.speed_fraction, emitter);
            return;
        }

        let Some(next) = self.next_state(info) else {
            return;
        };
        if next == self.state {
            return;
        }
        if now - self.state_entered < self.sounds.min_time(self.state) {
            return;
        }
        self.enter(next, now, info.speed_fraction, emitter);
    }

    /// Shutdown requests skip the dwell time.
    fn forced_state(&self, info: &SoundUpdateInfo) -> Option<SoundState> {
        use SoundState::*;
        if info.exit && !matches!(self.state, None | Shutdown | ShutdownWater) {
            return Some(Shutdown);
        }
        if info.in_water && !matches!(self.state, None | StartWater | ShutdownWater | Shutdown) {
            return Some(ShutdownWater);
        }
        Option::None
    }

    fn next_state(&self, info: &SoundUpdateInfo) -> Option<SoundState> {
        use SoundState::*;
        let gear = self.sound_gear;
        let next = match self.state {
            None | Shutdown | ShutdownWater => return Option::None,
            StartWater if info.in_water => ShutdownWater,
            StartWater | StartIdle => Idle,
            Idle => {
                if info.reverse {
                    Reverse
                } else if info.throttle_down {
                    Gear(gear)
                } else {
                    return Option::None;
                }
            }
            Gear(current) | GearResume(current) => {
                if info.turbo {
                    Turbo
                } else if info.reverse {
                    Reverse
                } else if !info.throttle_down {
                    Slowdown
                } else if gear != current {
                    Gear(gear)
                } else {
                    return Option::None;
                }
            }
            Slowdown | SlowdownHighspeed => {
                if info.reverse {
                    Reverse
                } else if info.throttle_down {
                    GearResume(gear)
                } else if info.speed_fraction < IDLE_SPEED_FRACTION {
                    Idle
                } else {
                    return Option::None;
                }
            }
            Turbo => {
                if info.turbo {
                    return Option::None;
                } else if info.throttle_down {
                    Gear(gear)
                } else {
                    Slowdown
                }
            }
            Reverse => {
                if info.reverse {
                    return Option::None;
                } else if info.throttle_down {
                    Gear(gear)
                } else {
                    Idle
                }
            }
        };
        Some(next)
    }

    fn enter(
        &mut self,
        state: SoundState,
        now: f32,
        speed_fraction: f32,
        emitter: &mut dyn SoundEmitter,
    ) {
        debug!(from = %self.state, to = %state, now, "engine sound state");

        if let Some(previous) = self.active_loop.take() {
            emitter.stop_sound(&previous, STATE_FADE_TIME);
        }

        let slot = if state == SoundState::Slowdown
            && speed_fraction > HIGHSPEED_SLOWDOWN_FRACTION
            && self.sounds.sound(SoundState::SlowdownHighspeed).is_some()
        {
            SoundState::SlowdownHighspeed
        } else {
            state
        };

        if let Some(sound) = self.sounds.sound(slot) {
            if state.is_looping() {
                emitter.play_looping_sound(sound);
                self.active_loop = Some(sound.to_string());
            } else {
                emitter.play_sound(sound);
            }
        }

        self.state = state;
        self.state_entered = now;
    }

    /// Play the first crash sound matching a sudden loss of speed (mph).
    /// Returns the sound played.
    pub fn check_crash(&mut self, speed: f32, emitter: &mut dyn SoundEmitter) -> Option<String> {
        let last = self.last_speed;
        self.last_speed = speed;
        if last.abs() <= speed.abs() {
            return None;
        }

        let delta = (last - speed).abs();
        let gear = u32::from(self.sound_gear);
        let crash = self.sounds.crash_sounds.iter().find(|crash| {
            crash.gear_limit != 0
                && gear <= crash.gear_limit
                && last.abs() >= crash.min_speed
                && delta >= crash.min_speed_change
        })?;

        debug!(sound = %crash.sound, last, speed, "crash sound");
        emitter.play_sound(&crash.sound);
        Some(crash.sound.clone())
    }

    /// Start or stop the skid loop. `friction` is the skid surface's friction
    /// while skidding, `None` otherwise.
    pub fn update_skid(&mut self, friction: Option<f32>, emitter: &mut dyn SoundEmitter) {
        match (friction, self.active_skid.is_some()) {
            (Some(friction), false) => {
                if let Some(sound) = self.sounds.skid_sound(friction) {
                    emitter.play_looping_sound(sound);
                    self.active_skid = Some(sound.to_string());
                }
            }
            (None, true) => {
                if let Some(sound) = self.active_skid.take() {
                    emitter.stop_sound(&sound, SKID_FADE_TIME);
                }
            }
            _ => {}
        }
    }

    /// Silence everything, for teardown.
    pub fn stop(&mut self, emitter: &mut dyn SoundEmitter) {
        if let Some(sound) = self.active_loop.take() {
            emitter.stop_sound(&sound, 0.0);
        }
        if let Some(sound) = self.active_skid.take() {
            emitter.stop_sound(&sound, 0.0);
        }
        self.state = SoundState::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::keyvalues::{parse, KvBlock};
    use crate::sim::events::{EventRecorder, VehicleEvent};

    const SOUNDS: &str = r#"
        "vehicle_sounds"
        {
            "gear" { "max_speed" "0.3" "speed_approach_factor" "1.0" }
            "gear" { "max_speed" "0.7" "speed_approach_factor" "0.5" }
            "gear" { "max_speed" "1.0" "speed_approach_factor" "0.5" }
            "state" { "name" "SS_START_IDLE" "sound" "jeep.start" }
            "state" { "name" "SS_IDLE" "sound" "jeep.idle" "min_time" "1.0" }
            "state" { "name" "SS_GEAR_0" "sound" "jeep.gear0" }
            "state" { "name" "SS_GEAR_1" "sound" "jeep.gear1" }
            "state" { "name" "SS_GEAR_1_RESUME" "sound" "jeep.gear1_resume" }
            "state" { "name" "SS_SLOWDOWN" "sound" "jeep.slowdown" }
            "state" { "name" "SS_SLOWDOWN_HIGHSPEED" "sound" "jeep.slowdown_fast" }
            "state" { "name" "SS_SHUTDOWN" "sound" "jeep.stop" }
            "state" { "name" "SS_TURBO" "sound" "jeep.turbo" "min_time" "2.0" }
            "crashsound" { "min_speed" "20" "min_speed_change" "15" "sound" "jeep.crash_hard" "gear_limit" "4" }
            "crashsound" { "min_speed" "5" "min_speed_change" "5" "sound" "jeep.crash_soft" "gear_limit" "1" }
            "crashsound" { "min_speed" "0" "min_speed_change" "0" "sound" "jeep.never" }
            "skid_normalfriction" "jeep.skid"
        }
    "#;

    fn director() -> VehicleAudioDirector {
        let root = parse(SOUNDS).unwrap();
        let block = KvBlock::new(&root).block("vehicle_sounds").unwrap();
        VehicleAudioDirector::new(VehicleSoundScript::from_block(block).unwrap())
    }

    /// Started and settled in idle at t = 0.
    fn idling(recorder: &mut EventRecorder) -> VehicleAudioDirector {
        let mut d = director();
        d.start(0.0, false, recorder);
        d.update(0.0, &SoundUpdateInfo::default(), recorder);
        assert_eq!(d.state(), SoundState::Idle);
        recorder.drain();
        d
    }

    fn throttle(speed_fraction: f32) -> SoundUpdateInfo {
        SoundUpdateInfo {
            speed_fraction,
            throttle_down: true,
            ..Default::default()
        }
    }

    #[test]
    fn start_plays_one_shot_then_idle_loop() {
        let mut rec = EventRecorder::new();
        let mut d = director();
        d.start(0.0, false, &mut rec);
        d.update(0.0, &SoundUpdateInfo::default(), &mut rec);
        assert_eq!(
            rec.drain(),
            vec![
                VehicleEvent::PlaySound { name: "jeep.start".into() },
                VehicleEvent::PlayLoopingSound { name: "jeep.idle".into() },
            ]
        );
        assert_eq!(d.active_loop(), Some("jeep.idle"));
    }

    #[test]
    fn gear_request_waits_for_idle_dwell_time() {
        let mut rec = EventRecorder::new();
        let mut d = idling(&mut rec);

        d.update(0.3, &throttle(0.4), &mut rec);
        assert_eq!(d.state(), SoundState::Idle);
        assert!(rec.drain().is_empty());

        d.update(1.1, &throttle(0.4), &mut rec);
        assert_eq!(d.state(), SoundState::Gear(1));
        assert_eq!(
            rec.drain(),
            vec![
                VehicleEvent::StopSound { name: "jeep.idle".into(), fade: 0.25 },
                VehicleEvent::PlayLoopingSound { name: "jeep.gear1".into() },
            ]
        );

        // Holding the same gear changes nothing.
        d.update(1.2, &throttle(0.4), &mut rec);
        assert!(rec.drain().is_empty());
    }

    #[test]
    fn dwell_boundary_is_inclusive() {
        let mut rec = EventRecorder::new();
        let mut d = idling(&mut rec);
        d.update(0.999, &throttle(0.1), &mut rec);
        assert_eq!(d.state(), SoundState::Idle);
        d.update(1.0, &throttle(0.1), &mut rec);
        assert_eq!(d.state(), SoundState::Gear(0));
    }

    #[test]
    fn exit_request_ignores_dwell_time() {
        let mut rec = EventRecorder::new();
        let mut d = idling(&mut rec);
        let exit = SoundUpdateInfo {
            exit: true,
            ..Default::default()
        };
        d.update(0.1, &exit, &mut rec);
        assert_eq!(d.state(), SoundState::Shutdown);
        assert_eq!(
            rec.drain(),
            vec![
                VehicleEvent::StopSound { name: "jeep.idle".into(), fade: 0.25 },
                VehicleEvent::PlaySound { name: "jeep.stop".into() },
            ]
        );

        // Already shut down: nothing more.
        d.update(0.2, &exit, &mut rec);
        assert!(rec.drain().is_empty());
    }

    #[test]
    fn water_forces_stall_and_start_in_water_stalls_after_sputter() {
        let mut rec = EventRecorder::new();
        let mut d = idling(&mut rec);
        let wet = SoundUpdateInfo {
            in_water: true,
            ..Default::default()
        };
        d.update(0.1, &wet, &mut rec);
        assert_eq!(d.state(), SoundState::ShutdownWater);

        d.start(0.2, true, &mut rec);
        assert_eq!(d.state(), SoundState::StartWater);
        d.update(0.3, &wet, &mut rec);
        assert_eq!(d.state(), SoundState::ShutdownWater);
    }

    #[test]
    fn releasing_throttle_slows_down_then_idles() {
        let mut rec = EventRecorder::new();
        let mut d = idling(&mut rec);
        d.update(1.0, &throttle(0.2), &mut rec);
        assert_eq!(d.state(), SoundState::Gear(0));

        let coast = |speed_fraction| SoundUpdateInfo {
            speed_fraction,
            ..Default::default()
        };
        d.update(1.5, &coast(0.2), &mut rec);
        assert_eq!(d.state(), SoundState::Slowdown);
        rec.drain();

        d.update(1.6, &coast(0.1), &mut rec);
        assert_eq!(d.state(), SoundState::Slowdown);
        d.update(1.7, &coast(0.01), &mut rec);
        assert_eq!(d.state(), SoundState::Idle);
    }

    #[test]
    fn throttle_during_slowdown_resumes_gear() {
        let mut rec = EventRecorder::new();
        let mut d = idling(&mut rec);
        d.update(1.0, &throttle(0.5), &mut rec);
        d.update(
            1.1,
            &SoundUpdateInfo {
                speed_fraction: 0.5,
                ..Default::default()
            },
            &mut rec,
        );
        rec.drain();
        d.update(1.2, &throttle(0.5), &mut rec);
        assert_eq!(d.state(), SoundState::GearResume(1));
        assert_eq!(d.active_loop(), Some("jeep.gear1_resume"));
    }

    #[test]
    fn fast_slowdown_uses_highspeed_slot() {
        let mut rec = EventRecorder::new();
        let mut d = idling(&mut rec);
        d.update(1.0, &throttle(0.9), &mut rec);
        rec.drain();
        d.update(
            1.1,
            &SoundUpdateInfo {
                speed_fraction: 0.9,
                ..Default::default()
            },
            &mut rec,
        );
        assert_eq!(d.state(), SoundState::Slowdown);
        assert_eq!(d.active_loop(), Some("jeep.slowdown_fast"));
    }

    #[test]
    fn turbo_holds_for_its_dwell() {
        let mut rec = EventRecorder::new();
        let mut d = idling(&mut rec);
        d.update(1.0, &throttle(0.9), &mut rec);
        let boosting = SoundUpdateInfo {
            turbo: true,
            ..throttle(0.9)
        };
        d.update(1.1, &boosting, &mut rec);
        assert_eq!(d.state(), SoundState::Turbo);

        d.update(2.0, &throttle(0.9), &mut rec);
        assert_eq!(d.state(), SoundState::Turbo);
        d.update(3.2, &throttle(0.9), &mut rec);
        assert_eq!(d.state(), SoundState::Gear(2));
    }

    #[test]
    fn state_without_sound_is_silent() {
        let mut rec = EventRecorder::new();
        let mut d = idling(&mut rec);
        let back = SoundUpdateInfo {
            reverse: true,
            ..Default::default()
        };
        d.update(1.0, &back, &mut rec);
        assert_eq!(d.state(), SoundState::Reverse);
        assert_eq!(
            rec.drain(),
            vec![VehicleEvent::StopSound { name: "jeep.idle".into(), fade: 0.25 }]
        );
        assert_eq!(d.active_loop(), None);
    }

    #[test]
    fn crash_needs_deceleration_and_matching_entry() {
        let mut rec = EventRecorder::new();
        let mut d = director();

        assert_eq!(d.check_crash(30.0, &mut rec), None);
        // Hard stop from 30 mph in sound gear 0.
        assert_eq!(d.check_crash(10.0, &mut rec).as_deref(), Some("jeep.crash_hard"));
        // Accelerating never crashes.
        assert_eq!(d.check_crash(12.0, &mut rec), None);
        // Small bump: only the soft entry's thresholds are met.
        assert_eq!(d.check_crash(6.0, &mut rec).as_deref(), Some("jeep.crash_soft"));
        // Below every enabled entry's change threshold.
        assert_eq!(d.check_crash(5.0, &mut rec), None);

        assert_eq!(
            rec.drain(),
            vec![
                VehicleEvent::PlaySound { name: "jeep.crash_hard".into() },
                VehicleEvent::PlaySound { name: "jeep.crash_soft".into() },
            ]
        );
    }

    #[test]
    fn crash_entries_respect_gear_limit() {
        let mut rec = EventRecorder::new();
        let mut d = director();
        // Sound gear 2: the soft entry (limit 1) no longer applies.
        d.update(0.0, &throttle(0.9), &mut rec);
        assert_eq!(d.sound_gear(), 2);
        d.check_crash(12.0, &mut rec);
        assert_eq!(d.check_crash(5.0, &mut rec), None);
    }

    #[test]
    fn skid_loop_starts_once_and_stops() {
        let mut rec = EventRecorder::new();
        let mut d = director();
        d.update_skid(Some(0.8), &mut rec);
        d.update_skid(Some(0.8), &mut rec);
        d.update_skid(None, &mut rec);
        d.update_skid(None, &mut rec);
        assert_eq!(
            rec.drain(),
            vec![
                VehicleEvent::PlayLoopingSound { name: "jeep.skid".into() },
                VehicleEvent::StopSound { name: "jeep.skid".into(), fade: 0.5 },
            ]
        );

        // No sound configured for high friction.
        d.update_skid(Some(1.0), &mut rec);
        assert!(rec.drain().is_empty());
    }

    #[test]
    fn stop_silences_engine_and_skid() {
        let mut rec = EventRecorder::new();
        let mut d = idling(&mut rec);
        d.update_skid(Some(0.5), &mut rec);
        rec.drain();
        d.stop(&mut rec);
        assert_eq!(d.state(), SoundState::None);
        assert_eq!(rec.drain().len(), 2);
    }

    #[test]
    fn pitch_follows_speed_with_gear_smoothing() {
        let mut rec = EventRecorder::new();
        let mut d = director();
        d.update(0.0, &throttle(0.6), &mut rec);
        assert!((d.pitch() - 0.3).abs() < 1e-6);
    }
}
