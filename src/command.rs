//! The command data model: what a client can ask the service to do, and the
//! small validation/normalization rules that apply before a command ever
//! reaches the dispatcher.

use crate::error::VibratorError;

/// Maximum number of (timing, amplitude) steps in a [`Waveform`].
pub const MAX_WAVEFORM_LEN: usize = 24;

/// Size, in bytes, of a calibration blob. Not specified numerically by the
/// protocol this service implements; picked to match the smallest calibration
/// record observed on comparable vibrator HALs. See DESIGN.md.
pub const VIBRATOR_CALIBVALUE_MAX: usize = 12;

/// Driver magnitude band. `LIGHT_MAG` is also the floor for every
/// write, `STRONG_MAG` the ceiling.
pub const LIGHT_MAG: i16 = 0x3FFF;
pub const MEDIUM_MAG: i16 = 0x5FFF;
pub const STRONG_MAG: i16 = 0x7FFF;

/// Predefined-effect strength. `DefaultEs` leaves the current magnitude
/// untouched rather than mapping to a fixed band value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    Light,
    Medium,
    Strong,
    DefaultEs,
}

impl Strength {
    pub fn from_wire(v: u8) -> Result<Self, VibratorError> {
        match v {
            0 => Ok(Strength::Light),
            1 => Ok(Strength::Medium),
            2 => Ok(Strength::Strong),
            3 => Ok(Strength::DefaultEs),
            other => Err(VibratorError::InvalidArgument(format!(
                "strength out of range: {other}"
            ))),
        }
    }

    /// The magnitude to latch for this strength, given the magnitude already
    /// in effect (consulted only by `DefaultEs`).
    pub fn magnitude(self, current: i16) -> i16 {
        match self {
            Strength::Light => LIGHT_MAG,
            Strength::Medium => MEDIUM_MAG,
            Strength::Strong => STRONG_MAG,
            Strength::DefaultEs => current,
        }
    }
}

/// User-level intensity preference; also the master mute (`Off`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intensity {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Intensity {
    pub fn from_wire(v: u8) -> Result<Self, VibratorError> {
        match v {
            0 => Ok(Intensity::Off),
            1 => Ok(Intensity::Low),
            2 => Ok(Intensity::Medium),
            3 => Ok(Intensity::High),
            other => Err(VibratorError::InvalidArgument(format!(
                "intensity out of range: {other}"
            ))),
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }

    pub fn should_vibrate(self) -> bool {
        !matches!(self, Intensity::Off)
    }

    /// Scales a raw 0..=255 amplitude by this intensity. Callers must
    /// have already checked [`Intensity::should_vibrate`]; `Off` is defined
    /// here only so the match stays total.
    pub fn scale(self, raw: u8) -> u8 {
        match self {
            Intensity::Low => ((raw as u32 * 30) / 100) as u8,
            Intensity::Medium => ((raw as u32 * 60) / 100) as u8,
            Intensity::High => raw,
            Intensity::Off => 255,
        }
    }
}

/// A user-supplied alternating timing/amplitude sequence with optional
/// repeat index.
#[derive(Debug, Clone, Copy)]
pub struct Waveform {
    pub timings: [u32; MAX_WAVEFORM_LEN],
    pub amplitudes: [u8; MAX_WAVEFORM_LEN],
    pub length: u8,
    pub repeat: i8,
}

impl Waveform {
    /// Rejects `repeat < -1 || repeat >= length || length == 0 ||
    /// length > 24`.
    pub fn validate(&self) -> Result<(), VibratorError> {
        if self.length == 0 || self.length as usize > MAX_WAVEFORM_LEN {
            return Err(VibratorError::InvalidArgument(format!(
                "waveform length out of range: {}",
                self.length
            )));
        }
        if self.repeat < -1 || self.repeat as i16 >= self.length as i16 {
            return Err(VibratorError::InvalidArgument(format!(
                "waveform repeat out of range: {}",
                self.repeat
            )));
        }
        Ok(())
    }

    /// Rewrites `repeat` to `-1` when every timing from `repeat` onward is
    /// zero, so
    /// the worker never spawns a loop that would immediately exit anyway.
    pub fn normalize_repeat(&mut self) {
        if self.repeat >= 0 && !self.should_repeat() {
            self.repeat = -1;
        }
    }

    fn should_repeat(&self) -> bool {
        if self.repeat < 0 {
            return false;
        }
        let from = self.repeat as usize;
        let len = self.length as usize;
        (from..len).any(|j| self.timings[j] != 0)
    }
}

/// A simple on/off/count repeat pattern ("interval play").
#[derive(Debug, Clone, Copy)]
pub struct IntervalSpec {
    pub duration_ms: i32,
    pub interval_ms: i32,
    pub count: i16,
}

impl IntervalSpec {
    /// Rejects `duration <= 0 || interval < 0 || count < 0`.
    pub fn validate(&self) -> Result<(), VibratorError> {
        if self.duration_ms <= 0 {
            return Err(VibratorError::InvalidArgument(
                "interval duration must be positive".into(),
            ));
        }
        if self.interval_ms < 0 {
            return Err(VibratorError::InvalidArgument(
                "interval gap must be non-negative".into(),
            ));
        }
        if self.count < 0 {
            return Err(VibratorError::InvalidArgument(
                "interval count must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// One step of a composite effect (deferred, see DESIGN.md).
#[cfg(feature = "composition")]
#[derive(Debug, Clone, Copy)]
pub struct CompositionPrimitive {
    pub effect_id: i32,
    pub delay_ms: i32,
    pub scale: f32,
}

/// The full set of haptic commands a client may issue, one per connection.
#[derive(Debug, Clone)]
pub enum Command {
    Waveform(Waveform),
    Interval(IntervalSpec),
    PredefinedEffect { effect_id: i32, strength: Strength },
    Primitive { effect_id: i32, amplitude: f32 },
    Start { timeout_ms: u32 },
    Stop,
    SetAmplitude { amplitude: u8 },
    SetIntensity { intensity: Intensity },
    GetIntensity,
    GetCapabilities,
    Calibrate,
    SetCalibValue { calib: [u8; VIBRATOR_CALIBVALUE_MAX] },
    #[cfg(feature = "composition")]
    Composition(Vec<CompositionPrimitive>),
}

impl Command {
    /// Validation shared by the non-waveform commands, excluding
    /// `Waveform`/`Interval` whose own types carry a `validate` method.
    pub fn validate_primitive(effect_id: i32, amplitude: f32) -> Result<(), VibratorError> {
        let _ = effect_id;
        if !(0.0..=1.0).contains(&amplitude) {
            return Err(VibratorError::InvalidArgument(format!(
                "primitive amplitude out of range: {amplitude}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(length: u8, repeat: i8, timings: &[u32]) -> Waveform {
        let mut t = [0u32; MAX_WAVEFORM_LEN];
        t[..timings.len()].copy_from_slice(timings);
        Waveform {
            timings: t,
            amplitudes: [0; MAX_WAVEFORM_LEN],
            length,
            repeat,
        }
    }

    #[test]
    fn waveform_validate_rejects_out_of_range_repeat() {
        assert!(wave(3, 3, &[1, 1, 1]).validate().is_err());
        assert!(wave(3, -2, &[1, 1, 1]).validate().is_err());
        assert!(wave(0, -1, &[]).validate().is_err());
        assert!(wave(3, -1, &[1, 1, 1]).validate().is_ok());
    }

    #[test]
    fn should_repeat_false_when_tail_all_zero() {
        let mut w = wave(4, 2, &[5, 5, 0, 0]);
        w.normalize_repeat();
        assert_eq!(w.repeat, -1);
    }

    #[test]
    fn should_repeat_true_when_tail_has_nonzero() {
        let mut w = wave(4, 2, &[5, 5, 0, 9]);
        w.normalize_repeat();
        assert_eq!(w.repeat, 2);
    }

    #[test]
    fn intensity_scale_boundaries() {
        assert_eq!(Intensity::High.scale(255), 255);
        assert_eq!(Intensity::Low.scale(100), 30);
        assert_eq!(Intensity::Medium.scale(100), 60);
    }
}
