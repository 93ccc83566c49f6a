//! The force-feedback device abstraction: a thin, stateful wrapper
//! around the motor device file, generic over the small [`FfDevice`] trait
//! grounded on this repo's existing `FfbDriver` trait (`src/driver.rs`) —
//! the same separation between "talk to the real hardware" and "the rest of
//! the program".

use std::io;

use crate::command::{LIGHT_MAG, STRONG_MAG};
use crate::error::{VibratorError, VibratorResult};

/// A kernel-allocated effect id. `None` means "no effect currently
/// uploaded".
pub type EffectSlot = i16;

/// Force-feedback feature bits, as queried from the driver at boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FfFeatureBits {
    pub constant: bool,
    pub periodic: bool,
}

impl FfFeatureBits {
    pub fn any_usable(self) -> bool {
        self.constant || self.periodic
    }

    /// The `capabilities: i32` bitmask returned to clients by
    /// `GetCapabilities`. Bit 0 = constant, bit 1 = periodic.
    pub fn to_wire(self) -> i32 {
        (self.constant as i32) | ((self.periodic as i32) << 1)
    }
}

/// The raw synchronous operations the FF kernel driver exposes. Everything
/// above this trait (the [`super::dispatcher::Dispatcher`] and the
/// [`super::playback`] engine) is written against this interface, never
/// against a concrete transport, so it can run equally against the real
/// ioctl device or an in-memory mock in tests.
pub trait FfDevice: Send {
    fn query_features(&mut self) -> io::Result<FfFeatureBits>;
    fn upload_constant(&mut self, level: i16, length_ms: u32) -> io::Result<EffectSlot>;
    /// Uploads a periodic-custom effect encoding a predefined effect id;
    /// returns the new slot and the (possibly driver-populated) custom data
    /// buffer, from which the adapter recovers `play_length_ms`.
    fn upload_periodic_custom(
        &mut self,
        magnitude: i16,
        custom: [u16; 3],
    ) -> io::Result<(EffectSlot, [u16; 3])>;
    fn play(&mut self, slot: EffectSlot) -> io::Result<()>;
    fn remove(&mut self, slot: EffectSlot) -> io::Result<()>;
    fn set_gain_raw(&mut self, magnitude: i16) -> io::Result<()>;
    fn read_calib(&mut self, out: &mut [u8]) -> io::Result<()>;
    fn write_calib(&mut self, data: &[u8]) -> io::Result<()>;
}

/// The owned FF device state the dispatcher exclusively mutates: current
/// slot, magnitude, amplitude, capabilities, and intensity.
pub struct FfAdapter<D: FfDevice> {
    device: D,
    current_effect_slot: Option<EffectSlot>,
    current_magnitude: i16,
    current_amplitude: u8,
    capabilities: FfFeatureBits,
}

impl<D: FfDevice> FfAdapter<D> {
    pub fn open(mut device: D) -> VibratorResult<Self> {
        let capabilities = device
            .query_features()
            .map_err(|e| VibratorError::NoDevice(e.to_string()))?;
        if !capabilities.any_usable() {
            return Err(VibratorError::NoDevice(
                "device lacks FF_CONSTANT and FF_PERIODIC".into(),
            ));
        }
        Ok(FfAdapter {
            device,
            current_effect_slot: None,
            current_magnitude: STRONG_MAG,
            current_amplitude: 255,
            capabilities,
        })
    }

    pub fn capabilities(&self) -> FfFeatureBits {
        self.capabilities
    }

    /// Exposes the underlying device for assertions against its call log.
    /// Test-only, since production callers only ever go through the
    /// adapter's own methods.
    #[cfg(test)]
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn current_magnitude(&self) -> i16 {
        self.current_magnitude
    }

    pub fn set_magnitude(&mut self, magnitude: i16) {
        self.current_magnitude = clamp_magnitude(magnitude);
    }

    pub fn current_amplitude(&self) -> u8 {
        self.current_amplitude
    }

    pub fn set_current_amplitude(&mut self, amplitude: u8) {
        self.current_amplitude = amplitude;
    }

    fn invalidate_slot(&mut self) {
        self.current_effect_slot = None;
    }

    /// `effect_id = None` uploads a constant effect of
    /// `current_magnitude`/`timeout_ms`; `Some(id)` uploads a
    /// periodic-custom effect encoding the predefined id and returns the
    /// driver-reported duration. `effect_id = None, timeout_ms = 0` is the
    /// stop path: it only removes any held slot.
    pub fn upload_and_start(
        &mut self,
        effect_id: Option<i32>,
        timeout_ms: u32,
    ) -> VibratorResult<i32> {
        if effect_id.is_none() && timeout_ms == 0 {
            if let Some(slot) = self.current_effect_slot.take() {
                self.device.remove(slot).map_err(VibratorError::from)?;
            }
            return Ok(0);
        }

        if let Some(slot) = self.current_effect_slot.take() {
            self.device.remove(slot).map_err(VibratorError::from)?;
        }

        let result = match effect_id {
            None => self
                .device
                .upload_constant(self.current_magnitude, timeout_ms)
                .map(|slot| (slot, 0i32)),
            Some(id) => {
                let custom = [id as u16, 0, 0];
                self.device
                    .upload_periodic_custom(self.current_magnitude, custom)
                    .map(|(slot, custom)| (slot, (custom[1] as i32) * 1000 + custom[2] as i32))
            }
        };

        match result {
            Ok((slot, play_length_ms)) => match self.device.play(slot) {
                Ok(()) => {
                    self.current_effect_slot = Some(slot);
                    Ok(play_length_ms)
                }
                Err(e) => {
                    let _ = self.device.remove(slot);
                    self.invalidate_slot();
                    Err(VibratorError::from(e))
                }
            },
            Err(e) => {
                self.invalidate_slot();
                Err(VibratorError::from(e))
            }
        }
    }

    /// Maps a client-visible 0..=255 amplitude into the driver magnitude
    /// band and writes it as a GAIN event.
    pub fn set_gain(&mut self, amplitude: u8) -> VibratorResult<()> {
        let magnitude = amplitude_to_magnitude(amplitude);
        self.current_magnitude = magnitude;
        self.device
            .set_gain_raw(magnitude)
            .map_err(VibratorError::from)
    }

    /// Turns the motor off by removing any held effect slot.
    pub fn off(&mut self) -> VibratorResult<()> {
        self.upload_and_start(None, 0).map(|_| ())
    }

    pub fn read_calib(&mut self, out: &mut [u8]) -> VibratorResult<()> {
        self.device.read_calib(out).map_err(VibratorError::from)
    }

    pub fn write_calib(&mut self, data: &[u8]) -> VibratorResult<()> {
        self.device.write_calib(data).map_err(VibratorError::from)
    }
}

/// Clamps any written gain into `[LIGHT_MAG, STRONG_MAG]`.
pub fn clamp_magnitude(magnitude: i16) -> i16 {
    magnitude.clamp(LIGHT_MAG, STRONG_MAG)
}

/// Linear map of a client amplitude (0..=255) into the magnitude band
/// `[LIGHT_MAG, STRONG_MAG]`, used by `set_gain` and `Primitive` dispatch.
pub fn amplitude_to_magnitude(amplitude: u8) -> i16 {
    let span = (STRONG_MAG - LIGHT_MAG) as i32;
    let mapped = LIGHT_MAG as i32 + (amplitude as i32 * span) / 255;
    clamp_magnitude(mapped as i16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::mock::MockFfDevice;

    #[test]
    fn amplitude_scaling_matches_boundaries() {
        assert_eq!(amplitude_to_magnitude(0), LIGHT_MAG);
        assert_eq!(amplitude_to_magnitude(255), STRONG_MAG);
        let one = amplitude_to_magnitude(1);
        assert!(one > LIGHT_MAG && one < STRONG_MAG);
    }

    #[test]
    fn upload_and_start_invalidates_slot_on_failure() {
        let mut dev = MockFfDevice::new();
        dev.fail_next_play = true;
        let mut adapter = FfAdapter::open(dev).unwrap();
        let err = adapter.upload_and_start(None, 500);
        assert!(err.is_err());
        assert!(adapter.current_effect_slot.is_none());
    }

    #[test]
    fn stop_path_removes_held_slot() {
        let dev = MockFfDevice::new();
        let mut adapter = FfAdapter::open(dev).unwrap();
        adapter.upload_and_start(None, 500).unwrap();
        assert!(adapter.current_effect_slot.is_some());
        adapter.upload_and_start(None, 0).unwrap();
        assert!(adapter.current_effect_slot.is_none());
    }
}
