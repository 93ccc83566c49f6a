//! The command dispatcher: translates one decoded [`Command`] into
//! calls on the FF adapter and/or the playback engine, enforcing validation
//! and the preemption protocol, and producing the reply fields. Runs
//! exclusively on the single thread that owns the FF device.

use std::sync::{Arc, Mutex};

use crate::command::{Command, Intensity};
use crate::device::{amplitude_to_magnitude, FfAdapter, FfDevice};
use crate::error::{VibratorError, VibratorResult};
use crate::persistence::{KeyValueStore, INTENSITY_KEY};
use crate::playback::PlaybackEngine;
use crate::wire::ReplyBody;

pub struct Dispatcher<D: FfDevice + 'static> {
    adapter: Arc<Mutex<FfAdapter<D>>>,
    playback: PlaybackEngine<D>,
    store: Mutex<Box<dyn KeyValueStore>>,
    intensity: Mutex<Intensity>,
}

impl<D: FfDevice + 'static> Dispatcher<D> {
    pub fn new(adapter: FfAdapter<D>, store: Box<dyn KeyValueStore>) -> Self {
        let intensity = match store.get_u8(INTENSITY_KEY) {
            Some(v) => Intensity::from_wire(v).unwrap_or(Intensity::Medium),
            None => Intensity::Medium,
        };
        let adapter = Arc::new(Mutex::new(adapter));
        let playback = PlaybackEngine::new(Arc::clone(&adapter));
        Dispatcher {
            adapter,
            playback,
            store: Mutex::new(store),
            intensity: Mutex::new(intensity),
        }
    }

    fn intensity(&self) -> Intensity {
        *self.intensity.lock().unwrap()
    }

    /// Stops any active playback and turns the motor off.
    pub fn shutdown(&self) {
        self.playback.stop_all();
        if let Err(e) = self.adapter.lock().unwrap().off() {
            log::warn!("failed to turn motor off during shutdown: {e}");
        }
    }

    /// Runs `cmd` to completion and returns the wire-level `(result,
    /// reply_body)` pair the acceptor writes back.
    pub fn dispatch(&self, cmd: Command) -> (i32, ReplyBody) {
        match self.dispatch_inner(cmd) {
            Ok(body) => (0, body),
            Err(e) => (e.wire_code(), ReplyBody::None),
        }
    }

    fn dispatch_inner(&self, cmd: Command) -> VibratorResult<ReplyBody> {
        match cmd {
            Command::Waveform(mut w) => {
                w.validate()?;
                w.normalize_repeat();
                if !self.intensity().should_vibrate() {
                    return Err(VibratorError::NotSupported);
                }
                self.playback.start_waveform(w, self.intensity());
                Ok(ReplyBody::None)
            }
            Command::Interval(spec) => {
                spec.validate()?;
                self.playback.stop_waveform_nonwaiting();
                self.playback.start_interval(spec);
                Ok(ReplyBody::None)
            }
            Command::PredefinedEffect {
                effect_id,
                strength,
            } => {
                if !self.intensity().should_vibrate() {
                    return Err(VibratorError::NotSupported);
                }
                self.playback.stop_waveform_nonwaiting();
                let mut adapter = self.adapter.lock().unwrap();
                if !adapter.capabilities().periodic {
                    return Err(VibratorError::NotSupported);
                }
                let magnitude = strength.magnitude(adapter.current_magnitude());
                adapter.set_magnitude(magnitude);
                let play_length_ms = adapter.upload_and_start(Some(effect_id), PLAYBACK_PLACEHOLDER_TIMEOUT)?;
                Ok(ReplyBody::Effect {
                    effect_id,
                    play_length_ms,
                })
            }
            Command::Primitive {
                effect_id,
                amplitude,
            } => {
                if !self.intensity().should_vibrate() {
                    return Err(VibratorError::NotSupported);
                }
                Command::validate_primitive(effect_id, amplitude)?;
                self.playback.stop_waveform_nonwaiting();
                let mut adapter = self.adapter.lock().unwrap();
                if !adapter.capabilities().periodic {
                    return Err(VibratorError::NotSupported);
                }
                let magnitude = amplitude_to_magnitude((amplitude * 255.0).round() as u8);
                adapter.set_magnitude(magnitude);
                let play_length_ms = adapter.upload_and_start(Some(effect_id), PLAYBACK_PLACEHOLDER_TIMEOUT)?;
                Ok(ReplyBody::Effect {
                    effect_id,
                    play_length_ms,
                })
            }
            Command::Start { timeout_ms } => {
                if !self.intensity().should_vibrate() {
                    return Err(VibratorError::NotSupported);
                }
                let mut adapter = self.adapter.lock().unwrap();
                adapter.upload_and_start(None, timeout_ms)?;
                let amplitude = adapter.current_amplitude();
                let scaled = self.intensity().scale(amplitude);
                adapter.set_gain(scaled)?;
                Ok(ReplyBody::None)
            }
            Command::Stop => {
                self.playback.stop_all();
                self.adapter.lock().unwrap().off()?;
                Ok(ReplyBody::None)
            }
            Command::SetAmplitude { amplitude } => {
                let mut adapter = self.adapter.lock().unwrap();
                adapter.set_current_amplitude(amplitude);
                adapter.set_gain(amplitude)?;
                Ok(ReplyBody::None)
            }
            Command::SetIntensity { intensity } => {
                *self.intensity.lock().unwrap() = intensity;
                self.store
                    .lock()
                    .unwrap()
                    .set_u8(INTENSITY_KEY, intensity.to_wire())
                    .map_err(VibratorError::from)?;
                Ok(ReplyBody::None)
            }
            Command::GetIntensity => {
                let stored = self.store.lock().unwrap().get_u8(INTENSITY_KEY);
                let intensity = match stored {
                    Some(v) => Intensity::from_wire(v).unwrap_or(Intensity::Medium),
                    None => Intensity::Medium,
                };
                *self.intensity.lock().unwrap() = intensity;
                Ok(ReplyBody::ScalarI32(intensity.to_wire() as i32))
            }
            Command::GetCapabilities => {
                let capabilities = self.adapter.lock().unwrap().capabilities().to_wire();
                Ok(ReplyBody::ScalarI32(capabilities))
            }
            Command::Calibrate => {
                let mut calib = [0u8; crate::command::VIBRATOR_CALIBVALUE_MAX];
                self.adapter.lock().unwrap().read_calib(&mut calib)?;
                Ok(ReplyBody::Calib(calib))
            }
            Command::SetCalibValue { calib } => {
                self.adapter.lock().unwrap().write_calib(&calib)?;
                Ok(ReplyBody::None)
            }
            #[cfg(feature = "composition")]
            Command::Composition(_) => Err(VibratorError::NotSupported),
        }
    }
}

/// `upload_and_start`'s `timeout_ms` only governs the replay length of a
/// constant effect (`effect_id = None`); for predefined/primitive requests
/// it is ignored once past the `effect_id.is_none()` stop-path check, so any
/// non-zero placeholder is safe here.
const PLAYBACK_PLACEHOLDER_TIMEOUT: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{IntervalSpec, MAX_WAVEFORM_LEN, Waveform};
    use crate::devices::mock::MockFfDevice;
    use crate::persistence::JsonStore;
    use std::collections::HashMap;
    use std::io;

    struct MemStore(HashMap<String, u8>);
    impl KeyValueStore for MemStore {
        fn get_u8(&self, key: &str) -> Option<u8> {
            self.0.get(key).copied()
        }
        fn set_u8(&mut self, key: &str, value: u8) -> io::Result<()> {
            self.0.insert(key.to_string(), value);
            Ok(())
        }
    }

    fn dispatcher() -> Dispatcher<MockFfDevice> {
        let adapter = FfAdapter::open(MockFfDevice::new()).unwrap();
        Dispatcher::new(adapter, Box::new(MemStore(HashMap::new())))
    }

    #[test]
    fn waveform_validation_rejects_without_device_io() {
        let d = dispatcher();
        let mut t = [0u32; MAX_WAVEFORM_LEN];
        t[0] = 1;
        let w = Waveform {
            timings: t,
            amplitudes: [0; MAX_WAVEFORM_LEN],
            length: 3,
            repeat: 3,
        };
        let (result, _) = d.dispatch(Command::Waveform(w));
        assert_eq!(result, VibratorError::InvalidArgument(String::new()).wire_code());
    }

    #[test]
    fn intensity_off_blocks_start() {
        let d = dispatcher();
        d.dispatch(Command::SetIntensity {
            intensity: Intensity::Off,
        });
        let (result, _) = d.dispatch(Command::Start { timeout_ms: 1000 });
        assert_eq!(result, VibratorError::NotSupported.wire_code());
    }

    #[test]
    fn set_intensity_persists_across_a_fresh_dispatcher() {
        let dir = std::env::temp_dir().join(format!("vibratord-dispatch-{}", std::process::id()));
        let path = dir.join("store.json");
        {
            let adapter = FfAdapter::open(MockFfDevice::new()).unwrap();
            let store = JsonStore::open(&path).unwrap();
            let d = Dispatcher::new(adapter, Box::new(store));
            d.dispatch(Command::SetIntensity {
                intensity: Intensity::Low,
            });
        }
        let adapter = FfAdapter::open(MockFfDevice::new()).unwrap();
        let store = JsonStore::open(&path).unwrap();
        let d = Dispatcher::new(adapter, Box::new(store));
        let (result, body) = d.dispatch(Command::GetIntensity);
        assert_eq!(result, 0);
        match body {
            ReplyBody::ScalarI32(v) => assert_eq!(v, Intensity::Low.to_wire() as i32),
            _ => panic!("wrong reply body"),
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn predefined_effect_rejected_when_device_lacks_periodic() {
        let mut dev = MockFfDevice::new();
        dev.features.periodic = false;
        let adapter = FfAdapter::open(dev).unwrap();
        let d = Dispatcher::new(adapter, Box::new(MemStore(HashMap::new())));
        let (result, _) = d.dispatch(Command::PredefinedEffect {
            effect_id: 1,
            strength: crate::command::Strength::Strong,
        });
        assert_eq!(result, VibratorError::NotSupported.wire_code());
    }

    #[test]
    fn interval_validation_rejects_negative_count() {
        let d = dispatcher();
        let spec = IntervalSpec {
            duration_ms: 100,
            interval_ms: 100,
            count: -1,
        };
        let (result, _) = d.dispatch(Command::Interval(spec));
        assert_eq!(result, VibratorError::InvalidArgument(String::new()).wire_code());
    }
}
