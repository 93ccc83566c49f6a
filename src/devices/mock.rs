//! In-memory [`FfDevice`] used by unit and integration tests. Records
//! every call so tests can assert the ioctl interleaving invariants without
//! a real `/dev/input/eventN` node.

use std::io;

use crate::command::VIBRATOR_CALIBVALUE_MAX;
use crate::device::{EffectSlot, FfDevice, FfFeatureBits};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    UploadConstant { level: i16, length_ms: u32 },
    UploadPeriodicCustom { magnitude: i16, custom: [u16; 3] },
    Play(EffectSlot),
    Remove(EffectSlot),
    SetGain(i16),
}

pub struct MockFfDevice {
    pub calls: Vec<Call>,
    pub features: FfFeatureBits,
    pub fail_next_upload: bool,
    pub fail_next_play: bool,
    /// `(high, low)` written into the custom-data buffer on periodic-custom
    /// upload, mirroring the driver-predicted-duration convention.
    pub predicted_duration: (u16, u16),
    next_slot: EffectSlot,
    calib: [u8; VIBRATOR_CALIBVALUE_MAX],
}

impl MockFfDevice {
    pub fn new() -> Self {
        MockFfDevice {
            calls: Vec::new(),
            features: FfFeatureBits {
                constant: true,
                periodic: true,
            },
            fail_next_upload: false,
            fail_next_play: false,
            predicted_duration: (0, 250),
            next_slot: 1,
            calib: [0; VIBRATOR_CALIBVALUE_MAX],
        }
    }

    fn alloc_slot(&mut self) -> EffectSlot {
        let s = self.next_slot;
        self.next_slot += 1;
        s
    }

    /// Number of `upload_constant`/`upload_periodic_custom` calls not yet
    /// matched by a `Remove` of the same slot — used by serialization tests
    /// to assert no overlapping effects.
    pub fn held_slots(&self) -> usize {
        let mut held = std::collections::HashSet::new();
        for call in &self.calls {
            match call {
                Call::UploadConstant { .. } | Call::UploadPeriodicCustom { .. } => {}
                Call::Play(slot) => {
                    held.insert(*slot);
                }
                Call::Remove(slot) => {
                    held.remove(slot);
                }
                Call::SetGain(_) => {}
            }
        }
        held.len()
    }
}

impl Default for MockFfDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl FfDevice for MockFfDevice {
    fn query_features(&mut self) -> io::Result<FfFeatureBits> {
        Ok(self.features)
    }

    fn upload_constant(&mut self, level: i16, length_ms: u32) -> io::Result<EffectSlot> {
        if self.fail_next_upload {
            self.fail_next_upload = false;
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        let slot = self.alloc_slot();
        self.calls.push(Call::UploadConstant { level, length_ms });
        Ok(slot)
    }

    fn upload_periodic_custom(
        &mut self,
        magnitude: i16,
        custom: [u16; 3],
    ) -> io::Result<(EffectSlot, [u16; 3])> {
        if self.fail_next_upload {
            self.fail_next_upload = false;
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        let slot = self.alloc_slot();
        self.calls.push(Call::UploadPeriodicCustom { magnitude, custom });
        let mut out = custom;
        out[1] = self.predicted_duration.0;
        out[2] = self.predicted_duration.1;
        Ok((slot, out))
    }

    fn play(&mut self, slot: EffectSlot) -> io::Result<()> {
        if self.fail_next_play {
            self.fail_next_play = false;
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        self.calls.push(Call::Play(slot));
        Ok(())
    }

    fn remove(&mut self, slot: EffectSlot) -> io::Result<()> {
        self.calls.push(Call::Remove(slot));
        Ok(())
    }

    fn set_gain_raw(&mut self, magnitude: i16) -> io::Result<()> {
        self.calls.push(Call::SetGain(magnitude));
        Ok(())
    }

    fn read_calib(&mut self, out: &mut [u8]) -> io::Result<()> {
        let n = out.len().min(self.calib.len());
        out[..n].copy_from_slice(&self.calib[..n]);
        Ok(())
    }

    fn write_calib(&mut self, data: &[u8]) -> io::Result<()> {
        let n = data.len().min(self.calib.len());
        self.calib[..n].copy_from_slice(&data[..n]);
        Ok(())
    }
}
