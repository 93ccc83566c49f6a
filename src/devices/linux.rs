//! Production [`FfDevice`] speaking the standard Linux force-feedback ioctl
//! set against the fixed motor device path. Modeled after the
//! USB Physical Input Device class the same way `linux/input.h` is, and
//! re-expressed directly against `libc` rather than pulled in as a crate
//! dependency, since the daemon only ever needs a handful of request codes.

use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::os::unix::io::AsRawFd;

use crate::device::{EffectSlot, FfDevice, FfFeatureBits};

const EV_FF: u16 = 0x15;
const FF_CONSTANT: u16 = 0x52;
const FF_CUSTOM: u16 = 0x5d;
const FF_GAIN: u16 = 0x60;
const FF_MAX: usize = 0x7f;
const FF_CNT: usize = FF_MAX + 1;
const FF_BIT_BYTES: usize = FF_CNT.div_ceil(8);

// Vendor calibration ioctls: no standard Linux request codes exist for
// calibration data, so this OOT driver reserves a private ioctl group
// (documented as an assumption in DESIGN.md).
const VIBRATOR_IOC_MAGIC: u8 = b'V';
const VIBRATOR_IOC_GET_CALIB: u8 = 1;
const VIBRATOR_IOC_SET_CALIB: u8 = 2;

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    ((dir as libc::c_ulong) << 30)
        | ((ty as libc::c_ulong) << 8)
        | (nr as libc::c_ulong)
        | ((size as libc::c_ulong) << 16)
}

fn eviocgbit_ff(len: usize) -> libc::c_ulong {
    ioc(IOC_READ, b'E', 0x20 + (EV_FF as u8), len)
}

fn eviocsff() -> libc::c_ulong {
    ioc(IOC_WRITE, b'E', 0x80, mem::size_of::<ff_effect>())
}

fn eviocrmff() -> libc::c_ulong {
    ioc(IOC_WRITE, b'E', 0x81, mem::size_of::<libc::c_int>())
}

fn vibrator_ioc_get_calib(len: usize) -> libc::c_ulong {
    ioc(IOC_READ, VIBRATOR_IOC_MAGIC, VIBRATOR_IOC_GET_CALIB, len)
}

fn vibrator_ioc_set_calib(len: usize) -> libc::c_ulong {
    ioc(IOC_WRITE, VIBRATOR_IOC_MAGIC, VIBRATOR_IOC_SET_CALIB, len)
}

#[derive(Clone, Copy)]
#[repr(C)]
struct ff_envelope {
    attack_length: u16,
    attack_level: u16,
    fade_length: u16,
    fade_level: u16,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct ff_trigger {
    button: u16,
    interval: u16,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct ff_replay {
    length: u16,
    delay: u16,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct ff_constant_effect {
    level: i16,
    envelope: ff_envelope,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct ff_periodic_effect {
    waveform: u16,
    period: u16,
    magnitude: i16,
    offset: i16,
    phase: u16,
    envelope: ff_envelope,
    custom_len: u32,
    custom_data: *mut i16,
}

unsafe impl Send for ff_periodic_effect {}

#[derive(Clone, Copy)]
#[repr(C)]
union ff_effect_union {
    constant: ff_constant_effect,
    periodic: ff_periodic_effect,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct ff_effect {
    type_: u16,
    id: i16,
    direction: u16,
    trigger: ff_trigger,
    replay: ff_replay,
    u: ff_effect_union,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct input_event {
    time: libc::timeval,
    type_: u16,
    code: u16,
    value: i32,
}

fn zeroed_timeval() -> libc::timeval {
    // SAFETY: an all-zero `timeval` is a valid value.
    unsafe { mem::zeroed() }
}

pub struct LinuxFfDevice {
    file: File,
}

impl LinuxFfDevice {
    pub fn open(path: &str) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(LinuxFfDevice { file })
    }

    fn write_event(&mut self, code: u16, value: i32) -> io::Result<()> {
        let ev = input_event {
            time: zeroed_timeval(),
            type_: EV_FF,
            code,
            value,
        };
        let buf = unsafe {
            std::slice::from_raw_parts(
                &ev as *const input_event as *const u8,
                mem::size_of::<input_event>(),
            )
        };
        use std::io::Write;
        self.file.write_all(buf)
    }

    fn upload(&mut self, mut effect: ff_effect) -> io::Result<(EffectSlot, ff_effect)> {
        effect.id = -1;
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                eviocsff() as _,
                &mut effect as *mut ff_effect,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((effect.id, effect))
    }
}

impl FfDevice for LinuxFfDevice {
    fn query_features(&mut self) -> io::Result<FfFeatureBits> {
        let mut bits = vec![0u8; FF_BIT_BYTES];
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                eviocgbit_ff(bits.len()) as _,
                bits.as_mut_ptr(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        let has = |code: u16| {
            let idx = code as usize;
            (bits[idx / 8] >> (idx % 8)) & 1 != 0
        };
        Ok(FfFeatureBits {
            constant: has(FF_CONSTANT),
            periodic: has(ff_periodic_code()),
        })
    }

    fn upload_constant(&mut self, level: i16, length_ms: u32) -> io::Result<EffectSlot> {
        let effect = ff_effect {
            type_: FF_CONSTANT,
            id: -1,
            direction: 0,
            trigger: ff_trigger {
                button: 0,
                interval: 0,
            },
            replay: ff_replay {
                length: length_ms.min(u16::MAX as u32) as u16,
                delay: 0,
            },
            u: ff_effect_union {
                constant: ff_constant_effect {
                    level,
                    envelope: ff_envelope {
                        attack_length: 0,
                        attack_level: 0,
                        fade_length: 0,
                        fade_level: 0,
                    },
                },
            },
        };
        let (slot, _) = self.upload(effect)?;
        Ok(slot)
    }

    fn upload_periodic_custom(
        &mut self,
        magnitude: i16,
        mut custom: [u16; 3],
    ) -> io::Result<(EffectSlot, [u16; 3])> {
        let mut custom_i16: [i16; 3] = [custom[0] as i16, custom[1] as i16, custom[2] as i16];
        let effect = ff_effect {
            type_: ff_periodic_code(),
            id: -1,
            direction: 0,
            trigger: ff_trigger {
                button: 0,
                interval: 0,
            },
            replay: ff_replay {
                length: 0,
                delay: 0,
            },
            u: ff_effect_union {
                periodic: ff_periodic_effect {
                    waveform: FF_CUSTOM,
                    period: 0,
                    magnitude,
                    offset: 0,
                    phase: 0,
                    envelope: ff_envelope {
                        attack_length: 0,
                        attack_level: 0,
                        fade_length: 0,
                        fade_level: 0,
                    },
                    custom_len: custom_i16.len() as u32,
                    custom_data: custom_i16.as_mut_ptr(),
                },
            },
        };
        let (slot, uploaded) = self.upload(effect)?;
        // SAFETY: `uploaded.u.periodic` was the variant written above; the
        // driver may have written the predicted duration back into
        // `custom_data[1..2]`.
        unsafe {
            let len = uploaded.u.periodic.custom_len.min(3) as usize;
            let data = std::slice::from_raw_parts(uploaded.u.periodic.custom_data, len);
            for (i, v) in data.iter().enumerate() {
                custom[i] = *v as u16;
            }
        }
        Ok((slot, custom))
    }

    fn play(&mut self, slot: EffectSlot) -> io::Result<()> {
        self.write_event(slot as u16, 1)
    }

    fn remove(&mut self, slot: EffectSlot) -> io::Result<()> {
        let rc = unsafe {
            libc::ioctl(self.file.as_raw_fd(), eviocrmff() as _, slot as libc::c_int)
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_gain_raw(&mut self, magnitude: i16) -> io::Result<()> {
        self.write_event(FF_GAIN, magnitude as i32)
    }

    fn read_calib(&mut self, out: &mut [u8]) -> io::Result<()> {
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                vibrator_ioc_get_calib(out.len()) as _,
                out.as_mut_ptr(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn write_calib(&mut self, data: &[u8]) -> io::Result<()> {
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                vibrator_ioc_set_calib(data.len()) as _,
                data.as_ptr(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// `FF_PERIODIC`'s feature code, split out so `query_features` and
/// `upload_periodic_custom` agree on one constant without the module
/// re-exporting it publicly.
const fn ff_periodic_code() -> u16 {
    0x51
}
