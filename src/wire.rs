//! The packed, little-endian wire frame shared verbatim by local (UNIX
//! domain socket) and cross-core (RPMSG domain socket) clients. Every field
//! is encoded/decoded by hand rather than through a transmuted struct image,
//! so the layout is identical regardless of the peer's native endianness or
//! alignment rules.

use crate::command::{
    Command, IntervalSpec, Strength, Waveform, MAX_WAVEFORM_LEN, VIBRATOR_CALIBVALUE_MAX,
};
use crate::error::VibratorError;

pub const HEADER_LEN: usize = 8;
/// Size of a reply that carries only the status word.
pub const RESULT_ONLY_LEN: usize = 4;

/// Shared payload used by `Waveform` and `Interval` requests: the two
/// commands are laid out identically on the wire, so `Interval`'s
/// `duration_ms`/`interval_ms` occupy the first two slots of the `timings`
/// array and its `count` aliases the waveform's `count` field.
const WAVEFORM_PAYLOAD_LEN: usize = 1 + 1 + 2 + MAX_WAVEFORM_LEN + MAX_WAVEFORM_LEN * 4;
/// `effect_id: i32, play_length: i32, {es: u8 | amplitude: f32}` (the last
/// slot is padded to 4 bytes so `PredefinedEffect` and `Primitive` share one
/// layout).
const EFFECT_PAYLOAD_LEN: usize = 4 + 4 + 4;

pub mod kind {
    pub const WAVEFORM: u8 = 1;
    pub const INTERVAL: u8 = 2;
    pub const PREDEFINED_EFFECT: u8 = 3;
    pub const PRIMITIVE: u8 = 4;
    pub const START: u8 = 5;
    pub const STOP: u8 = 6;
    pub const SET_AMPLITUDE: u8 = 7;
    pub const SET_INTENSITY: u8 = 8;
    pub const GET_INTENSITY: u8 = 9;
    pub const GET_CAPABILITIES: u8 = 10;
    pub const CALIBRATE: u8 = 11;
    pub const SET_CALIB_VALUE: u8 = 12;
    #[cfg(feature = "composition")]
    pub const COMPOSITION: u8 = 13;
}

/// The decoded 8-byte header common to every request/reply.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub result: i32,
    pub kind: u8,
    pub request_len: u8,
    pub response_len: u8,
}

/// Minimum bytes the acceptor must read before it may dispatch.
pub fn request_len(k: u8) -> Option<usize> {
    Some(match k {
        self::kind::WAVEFORM | self::kind::INTERVAL => HEADER_LEN + WAVEFORM_PAYLOAD_LEN,
        self::kind::PREDEFINED_EFFECT | self::kind::PRIMITIVE => HEADER_LEN + EFFECT_PAYLOAD_LEN,
        self::kind::START => HEADER_LEN + 4,
        self::kind::STOP => HEADER_LEN,
        self::kind::SET_AMPLITUDE => HEADER_LEN + 1,
        self::kind::SET_INTENSITY => HEADER_LEN + 1,
        self::kind::GET_INTENSITY | self::kind::GET_CAPABILITIES => HEADER_LEN,
        self::kind::CALIBRATE => HEADER_LEN,
        self::kind::SET_CALIB_VALUE => HEADER_LEN + VIBRATOR_CALIBVALUE_MAX,
        _ => return None,
    })
}

/// Exact byte count the acceptor must write back.
pub fn response_len(k: u8) -> Option<usize> {
    Some(match k {
        self::kind::WAVEFORM | self::kind::INTERVAL => RESULT_ONLY_LEN,
        self::kind::PREDEFINED_EFFECT | self::kind::PRIMITIVE => HEADER_LEN + EFFECT_PAYLOAD_LEN,
        self::kind::START => RESULT_ONLY_LEN,
        self::kind::STOP => RESULT_ONLY_LEN,
        self::kind::SET_AMPLITUDE => RESULT_ONLY_LEN,
        self::kind::SET_INTENSITY => RESULT_ONLY_LEN,
        self::kind::GET_INTENSITY | self::kind::GET_CAPABILITIES => HEADER_LEN + 4,
        self::kind::CALIBRATE => HEADER_LEN + VIBRATOR_CALIBVALUE_MAX,
        self::kind::SET_CALIB_VALUE => RESULT_ONLY_LEN,
        _ => return None,
    })
}

fn le_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}
fn le_i32(buf: &[u8], off: usize) -> i32 {
    i32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}
fn le_i16(buf: &[u8], off: usize) -> i16 {
    i16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}
fn le_f32(buf: &[u8], off: usize) -> f32 {
    f32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

pub fn decode_header(buf: &[u8]) -> Header {
    Header {
        result: le_i32(buf, 0),
        kind: buf[4],
        request_len: buf[5],
        response_len: buf[6],
    }
}

/// Decodes the command carried by `buf` (header + payload, at least
/// `request_len(header.kind)` bytes). Unknown kinds and undersized frames
/// are surfaced as [`VibratorError::InvalidArgument`] by the caller, not by
/// this function: it assumes the acceptor already enforced the length
/// contract.
pub fn decode_command(kind: u8, buf: &[u8]) -> Result<Command, VibratorError> {
    let p = &buf[HEADER_LEN..];
    match kind {
        self::kind::WAVEFORM => Ok(Command::Waveform(decode_waveform(p))),
        self::kind::INTERVAL => Ok(Command::Interval(decode_interval(p))),
        self::kind::PREDEFINED_EFFECT => {
            let effect_id = le_i32(p, 0);
            let strength = Strength::from_wire(p[8])?;
            Ok(Command::PredefinedEffect {
                effect_id,
                strength,
            })
        }
        self::kind::PRIMITIVE => {
            let effect_id = le_i32(p, 0);
            let amplitude = le_f32(p, 8);
            Ok(Command::Primitive {
                effect_id,
                amplitude,
            })
        }
        self::kind::START => Ok(Command::Start {
            timeout_ms: le_u32(p, 0),
        }),
        self::kind::STOP => Ok(Command::Stop),
        self::kind::SET_AMPLITUDE => Ok(Command::SetAmplitude { amplitude: p[0] }),
        self::kind::SET_INTENSITY => Ok(Command::SetIntensity {
            intensity: crate::command::Intensity::from_wire(p[0])?,
        }),
        self::kind::GET_INTENSITY => Ok(Command::GetIntensity),
        self::kind::GET_CAPABILITIES => Ok(Command::GetCapabilities),
        self::kind::CALIBRATE => Ok(Command::Calibrate),
        self::kind::SET_CALIB_VALUE => {
            let mut calib = [0u8; VIBRATOR_CALIBVALUE_MAX];
            calib.copy_from_slice(&p[..VIBRATOR_CALIBVALUE_MAX]);
            Ok(Command::SetCalibValue { calib })
        }
        other => Err(VibratorError::InvalidArgument(format!(
            "unknown command type: {other}"
        ))),
    }
}

fn decode_waveform(p: &[u8]) -> Waveform {
    let repeat = p[0] as i8;
    let length = p[1];
    let mut amplitudes = [0u8; MAX_WAVEFORM_LEN];
    amplitudes.copy_from_slice(&p[4..4 + MAX_WAVEFORM_LEN]);
    let mut timings = [0u32; MAX_WAVEFORM_LEN];
    let timings_off = 4 + MAX_WAVEFORM_LEN;
    for (i, slot) in timings.iter_mut().enumerate() {
        *slot = le_u32(p, timings_off + i * 4);
    }
    Waveform {
        timings,
        amplitudes,
        length,
        repeat,
    }
}

fn decode_interval(p: &[u8]) -> IntervalSpec {
    let count = le_i16(p, 2);
    let timings_off = 4 + MAX_WAVEFORM_LEN;
    IntervalSpec {
        duration_ms: le_i32(p, timings_off),
        interval_ms: le_i32(p, timings_off + 4),
        count,
    }
}

/// The body of a reply beyond the header/result word, selected by the
/// command kind being replied to.
pub enum ReplyBody {
    None,
    Effect { effect_id: i32, play_length_ms: i32 },
    ScalarI32(i32),
    Calib([u8; VIBRATOR_CALIBVALUE_MAX]),
}

/// Encodes a full reply frame for `kind`/`result`/`body`. Callers are
/// expected to have chosen `body` consistently with `response_len(kind)`.
pub fn encode_reply(kind: u8, result: i32, body: ReplyBody) -> Vec<u8> {
    match body {
        ReplyBody::None => result.to_le_bytes().to_vec(),
        ReplyBody::Effect {
            effect_id,
            play_length_ms,
        } => {
            let mut out = Vec::with_capacity(HEADER_LEN + EFFECT_PAYLOAD_LEN);
            write_header(&mut out, result, kind, HEADER_LEN + EFFECT_PAYLOAD_LEN);
            out.extend_from_slice(&effect_id.to_le_bytes());
            out.extend_from_slice(&play_length_ms.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out
        }
        ReplyBody::ScalarI32(v) => {
            let mut out = Vec::with_capacity(HEADER_LEN + 4);
            write_header(&mut out, result, kind, HEADER_LEN + 4);
            out.extend_from_slice(&v.to_le_bytes());
            out
        }
        ReplyBody::Calib(calib) => {
            let mut out = Vec::with_capacity(HEADER_LEN + VIBRATOR_CALIBVALUE_MAX);
            write_header(&mut out, result, kind, HEADER_LEN + VIBRATOR_CALIBVALUE_MAX);
            out.extend_from_slice(&calib);
            out
        }
    }
}

/// Builds an error reply of exactly `response_len(kind)` bytes, for the
/// undersized-frame path in the acceptor: the client still expects a
/// reply shaped like any other reply to this `kind`, just carrying an error
/// `result` and a zeroed payload.
pub fn encode_error_reply(kind: u8, result: i32) -> Vec<u8> {
    let body = match kind {
        self::kind::PREDEFINED_EFFECT | self::kind::PRIMITIVE => ReplyBody::Effect {
            effect_id: 0,
            play_length_ms: 0,
        },
        self::kind::GET_INTENSITY | self::kind::GET_CAPABILITIES => ReplyBody::ScalarI32(0),
        self::kind::CALIBRATE => ReplyBody::Calib([0u8; VIBRATOR_CALIBVALUE_MAX]),
        _ => ReplyBody::None,
    };
    encode_reply(kind, result, body)
}

fn write_header(out: &mut Vec<u8>, result: i32, kind: u8, total_len: usize) {
    out.extend_from_slice(&result.to_le_bytes());
    out.push(kind);
    out.push(request_len(kind).unwrap_or(0) as u8);
    out.push(total_len as u8);
    out.push(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Intensity;

    #[test]
    fn waveform_roundtrip() {
        let mut req = vec![0u8; request_len(kind::WAVEFORM).unwrap()];
        req[4] = kind::WAVEFORM;
        let p_off = HEADER_LEN;
        req[p_off] = (-1i8) as u8; // repeat
        req[p_off + 1] = 2; // length
        req[p_off + 4] = 200; // amplitudes[0]
        req[p_off + 5] = 100; // amplitudes[1]
        let timings_off = p_off + 4 + MAX_WAVEFORM_LEN;
        req[timings_off..timings_off + 4].copy_from_slice(&500u32.to_le_bytes());
        req[timings_off + 4..timings_off + 8].copy_from_slice(&300u32.to_le_bytes());

        let cmd = decode_command(kind::WAVEFORM, &req).unwrap();
        match cmd {
            Command::Waveform(w) => {
                assert_eq!(w.length, 2);
                assert_eq!(w.repeat, -1);
                assert_eq!(w.amplitudes[0], 200);
                assert_eq!(w.amplitudes[1], 100);
                assert_eq!(w.timings[0], 500);
                assert_eq!(w.timings[1], 300);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn interval_roundtrip() {
        let mut req = vec![0u8; request_len(kind::INTERVAL).unwrap()];
        req[4] = kind::INTERVAL;
        let p_off = HEADER_LEN;
        req[p_off + 2..p_off + 4].copy_from_slice(&3i16.to_le_bytes());
        let timings_off = p_off + 4 + MAX_WAVEFORM_LEN;
        req[timings_off..timings_off + 4].copy_from_slice(&100i32.to_le_bytes());
        req[timings_off + 4..timings_off + 8].copy_from_slice(&200i32.to_le_bytes());

        let cmd = decode_command(kind::INTERVAL, &req).unwrap();
        match cmd {
            Command::Interval(i) => {
                assert_eq!(i.duration_ms, 100);
                assert_eq!(i.interval_ms, 200);
                assert_eq!(i.count, 3);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn result_only_reply_is_four_bytes() {
        let bytes = encode_reply(kind::STOP, 0, ReplyBody::None);
        assert_eq!(bytes.len(), RESULT_ONLY_LEN);
        assert_eq!(le_i32(&bytes, 0), 0);
    }

    #[test]
    fn effect_reply_matches_response_len() {
        let bytes = encode_reply(
            kind::PREDEFINED_EFFECT,
            0,
            ReplyBody::Effect {
                effect_id: 5,
                play_length_ms: 250,
            },
        );
        assert_eq!(bytes.len(), response_len(kind::PREDEFINED_EFFECT).unwrap());
    }

    #[test]
    fn set_intensity_request_is_header_plus_one() {
        assert_eq!(request_len(kind::SET_INTENSITY).unwrap(), HEADER_LEN + 1);
        let _ = Intensity::from_wire(2).unwrap();
    }
}
