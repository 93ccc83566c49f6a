//! The dual-transport acceptor: two `UnixListener`s — local
//! and cross-core — sharing one accept/read/dispatch/write/close path. Each
//! listener gets its own accept thread; every accepted connection is handed
//! to the single dispatcher thread over an `mpsc` channel so all FF device
//! access happens on exactly one thread.

use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::device::FfDevice;
use crate::dispatcher::Dispatcher;
use crate::error::VibratorError;
use crate::wire::{self, decode_command, decode_header, encode_error_reply, encode_reply, HEADER_LEN};

/// One accepted connection. A frame shorter than `request_len(kind)`
/// still carries a `kind` the client expects a reply for, so it is
/// kept as `Undersized` rather than dropped — the acceptor owes it an
/// `-EINVAL` reply of the right `response_len`, not a silently closed
/// connection.
enum Frame {
    Full(Vec<u8>),
    Undersized(u8),
}

struct InboundRequest {
    stream: UnixStream,
    frame: Frame,
}

fn accept_loop(listener: UnixListener, tx: mpsc::Sender<InboundRequest>) {
    for conn in listener.incoming() {
        let mut stream = match conn {
            Ok(s) => s,
            Err(e) => {
                log::warn!("accept failed: {e}");
                continue;
            }
        };
        match read_frame(&mut stream) {
            Some(frame) => {
                if tx.send(InboundRequest { stream, frame }).is_err() {
                    break;
                }
            }
            None => {
                log::debug!("dropping connection with unparseable header");
            }
        }
    }
}

/// Reads the 8-byte header, then as much of the declared `request_len` as
/// the client actually sent. Returns `None` only when the header itself
/// could not be read or names a kind with no known length contract — there
/// is then no `response_len` to reply with.
fn read_frame(stream: &mut UnixStream) -> Option<Frame> {
    let mut header_buf = [0u8; HEADER_LEN];
    stream.read_exact(&mut header_buf).ok()?;
    let header = decode_header(&header_buf);
    let total_len = wire::request_len(header.kind)?;
    let mut frame = vec![0u8; total_len];
    frame[..HEADER_LEN].copy_from_slice(&header_buf);
    if total_len > HEADER_LEN && stream.read_exact(&mut frame[HEADER_LEN..]).is_err() {
        return Some(Frame::Undersized(header.kind));
    }
    Some(Frame::Full(frame))
}

fn handle_request<D: FfDevice + 'static>(dispatcher: &Dispatcher<D>, req: InboundRequest) {
    let InboundRequest { mut stream, frame } = req;
    let reply_bytes = match frame {
        Frame::Full(bytes) => {
            let header = decode_header(&bytes);
            match decode_command(header.kind, &bytes) {
                Ok(cmd) => {
                    let (result, body) = dispatcher.dispatch(cmd);
                    if result == 0 {
                        encode_reply(header.kind, result, body)
                    } else {
                        // A failed dispatch always hands back `ReplyBody::None`
                        // (the dispatcher doesn't know `response_len`); rebuild
                        // a reply shaped correctly for this kind instead.
                        encode_error_reply(header.kind, result)
                    }
                }
                Err(e) => encode_error_reply(header.kind, e.wire_code()),
            }
        }
        Frame::Undersized(kind) => {
            encode_error_reply(kind, VibratorError::InvalidArgument(String::new()).wire_code())
        }
    };
    if let Err(e) = stream.write_all(&reply_bytes) {
        log::debug!("failed to write reply: {e}");
    }
}

/// Binds both listeners, spawns their accept threads, and runs the
/// dispatch loop on the calling thread until `shutdown` is observed,
/// polling it between requests since the accept threads never exit on
/// their own (`UnixListener::incoming` only returns on an accept error).
pub fn run<D: FfDevice + 'static>(
    dispatcher: Dispatcher<D>,
    local_path: &str,
    rpmsg_path: &str,
    shutdown: Arc<AtomicBool>,
) -> io::Result<()> {
    let _ = std::fs::remove_file(local_path);
    let _ = std::fs::remove_file(rpmsg_path);
    let local = UnixListener::bind(local_path)?;
    let rpmsg = UnixListener::bind(rpmsg_path)?;

    let (tx, rx) = mpsc::channel();
    let tx_local = tx.clone();
    let tx_rpmsg = tx;

    thread::spawn(move || accept_loop(local, tx_local));
    thread::spawn(move || accept_loop(rpmsg, tx_rpmsg));

    while !shutdown.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(req) => handle_request(&dispatcher, req),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    dispatcher.shutdown();
    let _ = std::fs::remove_file(local_path);
    let _ = std::fs::remove_file(rpmsg_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::FfAdapter;
    use crate::devices::mock::MockFfDevice;
    use crate::persistence::JsonStore;
    use crate::wire::{kind, RESULT_ONLY_LEN};
    use std::sync::atomic::AtomicUsize;

    static TEST_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_dir(tag: &str) -> std::path::PathBuf {
        let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("vibratord-transport-test-{}-{tag}-{n}", std::process::id()))
    }

    /// Binds a real acceptor against a mock device and runs it on a
    /// background thread until the returned flag is set, exercising the
    /// length contract end to end rather than just the dispatcher in
    /// isolation.
    fn spawn_server(tag: &str) -> (Arc<AtomicBool>, thread::JoinHandle<()>, String) {
        let dir = unique_dir(tag);
        std::fs::create_dir_all(&dir).unwrap();
        let local = dir.join("local.sock").to_str().unwrap().to_string();
        let rpmsg = dir.join("rpmsg.sock").to_str().unwrap().to_string();
        let store_path = dir.join("store.json");

        let adapter = FfAdapter::open(MockFfDevice::new()).unwrap();
        let store = JsonStore::open(&store_path).unwrap();
        let dispatcher = Dispatcher::new(adapter, Box::new(store));

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let local_clone = local.clone();
        let rpmsg_clone = rpmsg.clone();
        let handle = thread::spawn(move || {
            run(dispatcher, &local_clone, &rpmsg_clone, shutdown_clone).unwrap();
        });
        thread::sleep(Duration::from_millis(50));
        (shutdown, handle, local)
    }

    fn stop_request() -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[4] = kind::STOP;
        buf[5] = HEADER_LEN as u8;
        buf[6] = RESULT_ONLY_LEN as u8;
        buf
    }

    #[test]
    fn stop_round_trips_with_a_four_byte_reply() {
        let (shutdown, handle, local) = spawn_server("stop-roundtrip");
        let mut client = UnixStream::connect(&local).unwrap();
        client.write_all(&stop_request()).unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert_eq!(reply.len(), RESULT_ONLY_LEN);
        assert_eq!(i32::from_le_bytes(reply[..4].try_into().unwrap()), 0);
        shutdown.store(true, Ordering::SeqCst);
        let _ = handle.join();
    }

    /// A request shorter than `request_len(kind)` still gets a reply
    /// shaped like any other reply to that kind, carrying `-EINVAL`.
    #[test]
    fn undersized_frame_gets_einval_reply_of_correct_length() {
        let (shutdown, handle, local) = spawn_server("undersized");
        let mut client = UnixStream::connect(&local).unwrap();
        // SET_CALIB_VALUE needs HEADER_LEN + VIBRATOR_CALIBVALUE_MAX bytes;
        // send only the header.
        let mut buf = vec![0u8; HEADER_LEN];
        buf[4] = kind::SET_CALIB_VALUE;
        client.write_all(&buf).unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert_eq!(reply.len(), RESULT_ONLY_LEN);
        let result = i32::from_le_bytes(reply[..4].try_into().unwrap());
        assert_eq!(result, -libc::EINVAL);
        shutdown.store(true, Ordering::SeqCst);
        let _ = handle.join();
    }
}
