//! The background playback activity: a single waveform worker at
//! a time plus an interval repeater, both cooperatively cancelable through a
//! shared stop flag checked at step boundaries. Modeled directly on this
//! repo's `usb_monitor.rs`, whose capture loop is owned by one background
//! thread coordinated with the rest of the program through an
//! `Arc<Mutex<_>>` rather than hidden behind an async task.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::command::{IntervalSpec, Intensity, Waveform};
use crate::device::{FfAdapter, FfDevice};

struct StopState {
    force_stop: bool,
}

/// Handle shared between the owning engine and a spawned worker: setting
/// `force_stop` and notifying the condvar is the only cancellation
/// primitive either side has.
#[derive(Clone)]
struct StopSignal {
    inner: Arc<(Mutex<StopState>, Condvar)>,
}

impl StopSignal {
    fn new() -> Self {
        StopSignal {
            inner: Arc::new((Mutex::new(StopState { force_stop: false }), Condvar::new())),
        }
    }

    fn is_stopped(&self) -> bool {
        self.inner.0.lock().unwrap().force_stop
    }

    fn request_stop(&self) {
        let (lock, cvar) = &*self.inner;
        lock.lock().unwrap().force_stop = true;
        cvar.notify_all();
    }

    /// Waits up to `dur_ms`, returning early once stopped. Returns the
    /// actual time spent waiting, for the caller's `on_duration_remaining`
    /// bookkeeping.
    fn delay_cancelable(&self, dur_ms: u32) -> u32 {
        let (lock, cvar) = &*self.inner;
        let start = Instant::now();
        let guard = lock.lock().unwrap();
        let _ = cvar
            .wait_timeout_while(guard, Duration::from_millis(dur_ms as u64), |s| {
                !s.force_stop
            })
            .unwrap();
        start.elapsed().as_millis().min(dur_ms as u128) as u32
    }
}

/// Sums `timings[j]` for consecutive `amplitudes[j] != 0` starting at
/// `from`, wrapping to `repeat` once if it hits `length`; a wrap that
/// revisits `from` returns the 1000 ms "indefinite segment" sentinel.
fn total_on_duration(w: &Waveform, from: usize) -> u32 {
    let len = w.length as usize;
    let mut j = from;
    let mut total: u32 = 0;
    let mut wrapped = false;
    while j < len && w.amplitudes[j] != 0 {
        total = total.saturating_add(w.timings[j]);
        j += 1;
        if j == len {
            if w.repeat < 0 {
                break;
            }
            if wrapped {
                return 1000;
            }
            wrapped = true;
            if w.repeat as usize == from {
                return 1000;
            }
            j = w.repeat as usize;
        }
    }
    total
}

fn run_waveform<D: FfDevice>(
    adapter: Arc<Mutex<FfAdapter<D>>>,
    waveform: Waveform,
    intensity: Intensity,
    stop: StopSignal,
) {
    let mut i: usize = 0;
    let mut on_duration_remaining: i64 = 0;
    loop {
        if stop.is_stopped() {
            break;
        }
        if i < waveform.length as usize {
            let amp_raw = waveform.amplitudes[i];
            let dur = waveform.timings[i];
            let step = i;
            i += 1;
            if dur == 0 {
                continue;
            }
            let amp = if intensity.should_vibrate() {
                intensity.scale(amp_raw)
            } else {
                0
            };
            if amp != 0 {
                let mut guard = adapter.lock().unwrap();
                if on_duration_remaining <= 0 {
                    on_duration_remaining = total_on_duration(&waveform, step) as i64;
                    if let Err(e) = guard.upload_and_start(None, on_duration_remaining as u32) {
                        log::warn!("waveform playback upload failed: {e}");
                        break;
                    }
                } else if let Err(e) = guard.set_gain(amp) {
                    log::warn!("waveform playback gain write failed: {e}");
                    break;
                }
            }
            let waited = stop.delay_cancelable(dur);
            if amp != 0 {
                on_duration_remaining -= waited as i64;
            }
        } else if waveform.repeat < 0 {
            break;
        } else {
            i = waveform.repeat as usize;
        }
    }
}

fn run_interval<D: FfDevice>(
    adapter: Arc<Mutex<FfAdapter<D>>>,
    spec: IntervalSpec,
    stop: StopSignal,
) {
    let period = (spec.duration_ms as u32).saturating_add(spec.interval_ms as u32);
    let mut remaining = spec.count;
    loop {
        if stop.is_stopped() || remaining == 0 {
            break;
        }
        {
            let mut guard = adapter.lock().unwrap();
            if let Err(e) = guard.upload_and_start(None, spec.duration_ms as u32) {
                log::warn!("interval playback upload failed: {e}");
                break;
            }
        }
        remaining -= 1;
        if remaining == 0 {
            break;
        }
        stop.delay_cancelable(period);
    }
}

struct ActiveWorker {
    stop: StopSignal,
    handle: JoinHandle<()>,
}

/// Owns at most one waveform worker and at most one interval repeater at a
/// time, driving them against a shared [`FfAdapter`].
pub struct PlaybackEngine<D: FfDevice + 'static> {
    adapter: Arc<Mutex<FfAdapter<D>>>,
    waveform: Mutex<Option<ActiveWorker>>,
    interval: Mutex<Option<ActiveWorker>>,
}

impl<D: FfDevice + 'static> PlaybackEngine<D> {
    pub fn new(adapter: Arc<Mutex<FfAdapter<D>>>) -> Self {
        PlaybackEngine {
            adapter,
            waveform: Mutex::new(None),
            interval: Mutex::new(None),
        }
    }

    /// A newcomer for any non-waveform command: signal the stop flag and
    /// return immediately, without waiting for the worker to exit.
    pub fn stop_waveform_nonwaiting(&self) {
        let mut slot = self.waveform.lock().unwrap();
        if let Some(worker) = slot.take() {
            worker.stop.request_stop();
        }
    }

    /// A newcomer that wants to start waveform playback: stop the previous
    /// worker and wait for it to fully exit before spawning the new one —
    /// equivalent to a condvar wait on a shared "done" flag, expressed here
    /// as joining the worker thread.
    pub fn start_waveform(&self, waveform: Waveform, intensity: Intensity) {
        let mut slot = self.waveform.lock().unwrap();
        if let Some(worker) = slot.take() {
            worker.stop.request_stop();
            let _ = worker.handle.join();
        }
        let stop = StopSignal::new();
        let adapter = Arc::clone(&self.adapter);
        let worker_stop = stop.clone();
        let handle = thread::spawn(move || run_waveform(adapter, waveform, intensity, worker_stop));
        *slot = Some(ActiveWorker { stop, handle });
    }

    pub fn stop_interval(&self) {
        let mut slot = self.interval.lock().unwrap();
        if let Some(worker) = slot.take() {
            worker.stop.request_stop();
        }
    }

    pub fn start_interval(&self, spec: IntervalSpec) {
        self.stop_interval();
        let stop = StopSignal::new();
        let adapter = Arc::clone(&self.adapter);
        let worker_stop = stop.clone();
        let handle = thread::spawn(move || run_interval(adapter, spec, worker_stop));
        *self.interval.lock().unwrap() = Some(ActiveWorker { stop, handle });
    }

    /// Stops both activities (non-waiting); the caller turns the motor
    /// off separately.
    pub fn stop_all(&self) {
        self.stop_waveform_nonwaiting();
        self.stop_interval();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MAX_WAVEFORM_LEN;
    use crate::devices::mock::{Call, MockFfDevice};
    use std::thread::sleep;

    fn wave(length: u8, repeat: i8, timings: &[u32], amplitudes: &[u8]) -> Waveform {
        let mut t = [0u32; MAX_WAVEFORM_LEN];
        let mut a = [0u8; MAX_WAVEFORM_LEN];
        t[..timings.len()].copy_from_slice(timings);
        a[..amplitudes.len()].copy_from_slice(amplitudes);
        Waveform {
            timings: t,
            amplitudes: a,
            length,
            repeat,
        }
    }

    fn join_waveform<D: FfDevice + 'static>(engine: &PlaybackEngine<D>) {
        let mut slot = engine.waveform.lock().unwrap();
        if let Some(worker) = slot.take() {
            let _ = worker.handle.join();
        }
    }

    fn upload_count(calls: &[Call]) -> usize {
        calls
            .iter()
            .filter(|c| matches!(c, Call::UploadConstant { .. } | Call::UploadPeriodicCustom { .. }))
            .count()
    }

    #[test]
    fn total_on_duration_sums_consecutive_nonzero_steps() {
        let w = wave(3, -1, &[100, 200, 300], &[1, 1, 0]);
        assert_eq!(total_on_duration(&w, 0), 300);
    }

    #[test]
    fn total_on_duration_wraps_once_then_sentinels() {
        let w = wave(2, 0, &[100, 200], &[1, 1]);
        assert_eq!(total_on_duration(&w, 0), 1000);
    }

    /// A single-step, non-repeating waveform uploads exactly once and then
    /// goes quiet.
    #[test]
    fn oneshot_waveform_uploads_once_and_quiesces() {
        let adapter = Arc::new(Mutex::new(FfAdapter::open(MockFfDevice::new()).unwrap()));
        let engine = PlaybackEngine::new(Arc::clone(&adapter));
        let w = wave(1, -1, &[60], &[200]);
        engine.start_waveform(w, Intensity::High);
        sleep(Duration::from_millis(150));
        join_waveform(&engine);

        let guard = adapter.lock().unwrap();
        let calls = &guard.device().calls;
        assert_eq!(upload_count(calls), 1);
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Play(_))).count(), 1);
    }

    /// A non-waiting preemption (as `Stop` issues) lets the old worker make
    /// at most one more device call after the signal.
    #[test]
    fn nonwaiting_stop_bounds_waveform_to_one_more_call() {
        let adapter = Arc::new(Mutex::new(FfAdapter::open(MockFfDevice::new()).unwrap()));
        let engine = PlaybackEngine::new(Arc::clone(&adapter));
        // Alternating on/off steps so each "on" step re-uploads
        // (`total_on_duration` resets once the preceding "off" step clears
        // `on_duration_remaining`), giving the preemption window something
        // to actually bound.
        let w = wave(2, 0, &[100, 100], &[200, 0]);
        engine.start_waveform(w, Intensity::High);
        sleep(Duration::from_millis(30));
        let before = adapter.lock().unwrap().device().calls.len();
        engine.stop_waveform_nonwaiting();
        sleep(Duration::from_millis(250));
        join_waveform(&engine);

        let guard = adapter.lock().unwrap();
        let after_uploads = upload_count(&guard.device().calls[before..]);
        assert!(after_uploads <= 1, "expected at most one more upload after stop, got {after_uploads}");
    }

    /// An interval repeater issues exactly `count` uploads, spaced by
    /// `duration + interval`, then stops on its own.
    #[test]
    fn interval_playback_fires_exactly_count_times() {
        let adapter = Arc::new(Mutex::new(FfAdapter::open(MockFfDevice::new()).unwrap()));
        let engine = PlaybackEngine::new(Arc::clone(&adapter));
        let spec = IntervalSpec {
            duration_ms: 40,
            interval_ms: 20,
            count: 3,
        };
        engine.start_interval(spec);
        sleep(Duration::from_millis(400));
        engine.stop_interval();

        let guard = adapter.lock().unwrap();
        assert_eq!(upload_count(&guard.device().calls), 3);
    }
}
