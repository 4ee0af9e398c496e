//! Scalable clock backing `embassy_time` for the whole process.
//!
//! Virtual time runs at `speed-percent` of real time, so a long sampling schedule can
//! be fast-forwarded. Pending timers sit in a deadline map served by one scheduler
//! thread, which converts each virtual deadline to a real instant and sleeps on a
//! condvar until it is due. A speed change rebases the real origin at the current
//! virtual instant, so virtual time never jumps and deadlines keep their order.

use core::task::Waker;
use embassy_time_driver::{Driver, TICK_HZ, time_driver_impl};
use std::collections::BTreeMap;
use std::sync::{Condvar, LazyLock, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant as StdInstant};

/// Q32.32 fixed point; `ONE_Q32` is a speed of 1.0.
const ONE_Q32: u64 = 1 << 32;

/// Upper bound of one scheduler sleep, so a speed change is picked up promptly.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(25);

pub const SPEED_PERCENT_RANGE: std::ops::RangeInclusive<u32> = 1..=1000;

#[derive(Debug, Clone, Copy)]
struct Scale {
    origin_real: StdInstant,
    origin_ticks: u64,
    scale_q32: u64,
    percent: u32,
}

impl Scale {
    fn ticks_at(&self, real: StdInstant) -> u64 {
        let real_ns = real.saturating_duration_since(self.origin_real).as_nanos();
        let real_ticks = real_ns * TICK_HZ as u128 / 1_000_000_000;
        let scaled = real_ticks * self.scale_q32 as u128 / ONE_Q32 as u128;
        self.origin_ticks.wrapping_add(scaled as u64)
    }

    /// Real instant at which `ticks` is reached. Deadlines before the origin are due now.
    fn instant_of(&self, ticks: u64) -> StdInstant {
        let Some(virtual_ticks) = ticks.checked_sub(self.origin_ticks) else {
            return self.origin_real;
        };
        let real_ticks = virtual_ticks as u128 * ONE_Q32 as u128 / self.scale_q32 as u128;
        let real_ns = real_ticks * 1_000_000_000 / TICK_HZ as u128;
        self.origin_real + Duration::from_nanos(real_ns.min(u64::MAX as u128) as u64)
    }
}

struct ScaledClock {
    scale: Mutex<Scale>,
    deadlines: Mutex<BTreeMap<u64, Vec<Waker>>>,
    changed: Condvar,
    scheduler: OnceLock<()>,
}

static CLOCK: LazyLock<ScaledClock> = LazyLock::new(|| ScaledClock {
    scale: Mutex::new(Scale {
        origin_real: StdInstant::now(),
        origin_ticks: 0,
        scale_q32: ONE_Q32,
        percent: 100,
    }),
    deadlines: Mutex::new(BTreeMap::new()),
    changed: Condvar::new(),
    scheduler: OnceLock::new(),
});

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScaledClock {
    fn scale(&self) -> Scale {
        *lock(&self.scale)
    }

    fn now_ticks(&self) -> u64 {
        self.scale().ticks_at(StdInstant::now())
    }

    fn schedule(&'static self, at: u64, waker: &Waker) {
        self.scheduler.get_or_init(|| {
            let spawned = std::thread::Builder::new().name("sim-clock".into()).spawn(move || self.run_scheduler());
            if let Err(e) = spawned {
                log::error!("Failed to start clock scheduler thread: {}", e);
            }
        });
        lock(&self.deadlines).entry(at).or_default().push(waker.clone());
        self.changed.notify_all();
    }

    fn run_scheduler(&self) {
        loop {
            // Clock and deadline locks are never held together.
            let next_at = {
                let mut deadlines = lock(&self.deadlines);
                loop {
                    if let Some((&at, _)) = deadlines.first_key_value() {
                        break at;
                    }
                    deadlines = self.changed.wait(deadlines).unwrap_or_else(PoisonError::into_inner);
                }
            };

            let due_at = self.scale().instant_of(next_at);
            let now = StdInstant::now();
            if due_at > now {
                let deadlines = lock(&self.deadlines);
                let _ = self.changed.wait_timeout(deadlines, (due_at - now).min(MAX_WAIT_SLICE));
                continue;
            }

            let now_ticks = self.now_ticks();
            let ready: Vec<Waker> = {
                let mut deadlines = lock(&self.deadlines);
                let pending = deadlines.split_off(&now_ticks.saturating_add(1));
                std::mem::replace(&mut *deadlines, pending).into_values().flatten().collect()
            };
            for waker in ready {
                waker.wake();
            }
        }
    }

    fn set_speed_percent(&self, percent: u32) {
        let percent = percent.clamp(*SPEED_PERCENT_RANGE.start(), *SPEED_PERCENT_RANGE.end());
        {
            let mut scale = lock(&self.scale);
            if scale.percent == percent {
                return;
            }
            let now = StdInstant::now();
            *scale = Scale {
                origin_real: now,
                origin_ticks: scale.ticks_at(now),
                scale_q32: (percent as u128 * ONE_Q32 as u128 / 100) as u64,
                percent,
            };
        }
        self.changed.notify_all();
    }
}

struct ScaledDriver;

impl Driver for ScaledDriver {
    fn now(&self) -> u64 {
        CLOCK.now_ticks()
    }

    fn schedule_wake(&self, at: u64, waker: &Waker) {
        CLOCK.schedule(at, waker);
    }
}

time_driver_impl!(static DRIVER: ScaledDriver = ScaledDriver);

/// Set the simulation speed as a percentage of real time, clamped to 1-1000.
pub fn set_speed_percent(percent: u32) {
    CLOCK.set_speed_percent(percent);
}

pub fn speed_percent() -> u32 {
    CLOCK.scale().percent
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale(percent: u32) -> Scale {
        Scale {
            origin_real: StdInstant::now(),
            origin_ticks: 1_000,
            scale_q32: (percent as u128 * ONE_Q32 as u128 / 100) as u64,
            percent,
        }
    }

    #[test]
    fn double_speed_halves_real_wait() {
        let scale = scale(200);
        let ticks = 1_000 + TICK_HZ;
        let real = scale.instant_of(ticks).duration_since(scale.origin_real);
        assert_eq!(real, Duration::from_millis(500));
    }

    #[test]
    fn virtual_ticks_follow_scale() {
        let scale = scale(50);
        let ticks = scale.ticks_at(scale.origin_real + Duration::from_secs(2));
        assert_eq!(ticks, 1_000 + TICK_HZ);
    }

    #[test]
    fn deadline_before_origin_is_due_immediately() {
        let scale = scale(100);
        assert_eq!(scale.instant_of(10), scale.origin_real);
    }

    #[test]
    fn embassy_timer_fires() {
        futures::executor::block_on(embassy_time::Timer::after_millis(5));
        assert!(SPEED_PERCENT_RANGE.contains(&speed_percent()));
    }
}
