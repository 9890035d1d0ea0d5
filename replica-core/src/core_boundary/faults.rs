/*
    faults.rs - Fault injection for the simulated boundary

    Decides, per frame, whether the link delivers it, drops it, or holds it
    back to deliver after the next frame. Rolls come from a seeded RNG so a
    lossy run can be replayed exactly.

    At most one frame is held at a time. A held frame is released behind the
    next delivered frame; dropped frames do not release it.
*/

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Counts of fault decisions taken so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub admitted: u64,
    pub dropped: u64,
    pub reordered: u64,
}

pub struct FaultInjector<T> {
    drop_rate: f64,
    reorder_rate: f64,
    rng: StdRng,
    held: Option<T>,
    stats: FaultStats,
}

impl<T> FaultInjector<T> {
    /// Rates are clamped to [0, 1]; `None` seeds from the OS
    pub fn new(drop_rate: f64, reorder_rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        FaultInjector {
            drop_rate: drop_rate.clamp(0.0, 1.0),
            reorder_rate: reorder_rate.clamp(0.0, 1.0),
            rng,
            held: None,
            stats: FaultStats::default(),
        }
    }

    /// Injector that delivers everything in order
    pub fn reliable() -> Self {
        Self::new(0.0, 0.0, Some(0))
    }

    pub fn is_reliable(&self) -> bool {
        self.drop_rate == 0.0 && self.reorder_rate == 0.0
    }

    fn roll(&mut self, rate: f64) -> bool {
        rate > 0.0 && self.rng.random::<f64>() < rate
    }

    /// Frames to deliver now, in delivery order
    pub fn admit(&mut self, frame: T) -> Vec<T> {
        self.stats.admitted += 1;

        if self.roll(self.drop_rate) {
            self.stats.dropped += 1;
            return Vec::new();
        }

        if self.held.is_none() && self.roll(self.reorder_rate) {
            self.stats.reordered += 1;
            self.held = Some(frame);
            return Vec::new();
        }

        let mut out = vec![frame];
        out.extend(self.held.take());
        out
    }

    /// Release the held frame, if any
    pub fn flush(&mut self) -> Option<T> {
        self.held.take()
    }

    pub fn holding(&self) -> bool {
        self.held.is_some()
    }

    pub fn stats(&self) -> FaultStats {
        self.stats
    }
}
