//! Shared simulation infrastructure: modes, frame-counter plans, seeded
//! randomness and fault injection.

use std::sync::Mutex;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use cam_core::{CamError, CamResult};

/// Operational mode for simulated devices.
///
/// - `Instant`: no delays, deterministic — for unit tests.
/// - `Realistic`: hardware-like frame pacing — for integration tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimMode {
    #[default]
    Instant,
    Realistic,
}

/// How the simulated hardware frame counter advances.
///
/// The counter is what drop/duplicate detection keys on, so the plans
/// reproduce the two failure shapes real cameras exhibit: a buffer that
/// has not refreshed between polls (same counter twice) and dropped
/// frames (counter jumps past the expected value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdPlan {
    /// Strictly increasing by one.
    #[default]
    Sequential,
    /// Every nth delivery repeats the previous counter value.
    DuplicateEvery(u64),
    /// Every nth delivery jumps ahead, skipping `width` counter values.
    GapEvery { every: u64, width: u64 },
}

impl IdPlan {
    /// Advance `counter` for the `produced`-th delivery (1-based).
    pub(crate) fn advance(&self, counter: &mut u64, produced: u64) {
        match *self {
            IdPlan::Sequential => *counter += 1,
            IdPlan::DuplicateEvery(n) if n > 0 && produced % n == 0 => {
                // Buffer not refreshed: keep the previous counter, unless
                // nothing has been delivered yet.
                if *counter == 0 {
                    *counter = 1;
                }
            }
            IdPlan::DuplicateEvery(_) => *counter += 1,
            IdPlan::GapEvery { every, width } if every > 0 && produced % every == 0 => {
                *counter += 1 + width;
            }
            IdPlan::GapEvery { .. } => *counter += 1,
        }
    }
}

/// Seeded RNG wrapper for reproducible failure behavior.
#[derive(Debug)]
pub struct SimRng {
    inner: Mutex<ChaCha8Rng>,
}

impl SimRng {
    /// Create a new RNG; `None` seeds from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Decide a failure with the given probability.
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        match self.inner.lock() {
            Ok(mut rng) => rng.gen::<f64>() < rate,
            Err(_) => false,
        }
    }
}

impl Default for SimRng {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Fault injection plan for a simulated device.
#[derive(Debug, Default)]
pub struct FaultPlan {
    /// Fail `open()` unconditionally, simulating unreachable hardware.
    pub fail_open: bool,
    /// Report a capture fault instead of every nth frame delivery.
    pub fault_every: Option<u64>,
    /// Random capture fault probability per delivery.
    pub fault_rate: f64,
    /// Seed for `fault_rate` decisions; `None` is nondeterministic.
    pub seed: Option<u64>,
}

impl FaultPlan {
    pub fn none() -> Self {
        Self::default()
    }

    pub(crate) fn check_open(&self, camera: &str) -> CamResult<()> {
        if self.fail_open {
            return Err(CamError::device(camera, "simulated: device unreachable"));
        }
        Ok(())
    }

    pub(crate) fn check_delivery(
        &self,
        camera: &str,
        produced: u64,
        rng: &SimRng,
    ) -> CamResult<()> {
        if let Some(n) = self.fault_every {
            if n > 0 && produced % n == 0 {
                return Err(CamError::fault(
                    camera,
                    format!("simulated driver fault at delivery {produced}"),
                ));
            }
        }
        if rng.should_fail(self.fault_rate) {
            return Err(CamError::fault(camera, "simulated random driver fault"));
        }
        Ok(())
    }
}
