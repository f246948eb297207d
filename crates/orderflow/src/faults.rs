//! Injectable randomness for the payment and shipping activities.
//!
//! All non-determinism of the pipeline comes through a [`FaultInjector`], so
//! tests can script outcomes while production draws from `rand`.

use crate::config::FaultConfig;
use rand::Rng;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

pub trait FaultInjector: Send + Sync + fmt::Debug {
    /// Whether the next payment attempt goes through.
    fn payment_succeeds(&self) -> bool;

    /// Business days until delivery for the next shipment.
    fn delivery_days(&self) -> u32;
}

/// Draws outcomes from the thread-local RNG.
#[derive(Debug, Clone)]
pub struct RandomFaults {
    payment_success_rate: f64,
    min_delivery_days: u32,
    max_delivery_days: u32,
}

impl RandomFaults {
    /// A non-finite success rate falls back to the default of 0.8.
    pub fn new(config: &FaultConfig) -> Self {
        let rate = config.payment_success_rate;
        let payment_success_rate = if rate.is_finite() {
            rate.clamp(0.0, 1.0)
        } else {
            FaultConfig::default().payment_success_rate
        };
        Self {
            payment_success_rate,
            min_delivery_days: config.min_delivery_days,
            max_delivery_days: config.max_delivery_days.max(config.min_delivery_days),
        }
    }
}

impl Default for RandomFaults {
    fn default() -> Self {
        Self::new(&FaultConfig::default())
    }
}

impl FaultInjector for RandomFaults {
    fn payment_succeeds(&self) -> bool {
        rand::thread_rng().gen_bool(self.payment_success_rate)
    }

    fn delivery_days(&self) -> u32 {
        rand::thread_rng().gen_range(self.min_delivery_days..=self.max_delivery_days)
    }
}

/// Replays a fixed script of payment outcomes, then falls back to a default.
///
/// ```
/// use orderflow::faults::{FaultInjector, ScriptedFaults};
///
/// let faults = ScriptedFaults::with_payments([false, true]);
/// assert!(!faults.payment_succeeds());
/// assert!(faults.payment_succeeds());
/// assert!(faults.payment_succeeds());
/// ```
#[derive(Debug)]
pub struct ScriptedFaults {
    payments: Mutex<VecDeque<bool>>,
    fallback: bool,
    delivery_days: u32,
}

impl ScriptedFaults {
    pub fn always_succeed() -> Self {
        Self::with_payments([])
    }

    pub fn always_fail() -> Self {
        Self {
            payments: Mutex::new(VecDeque::new()),
            fallback: false,
            delivery_days: 3,
        }
    }

    /// Uses `script` for the first payment attempts, succeeding afterwards.
    pub fn with_payments(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            payments: Mutex::new(script.into_iter().collect()),
            fallback: true,
            delivery_days: 3,
        }
    }

    pub fn delivering_in(mut self, days: u32) -> Self {
        self.delivery_days = days;
        self
    }
}

impl FaultInjector for ScriptedFaults {
    fn payment_succeeds(&self) -> bool {
        let mut payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        payments.pop_front().unwrap_or(self.fallback)
    }

    fn delivery_days(&self) -> u32 {
        self.delivery_days
    }
}
