//! Endpoint selection for single-target calls.

use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks the endpoint for one single-target call.
///
/// Implementations must return `None` only for an empty slice and must always return
/// the sole endpoint when exactly one is configured.
pub trait LoadBalance: Send + Sync {
    fn pick<'a>(&self, endpoints: &'a [String]) -> Option<&'a str>;
}

/// Uniform random choice. The default strategy.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomBalance;

impl LoadBalance for RandomBalance {
    fn pick<'a>(&self, endpoints: &'a [String]) -> Option<&'a str> {
        match endpoints {
            [] => None,
            [only] => Some(only.as_str()),
            _ => endpoints.choose(&mut rand::thread_rng()).map(String::as_str),
        }
    }
}

/// Cycles through the endpoints in order.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalance for RoundRobin {
    fn pick<'a>(&self, endpoints: &'a [String]) -> Option<&'a str> {
        if endpoints.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        Some(endpoints[index].as_str())
    }
}
