//! Outbound proxy selection.

use rand::Rng;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::QueryError;

/// How the next proxy is picked from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyStrategy {
    /// Cycle through the pool in order.
    #[default]
    RoundRobin,
    /// Pick uniformly at random.
    Random,
}

impl FromStr for ProxyStrategy {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "round_robin" | "round-robin" | "roundrobin" => Ok(ProxyStrategy::RoundRobin),
            "random" => Ok(ProxyStrategy::Random),
            other => Err(QueryError::param_named(
                format!("Unknown proxy strategy '{}'", other),
                "proxy_strategy",
            )),
        }
    }
}

/// Picks a proxy index for each outbound request.
///
/// Safe to share across tasks; round-robin uses a single atomic counter.
#[derive(Debug)]
pub struct ProxyRotator {
    size: usize,
    strategy: ProxyStrategy,
    next: AtomicUsize,
}

impl ProxyRotator {
    /// Creates a rotator over a pool of `size` proxies.
    pub fn new(size: usize, strategy: ProxyStrategy) -> Self {
        Self {
            size,
            strategy,
            next: AtomicUsize::new(0),
        }
    }

    /// Number of proxies in the pool.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns true if the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the selection strategy.
    pub fn strategy(&self) -> ProxyStrategy {
        self.strategy
    }

    /// Returns the index of the next proxy, or `None` for an empty pool.
    pub fn next_index(&self) -> Option<usize> {
        if self.size == 0 {
            return None;
        }
        let index = match self.strategy {
            ProxyStrategy::RoundRobin => self.next.fetch_add(1, Ordering::Relaxed) % self.size,
            ProxyStrategy::Random => rand::thread_rng().gen_range(0..self.size),
        };
        Some(index)
    }
}
