//! Upstream-selection strategies.
//!
//! Every strategy implements [`LoadBalancer`]; [`LoadBalancerFactory`]
//! constructs the right one from a [`BalancingStrategy`] tag.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use ahash::AHasher;
use rand::Rng;

use crate::models::upstream::BalancingStrategy;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no upstreams configured for this group")]
    Empty,
}

/// One candidate the balancer can choose among: its name and relative weight.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub weight: u32,
}

/// Context carried per selection; currently only the client IP, used by [`IpHashBalancer`].
#[derive(Debug, Clone, Default)]
pub struct SelectContext {
    pub client_ip: Option<String>,
}

pub trait LoadBalancer: Send + Sync {
    fn select(&self, candidates: &[Candidate], ctx: &SelectContext) -> Result<String, SelectError>;

    /// Updates the health flag for `name`. No-op for strategies that ignore health.
    fn update_health(&self, _name: &str, _healthy: bool) {}

    /// Updates the latest observed latency for `name`. No-op for strategies that ignore it.
    fn update_latency(&self, _name: &str, _millis: u64) {}
}

/// Plain round-robin: `candidates[counter % len]`.
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(&self, candidates: &[Candidate], _ctx: &SelectContext) -> Result<String, SelectError> {
        if candidates.is_empty() {
            return Err(SelectError::Empty);
        }
        let idx = self.counter.fetch_add(1, Ordering::SeqCst) % candidates.len();
        Ok(candidates[idx].name.clone())
    }
}

/// Smooth weighted round-robin (the nginx / LVS algorithm): each candidate
/// accumulates `weight` every selection; the highest current-weight wins and
/// is then debited by the total weight.
pub struct WeightedRoundRobinBalancer {
    current_weights: RwLock<HashMap<String, i64>>,
}

impl WeightedRoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            current_weights: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for WeightedRoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for WeightedRoundRobinBalancer {
    fn select(&self, candidates: &[Candidate], _ctx: &SelectContext) -> Result<String, SelectError> {
        if candidates.is_empty() {
            return Err(SelectError::Empty);
        }
        let total_weight: i64 = candidates
            .iter()
            .map(|c| c.weight.max(1) as i64)
            .sum();

        let mut weights = self.current_weights.write().expect("balancer lock poisoned");
        let mut best_name = String::new();
        let mut best_weight = i64::MIN;
        for candidate in candidates {
            let w = candidate.weight.max(1) as i64;
            let entry = weights.entry(candidate.name.clone()).or_insert(0);
            *entry += w;
            if *entry > best_weight {
                best_weight = *entry;
                best_name = candidate.name.clone();
            }
        }
        if let Some(entry) = weights.get_mut(&best_name) {
            *entry -= total_weight;
        }
        Ok(best_name)
    }
}

/// Uniform random selection.
pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn select(&self, candidates: &[Candidate], _ctx: &SelectContext) -> Result<String, SelectError> {
        if candidates.is_empty() {
            return Err(SelectError::Empty);
        }
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Ok(candidates[idx].name.clone())
    }
}

/// Scans candidates in declared order and returns the first healthy one;
/// falls back to the first candidate if none are healthy (last-resort).
pub struct FailoverBalancer {
    health: RwLock<HashMap<String, bool>>,
}

impl FailoverBalancer {
    pub fn new() -> Self {
        Self {
            health: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for FailoverBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for FailoverBalancer {
    fn select(&self, candidates: &[Candidate], _ctx: &SelectContext) -> Result<String, SelectError> {
        if candidates.is_empty() {
            return Err(SelectError::Empty);
        }
        let health = self.health.read().expect("balancer lock poisoned");
        for candidate in candidates {
            if *health.get(&candidate.name).unwrap_or(&true) {
                return Ok(candidate.name.clone());
            }
        }
        Ok(candidates[0].name.clone())
    }

    fn update_health(&self, name: &str, healthy: bool) {
        self.health
            .write()
            .expect("balancer lock poisoned")
            .insert(name.to_string(), healthy);
    }
}

const RING_REPLICAS: u32 = 160;

/// Consistent-hash ring keyed by upstream name, for client-IP session
/// affinity. The ring is reconciled with the current candidate set on every
/// selection so membership changes relocate only a small fraction of keys.
pub struct IpHashBalancer {
    ring: RwLock<Vec<(u64, String)>>,
    members: RwLock<Vec<String>>,
}

impl IpHashBalancer {
    pub fn new() -> Self {
        Self {
            ring: RwLock::new(Vec::new()),
            members: RwLock::new(Vec::new()),
        }
    }

    fn hash(data: &[u8]) -> u64 {
        let mut hasher = AHasher::default();
        data.hash(&mut hasher);
        hasher.finish()
    }

    fn reconcile(&self, candidates: &[Candidate]) {
        let names: Vec<String> = candidates.iter().map(|c| c.name.clone()).collect();
        let current = self.members.read().expect("balancer lock poisoned");
        if *current == names {
            return;
        }
        drop(current);

        let mut ring = Vec::with_capacity(names.len() * RING_REPLICAS as usize);
        for name in &names {
            for replica in 0..RING_REPLICAS {
                let key = format!("{name}-{replica}");
                ring.push((Self::hash(key.as_bytes()), name.clone()));
            }
        }
        ring.sort_by_key(|(h, _)| *h);
        *self.ring.write().expect("balancer lock poisoned") = ring;
        *self.members.write().expect("balancer lock poisoned") = names;
    }
}

impl Default for IpHashBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for IpHashBalancer {
    fn select(&self, candidates: &[Candidate], ctx: &SelectContext) -> Result<String, SelectError> {
        if candidates.is_empty() {
            return Err(SelectError::Empty);
        }
        self.reconcile(candidates);

        let client_ip = match ctx.client_ip.as_deref().filter(|ip| !ip.is_empty()) {
            Some(ip) => ip,
            None => {
                let idx = rand::thread_rng().gen_range(0..candidates.len());
                return Ok(candidates[idx].name.clone());
            }
        };

        let key_hash = Self::hash(client_ip.as_bytes());
        let ring = self.ring.read().expect("balancer lock poisoned");
        let point = match ring.partition_point(|(h, _)| *h < key_hash) {
            i if i < ring.len() => i,
            _ => 0,
        };
        Ok(ring[point].1.clone())
    }
}

/// Builds the balancer instance for a [`BalancingStrategy`].
pub struct LoadBalancerFactory;

impl LoadBalancerFactory {
    pub fn create(strategy: BalancingStrategy) -> Arc<dyn LoadBalancer> {
        match strategy {
            BalancingStrategy::RoundRobin => Arc::new(RoundRobinBalancer::new()),
            BalancingStrategy::WeightedRoundRobin => Arc::new(WeightedRoundRobinBalancer::new()),
            BalancingStrategy::Random => Arc::new(RandomBalancer),
            BalancingStrategy::Failover => Arc::new(FailoverBalancer::new()),
            BalancingStrategy::IpHash => Arc::new(IpHashBalancer::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(names: &[&str]) -> Vec<Candidate> {
        names
            .iter()
            .map(|n| Candidate {
                name: n.to_string(),
                weight: 1,
            })
            .collect()
    }

    #[test]
    fn round_robin_visits_each_exactly_once_per_cycle() {
        let balancer = RoundRobinBalancer::new();
        let candidates = candidates(&["a", "b", "c"]);
        let ctx = SelectContext::default();
        let picks: Vec<_> = (0..6)
            .map(|_| balancer.select(&candidates, &ctx).unwrap())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn weighted_round_robin_respects_weight_ratio() {
        let balancer = WeightedRoundRobinBalancer::new();
        let candidates = vec![
            Candidate { name: "a".to_string(), weight: 3 },
            Candidate { name: "b".to_string(), weight: 1 },
        ];
        let ctx = SelectContext::default();
        let mut counts = HashMap::new();
        for _ in 0..4 {
            let pick = balancer.select(&candidates, &ctx).unwrap();
            *counts.entry(pick).or_insert(0) += 1;
        }
        assert_eq!(counts.get("a"), Some(&3));
        assert_eq!(counts.get("b"), Some(&1));
    }

    #[test]
    fn failover_skips_unhealthy_and_falls_back_to_first() {
        let balancer = FailoverBalancer::new();
        let candidates = candidates(&["a", "b"]);
        let ctx = SelectContext::default();
        assert_eq!(balancer.select(&candidates, &ctx).unwrap(), "a");
        balancer.update_health("a", false);
        assert_eq!(balancer.select(&candidates, &ctx).unwrap(), "b");
        balancer.update_health("b", false);
        assert_eq!(balancer.select(&candidates, &ctx).unwrap(), "a");
    }

    #[test]
    fn ip_hash_is_stable_for_same_client() {
        let balancer = IpHashBalancer::new();
        let candidates = candidates(&["a", "b", "c"]);
        let ctx = SelectContext {
            client_ip: Some("9.9.9.9".to_string()),
        };
        let first = balancer.select(&candidates, &ctx).unwrap();
        for _ in 0..5 {
            assert_eq!(balancer.select(&candidates, &ctx).unwrap(), first);
        }
    }

    #[test]
    fn ip_hash_falls_back_to_random_without_client_ip() {
        let balancer = IpHashBalancer::new();
        let candidates = candidates(&["a"]);
        let ctx = SelectContext::default();
        assert_eq!(balancer.select(&candidates, &ctx).unwrap(), "a");
    }

    #[test]
    fn empty_candidates_rejected_by_every_strategy() {
        let ctx = SelectContext::default();
        assert_eq!(RoundRobinBalancer::new().select(&[], &ctx), Err(SelectError::Empty));
        assert_eq!(WeightedRoundRobinBalancer::new().select(&[], &ctx), Err(SelectError::Empty));
        assert_eq!(RandomBalancer.select(&[], &ctx), Err(SelectError::Empty));
        assert_eq!(FailoverBalancer::new().select(&[], &ctx), Err(SelectError::Empty));
        assert_eq!(IpHashBalancer::new().select(&[], &ctx), Err(SelectError::Empty));
    }
}
