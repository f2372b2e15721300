//! Process-wide proxy policy flag.

use mailbridge_api::ProxyPolicy;
use parking_lot::RwLock;
use tracing::info;

/// Policy value together with the generation it was set in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxySnapshot {
    /// Current policy.
    pub policy: ProxyPolicy,
    /// Incremented on every effective change.
    pub generation: u64,
}

/// Read-mostly proxy policy shared by every handle construction.
///
/// Readers get a consistent `(policy, generation)` pair; handles remember
/// the generation they were built under so a later flip can retire them.
#[derive(Debug)]
pub struct ProxyGate {
    state: RwLock<ProxySnapshot>,
}

impl ProxyGate {
    /// Creates a gate at generation zero.
    #[must_use]
    pub const fn new(policy: ProxyPolicy) -> Self {
        Self {
            state: RwLock::new(ProxySnapshot {
                policy,
                generation: 0,
            }),
        }
    }

    /// Current policy and generation.
    #[must_use]
    pub fn snapshot(&self) -> ProxySnapshot {
        *self.state.read()
    }

    /// Current policy.
    #[must_use]
    pub fn policy(&self) -> ProxyPolicy {
        self.state.read().policy
    }

    /// Sets the policy. Returns the new generation if it changed.
    pub fn set(&self, policy: ProxyPolicy) -> Option<u64> {
        let mut state = self.state.write();
        if state.policy == policy {
            return None;
        }
        state.policy = policy;
        state.generation += 1;
        info!(?policy, generation = state.generation, "Proxy policy changed");
        Some(state.generation)
    }

    /// Permits proxy fallback.
    pub fn allow(&self) -> Option<u64> {
        self.set(ProxyPolicy::Allowed)
    }

    /// Forbids proxy fallback.
    pub fn disallow(&self) -> Option<u64> {
        self.set(ProxyPolicy::Disallowed)
    }
}

impl Default for ProxyGate {
    fn default() -> Self {
        Self::new(ProxyPolicy::default())
    }
}
