//! Capability-based agent selection.
//!
//! Routing is a pure filter -> score -> select pipeline over registry
//! descriptors and the availability store. Hard requirements (enablement,
//! capabilities, availability, headroom, scope affinity) eliminate
//! candidates; soft preferences (domain affinity, load, idleness) rank
//! the survivors; the best score wins.

use crate::agent::{AgentDescriptor, AgentHost, AgentId, AgentRegistry};
use crate::availability::AvailabilityStore;
use crate::flog_debug;
use crate::queue::task::RoutingHints;
use std::sync::Arc;

/// Weight of the averaged domain affinity in the composite score.
const DOMAIN_WEIGHT: f64 = 0.5;
/// Weight of the load headroom term in the composite score.
const LOAD_WEIGHT: f64 = 0.3;
/// Flat bonus for an agent with nothing assigned at all.
const AVAILABILITY_BONUS: f64 = 0.15;
/// Upper bound of the random tiebreak jitter. Kept below every other
/// term so it can only ever split exact ties.
const TIE_BREAKER_MAX: f64 = 0.01;
/// Affinity assumed for a preferred domain the agent does not declare.
const DEFAULT_DOMAIN_WEIGHT: f64 = 0.5;

/// A candidate that survived filtering, with its composite score.
#[derive(Debug, Clone)]
pub struct ScoredAgent {
    pub agent_id: AgentId,
    pub score: f64,
}

/// Selects an agent for a task from its routing hints.
pub struct AgentRouter {
    registry: Arc<dyn AgentRegistry>,
    host: Arc<dyn AgentHost>,
}

impl AgentRouter {
    pub fn new(registry: Arc<dyn AgentRegistry>, host: Arc<dyn AgentHost>) -> Self {
        Self { registry, host }
    }

    /// Pick the best eligible agent, or `None` when nobody qualifies.
    pub fn route_task(
        &self,
        hints: &RoutingHints,
        availability: &AvailabilityStore,
    ) -> Option<AgentId> {
        let ranked = self.rank(hints, availability);
        let best = ranked.first()?;
        flog_debug!(
            "Routed to agent {} (score {:.3}, {} candidates)",
            best.agent_id.short(),
            best.score,
            ranked.len()
        );
        Some(best.agent_id)
    }

    /// All eligible agents in descending score order.
    pub fn rank(&self, hints: &RoutingHints, availability: &AvailabilityStore) -> Vec<ScoredAgent> {
        let mut scored: Vec<ScoredAgent> = self
            .registry
            .all()
            .into_iter()
            .filter(|agent| self.eligible(agent, hints, availability))
            .map(|agent| ScoredAgent {
                score: score(&agent, hints, availability.load_of(agent.id)),
                agent_id: agent.id,
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    /// Fallback for tasks without routing hints when scoring produced no
    /// candidate: any unloaded live agent in an available state, with an
    /// agent attached to the task's scope taking precedence.
    pub fn fallback_agent(
        &self,
        scope: Option<&str>,
        availability: &AvailabilityStore,
    ) -> Option<AgentId> {
        let live = self.host.live_agents();
        let eligible: Vec<_> = live
            .iter()
            .filter(|a| a.state.is_available() && availability.load_of(a.agent_id) == 0)
            .collect();
        if let Some(scope) = scope {
            if let Some(agent) = eligible
                .iter()
                .find(|a| a.scope.as_deref() == Some(scope))
            {
                return Some(agent.agent_id);
            }
        }
        eligible.first().map(|a| a.agent_id)
    }

    /// Hard filters; every one must pass.
    fn eligible(
        &self,
        agent: &AgentDescriptor,
        hints: &RoutingHints,
        availability: &AvailabilityStore,
    ) -> bool {
        if !agent.enabled || !agent.routing_enabled {
            return false;
        }
        if !hints
            .required_capabilities
            .iter()
            .all(|c| agent.has_capability(c))
        {
            return false;
        }
        if !availability.is_available(agent.id) {
            return false;
        }
        if agent.max_concurrent > 0 && availability.load_of(agent.id) >= agent.max_concurrent {
            return false;
        }
        if let Some(scope) = &hints.scope_affinity {
            let attached = self
                .host
                .live_agents()
                .iter()
                .any(|live| live.agent_id == agent.id && live.scope.as_deref() == Some(scope));
            if !attached {
                return false;
            }
        }
        true
    }
}

/// Composite soft score for one eligible agent.
fn score(agent: &AgentDescriptor, hints: &RoutingHints, load: usize) -> f64 {
    let domain = domain_affinity(agent, hints) * DOMAIN_WEIGHT;

    let headroom = if agent.max_concurrent > 0 {
        (1.0 - load as f64 / agent.max_concurrent as f64).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let load_score = headroom * LOAD_WEIGHT;

    let bonus = if load == 0 { AVAILABILITY_BONUS } else { 0.0 };

    domain + load_score + bonus + rand::random::<f64>() * TIE_BREAKER_MAX
}

/// Average declared affinity over the preferred domains; neutral when the
/// task prefers nothing.
fn domain_affinity(agent: &AgentDescriptor, hints: &RoutingHints) -> f64 {
    if hints.preferred_domains.is_empty() {
        return DEFAULT_DOMAIN_WEIGHT;
    }
    let total: f64 = hints
        .preferred_domains
        .iter()
        .map(|domain| {
            agent
                .domain_weights
                .get(domain)
                .copied()
                .unwrap_or(DEFAULT_DOMAIN_WEIGHT)
        })
        .sum();
    total / hints.preferred_domains.len() as f64
}
