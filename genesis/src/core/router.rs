//! Deterministic routing between agents of a network.

use crate::core::state::NetworkState;

/// What the network should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Run one turn of the named agent.
    Run(String),
    /// Terminate the loop.
    Stop,
}

/// Everything a router may inspect. Routers see the state as of the end of the
/// previous iteration.
#[derive(Debug, Clone, Copy)]
pub struct RouterInput<'a> {
    pub state: &'a NetworkState,
    /// 1-indexed iteration about to run.
    pub iteration: u32,
    /// Agent that ran in the previous iteration, if any.
    pub last_agent: Option<&'a str>,
}

/// Pure decision point invoked once per iteration.
pub trait Router {
    fn route(&self, input: &RouterInput<'_>) -> RouteDecision;
}

/// Stop as soon as a summary exists, otherwise re-select the same agent.
#[derive(Debug, Clone)]
pub struct SummaryRouter {
    agent: String,
}

impl SummaryRouter {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
        }
    }
}

impl Router for SummaryRouter {
    fn route(&self, input: &RouterInput<'_>) -> RouteDecision {
        if input.state.has_summary() {
            return RouteDecision::Stop;
        }
        RouteDecision::Run(self.agent.clone())
    }
}

/// Adapts a closure into a [`Router`], for networks with custom selection rules.
pub struct FnRouter<F>(pub F);

impl<F> Router for FnRouter<F>
where
    F: Fn(&RouterInput<'_>) -> RouteDecision,
{
    fn route(&self, input: &RouterInput<'_>) -> RouteDecision {
        (self.0)(input)
    }
}
