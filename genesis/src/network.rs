//! Agent network: the bounded router/agent loop over shared state.

use std::path::Path;
use std::time::Instant;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::agents::{Agent, TurnEnv};
use crate::core::router::{RouteDecision, Router, RouterInput};
use crate::core::state::NetworkState;
use crate::core::types::ConversationItem;
use crate::io::iteration_log::{IterationMeta, IterationWriteRequest, write_iteration};

/// Reason why [`AgentNetwork::run`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The router signalled termination before running `next_iter`.
    Router { next_iter: u32 },
    /// Every allowed iteration ran without the router stopping.
    MaxIterationsExceeded { max_iterations: u32 },
}

/// Summary of a network run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: u32,
    pub stop: LoopStop,
}

/// Where iteration logs go, if anywhere.
#[derive(Debug, Clone, Copy)]
pub struct IterationLogTarget<'a> {
    pub run_id: &'a str,
    pub iterations_dir: &'a Path,
}

pub struct AgentNetwork<R> {
    name: String,
    agents: Vec<Agent>,
    router: R,
    max_iterations: u32,
}

impl<R: Router> AgentNetwork<R> {
    pub fn new(
        name: impl Into<String>,
        agents: Vec<Agent>,
        router: R,
        max_iterations: u32,
    ) -> Result<Self> {
        let name = name.into();
        if agents.is_empty() {
            return Err(anyhow!("network {name} has no agents"));
        }
        if max_iterations == 0 {
            return Err(anyhow!("network {name}: max_iterations must be > 0"));
        }
        for (i, agent) in agents.iter().enumerate() {
            if agents[..i].iter().any(|other| other.name() == agent.name()) {
                return Err(anyhow!("network {name}: duplicate agent {}", agent.name()));
            }
        }
        Ok(Self {
            name,
            agents,
            router,
            max_iterations,
        })
    }

    /// Iterate router and agents until the router stops or the bound is hit.
    ///
    /// Exhausting `max_iterations` is a normal stop, not an error. Errors are
    /// infrastructure failures escaping an agent turn.
    #[instrument(skip_all, fields(network = %self.name))]
    pub fn run(
        &self,
        env: &TurnEnv<'_>,
        log: Option<IterationLogTarget<'_>>,
        transcript: &mut Vec<ConversationItem>,
        state: &mut NetworkState,
    ) -> Result<LoopOutcome> {
        let mut last_agent: Option<&str> = None;
        for iteration in 1..=self.max_iterations {
            let decision = self.router.route(&RouterInput {
                state: &*state,
                iteration,
                last_agent,
            });
            let agent_name = match decision {
                RouteDecision::Stop => {
                    info!(iteration, has_summary = state.has_summary(), "router stopped");
                    return Ok(LoopOutcome {
                        iterations: iteration - 1,
                        stop: LoopStop::Router {
                            next_iter: iteration,
                        },
                    });
                }
                RouteDecision::Run(name) => name,
            };
            let agent = self
                .agents
                .iter()
                .find(|agent| agent.name() == agent_name)
                .ok_or_else(|| anyhow!("router selected unknown agent {agent_name}"))?;

            let start = Instant::now();
            let turn = agent.run_turn(env, iteration, transcript, state)?;
            info!(
                iteration,
                agent = agent.name(),
                tool_calls = turn.tool_calls.len(),
                files = state.files.len(),
                summary = state.has_summary(),
                "iteration finished"
            );

            if let Some(target) = log {
                let meta = IterationMeta {
                    run_id: target.run_id.to_string(),
                    iter: iteration,
                    agent: agent.name().to_string(),
                    rounds: turn.rounds,
                    tool_calls: turn.tool_calls.clone(),
                    summary_captured: turn.hook_fired,
                    file_count: state.files.len(),
                    duration_ms: start.elapsed().as_millis() as u64,
                };
                write_iteration(&IterationWriteRequest {
                    iterations_dir: target.iterations_dir,
                    meta: &meta,
                    state: &*state,
                    output: &turn.output,
                })?;
            }
            last_agent = Some(agent.name());
        }

        warn!(
            max_iterations = self.max_iterations,
            "iteration bound reached without a stop"
        );
        Ok(LoopOutcome {
            iterations: self.max_iterations,
            stop: LoopStop::MaxIterationsExceeded {
                max_iterations: self.max_iterations,
            },
        })
    }
}
