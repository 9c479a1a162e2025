//! Graph Engine
//!
//! Drives a compiled stage graph over one shared conversation state. Each
//! stage loops between inference and tool execution until it produces a
//! toolless turn, then control follows the stage's static edge. Tool
//! failures never abort the run; they are folded into the transcript and
//! surfaced as caveats on the final report.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::graph::stage::{should_continue, run_stage_turn, Next, Route, StageNode};
use crate::graph::state::ConversationState;
use crate::tools::{dispatch, ToolRegistry};
use crate::types::ChatMessage;

/// A validated stage topology. Construction checks every edge, so the run
/// loop never encounters a dangling stage name.
pub struct PipelineGraph {
    stages: Vec<StageNode>,
    index: HashMap<String, usize>,
    entry: String,
}

impl std::fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("stages", &self.stages.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("entry", &self.entry)
            .finish()
    }
}

impl PipelineGraph {
    pub fn new(stages: Vec<StageNode>, entry: impl Into<String>) -> Result<Self, EngineError> {
        if stages.is_empty() {
            return Err(EngineError::EmptyGraph);
        }
        let index: HashMap<String, usize> = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        let entry = entry.into();
        if !index.contains_key(&entry) {
            return Err(EngineError::UnknownStage {
                stage: entry.clone(),
            });
        }
        for stage in &stages {
            if let Next::Stage(target) = &stage.next {
                if !index.contains_key(target) {
                    return Err(EngineError::UnknownStage {
                        stage: target.clone(),
                    });
                }
            }
        }

        Ok(Self {
            stages,
            index,
            entry,
        })
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    fn stage(&self, name: &str) -> Result<&StageNode, EngineError> {
        self.index
            .get(name)
            .map(|&i| &self.stages[i])
            .ok_or_else(|| EngineError::UnknownStage {
                stage: name.to_string(),
            })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RunStatus {
    /// Every stage ran to its toolless turn and the final edge was End.
    Completed,
    /// Cancellation was observed at a safe point; the state is a valid
    /// prefix of a full run.
    Cancelled,
    /// A stage kept requesting tools past its round budget.
    StepBudgetExceeded { stage: String },
    /// The run aborted with a fatal engine error. Never produced by the
    /// engine itself; recorded by the runtime so the run log is not left
    /// open-ended.
    Failed { message: String },
}

/// What a run hands back: terminal status, the full state, and one caveat
/// line per tool call that failed along the way.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub state: ConversationState,
    pub caveats: Vec<String>,
}

pub struct GraphEngine {
    registry: ToolRegistry,
    tool_timeout: Duration,
    max_rounds_per_stage: usize,
    max_tokens: Option<u32>,
}

impl GraphEngine {
    pub fn new(
        registry: ToolRegistry,
        tool_timeout: Duration,
        max_rounds_per_stage: usize,
        max_tokens: Option<u32>,
    ) -> Self {
        Self {
            registry,
            tool_timeout,
            max_rounds_per_stage,
            max_tokens,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run the graph to a terminal status.
    ///
    /// Cancellation is observed at stage boundaries and between complete
    /// tool batches. A batch that has started always finishes, so every
    /// declared request in the transcript has its outcome appended.
    pub async fn run(
        &self,
        graph: &PipelineGraph,
        mut state: ConversationState,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunReport, EngineError> {
        let mut caveats: Vec<String> = Vec::new();
        let mut current = graph.entry().to_string();

        loop {
            if *cancel.borrow() {
                info!(stage = %current, "run cancelled at stage boundary");
                return Ok(report(RunStatus::Cancelled, state, caveats));
            }

            let stage = graph.stage(&current)?;
            info!(stage = %stage.name, "entering stage");

            let mut rounds = 0usize;
            loop {
                if rounds >= self.max_rounds_per_stage {
                    warn!(stage = %stage.name, rounds, "stage exceeded its round budget");
                    return Ok(report(
                        RunStatus::StepBudgetExceeded {
                            stage: stage.name.clone(),
                        },
                        state,
                        caveats,
                    ));
                }
                rounds += 1;

                let message =
                    run_stage_turn(stage, &self.registry, &mut state, self.max_tokens).await?;

                match should_continue(&message) {
                    Route::Advance => {
                        if !message.content.is_empty() {
                            state.set_scratch(stage.name.clone(), message.content.clone());
                        }
                        break;
                    }
                    Route::Tools => {
                        let requests = state.pending_tool_requests().to_vec();
                        for request in &requests {
                            let outcome =
                                dispatch(&self.registry, request, self.tool_timeout).await;
                            if let Some(err) = &outcome.error {
                                caveats.push(format!(
                                    "{}: tool '{}' failed: {}",
                                    stage.name, outcome.name, err
                                ));
                            }
                            state.push(ChatMessage::tool(&outcome));
                        }
                        if *cancel.borrow() {
                            info!(stage = %stage.name, "run cancelled after tool batch");
                            return Ok(report(RunStatus::Cancelled, state, caveats));
                        }
                    }
                }
            }

            match &stage.next {
                Next::Stage(next) => current = next.clone(),
                Next::End => {
                    info!(stage = %stage.name, "graph reached end");
                    return Ok(report(RunStatus::Completed, state, caveats));
                }
            }
        }
    }
}

fn report(status: RunStatus, state: ConversationState, caveats: Vec<String>) -> RunReport {
    RunReport {
        status,
        state,
        caveats,
    }
}
