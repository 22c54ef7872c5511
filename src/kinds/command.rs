//! AI-workflow command queue kind.
//!
//! Commands are claimed by remote agents over the engine's claim/
//! heartbeat operations; the agent reports progress while executing and
//! finishes with mark_succeeded or mark_failed_or_retry. No credential
//! is resolved — the agent authenticates itself to the host application.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kind::{CredentialRef, WorkKind};

/// What a claimed agent is being asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    StartWorkflow,
    ExecuteStep,
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandType::StartWorkflow => f.write_str("START_WORKFLOW"),
            CommandType::ExecuteStep => f.write_str("EXECUTE_STEP"),
        }
    }
}

/// Task parameters for a workflow command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command_type: CommandType,
    /// Workflow definition; required for START_WORKFLOW.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    /// Step definition; required for EXECUTE_STEP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<Uuid>,
    /// Root content reference linking the command back to its subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_ref_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_ref_type: Option<String>,
    /// Extra parameters, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

pub struct CommandKind;

impl WorkKind for CommandKind {
    const NAME: &'static str = "workflow_command";
    const TABLE: &'static str = "workflow_commands";
    const HISTORY_TABLE: &'static str = "workflow_command_history";
    // Agent steps run long between heartbeats.
    const SWEEP_STALENESS_SECS: i64 = 900;

    type Payload = CommandPayload;

    fn validate(payload: &Self::Payload) -> std::result::Result<(), String> {
        match payload.command_type {
            CommandType::StartWorkflow if payload.workflow_id.is_none() => {
                Err("workflowId is required for START_WORKFLOW".into())
            }
            CommandType::ExecuteStep if payload.step_id.is_none() => {
                Err("stepId is required for EXECUTE_STEP".into())
            }
            _ => Ok(()),
        }
    }

    fn credential(_payload: &Self::Payload) -> Option<CredentialRef<'_>> {
        None
    }
}
