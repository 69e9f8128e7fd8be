//! Control-flow executors: loop and conditional.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::ExecError;
use crate::workflow::NodeType;

use super::params::{ConditionalParams, LoopAction, LoopParams};
use super::{ExecutionInput, ExecutionOutput, NodeExecutor};

/// Bounded repetition of a scroll or click, typically to exhaust
/// infinite-scroll listings before extraction.
pub struct LoopExecutor;

#[async_trait]
impl NodeExecutor for LoopExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Loop
    }

    fn validate(&self, params: &Value) -> Result<(), ExecError> {
        LoopParams::parse(params).map(|_| ())
    }

    async fn execute(&self, input: ExecutionInput<'_>) -> Result<ExecutionOutput, ExecError> {
        let params = LoopParams::parse(input.params)?;

        let mut iterations = 0u32;
        for _ in 0..params.max_iterations {
            if let Some(stop) = &params.stop_selector
                && !input.page.select_all(stop).await?.is_empty()
            {
                break;
            }

            match &params.action {
                LoopAction::Scroll { dy } => input.page.scroll_by(0, *dy).await?,
                LoopAction::Click { selector } => {
                    // A vanished click target ends the loop rather than
                    // failing it; "load more" buttons disappear when done
                    if input.page.select_all(selector).await?.is_empty() {
                        break;
                    }
                    input.page.click(selector).await?;
                }
            }
            iterations += 1;

            if let Some(ms) = params.delay_ms {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }

        let mut output = ExecutionOutput::with_result(json!({ "iterations": iterations }));
        output.meta("iterations", iterations);
        Ok(output)
    }
}

/// Gates downstream nodes on selector presence.
///
/// The gate is named after this node's id; nodes depending on a
/// conditional are skipped by the worker when its gate is closed.
pub struct ConditionalExecutor;

#[async_trait]
impl NodeExecutor for ConditionalExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Conditional
    }

    fn validate(&self, params: &Value) -> Result<(), ExecError> {
        ConditionalParams::parse(params).map(|_| ())
    }

    async fn execute(&self, input: ExecutionInput<'_>) -> Result<ExecutionOutput, ExecError> {
        let params = ConditionalParams::parse(input.params)?;

        let present = !input.page.select_all(&params.selector).await?.is_empty();
        let open = present != params.negate;
        input.ctx.set_gate(input.node_id, open);

        let mut output = ExecutionOutput::with_result(json!({ "open": open }));
        output.meta("selector_present", present);
        Ok(output)
    }
}
