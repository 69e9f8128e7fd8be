//! Page-driving executors: navigate, click, wait, scroll.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::ExecError;
use crate::workflow::NodeType;

use super::params::{ClickParams, NavigateParams, ScrollParams, WaitParams};
use super::{ExecutionInput, ExecutionOutput, NodeExecutor};

/// Drives the page to the node's target URL and classifies the response.
pub struct NavigateExecutor;

#[async_trait]
impl NodeExecutor for NavigateExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Navigate
    }

    fn validate(&self, params: &Value) -> Result<(), ExecError> {
        NavigateParams::parse(params).map(|_| ())
    }

    async fn execute(&self, input: ExecutionInput<'_>) -> Result<ExecutionOutput, ExecError> {
        let params = NavigateParams::parse(input.params)?;
        let target = params.target(&input.item.url).to_string();
        let timeout = params
            .timeout_ms
            .map_or(input.timeout, Duration::from_millis)
            .min(input.timeout);

        debug!(url = %target, ?timeout, "navigating");
        let nav = input
            .page
            .goto(&target, params.wait_until, timeout)
            .await
            .map_err(|e| match ExecError::from(e) {
                // Navigation-scoped network failures keep their own variant
                ExecError::Network(msg) => ExecError::Navigation(msg),
                other => other,
            })?;

        if let Some(status) = nav.status
            && let Some(err) = ExecError::from_status(status)
        {
            return Err(err);
        }

        let mut output = ExecutionOutput::with_result(json!({
            "final_url": nav.final_url.clone(),
            "status": nav.status,
        }));
        if let Some(status) = nav.status {
            output.meta("status", status);
        }
        output.meta("final_url", nav.final_url);
        Ok(output)
    }
}

/// Dispatches a trusted click on the first match of a selector.
pub struct ClickExecutor;

#[async_trait]
impl NodeExecutor for ClickExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Click
    }

    fn validate(&self, params: &Value) -> Result<(), ExecError> {
        ClickParams::parse(params).map(|_| ())
    }

    async fn execute(&self, input: ExecutionInput<'_>) -> Result<ExecutionOutput, ExecError> {
        let params = ClickParams::parse(input.params)?;

        let matches = input.page.select_all(&params.selector).await?;
        if matches.is_empty() {
            return Err(ExecError::SelectorMissing(params.selector));
        }

        input.page.click(&params.selector).await?;
        if let Some(ms) = params.wait_after_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let mut output = ExecutionOutput::empty();
        output.meta("elements_matched", matches.len());
        Ok(output)
    }
}

/// Waits for a selector to appear, or sleeps a fixed duration.
pub struct WaitExecutor;

#[async_trait]
impl NodeExecutor for WaitExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Wait
    }

    fn validate(&self, params: &Value) -> Result<(), ExecError> {
        WaitParams::parse(params).map(|_| ())
    }

    async fn execute(&self, input: ExecutionInput<'_>) -> Result<ExecutionOutput, ExecError> {
        let params = WaitParams::parse(input.params)?;

        if let Some(selector) = &params.selector {
            let timeout = params
                .duration_ms
                .map_or(input.timeout, Duration::from_millis)
                .min(input.timeout);
            input.page.wait_for_selector(selector, timeout).await?;
        } else if let Some(ms) = params.duration_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        Ok(ExecutionOutput::empty())
    }
}

/// Scrolls the viewport, optionally in repeated steps.
pub struct ScrollExecutor;

#[async_trait]
impl NodeExecutor for ScrollExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Scroll
    }

    fn validate(&self, params: &Value) -> Result<(), ExecError> {
        ScrollParams::parse(params).map(|_| ())
    }

    async fn execute(&self, input: ExecutionInput<'_>) -> Result<ExecutionOutput, ExecError> {
        let params = ScrollParams::parse(input.params)?;

        for _ in 0..params.times {
            input.page.scroll_by(params.dx, params.dy).await?;
            if let Some(ms) = params.delay_ms {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }

        let mut output = ExecutionOutput::empty();
        output.meta("scrolled", params.times);
        Ok(output)
    }
}
