//! The `discover` executor: collect hrefs for the URL frontier.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::error::ExecError;
use crate::utils::{is_crawlable_url, resolve_href};
use crate::workflow::NodeType;

use super::params::DiscoverParams;
use super::{ExecutionInput, ExecutionOutput, NodeExecutor};

/// Evaluates a selector, resolves matched hrefs against the current page
/// URL, and returns them as `discovered_urls` for the orchestrator to
/// merge into the queue.
pub struct DiscoverExecutor;

#[async_trait]
impl NodeExecutor for DiscoverExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Discover
    }

    fn validate(&self, params: &Value) -> Result<(), ExecError> {
        DiscoverParams::parse(params).map(|_| ())
    }

    async fn execute(&self, input: ExecutionInput<'_>) -> Result<ExecutionOutput, ExecError> {
        let params = DiscoverParams::parse(input.params)?;

        let base = input
            .page
            .current_url()
            .await
            .ok()
            .and_then(|u| Url::parse(&u).ok())
            .or_else(|| Url::parse(&input.item.url).ok())
            .ok_or_else(|| ExecError::Unknown("no base URL for link resolution".into()))?;

        let elements = input.page.select_all(&params.selector).await?;
        let matched = elements.len();

        let mut discovered: Vec<String> = Vec::new();
        for element in &elements {
            let Some(raw) = element.attr(&params.attribute) else {
                continue;
            };
            let Ok(resolved) = resolve_href(&base, raw) else {
                continue;
            };
            let resolved = resolved.to_string();
            if !is_crawlable_url(&resolved) {
                continue;
            }
            if params.dedupe && discovered.contains(&resolved) {
                continue;
            }
            discovered.push(resolved);
            if let Some(limit) = params.limit
                && discovered.len() >= limit
            {
                break;
            }
        }

        debug!(
            url = %input.item.url,
            matched,
            discovered = discovered.len(),
            "link discovery"
        );

        for url in &discovered {
            input.ctx.add_discovered(url.clone(), input.node_id);
        }

        let mut output = ExecutionOutput::with_result(json!({
            "discovered": discovered.len(),
        }));
        output.meta("elements_matched", matched);
        output.meta("discovered", discovered.len());
        output.discovered_urls = discovered;
        Ok(output)
    }
}
