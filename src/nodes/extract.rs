//! The `extract` executor: read a keyed map of values off the page.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::ExecError;
use crate::workflow::NodeType;

use super::params::ExtractParams;
use super::{ExecutionInput, ExecutionOutput, NodeExecutor};

/// Extracts configured fields into the execution context and the node
/// output. Fields marked `required` fail the node when their selector
/// matches nothing; optional fields come through as nulls so partial
/// extraction is preserved.
pub struct ExtractExecutor;

#[async_trait]
impl NodeExecutor for ExtractExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Extract
    }

    fn validate(&self, params: &Value) -> Result<(), ExecError> {
        ExtractParams::parse(params).map(|_| ())
    }

    async fn execute(&self, input: ExecutionInput<'_>) -> Result<ExecutionOutput, ExecError> {
        let params = ExtractParams::parse(input.params)?;

        let mut result = serde_json::Map::new();
        let mut matched_total = 0usize;

        for (name, spec) in &params.fields {
            let elements = input.page.select_all(&spec.selector).await?;
            matched_total += elements.len();

            let raw = elements.first().and_then(|el| match &spec.attribute {
                Some(attr) => el.attr(attr).map(str::to_string),
                None => el.text.clone(),
            });

            let value = match raw {
                Some(text) => {
                    let mut value = Value::String(text);
                    for transform in &spec.transforms {
                        value = transform.apply(value);
                    }
                    value
                }
                None if spec.required => {
                    return Err(ExecError::FieldMissing {
                        field: name.clone(),
                        selector: spec.selector.clone(),
                    });
                }
                None => Value::Null,
            };

            result.insert(name.clone(), value);
        }

        debug!(
            url = %input.item.url,
            fields = result.len(),
            schema_key = %params.schema_key,
            "extracted fields"
        );

        // Flush into the context and mark the user-facing keys
        for (name, value) in &result {
            input.ctx.set(name.clone(), value.clone());
        }
        input.ctx.mark_extracted(params.fields.keys().cloned());

        let extracted = result.len();
        let mut output = ExecutionOutput::with_result(Value::Object(result));
        output.meta("schema_key", params.schema_key);
        output.meta("fields_extracted", extracted);
        output.meta("elements_matched", matched_total);
        Ok(output)
    }
}
