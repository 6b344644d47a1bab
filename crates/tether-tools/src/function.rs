use std::fmt;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tether_protocol::ToolDescriptor;

use crate::Tool;
use crate::schema::{ParamSpec, ParamType, ToolSchemaBuilder};

type Handler = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// A tool backed by a plain closure.
///
/// Missing optional arguments are filled from their declared defaults before
/// the handler runs; a missing required argument is an error.
#[derive(Clone)]
pub struct FunctionTool {
    descriptor: ToolDescriptor,
    params: Vec<(String, ParamSpec)>,
    handler: Handler,
}

impl FunctionTool {
    pub fn builder(name: impl Into<String>) -> FunctionToolBuilder {
        FunctionToolBuilder {
            schema: ToolSchemaBuilder::new(name),
        }
    }

    fn complete_arguments(&self, args: Value) -> Result<Value> {
        let mut fields = match args {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => return Ok(other),
        };
        for (name, spec) in &self.params {
            if fields.contains_key(name) {
                continue;
            }
            match &spec.default {
                Some(default) => {
                    fields.insert(name.clone(), default.clone());
                }
                None => bail!(
                    "{}() missing required argument '{name}'",
                    self.descriptor.name
                ),
            }
        }
        Ok(Value::Object(fields))
    }
}

impl fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTool")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args = self.complete_arguments(args)?;
        (self.handler)(args)
    }
}

#[derive(Debug, Clone)]
pub struct FunctionToolBuilder {
    schema: ToolSchemaBuilder,
}

impl FunctionToolBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.schema = self.schema.description(description);
        self
    }

    pub fn param(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.schema = self.schema.param(name, param_type, description);
        self
    }

    pub fn optional_param(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        default: Value,
    ) -> Self {
        self.schema = self
            .schema
            .optional_param(name, param_type, description, default);
        self
    }

    pub fn handler<F>(self, handler: F) -> FunctionTool
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        FunctionTool {
            descriptor: self.schema.build(),
            params: self
                .schema
                .params()
                .iter()
                .map(|(name, spec)| (name.clone(), spec.clone()))
                .collect(),
            handler: Arc::new(handler),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use serde_json::json;

    fn add_tool() -> FunctionTool {
        FunctionTool::builder("add")
            .param("a", ParamType::Integer, "")
            .param("b", ParamType::Integer, "")
            .handler(|args| {
                let a = args["a"].as_i64().context("a must be an integer")?;
                let b = args["b"].as_i64().context("b must be an integer")?;
                Ok(json!(a + b))
            })
    }

    #[tokio::test]
    async fn calls_handler_with_arguments() -> anyhow::Result<()> {
        let output = add_tool().call(json!({"a": 2, "b": 3})).await?;
        assert_eq!(output, json!(5));
        Ok(())
    }

    #[test]
    fn descriptor_matches_declaration() {
        let tool = add_tool();
        let function = tool.descriptor().to_llm_function();
        assert_eq!(function["type"], "function");
        assert_eq!(function["function"]["name"], "add");
        assert_eq!(function["function"]["description"], "");
        assert_eq!(
            function["function"]["parameters"]["properties"],
            json!({"a": {"type": "integer", "description": ""}, "b": {"type": "integer", "description": ""}})
        );
        assert_eq!(
            function["function"]["parameters"]["required"],
            json!(["a", "b"])
        );
    }

    #[tokio::test]
    async fn missing_required_argument_fails() {
        let error = add_tool().call(json!({"a": 2})).await.unwrap_err();
        assert!(error.to_string().contains("missing required argument 'b'"));
    }

    #[tokio::test]
    async fn defaults_fill_missing_optional_arguments() -> anyhow::Result<()> {
        let greet = FunctionTool::builder("greet")
            .param("name", ParamType::String, "who to greet")
            .optional_param("greeting", ParamType::String, "", json!("hello"))
            .handler(|args| Ok(json!(format!("{} {}", args["greeting"].as_str().unwrap_or_default(), args["name"].as_str().unwrap_or_default()))));

        assert_eq!(greet.call(json!({"name": "ada"})).await?, json!("hello ada"));
        assert_eq!(
            greet.call(json!({"name": "ada", "greeting": "hi"})).await?,
            json!("hi ada")
        );
        Ok(())
    }
}
