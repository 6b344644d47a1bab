//! Tools that ship with tether and need no external service.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{FixedOffset, SecondsFormat, Utc};
use serde_json::{Value, json};
use tether_protocol::ToolDescriptor;

use crate::Tool;
use crate::schema::{ParamType, ToolSchemaBuilder};

/// Basic arithmetic. Bad input is reported in the output text rather than
/// failing the run.
#[derive(Debug, Clone)]
pub struct Calculator {
    descriptor: ToolDescriptor,
}

impl Calculator {
    pub const NAME: &'static str = "calculator";

    pub fn new() -> Self {
        let descriptor = ToolSchemaBuilder::new(Self::NAME)
            .description("Perform basic arithmetic operations")
            .param(
                "operation",
                ParamType::String,
                "The operation to perform. One of 'add', 'subtract', 'multiply', 'divide'.",
            )
            .param("a", ParamType::Number, "The first number.")
            .param("b", ParamType::Number, "The second number.")
            .build();
        Self { descriptor }
    }
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for Calculator {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let operation = args
            .get("operation")
            .and_then(Value::as_str)
            .context("calculator requires a string 'operation'")?;
        let a = number_arg(&args, "a")?;
        let b = number_arg(&args, "b")?;

        let result = match operation {
            "add" => a + b,
            "subtract" => a - b,
            "multiply" => a * b,
            "divide" if b == 0.0 => return Ok(json!("Error: Division by zero")),
            "divide" => a / b,
            other => return Ok(json!(format!("Error: Unknown operation '{other}'"))),
        };
        Ok(json!(result))
    }
}

fn number_arg(args: &Value, name: &str) -> Result<f64> {
    args.get(name)
        .and_then(Value::as_f64)
        .with_context(|| format!("calculator requires a numeric '{name}'"))
}

/// Current wall-clock time as RFC 3339, optionally shifted to a fixed offset.
#[derive(Debug, Clone)]
pub struct CurrentTime {
    descriptor: ToolDescriptor,
}

impl CurrentTime {
    pub const NAME: &'static str = "current_time";

    pub fn new() -> Self {
        let descriptor = ToolSchemaBuilder::new(Self::NAME)
            .description("Get the current date and time")
            .optional_param(
                "timezone_offset_hours",
                ParamType::Number,
                "Offset from UTC in hours, e.g. -5 or 5.5",
                json!(0),
            )
            .build();
        Self { descriptor }
    }
}

impl Default for CurrentTime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CurrentTime {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let hours = match args.get("timezone_offset_hours") {
            None | Some(Value::Null) => 0.0,
            Some(value) => value
                .as_f64()
                .context("timezone_offset_hours must be a number")?,
        };
        let seconds = (hours * 3600.0).round();
        let offset = if seconds.abs() <= 14.0 * 3600.0 {
            FixedOffset::east_opt(seconds as i32)
        } else {
            None
        };
        let Some(offset) = offset else {
            return Ok(json!(format!("Error: Unknown timezone offset '{hours}'")));
        };

        let now = Utc::now().with_timezone(&offset);
        Ok(json!(now.to_rfc3339_opts(SecondsFormat::Secs, true)))
    }
}
