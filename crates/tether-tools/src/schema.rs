//! Tool schema derivation.
//!
//! A tool is declared once, explicitly: its name, an optional description and
//! an ordered list of typed parameters. From that declaration we derive the
//! JSON schema the model sees: `type: object`, one property per parameter and
//! `required` listing the parameters that have no default.

use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use tether_protocol::ToolDescriptor;

/// Parameter types understood by the schema builder.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<ParamType>),
    Object,
    /// No type constraint.
    Any,
}

impl ParamType {
    pub fn array_of(item: ParamType) -> Self {
        Self::Array(Box::new(item))
    }

    pub fn json_schema(&self) -> Value {
        match self {
            Self::String => json!({ "type": "string" }),
            Self::Integer => json!({ "type": "integer" }),
            Self::Number => json!({ "type": "number" }),
            Self::Boolean => json!({ "type": "boolean" }),
            Self::Array(item) => json!({ "type": "array", "items": item.json_schema() }),
            Self::Object => json!({ "type": "object" }),
            Self::Any => json!({}),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub param_type: ParamType,
    pub description: Option<String>,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }

    fn json_schema(&self) -> Value {
        let mut schema = self.param_type.json_schema();
        if let Value::Object(fields) = &mut schema {
            if let Some(description) = &self.description {
                fields.insert("description".to_owned(), Value::String(description.clone()));
            }
            if let Some(default) = &self.default {
                fields.insert("default".to_owned(), default.clone());
            }
        }
        schema
    }
}

#[derive(Debug, Clone)]
pub struct ToolSchemaBuilder {
    name: String,
    description: Option<String>,
    params: IndexMap<String, ParamSpec>,
}

impl ToolSchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            params: IndexMap::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// A parameter the caller must supply.
    pub fn param(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.params.insert(
            name.into(),
            ParamSpec {
                param_type,
                description: Some(description.into()),
                default: None,
            },
        );
        self
    }

    /// A parameter with a default; it is left out of `required`.
    pub fn optional_param(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        default: Value,
    ) -> Self {
        self.params.insert(
            name.into(),
            ParamSpec {
                param_type,
                description: Some(description.into()),
                default: Some(default),
            },
        );
        self
    }

    pub fn params(&self) -> &IndexMap<String, ParamSpec> {
        &self.params
    }

    pub fn build(&self) -> ToolDescriptor {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|(name, spec)| (name.clone(), spec.json_schema()))
            .collect();
        let required: Vec<Value> = self
            .params
            .iter()
            .filter(|(_, spec)| spec.is_required())
            .map(|(name, _)| Value::String(name.clone()))
            .collect();

        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone().unwrap_or_default(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}
