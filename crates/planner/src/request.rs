use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub query: String,
    #[serde(
        rename = "operationName",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub variables: Map<String, Value>,
}

impl Request {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation: None,
            variables: Default::default(),
        }
    }

    pub fn operation(self, operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..self
        }
    }

    pub fn variables(self, variables: Map<String, Value>) -> Self {
        Self { variables, ..self }
    }

    pub fn extend_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables.extend(variables);
        self
    }
}
