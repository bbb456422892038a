use std::collections::HashMap;

use parser::Pos;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPath {
    Name(String),
    Index(usize),
}

impl From<ErrorPath> for Value {
    fn from(segment: ErrorPath) -> Self {
        match segment {
            ErrorPath::Name(name) => Value::String(name),
            ErrorPath::Index(idx) => Value::from(idx),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    pub message: String,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub path: Vec<ErrorPath>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub locations: Vec<Pos>,

    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub extensions: HashMap<String, Value>,
}

impl ServerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Default::default(),
            locations: Default::default(),
            extensions: Default::default(),
        }
    }

    pub fn with_path(self, path: Vec<ErrorPath>) -> Self {
        Self { path, ..self }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.extensions
            .insert("code".to_string(), Value::String(code.to_string()));
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Response {
    /// `None` leaves the `data` entry out of the serialized response.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<ServerError>,

    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub extensions: HashMap<String, Value>,

    #[serde(skip_serializing)]
    pub headers: Option<HashMap<String, String>>,
}

impl Response {
    pub fn from_errors(errors: Vec<ServerError>) -> Self {
        Self {
            data: None,
            errors,
            extensions: Default::default(),
            headers: None,
        }
    }
}
