use fusiongate_planner::{CompiledField, ServerError};
use fusiongate_schema::CompositeSchema;
use serde_json::{Map, Value};

/// Answers the root `__schema` and `__type` fields.
pub trait IntrospectionResolver: Send + Sync {
    fn resolve(
        &self,
        schema: &CompositeSchema,
        field: &CompiledField,
        variables: &Map<String, Value>,
    ) -> Result<Value, ServerError>;
}

/// Rejects every introspection field.
pub struct NoIntrospection;

impl IntrospectionResolver for NoIntrospection {
    fn resolve(
        &self,
        _schema: &CompositeSchema,
        _field: &CompiledField,
        _variables: &Map<String, Value>,
    ) -> Result<Value, ServerError> {
        Err(ServerError::new("Introspection is not supported."))
    }
}
