use fusiongate_planner::{CompiledOperation, ConditionId};
use serde_json::{Map, Value};
use value::ConstValue;

/// Per-request evaluation of every runtime condition of an operation.
///
/// Entry `i` tells whether selections guarded by condition `i` are included.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ConditionalVisibilitySet(Vec<bool>);

impl ConditionalVisibilitySet {
    pub fn new(operation: &CompiledOperation, variables: &Map<String, Value>) -> Self {
        Self(
            operation
                .conditions
                .iter()
                .map(|condition| {
                    let name = condition.variable().as_str();
                    let value = match variables.get(name) {
                        Some(Value::Bool(value)) => *value,
                        Some(_) => false,
                        None => matches!(
                            operation
                                .variable_definition(name)
                                .and_then(|definition| definition.default_value.as_ref())
                                .map(|value| &value.node),
                            Some(ConstValue::Boolean(true))
                        ),
                    };
                    condition.includes(value)
                })
                .collect(),
        )
    }

    #[inline]
    pub fn is_visible(&self, conditions: &[ConditionId]) -> bool {
        conditions
            .iter()
            .all(|id| self.0.get(*id).copied().unwrap_or(true))
    }

    #[inline]
    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use fusiongate_planner::{compile, normalize};
    use fusiongate_schema::CompositeSchema;
    use serde_json::json;

    use super::*;

    fn operation(query: &str) -> CompiledOperation {
        let schema = CompositeSchema::parse(
            r#"
            schema @source_schema(name: "a") { query: Query }
            type Query { a: Int @source(schema: "a") b: Int @source(schema: "a") }
            "#,
        )
        .unwrap();
        let document = parser::parse_query(query).unwrap();
        compile(&schema, normalize(&schema, &document, None).unwrap()).unwrap()
    }

    #[test]
    fn evaluate_conditions() {
        let operation = operation(
            r#"query($skip: Boolean!, $show: Boolean = true) {
                a @skip(if: $skip)
                b @include(if: $show)
            }"#,
        );

        let visible = ConditionalVisibilitySet::new(
            &operation,
            json!({ "skip": true }).as_object().unwrap(),
        );
        assert_eq!(visible.as_slice(), &[false, true]);
        assert!(!visible.is_visible(&[0]));
        assert!(visible.is_visible(&[1]));
        assert!(!visible.is_visible(&[0, 1]));
        assert!(visible.is_visible(&[]));

        let visible = ConditionalVisibilitySet::new(
            &operation,
            json!({ "skip": false, "show": false }).as_object().unwrap(),
        );
        assert_eq!(visible.as_slice(), &[true, false]);
    }
}
