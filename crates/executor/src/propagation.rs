use fusiongate_planner::{
    CompiledField, CompiledOperation, CompiledSelectionSet, ErrorPath, FieldKind, ServerError,
};
use parser::types::{BaseType, Type};
use serde_json::{Map, Value};

use crate::result::{merge_data, typename};
use crate::{ConditionalVisibilitySet, ErrorMode};

/// Shapes the merged result tree into the client response.
///
/// Injected fields are dropped, `__typename` is answered from the concrete type and
/// null values in non-null positions are reported and handled per error mode.
/// Returns `None` when the response must not carry data.
pub(crate) fn complete_data(
    operation: &CompiledOperation,
    visible: &ConditionalVisibilitySet,
    data: Value,
    errors: &mut Vec<ServerError>,
    mode: ErrorMode,
) -> Option<Value> {
    let object = match data {
        Value::Object(object) => object,
        _ => Map::new(),
    };

    let mut completer = Completer {
        visible,
        mode,
        errors,
    };
    let value = completer.complete_object(&operation.selection_set, &object, &mut Vec::new());

    match mode {
        ErrorMode::Halt if !completer.errors.is_empty() => None,
        _ => Some(value.unwrap_or(Value::Null)),
    }
}

struct Completer<'a> {
    visible: &'a ConditionalVisibilitySet,
    mode: ErrorMode,
    errors: &'a mut Vec<ServerError>,
}

impl<'a> Completer<'a> {
    /// `None` means a non-null violation bubbled up to this object.
    fn complete_object(
        &mut self,
        selection_set: &CompiledSelectionSet,
        object: &Map<String, Value>,
        path: &mut Vec<ErrorPath>,
    ) -> Option<Value> {
        let type_name = concrete_type(selection_set, object);
        let mut output = Map::new();

        for field in selection_set.fields_for(type_name) {
            if !self.visible.is_visible(&field.conditions) {
                continue;
            }

            let key = field.response_key.as_str();
            path.push(ErrorPath::Name(key.to_string()));
            let value = match field.kind {
                FieldKind::Typename => Some(Value::String(type_name.to_string())),
                FieldKind::Introspection => Some(object.get(key).cloned().unwrap_or(Value::Null)),
                FieldKind::Data => self.complete_value(field, &field.ty, object.get(key), path),
            };
            path.pop();

            match (value, output.get_mut(key)) {
                (Some(value), Some(existing)) => merge_data(existing, value),
                (Some(value), None) => {
                    output.insert(key.to_string(), value);
                }
                (None, _) => return None,
            }
        }

        Some(Value::Object(output))
    }

    fn complete_value(
        &mut self,
        field: &CompiledField,
        ty: &Type,
        value: Option<&Value>,
        path: &mut Vec<ErrorPath>,
    ) -> Option<Value> {
        let value = match value {
            None | Some(Value::Null) => return self.null_value(field, ty, path),
            Some(value) => value,
        };

        let completed = match (&ty.base, value) {
            (BaseType::List(item_type), Value::Array(items)) => {
                let mut list = Vec::with_capacity(items.len());
                for (idx, item) in items.iter().enumerate() {
                    path.push(ErrorPath::Index(idx));
                    let item = self.complete_value(field, item_type, Some(item), path);
                    path.pop();
                    match item {
                        Some(item) => list.push(item),
                        None => return bubble(ty),
                    }
                }
                Some(Value::Array(list))
            }
            (BaseType::Named(_), Value::Object(object)) => match &field.selection_set {
                Some(selection_set) => self.complete_object(selection_set, object, path),
                None => Some(value.clone()),
            },
            _ => Some(value.clone()),
        };

        match completed {
            Some(value) => Some(value),
            None => bubble(ty),
        }
    }

    fn null_value(
        &mut self,
        field: &CompiledField,
        ty: &Type,
        path: &[ErrorPath],
    ) -> Option<Value> {
        if ty.nullable {
            return Some(Value::Null);
        }

        if !self.has_error_near(path) {
            let mut error = ServerError::new(format!(
                "Cannot return null for non-nullable field {}.{}.",
                field.parent_type, field.name
            ))
            .with_path(path.to_vec());
            error.locations = vec![field.pos];
            self.errors.push(error);
        }

        match self.mode {
            ErrorMode::Null => Some(Value::Null),
            ErrorMode::Propagate | ErrorMode::Halt => None,
        }
    }

    /// An error already reported at, above or below the path.
    fn has_error_near(&self, path: &[ErrorPath]) -> bool {
        self.errors.iter().any(|error| {
            !error.path.is_empty()
                && (error.path.starts_with(path) || path.starts_with(&error.path))
        })
    }
}

#[inline]
fn bubble(ty: &Type) -> Option<Value> {
    if ty.nullable {
        Some(Value::Null)
    } else {
        None
    }
}

fn concrete_type<'a>(selection_set: &'a CompiledSelectionSet, object: &Map<String, Value>) -> &'a str {
    typename(object)
        .and_then(|name| {
            selection_set
                .possible_types
                .iter()
                .find(|possible_type| possible_type.as_str() == name)
        })
        .map(|name| name.as_str())
        .unwrap_or_else(|| selection_set.parent_type.as_str())
}

#[cfg(test)]
mod tests {
    use fusiongate_planner::{compile, normalize};
    use fusiongate_schema::CompositeSchema;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    const SCHEMA: &str = r#"
        schema @source_schema(name: "a") { query: Query }
        type Query {
            items: [Item!] @source(schema: "a")
            item: Item! @source(schema: "a")
            node: Node @source(schema: "a")
        }
        interface Node { id: ID! @source(schema: "a") }
        type Item implements Node {
            id: ID! @source(schema: "a")
            name: String! @source(schema: "a")
            note: String @source(schema: "a")
        }
    "#;

    fn complete(query: &str, data: Value, mode: ErrorMode) -> (Option<Value>, Vec<ServerError>) {
        let schema = CompositeSchema::parse(SCHEMA).unwrap();
        let document = parser::parse_query(query).unwrap();
        let operation = compile(&schema, normalize(&schema, &document, None).unwrap()).unwrap();
        let visible = ConditionalVisibilitySet::new(&operation, &Map::new());
        let mut errors = Vec::new();
        let data = complete_data(&operation, &visible, data, &mut errors, mode);
        (data, errors)
    }

    fn paths(errors: &[ServerError]) -> Vec<Vec<ErrorPath>> {
        errors.iter().map(|error| error.path.clone()).collect()
    }

    #[test]
    fn drop_injected_fields() {
        let (data, errors) = complete(
            "{ items { name } }",
            json!({ "items": [{ "name": "a", "__fusion_id": "1" }] }),
            ErrorMode::Propagate,
        );
        assert_eq!(data, Some(json!({ "items": [{ "name": "a" }] })));
        assert!(errors.is_empty());
    }

    #[test]
    fn bubble_to_nullable_ancestor() {
        let (data, errors) = complete(
            "{ items { id name } }",
            json!({ "items": [{ "id": "1", "name": "a" }, { "id": "2", "name": null }] }),
            ErrorMode::Propagate,
        );
        assert_eq!(data, Some(json!({ "items": null })));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Cannot return null for non-nullable field Item.name.");
        assert_eq!(
            paths(&errors),
            vec![vec![
                ErrorPath::Name("items".to_string()),
                ErrorPath::Index(1),
                ErrorPath::Name("name".to_string()),
            ]]
        );
    }

    #[test]
    fn bubble_to_root() {
        let (data, errors) = complete("{ item { name } }", json!({}), ErrorMode::Propagate);
        assert_eq!(data, Some(Value::Null));
        assert_eq!(paths(&errors), vec![vec![ErrorPath::Name("item".to_string())]]);
    }

    #[test]
    fn null_mode_keeps_siblings() {
        let (data, errors) = complete(
            "{ item { id name note } }",
            json!({ "item": { "id": "1", "name": null, "note": "n" } }),
            ErrorMode::Null,
        );
        assert_eq!(data, Some(json!({ "item": { "id": "1", "name": null, "note": "n" } })));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn halt_drops_data() {
        let (data, errors) = complete(
            "{ item { name } }",
            json!({ "item": { "name": null } }),
            ErrorMode::Halt,
        );
        assert_eq!(data, None);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn skip_reported_paths() {
        let schema = CompositeSchema::parse(SCHEMA).unwrap();
        let document = parser::parse_query("{ item { name } }").unwrap();
        let operation = compile(&schema, normalize(&schema, &document, None).unwrap()).unwrap();
        let visible = ConditionalVisibilitySet::new(&operation, &Map::new());
        let mut errors = vec![ServerError::new("boom").with_path(vec![ErrorPath::Name("item".to_string())])];
        let data = complete_data(&operation, &visible, json!({}), &mut errors, ErrorMode::Propagate);
        assert_eq!(data, Some(Value::Null));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn typename_of_concrete_type() {
        let (data, _) = complete(
            "{ __typename node { __typename ... on Item { name } } }",
            json!({ "node": { "__fusion_typename": "Item", "name": "a" } }),
            ErrorMode::Propagate,
        );
        assert_eq!(
            data,
            Some(json!({ "__typename": "Query", "node": { "__typename": "Item", "name": "a" } }))
        );
    }
}
