use std::collections::HashMap;

use fusiongate_planner::{NodeId, ResolveNode, RequirementBinding, ValueSelection};
use serde_json::{Map, Value};
use value::Name;

use crate::result::{Location, ResultTree};

/// The entities of one batch position sharing identical keys and requirements.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityBatch {
    /// Lookup argument values, in the order of the lookup arguments.
    pub keys: Vec<Value>,
    /// Requirement values, in the order of the node requirements.
    pub requirements: Vec<Value>,
    pub locations: Vec<Location>,
}

/// Key and requirement values extracted from the result tree before a lookup node runs.
#[derive(Debug, Default)]
pub struct VariableRequirementStore {
    batches: HashMap<NodeId, Vec<EntityBatch>>,
}

impl VariableRequirementStore {
    /// Collects the entities of a lookup node, returning how many distinct entities must be fetched.
    ///
    /// Entities with a missing key are skipped.
    pub fn collect(
        &mut self,
        node: &ResolveNode,
        requirements: &[RequirementBinding],
        tree: &ResultTree,
    ) -> usize {
        let mut batches: Vec<EntityBatch> = Vec::new();

        if let Some(lookup) = &node.lookup {
            for location in node.paths().flat_map(|path| tree.entities(path)) {
                let entity = match tree.get(&location) {
                    Some(entity) => entity,
                    None => continue,
                };

                let keys = lookup
                    .arguments
                    .iter()
                    .map(|key| select_path(entity, &key.path))
                    .collect::<Vec<_>>();
                if keys.iter().any(Value::is_null) {
                    tracing::debug!(node = node.id, path = ?location, "Skip entity without key.");
                    continue;
                }
                let requirements = requirements
                    .iter()
                    .map(|requirement| select_value(entity, &requirement.value))
                    .collect::<Vec<_>>();

                match batches
                    .iter_mut()
                    .find(|batch| batch.keys == keys && batch.requirements == requirements)
                {
                    Some(batch) => batch.locations.push(location),
                    None => batches.push(EntityBatch {
                        keys,
                        requirements,
                        locations: vec![location],
                    }),
                }
            }
        }

        let count = batches.len();
        self.batches.insert(node.id, batches);
        count
    }

    pub fn batches(&self, id: NodeId) -> &[EntityBatch] {
        self.batches
            .get(&id)
            .map(|batches| batches.as_slice())
            .unwrap_or_default()
    }
}

fn select_value(value: &Value, selection: &ValueSelection) -> Value {
    match selection {
        ValueSelection::Path(path) => select_path(value, path),
        ValueSelection::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, selection)| (name.to_string(), select_value(value, selection)))
                .collect::<Map<_, _>>(),
        ),
    }
}

fn select_path(value: &Value, path: &[Name]) -> Value {
    match (path.split_first(), value) {
        (None, value) => value.clone(),
        (Some(_), Value::Array(items)) => {
            Value::Array(items.iter().map(|item| select_path(item, path)).collect())
        }
        (Some((name, rest)), Value::Object(object)) => object
            .get(name.as_str())
            .map(|value| select_path(value, rest))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use fusiongate_planner::PlanBuilder;
    use fusiongate_schema::CompositeSchema;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    const SCHEMA: &str = r#"
        schema @source_schema(name: "a") @source_schema(name: "b") { query: Query }
        type Query {
            products: [Product!]! @source(schema: "a")
            productById(id: ID!): Product @source(schema: "b") @lookup(schema: "b") @internal
        }
        type Product @key(schema: "a", fields: "id") @key(schema: "b", fields: "id") {
            id: ID! @source(schema: "a") @source(schema: "b")
            size: Int @source(schema: "a")
            shipping: Int
                @source(schema: "b")
                @require(schema: "b", argument: "size", type: "Int", field: "size")
        }
    "#;

    #[test]
    fn deduplicate_entities() {
        let schema = CompositeSchema::parse(SCHEMA).unwrap();
        let document = parser::parse_query("{ products { shipping } }").unwrap();
        let plan = PlanBuilder::new(&schema, document).plan().unwrap();
        let node = plan.requirement_node(3).unwrap();

        let mut tree = ResultTree::default();
        tree.merge_root(json!({
            "products": [
                { "__fusion_id": "1", "__fusion_size": 2 },
                { "__fusion_id": "2", "__fusion_size": 3 },
                { "__fusion_id": "1", "__fusion_size": 2 },
                { "__fusion_id": null, "__fusion_size": 4 },
            ]
        }));

        let mut store = VariableRequirementStore::default();
        assert_eq!(store.collect(&node.node, &node.requirements, &tree), 2);

        let batches = store.batches(3);
        assert_eq!(batches[0].keys, vec![json!("1")]);
        assert_eq!(batches[0].requirements, vec![json!(2)]);
        assert_eq!(batches[0].locations.len(), 2);
        assert_eq!(batches[1].keys, vec![json!("2")]);
        assert_eq!(batches[1].requirements, vec![json!(3)]);
        assert!(store.batches(4).is_empty());
    }

    #[test]
    fn select_nested_values() {
        let entity = json!({ "dims": { "w": 1, "h": 2 }, "tags": [{ "n": "a" }, { "n": "b" }] });
        assert_eq!(
            select_value(
                &entity,
                &ValueSelection::Object(vec![
                    (Name::new("width"), ValueSelection::Path(vec![Name::new("dims"), Name::new("w")])),
                    (Name::new("tags"), ValueSelection::Path(vec![Name::new("tags"), Name::new("n")])),
                    (Name::new("missing"), ValueSelection::Path(vec![Name::new("nope")])),
                ])
            ),
            json!({ "width": 1, "tags": ["a", "b"], "missing": null })
        );
    }
}
