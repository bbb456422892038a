use fusiongate_schema::{CompositeSchema, MetaType, TypeExt, TypeKind};
use indexmap::{IndexMap, IndexSet};
use parser::types::{BaseType, OperationType, Type, VariableDefinition};
use parser::Pos;
use value::{Name, Value};

use crate::normalizer::{
    Condition, NormalizedDirective, NormalizedField, NormalizedOperation, NormalizedSelection,
    NormalizedSelectionSet,
};
use crate::CompileError;

pub type ConditionId = usize;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FieldKind {
    Data,
    Typename,
    Introspection,
}

#[derive(Debug, Clone)]
pub struct CompiledField {
    pub response_key: Name,
    pub alias: Option<Name>,
    pub name: Name,
    pub parent_type: Name,
    pub kind: FieldKind,
    pub arguments: Vec<(Name, Value)>,
    pub directives: Vec<NormalizedDirective>,
    pub conditions: Vec<ConditionId>,
    pub ty: Type,
    /// Source schemas able to serve the field, in schema order.
    pub sources: Vec<String>,
    pub pos: Pos,
    pub selection_set: Option<CompiledSelectionSet>,
    /// The raw selection of `__schema` and `__type`.
    pub introspection_selection_set: Option<NormalizedSelectionSet>,
}

impl CompiledField {
    #[inline]
    pub fn coordinate(&self) -> String {
        format!("{}.{}", self.parent_type, self.name)
    }
}

/// A selection set with abstract type refinements partitioned per concrete type.
#[derive(Debug, Clone)]
pub struct CompiledSelectionSet {
    pub parent_type: Name,
    /// Fields selected on the parent type itself.
    pub shared: Vec<CompiledField>,
    /// Fields selected through type conditions, per concrete possible type.
    pub by_type: IndexMap<Name, Vec<CompiledField>>,
    pub possible_types: Vec<Name>,
}

impl CompiledSelectionSet {
    /// Every field applying to an object of the concrete type.
    pub fn fields_for<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a CompiledField> {
        self.shared
            .iter()
            .chain(self.by_type.get(type_name).into_iter().flatten())
    }
}

#[derive(Debug, Clone)]
pub struct CompiledOperation {
    pub ty: OperationType,
    pub name: Option<Name>,
    pub root_type: Name,
    pub variable_definitions: Vec<VariableDefinition>,
    /// Operation-wide condition table, indexed by [`ConditionId`].
    pub conditions: Vec<Condition>,
    pub selection_set: CompiledSelectionSet,
}

impl CompiledOperation {
    pub fn variable_definition(&self, name: &str) -> Option<&VariableDefinition> {
        self.variable_definitions
            .iter()
            .find(|definition| definition.name.node.as_str() == name)
    }
}

struct Compiler<'a> {
    schema: &'a CompositeSchema,
    conditions: IndexSet<Condition>,
}

pub fn compile(
    schema: &CompositeSchema,
    operation: NormalizedOperation,
) -> Result<CompiledOperation, CompileError> {
    let root_type = match operation.ty {
        OperationType::Query => Some(schema.query_type()),
        OperationType::Mutation => schema.mutation_type(),
        OperationType::Subscription => schema.subscription_type(),
    }
    .and_then(|name| schema.type_by_name(name))
    .ok_or(CompileError::MissingRootType(match operation.ty {
        OperationType::Query => "query",
        OperationType::Mutation => "mutation",
        OperationType::Subscription => "subscription",
    }))?;

    let mut compiler = Compiler {
        schema,
        conditions: IndexSet::new(),
    };
    let selection_set = compiler.compile_selection_set(root_type, &operation.selection_set)?;

    Ok(CompiledOperation {
        ty: operation.ty,
        name: operation.name,
        root_type: root_type.name.clone(),
        variable_definitions: operation.variable_definitions,
        conditions: compiler.conditions.into_iter().collect(),
        selection_set,
    })
}

impl<'a> Compiler<'a> {
    fn compile_selection_set(
        &mut self,
        parent_type: &'a MetaType,
        selection_set: &NormalizedSelectionSet,
    ) -> Result<CompiledSelectionSet, CompileError> {
        let possible_types = self
            .schema
            .possible_types(parent_type)
            .into_iter()
            .map(|ty| ty.name.clone())
            .collect::<Vec<_>>();
        let mut compiled = CompiledSelectionSet {
            parent_type: parent_type.name.clone(),
            shared: Vec::new(),
            by_type: IndexMap::new(),
            possible_types,
        };

        for selection in &selection_set.items {
            match selection {
                NormalizedSelection::Field(field) => {
                    let field = self.compile_field(parent_type, field)?;
                    compiled.shared.push(field);
                }
                NormalizedSelection::InlineFragment(fragment) => {
                    let fragment_type = self
                        .schema
                        .type_by_name(&fragment.type_condition)
                        .ok_or_else(|| {
                            CompileError::UnknownType(fragment.type_condition.to_string())
                        })?;
                    let applicable = self
                        .schema
                        .possible_types(fragment_type)
                        .into_iter()
                        .filter(|ty| compiled.possible_types.contains(&ty.name))
                        .collect::<Vec<_>>();
                    if applicable.is_empty() {
                        return Err(CompileError::ImpossibleFragment {
                            fragment_type: fragment.type_condition.to_string(),
                            parent_type: parent_type.name.to_string(),
                        });
                    }

                    for ty in applicable {
                        let refined = self.compile_selection_set(ty, &fragment.selection_set)?;
                        if ty.name == parent_type.name {
                            compiled.shared.extend(refined.shared);
                        } else {
                            compiled
                                .by_type
                                .entry(ty.name.clone())
                                .or_default()
                                .extend(refined.shared);
                        }
                    }
                }
            }
        }

        Ok(compiled)
    }

    fn compile_field(
        &mut self,
        parent_type: &'a MetaType,
        field: &NormalizedField,
    ) -> Result<CompiledField, CompileError> {
        let conditions = field
            .conditions
            .iter()
            .map(|condition| self.conditions.insert_full(condition.clone()).0)
            .collect::<Vec<_>>();
        let mut compiled = CompiledField {
            response_key: field.response_key().clone(),
            alias: field.alias.clone(),
            name: field.name.clone(),
            parent_type: parent_type.name.clone(),
            kind: FieldKind::Data,
            arguments: field.arguments.clone(),
            directives: field.directives.clone(),
            conditions,
            ty: named_type("String", false),
            sources: Vec::new(),
            pos: field.pos,
            selection_set: None,
            introspection_selection_set: None,
        };

        match field.name.as_str() {
            "__typename" => {
                compiled.kind = FieldKind::Typename;
                if !field.selection_set.is_empty() {
                    return Err(CompileError::LeafSelection {
                        field: field.name.to_string(),
                        ty: "String!".to_string(),
                    });
                }
                return Ok(compiled);
            }
            "__schema" | "__type" if parent_type.name.as_str() == self.schema.query_type() => {
                compiled.kind = FieldKind::Introspection;
                compiled.ty = if field.name.as_str() == "__schema" {
                    named_type("__Schema", false)
                } else {
                    named_type("__Type", true)
                };
                compiled.introspection_selection_set = Some(field.selection_set.clone());
                return Ok(compiled);
            }
            _ => {}
        }

        let meta_field = parent_type
            .field_by_name(&field.name)
            .ok_or_else(|| CompileError::UnknownField {
                type_name: parent_type.name.to_string(),
                field: field.name.to_string(),
            })?;
        if !meta_field.is_visible() {
            return Err(CompileError::InaccessibleField {
                type_name: parent_type.name.to_string(),
                field: field.name.to_string(),
            });
        }
        for (name, _) in &field.arguments {
            if !meta_field.arguments.contains_key(name) {
                return Err(CompileError::UnknownArgument {
                    type_name: parent_type.name.to_string(),
                    field: field.name.to_string(),
                    argument: name.to_string(),
                });
            }
        }

        let field_type = self
            .schema
            .concrete_type_by_name(&meta_field.ty)
            .ok_or_else(|| CompileError::UnknownType(meta_field.ty.concrete_typename().to_string()))?;
        compiled.ty = meta_field.ty.clone();
        compiled.sources = meta_field
            .sources
            .iter()
            .map(|source| source.schema.clone())
            .collect();
        compiled
            .sources
            .sort_by_key(|schema| self.schema.schema_order(schema));

        match (field_type.kind, field.selection_set.is_empty()) {
            (TypeKind::Scalar | TypeKind::Enum, false) => Err(CompileError::LeafSelection {
                field: field.name.to_string(),
                ty: meta_field.ty.to_string(),
            }),
            (TypeKind::Object | TypeKind::Interface | TypeKind::Union, true) => {
                Err(CompileError::MissingSelection {
                    field: field.name.to_string(),
                    ty: meta_field.ty.to_string(),
                })
            }
            (TypeKind::Object | TypeKind::Interface | TypeKind::Union, false) => {
                compiled.selection_set =
                    Some(self.compile_selection_set(field_type, &field.selection_set)?);
                Ok(compiled)
            }
            _ => Ok(compiled),
        }
    }
}

fn named_type(name: &str, nullable: bool) -> Type {
    Type {
        base: BaseType::Named(Name::new(name)),
        nullable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;

    const SCHEMA: &str = r#"
        type Query {
            node(id: ID!): Node @source(schema: "a")
            search: [SearchResult!]! @source(schema: "a")
            secret: String @source(schema: "a") @inaccessible
        }

        interface Node {
            id: ID! @source(schema: "a")
        }

        type Product implements Node {
            id: ID! @source(schema: "a")
            name: String @source(schema: "a")
        }

        type Review implements Node {
            id: ID! @source(schema: "a")
            body: String @source(schema: "a")
        }

        union SearchResult = Product | Review
    "#;

    fn compile_query(query: &str) -> Result<CompiledOperation, CompileError> {
        let schema = CompositeSchema::parse(SCHEMA).unwrap();
        let document = parser::parse_query(query).unwrap();
        let operation = normalize(&schema, &document, None).unwrap();
        compile(&schema, operation)
    }

    #[test]
    fn partition_abstract_selections() {
        let operation = compile_query(
            r#"{
                node(id: "1") {
                    id
                    ... on Product { name }
                    ... on Review { body }
                }
            }"#,
        )
        .unwrap();
        let node = &operation.selection_set.shared[0];
        let selection_set = node.selection_set.as_ref().unwrap();
        assert_eq!(selection_set.possible_types, vec!["Product", "Review"]);
        assert_eq!(selection_set.shared.len(), 1);
        assert_eq!(selection_set.by_type["Product"][0].name.as_str(), "name");
        assert_eq!(selection_set.by_type["Review"][0].name.as_str(), "body");
        assert_eq!(
            selection_set
                .fields_for("Product")
                .map(|field| field.name.as_str())
                .collect::<Vec<_>>(),
            vec!["id", "name"]
        );
    }

    #[test]
    fn expand_interface_fragments_in_unions() {
        let operation =
            compile_query(r#"{ search { __typename ... on Node { id } } }"#).unwrap();
        let selection_set = operation.selection_set.shared[0]
            .selection_set
            .as_ref()
            .unwrap();
        assert_eq!(selection_set.shared[0].kind, FieldKind::Typename);
        assert_eq!(selection_set.by_type.len(), 2);
        assert_eq!(selection_set.by_type["Review"][0].parent_type.as_str(), "Review");
    }

    #[test]
    fn intern_conditions() {
        let operation = compile_query(
            r#"query($skip: Boolean!) {
                a: node(id: "1") @skip(if: $skip) { id }
                b: node(id: "2") @skip(if: $skip) { id }
            }"#,
        )
        .unwrap();
        assert_eq!(operation.conditions.len(), 1);
        assert_eq!(operation.selection_set.shared[0].conditions, vec![0]);
        assert_eq!(operation.selection_set.shared[1].conditions, vec![0]);
    }

    #[test]
    fn reject_invalid_selections() {
        assert!(matches!(
            compile_query("{ node(id: 1) { missing } }"),
            Err(CompileError::UnknownField { .. })
        ));
        assert!(matches!(
            compile_query("{ secret }"),
            Err(CompileError::InaccessibleField { .. })
        ));
        assert!(matches!(
            compile_query("{ node(id: 1) }"),
            Err(CompileError::MissingSelection { .. })
        ));
        assert!(matches!(
            compile_query("{ node(id: 1) { id { x } } }"),
            Err(CompileError::LeafSelection { .. })
        ));
        assert!(matches!(
            compile_query("{ node(nope: 1) { id } }"),
            Err(CompileError::UnknownArgument { .. })
        ));
        assert!(matches!(
            compile_query("{ node(id: 1) { ... on SearchResult { __typename } ... on Query { __typename } } }"),
            Err(CompileError::ImpossibleFragment { .. })
        ));
    }
}
