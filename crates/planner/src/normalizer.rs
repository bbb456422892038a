use std::collections::{BTreeSet, HashMap};

use fusiongate_schema::{CompositeSchema, TypeExt};
use parser::types::{
    Directive, DocumentOperations, ExecutableDocument, FragmentDefinition, OperationDefinition,
    OperationType, Selection, SelectionSet, VariableDefinition,
};
use parser::{Pos, Positioned};
use serde::Serialize;
use value::{Name, Value};

use crate::NormalizeError;

/// A runtime condition guarding a selection, bound to a variable.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(tag = "kind", content = "variable", rename_all = "lowercase")]
pub enum Condition {
    Skip(Name),
    Include(Name),
}

impl Condition {
    #[inline]
    pub fn variable(&self) -> &Name {
        match self {
            Condition::Skip(name) | Condition::Include(name) => name,
        }
    }

    /// Whether a selection guarded by this condition is included for the variable value.
    #[inline]
    pub fn includes(&self, value: bool) -> bool {
        match self {
            Condition::Skip(_) => !value,
            Condition::Include(_) => value,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NormalizedDirective {
    pub name: Name,
    pub arguments: Vec<(Name, Value)>,
}

#[derive(Debug, Clone)]
pub struct NormalizedField {
    pub alias: Option<Name>,
    pub name: Name,
    pub arguments: Vec<(Name, Value)>,
    pub directives: Vec<NormalizedDirective>,
    pub conditions: BTreeSet<Condition>,
    pub pos: Pos,
    pub selection_set: NormalizedSelectionSet,
}

impl NormalizedField {
    #[inline]
    pub fn response_key(&self) -> &Name {
        self.alias.as_ref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedInlineFragment {
    pub type_condition: Name,
    pub selection_set: NormalizedSelectionSet,
}

#[derive(Debug, Clone)]
pub enum NormalizedSelection {
    Field(NormalizedField),
    InlineFragment(NormalizedInlineFragment),
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedSelectionSet {
    pub items: Vec<NormalizedSelection>,
}

impl NormalizedSelectionSet {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn push_field(&mut self, field: NormalizedField) -> Result<(), NormalizeError> {
        let mut same_conditions = None;
        for (idx, selection) in self.items.iter().enumerate() {
            if let NormalizedSelection::Field(existing) = selection {
                if existing.response_key() != field.response_key() {
                    continue;
                }
                if existing.name != field.name
                    || existing.arguments != field.arguments
                    || existing.directives != field.directives
                {
                    return Err(NormalizeError::FieldConflict {
                        response_key: field.response_key().to_string(),
                    });
                }
                if existing.conditions == field.conditions && same_conditions.is_none() {
                    same_conditions = Some(idx);
                }
            }
        }

        match same_conditions {
            Some(idx) => {
                if let NormalizedSelection::Field(existing) = &mut self.items[idx] {
                    existing.selection_set.merge(field.selection_set)?;
                }
                Ok(())
            }
            None => {
                self.items.push(NormalizedSelection::Field(field));
                Ok(())
            }
        }
    }

    fn fragment_mut(&mut self, type_condition: &Name) -> &mut NormalizedSelectionSet {
        let position = self.items.iter().position(|selection| {
            matches!(selection, NormalizedSelection::InlineFragment(fragment) if &fragment.type_condition == type_condition)
        });
        let idx = match position {
            Some(idx) => idx,
            None => {
                self.items
                    .push(NormalizedSelection::InlineFragment(NormalizedInlineFragment {
                        type_condition: type_condition.clone(),
                        selection_set: Default::default(),
                    }));
                self.items.len() - 1
            }
        };
        match &mut self.items[idx] {
            NormalizedSelection::InlineFragment(fragment) => &mut fragment.selection_set,
            NormalizedSelection::Field(field) => &mut field.selection_set,
        }
    }

    fn merge(&mut self, other: NormalizedSelectionSet) -> Result<(), NormalizeError> {
        for selection in other.items {
            match selection {
                NormalizedSelection::Field(field) => self.push_field(field)?,
                NormalizedSelection::InlineFragment(fragment) => self
                    .fragment_mut(&fragment.type_condition)
                    .merge(fragment.selection_set)?,
            }
        }
        Ok(())
    }
}

/// An operation with every fragment expanded and static conditions applied.
#[derive(Debug, Clone)]
pub struct NormalizedOperation {
    pub ty: OperationType,
    pub name: Option<Name>,
    pub variable_definitions: Vec<VariableDefinition>,
    pub selection_set: NormalizedSelectionSet,
}

struct Normalizer<'a> {
    schema: &'a CompositeSchema,
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    visiting: Vec<&'a str>,
}

pub fn normalize(
    schema: &CompositeSchema,
    document: &ExecutableDocument,
    operation_name: Option<&str>,
) -> Result<NormalizedOperation, NormalizeError> {
    let (name, operation) = get_operation(document, operation_name)?;
    let root_type = match operation.node.ty {
        OperationType::Query => Some(schema.query_type()),
        OperationType::Mutation => schema.mutation_type(),
        OperationType::Subscription => schema.subscription_type(),
    };

    let mut normalizer = Normalizer {
        schema,
        fragments: &document.fragments,
        visiting: Vec::new(),
    };
    let mut selection_set = NormalizedSelectionSet::default();
    normalizer.normalize_selection_set(
        root_type,
        &operation.node.selection_set.node,
        &BTreeSet::new(),
        &mut selection_set,
    )?;

    Ok(NormalizedOperation {
        ty: operation.node.ty,
        name,
        variable_definitions: operation
            .node
            .variable_definitions
            .iter()
            .map(|definition| definition.node.clone())
            .collect(),
        selection_set,
    })
}

impl<'a> Normalizer<'a> {
    fn normalize_selection_set(
        &mut self,
        parent_type: Option<&str>,
        selection_set: &'a SelectionSet,
        conditions: &BTreeSet<Condition>,
        out: &mut NormalizedSelectionSet,
    ) -> Result<(), NormalizeError> {
        for selection in &selection_set.items {
            match &selection.node {
                Selection::Field(field) => {
                    let (field_conditions, directives) = match evaluate_directives(&field.node.directives) {
                        Some(evaluated) => evaluated,
                        None => continue,
                    };
                    let field_type = parent_type
                        .and_then(|parent_type| self.schema.type_by_name(parent_type))
                        .and_then(|parent_type| parent_type.field_by_name(&field.node.name.node))
                        .map(|field| field.ty.concrete_typename());

                    let mut sub_selection_set = NormalizedSelectionSet::default();
                    self.normalize_selection_set(
                        field_type,
                        &field.node.selection_set.node,
                        &BTreeSet::new(),
                        &mut sub_selection_set,
                    )?;

                    out.push_field(NormalizedField {
                        alias: field.node.alias.as_ref().map(|alias| alias.node.clone()),
                        name: field.node.name.node.clone(),
                        arguments: field
                            .node
                            .arguments
                            .iter()
                            .map(|(name, value)| (name.node.clone(), value.node.clone()))
                            .collect(),
                        directives,
                        conditions: conditions.iter().cloned().chain(field_conditions).collect(),
                        pos: field.pos,
                        selection_set: sub_selection_set,
                    })?;
                }
                Selection::FragmentSpread(fragment_spread) => {
                    let fragment_name = fragment_spread.node.fragment_name.node.as_str();
                    let (spread_conditions, _) =
                        match evaluate_directives(&fragment_spread.node.directives) {
                            Some(evaluated) => evaluated,
                            None => continue,
                        };
                    let fragment = self
                        .fragments
                        .get(fragment_name)
                        .ok_or_else(|| NormalizeError::UnknownFragment(fragment_name.to_string()))?;
                    if self.visiting.contains(&fragment_name) {
                        return Err(NormalizeError::FragmentCycle(fragment_name.to_string()));
                    }

                    self.visiting.push(fragment_name);
                    let conditions = conditions.iter().cloned().chain(spread_conditions).collect();
                    let type_condition = &fragment.node.type_condition.node.on.node;
                    let res = self.normalize_fragment(
                        parent_type,
                        Some(type_condition),
                        &fragment.node.selection_set.node,
                        &conditions,
                        out,
                    );
                    self.visiting.pop();
                    res?;
                }
                Selection::InlineFragment(inline_fragment) => {
                    let (fragment_conditions, _) =
                        match evaluate_directives(&inline_fragment.node.directives) {
                            Some(evaluated) => evaluated,
                            None => continue,
                        };
                    let conditions = conditions
                        .iter()
                        .cloned()
                        .chain(fragment_conditions)
                        .collect();
                    let type_condition = inline_fragment
                        .node
                        .type_condition
                        .as_ref()
                        .map(|type_condition| &type_condition.node.on.node);
                    self.normalize_fragment(
                        parent_type,
                        type_condition,
                        &inline_fragment.node.selection_set.node,
                        &conditions,
                        out,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn normalize_fragment(
        &mut self,
        parent_type: Option<&str>,
        type_condition: Option<&'a Name>,
        selection_set: &'a SelectionSet,
        conditions: &BTreeSet<Condition>,
        out: &mut NormalizedSelectionSet,
    ) -> Result<(), NormalizeError> {
        match type_condition {
            Some(type_condition) if Some(type_condition.as_str()) != parent_type => {
                let mut fragment_selection_set = NormalizedSelectionSet::default();
                self.normalize_selection_set(
                    Some(type_condition.as_str()),
                    selection_set,
                    conditions,
                    &mut fragment_selection_set,
                )?;
                if !fragment_selection_set.is_empty() {
                    out.fragment_mut(type_condition)
                        .merge(fragment_selection_set)?;
                }
                Ok(())
            }
            _ => self.normalize_selection_set(parent_type, selection_set, conditions, out),
        }
    }
}

/// Splits the directives of a selection into runtime conditions and forwarded directives.
///
/// Returns `None` when a literal condition excludes the selection.
fn evaluate_directives(
    directives: &[Positioned<Directive>],
) -> Option<(BTreeSet<Condition>, Vec<NormalizedDirective>)> {
    let mut conditions = BTreeSet::new();
    let mut forwarded = Vec::new();

    for directive in directives {
        let name = directive.node.name.node.as_str();
        let condition = directive.node.get_argument("if").map(|value| &value.node);
        match (name, condition) {
            ("skip", Some(Value::Boolean(true))) => return None,
            ("include", Some(Value::Boolean(false))) => return None,
            ("skip", Some(Value::Variable(variable))) => {
                conditions.insert(Condition::Skip(variable.clone()));
            }
            ("include", Some(Value::Variable(variable))) => {
                conditions.insert(Condition::Include(variable.clone()));
            }
            ("skip", _) | ("include", _) => {}
            _ => forwarded.push(NormalizedDirective {
                name: directive.node.name.node.clone(),
                arguments: directive
                    .node
                    .arguments
                    .iter()
                    .map(|(name, value)| (name.node.clone(), value.node.clone()))
                    .collect(),
            }),
        }
    }

    Some((conditions, forwarded))
}

fn get_operation<'a>(
    document: &'a ExecutableDocument,
    operation_name: Option<&str>,
) -> Result<(Option<Name>, &'a Positioned<OperationDefinition>), NormalizeError> {
    match (operation_name, &document.operations) {
        (Some(operation_name), DocumentOperations::Multiple(operations)) => operations
            .get_key_value(operation_name)
            .map(|(name, operation)| (Some(name.clone()), operation))
            .ok_or_else(|| NormalizeError::OperationNotFound(operation_name.to_string())),
        (Some(operation_name), DocumentOperations::Single(_)) => {
            Err(NormalizeError::OperationNotFound(operation_name.to_string()))
        }
        (None, DocumentOperations::Single(operation)) => Ok((None, operation)),
        (None, DocumentOperations::Multiple(operations)) if operations.len() == 1 => operations
            .iter()
            .next()
            .map(|(name, operation)| (Some(name.clone()), operation))
            .ok_or(NormalizeError::AmbiguousOperation),
        (None, DocumentOperations::Multiple(_)) => Err(NormalizeError::AmbiguousOperation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
        type Query {
            book(id: ID!): Book @source(schema: "a")
            books: [Book!]! @source(schema: "a")
        }

        type Book {
            id: ID! @source(schema: "a")
            title: String @source(schema: "a")
            author: Author @source(schema: "a")
        }

        type Author {
            name: String @source(schema: "a")
        }
    "#;

    fn normalize_query(query: &str) -> Result<NormalizedOperation, NormalizeError> {
        let schema = CompositeSchema::parse(SCHEMA).unwrap();
        let document = parser::parse_query(query).unwrap();
        normalize(&schema, &document, None)
    }

    fn field(selection: &NormalizedSelection) -> &NormalizedField {
        match selection {
            NormalizedSelection::Field(field) => field,
            NormalizedSelection::InlineFragment(_) => panic!("expected a field"),
        }
    }

    #[test]
    fn inline_fragment_spreads() {
        let operation = normalize_query(
            r#"
            query {
                books { ...BookFields title }
            }
            fragment BookFields on Book { id title author { name } }
            "#,
        )
        .unwrap();

        let books = field(&operation.selection_set.items[0]);
        let keys = books
            .selection_set
            .items
            .iter()
            .map(|selection| field(selection).response_key().to_string())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["id", "title", "author"]);
    }

    #[test]
    fn static_conditions() {
        let operation = normalize_query(
            r#"{
                books {
                    id @skip(if: true)
                    title @include(if: false)
                    author @skip(if: false) { name }
                }
            }"#,
        )
        .unwrap();
        let books = field(&operation.selection_set.items[0]);
        assert_eq!(books.selection_set.items.len(), 1);
        let author = field(&books.selection_set.items[0]);
        assert_eq!(author.name.as_str(), "author");
        assert!(author.conditions.is_empty());
    }

    #[test]
    fn push_down_fragment_conditions() {
        let operation = normalize_query(
            r#"query($skip: Boolean!) {
                books {
                    ... @skip(if: $skip) { id title }
                    title
                }
            }"#,
        )
        .unwrap();
        let books = field(&operation.selection_set.items[0]);
        let fields = books
            .selection_set
            .items
            .iter()
            .map(field)
            .map(|field| (field.response_key().to_string(), field.conditions.len()))
            .collect::<Vec<_>>();
        assert_eq!(
            fields,
            vec![
                ("id".to_string(), 1),
                ("title".to_string(), 1),
                ("title".to_string(), 0)
            ]
        );
    }

    #[test]
    fn merge_same_response_key() {
        let operation = normalize_query(
            r#"{
                books { author { name } }
                books { id author { name } }
            }"#,
        )
        .unwrap();
        assert_eq!(operation.selection_set.items.len(), 1);
        let books = field(&operation.selection_set.items[0]);
        assert_eq!(books.selection_set.items.len(), 2);
    }

    #[test]
    fn reject_conflicts_and_cycles() {
        assert_eq!(
            normalize_query(r#"{ book(id: 1) { id } book(id: 2) { id } }"#).unwrap_err(),
            NormalizeError::FieldConflict {
                response_key: "book".to_string()
            }
        );
        assert_eq!(
            normalize_query(
                r#"
                query { books { ...A } }
                fragment A on Book { ...B }
                fragment B on Book { ...A }
                "#
            )
            .unwrap_err(),
            NormalizeError::FragmentCycle("A".to_string())
        );
        assert_eq!(
            normalize_query(r#"{ books { ...Missing } }"#).unwrap_err(),
            NormalizeError::UnknownFragment("Missing".to_string())
        );
    }

    #[test]
    fn select_operation() {
        let schema = CompositeSchema::parse(SCHEMA).unwrap();
        let document =
            parser::parse_query("query A { books { id } } query B { books { title } }").unwrap();
        assert_eq!(
            normalize(&schema, &document, None).unwrap_err(),
            NormalizeError::AmbiguousOperation
        );
        assert_eq!(
            normalize(&schema, &document, Some("C")).unwrap_err(),
            NormalizeError::OperationNotFound("C".to_string())
        );
        let operation = normalize(&schema, &document, Some("B")).unwrap();
        assert_eq!(operation.name.as_deref(), Some("B"));
    }
}
