use std::collections::HashMap;
use std::ops::Deref;

use indexmap::{IndexMap, IndexSet};
use parser::types::{
    self, ConstDirective, DocumentOperations, InterfaceType, ObjectType, SchemaDefinition,
    Selection, SelectionSet, ServiceDocument, Type, TypeDefinition, TypeSystemDefinition,
    UnionType,
};
use parser::Positioned;
use serde::Serialize;
use value::{ConstValue, Name};

use crate::{FieldSelectionMap, SchemaError, TypeExt};

/// How a source schema takes part in serving a field.
///
/// Resolved once while loading the schema, with the priority
/// `Lookup > Requirement > Shareable > Plain`.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldRole {
    Plain,
    Lookup,
    Requirement,
    Shareable,
}

/// A hidden argument of a source field whose value is selected from the parent entity.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Requirement {
    pub argument: Name,
    pub ty: Type,
    pub map: FieldSelectionMap,
}

/// One source schema able to serve a composite field.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct SourceMapping {
    pub schema: String,
    pub original_name: Name,
    pub role: FieldRole,
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub struct LookupArgument {
    pub name: Name,
    pub ty: Type,
    /// Path of the key value on the entity.
    pub key: Vec<Name>,
}

/// A root field of a source schema fetching one entity by its key.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Lookup {
    pub schema: String,
    pub field_name: Name,
    pub original_name: Name,
    pub return_type: Name,
    pub arguments: Vec<LookupArgument>,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

#[derive(Debug, Eq, PartialEq, Default, Clone)]
pub struct KeyFields(IndexMap<Name, KeyFields>);

impl Deref for KeyFields {
    type Target = IndexMap<Name, KeyFields>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Eq, PartialEq)]
pub struct MetaInputValue {
    pub name: Name,
    pub ty: Type,
    /// Entity path given by `@is(field:)`.
    pub is: Option<Vec<Name>>,
}

#[derive(Debug, Eq, PartialEq)]
pub struct MetaField {
    pub name: Name,
    pub arguments: IndexMap<Name, MetaInputValue>,
    pub ty: Type,

    pub sources: Vec<SourceMapping>,
    pub lookup_schemas: Vec<String>,
    pub is_internal: bool,
    pub is_inaccessible: bool,
    pub is_shareable: bool,
}

impl MetaField {
    #[inline]
    pub fn source(&self, schema: &str) -> Option<&SourceMapping> {
        self.sources.iter().find(|source| source.schema == schema)
    }

    #[inline]
    pub fn is_served_by(&self, schema: &str) -> bool {
        self.source(schema).is_some()
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        !self.is_internal && !self.is_inaccessible
    }
}

#[derive(Debug, Eq, PartialEq)]
pub struct MetaType {
    pub name: Name,
    pub kind: TypeKind,
    pub sources: IndexSet<String>,
    pub keys: IndexMap<String, Vec<KeyFields>>,
    pub lookups: Vec<Lookup>,
    pub is_inaccessible: bool,

    pub implements: IndexSet<Name>,
    pub fields: IndexMap<Name, MetaField>,
    pub possible_types: IndexSet<Name>,
}

impl MetaType {
    fn new(name: Name, kind: TypeKind) -> Self {
        Self {
            name,
            kind,
            sources: Default::default(),
            keys: Default::default(),
            lookups: Default::default(),
            is_inaccessible: false,
            implements: Default::default(),
            fields: Default::default(),
            possible_types: Default::default(),
        }
    }

    #[inline]
    pub fn field_by_name(&self, name: &str) -> Option<&MetaField> {
        self.fields.get(name)
    }

    #[inline]
    pub fn is_composite(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Object | TypeKind::Interface | TypeKind::Union
        )
    }

    #[inline]
    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Interface | TypeKind::Union)
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, TypeKind::Enum | TypeKind::Scalar)
    }

    #[inline]
    pub fn is_possible_type(&self, type_name: &str) -> bool {
        match self.kind {
            TypeKind::Interface | TypeKind::Union => self.possible_types.contains(type_name),
            TypeKind::Object => self.name == type_name,
            _ => false,
        }
    }

    #[inline]
    pub fn is_defined_in(&self, schema: &str) -> bool {
        self.sources.contains(schema)
    }

    /// Whether `schema` can produce the value at `path` on this type,
    /// either as a field it serves or as part of a key it declares.
    pub fn can_provide(&self, composite: &CompositeSchema, schema: &str, path: &[Name]) -> bool {
        let (first, rest) = match path.split_first() {
            Some(split) => split,
            None => return true,
        };
        let field = match self.fields.get(first) {
            Some(field) => field,
            None => return false,
        };
        if !field.is_served_by(schema) {
            let in_key = self
                .keys
                .get(schema)
                .map(|keys| keys.iter().any(|key| key_contains(key, path)))
                .unwrap_or_default();
            return in_key;
        }
        if rest.is_empty() {
            return true;
        }
        match composite.concrete_type_by_name(&field.ty) {
            Some(ty) if ty.is_abstract() => ty
                .possible_types
                .iter()
                .filter_map(|name| composite.type_by_name(name))
                .all(|ty| ty.can_provide(composite, schema, rest)),
            Some(ty) => ty.can_provide(composite, schema, rest),
            None => false,
        }
    }
}

fn key_contains(key: &KeyFields, path: &[Name]) -> bool {
    match path.split_first() {
        Some((first, rest)) => match key.get(first) {
            Some(children) => rest.is_empty() || key_contains(children, rest),
            None => false,
        },
        None => true,
    }
}

/// The composite schema graph consumed by the planner.
#[derive(Debug, Default)]
pub struct CompositeSchema {
    pub(crate) query_type: Option<Name>,
    pub(crate) mutation_type: Option<Name>,
    pub(crate) subscription_type: Option<Name>,
    pub(crate) types: HashMap<Name, MetaType>,
    pub source_schemas: IndexSet<String>,
}

impl CompositeSchema {
    pub fn parse(document: &str) -> Result<CompositeSchema, SchemaError> {
        Self::new(parser::parse_schema(document)?)
    }

    pub fn new(document: ServiceDocument) -> Result<CompositeSchema, SchemaError> {
        let mut composite_schema = CompositeSchema::default();

        for definition in document.definitions.into_iter() {
            match definition {
                TypeSystemDefinition::Schema(schema) => {
                    convert_schema_definition(&mut composite_schema, schema.node);
                }
                TypeSystemDefinition::Type(type_definition) => {
                    let meta_type = convert_type_definition(type_definition.node)?;
                    composite_schema
                        .types
                        .insert(meta_type.name.clone(), meta_type);
                }
                TypeSystemDefinition::Directive(_) => {}
            }
        }

        finish_schema(&mut composite_schema)?;
        Ok(composite_schema)
    }

    #[inline]
    pub fn query_type(&self) -> &str {
        self.query_type
            .as_ref()
            .map(|name| name.as_str())
            .unwrap_or("Query")
    }

    #[inline]
    pub fn mutation_type(&self) -> Option<&str> {
        self.mutation_type.as_ref().map(|name| name.as_str())
    }

    #[inline]
    pub fn subscription_type(&self) -> Option<&str> {
        self.subscription_type.as_ref().map(|name| name.as_str())
    }

    #[inline]
    pub fn type_by_name(&self, name: &str) -> Option<&MetaType> {
        self.types.get(name)
    }

    #[inline]
    pub fn concrete_type_by_name(&self, ty: &Type) -> Option<&MetaType> {
        self.types.get(ty.concrete_typename())
    }

    /// Position of a source schema in declaration order.
    #[inline]
    pub fn schema_order(&self, schema: &str) -> usize {
        self.source_schemas
            .get_index_of(schema)
            .unwrap_or(usize::MAX)
    }

    /// Concrete object types an output type can resolve to.
    pub fn possible_types<'a>(&'a self, ty: &'a MetaType) -> Vec<&'a MetaType> {
        if ty.is_abstract() {
            ty.possible_types
                .iter()
                .filter_map(|name| self.types.get(name))
                .collect()
        } else {
            vec![ty]
        }
    }

    /// Lookups of `schema` able to fetch an entity of type `entity_type`, including
    /// lookups declared on interfaces and unions the type belongs to.
    pub fn lookups_for<'a>(
        &'a self,
        entity_type: &'a str,
        schema: &'a str,
    ) -> impl Iterator<Item = &'a Lookup> + 'a {
        let direct = self
            .types
            .get(entity_type)
            .into_iter()
            .flat_map(|ty| ty.lookups.iter());
        let mut abstract_types = self
            .types
            .values()
            .filter(move |ty| ty.is_abstract() && ty.possible_types.contains(entity_type))
            .collect::<Vec<_>>();
        abstract_types.sort_by(|a, b| a.name.cmp(&b.name));
        direct
            .chain(
                abstract_types
                    .into_iter()
                    .flat_map(|ty| ty.lookups.iter()),
            )
            .filter(move |lookup| lookup.schema == schema)
    }
}

fn get_argument<'a>(
    arguments: &'a [(Positioned<Name>, Positioned<ConstValue>)],
    name: &str,
) -> Option<&'a Positioned<ConstValue>> {
    arguments.iter().find_map(|d| {
        if d.0.node.as_str() == name {
            Some(&d.1)
        } else {
            None
        }
    })
}

fn get_argument_str<'a>(
    arguments: &'a [(Positioned<Name>, Positioned<ConstValue>)],
    name: &str,
) -> Option<&'a str> {
    get_argument(arguments, name).and_then(|value| match &value.node {
        ConstValue::String(s) => Some(s.as_str()),
        _ => None,
    })
}

fn require_argument_str<'a>(
    directive: &'a ConstDirective,
    coordinate: &str,
    argument: &'static str,
) -> Result<&'a str, SchemaError> {
    get_argument_str(&directive.arguments, argument).ok_or_else(|| {
        SchemaError::MissingDirectiveArgument {
            directive: directive_name(directive),
            coordinate: coordinate.to_string(),
            argument,
        }
    })
}

fn directive_name(directive: &ConstDirective) -> &'static str {
    match directive.name.node.as_str() {
        "source" => "source",
        "lookup" => "lookup",
        "require" => "require",
        "key" => "key",
        "is" => "is",
        _ => "directive",
    }
}

fn parse_fields(fields: &str) -> Option<SelectionSet> {
    parser::parse_query(format!("{{{}}}", fields))
        .ok()
        .and_then(|document| match document.operations {
            DocumentOperations::Single(op) => Some(op.node.selection_set.node),
            DocumentOperations::Multiple(_) => None,
        })
}

fn has_directive(directives: &[Positioned<ConstDirective>], name: &str) -> bool {
    directives
        .iter()
        .any(|directive| directive.node.name.node.as_str() == name)
}

fn convert_schema_definition(
    composite_schema: &mut CompositeSchema,
    schema_definition: SchemaDefinition,
) {
    composite_schema.query_type = schema_definition.query.map(|name| name.node);
    composite_schema.mutation_type = schema_definition.mutation.map(|name| name.node);
    composite_schema.subscription_type = schema_definition.subscription.map(|name| name.node);

    for directive in schema_definition.directives {
        if directive.node.name.node.as_str() == "source_schema" {
            if let Some(name) = get_argument_str(&directive.node.arguments, "name") {
                composite_schema.source_schemas.insert(name.to_string());
            }
        }
    }
}

fn convert_type_definition(definition: TypeDefinition) -> Result<MetaType, SchemaError> {
    let mut meta_type = MetaType::new(definition.name.node.clone(), TypeKind::Scalar);

    match definition.kind {
        types::TypeKind::Scalar => meta_type.kind = TypeKind::Scalar,
        types::TypeKind::Object(ObjectType {
            implements, fields, ..
        }) => {
            meta_type.kind = TypeKind::Object;
            meta_type.implements = implements
                .into_iter()
                .map(|implement| implement.node)
                .collect();
            for field in fields {
                let field = convert_field_definition(&meta_type.name, field.node)?;
                meta_type.fields.insert(field.name.clone(), field);
            }
        }
        types::TypeKind::Interface(InterfaceType {
            implements, fields, ..
        }) => {
            meta_type.kind = TypeKind::Interface;
            meta_type.implements = implements.into_iter().map(|name| name.node).collect();
            for field in fields {
                let field = convert_field_definition(&meta_type.name, field.node)?;
                meta_type.fields.insert(field.name.clone(), field);
            }
        }
        types::TypeKind::Union(UnionType { members, .. }) => {
            meta_type.kind = TypeKind::Union;
            meta_type.possible_types = members.into_iter().map(|name| name.node).collect();
        }
        types::TypeKind::Enum(_) => meta_type.kind = TypeKind::Enum,
        types::TypeKind::InputObject(_) => meta_type.kind = TypeKind::InputObject,
    }

    for directive in definition.directives {
        let directive = directive.node;
        match directive.name.node.as_str() {
            "source" => {
                let schema = require_argument_str(&directive, &meta_type.name, "schema")?;
                meta_type.sources.insert(schema.to_string());
            }
            "key" => {
                let schema = require_argument_str(&directive, &meta_type.name, "schema")?;
                let fields = require_argument_str(&directive, &meta_type.name, "fields")?;
                if let Some(selection_set) = parse_fields(fields) {
                    meta_type
                        .keys
                        .entry(schema.to_string())
                        .or_default()
                        .push(convert_key_fields(selection_set));
                }
            }
            "inaccessible" => meta_type.is_inaccessible = true,
            _ => {}
        }
    }

    Ok(meta_type)
}

fn convert_field_definition(
    type_name: &Name,
    definition: types::FieldDefinition,
) -> Result<MetaField, SchemaError> {
    let coordinate = format!("{}.{}", type_name, definition.name.node);
    let mut arguments = IndexMap::new();
    for arg in definition.arguments {
        let coordinate = format!("{}({}:)", coordinate, arg.node.name.node);
        let input_value = convert_input_value_definition(&coordinate, arg.node)?;
        arguments.insert(input_value.name.clone(), input_value);
    }

    let mut field_definition = MetaField {
        name: definition.name.node,
        arguments,
        ty: definition.ty.node,
        sources: Vec::new(),
        lookup_schemas: Vec::new(),
        is_internal: has_directive(&definition.directives, "internal"),
        is_inaccessible: has_directive(&definition.directives, "inaccessible"),
        is_shareable: has_directive(&definition.directives, "shareable"),
    };

    let mut requirements: Vec<(String, Requirement)> = Vec::new();
    for directive in definition.directives {
        let directive = directive.node;
        match directive.name.node.as_str() {
            "source" => {
                let schema = require_argument_str(&directive, &coordinate, "schema")?;
                let original_name = get_argument_str(&directive.arguments, "name")
                    .map(Name::new)
                    .unwrap_or_else(|| field_definition.name.clone());
                field_definition.sources.push(SourceMapping {
                    schema: schema.to_string(),
                    original_name,
                    role: FieldRole::Plain,
                    requirements: Vec::new(),
                });
            }
            "lookup" => {
                let schema = require_argument_str(&directive, &coordinate, "schema")?;
                field_definition.lookup_schemas.push(schema.to_string());
            }
            "require" => {
                let schema = require_argument_str(&directive, &coordinate, "schema")?;
                let argument = require_argument_str(&directive, &coordinate, "argument")?;
                let ty = require_argument_str(&directive, &coordinate, "type")?;
                let field = require_argument_str(&directive, &coordinate, "field")?;
                let ty = Type::new(ty).ok_or_else(|| SchemaError::InvalidType {
                    coordinate: coordinate.clone(),
                    ty: ty.to_string(),
                })?;
                requirements.push((
                    schema.to_string(),
                    Requirement {
                        argument: Name::new(argument),
                        ty,
                        map: FieldSelectionMap::parse(field)?,
                    },
                ));
            }
            _ => {}
        }
    }

    for (schema, requirement) in requirements {
        match field_definition
            .sources
            .iter_mut()
            .find(|source| source.schema == schema)
        {
            Some(source) => source.requirements.push(requirement),
            None => {
                return Err(SchemaError::RequirementWithoutSource {
                    coordinate: coordinate.clone(),
                    schema,
                })
            }
        }
    }

    Ok(field_definition)
}

fn convert_key_fields(selection_set: SelectionSet) -> KeyFields {
    KeyFields(
        selection_set
            .items
            .into_iter()
            .filter_map(|field| {
                if let Selection::Field(field) = field.node {
                    Some((
                        field.node.name.node,
                        convert_key_fields(field.node.selection_set.node),
                    ))
                } else {
                    None
                }
            })
            .collect(),
    )
}

fn convert_input_value_definition(
    coordinate: &str,
    arg: types::InputValueDefinition,
) -> Result<MetaInputValue, SchemaError> {
    let mut is = None;
    for directive in &arg.directives {
        if directive.node.name.node.as_str() == "is" {
            let field = require_argument_str(&directive.node, coordinate, "field")?;
            match FieldSelectionMap::parse(field)? {
                FieldSelectionMap::Path(path) => is = Some(path),
                FieldSelectionMap::Object(_) => {
                    return Err(SchemaError::InvalidSelectionMap {
                        map: field.to_string(),
                        message: "a lookup argument must map to a single path".to_string(),
                    })
                }
            }
        }
    }

    Ok(MetaInputValue {
        name: arg.name.node,
        ty: arg.ty.node,
        is,
    })
}

fn finish_schema(composite_schema: &mut CompositeSchema) -> Result<(), SchemaError> {
    for scalar in ["Int", "Float", "String", "Boolean", "ID"] {
        let name = Name::new(scalar);
        composite_schema
            .types
            .entry(name.clone())
            .or_insert_with(|| MetaType::new(name, TypeKind::Scalar));
    }

    if !composite_schema
        .types
        .contains_key(composite_schema.query_type())
    {
        return Err(SchemaError::MissingQueryType);
    }

    // Interfaces learn their possible types from the objects implementing them.
    let mut possible_types: HashMap<Name, IndexSet<Name>> = Default::default();
    let mut object_names = composite_schema
        .types
        .values()
        .filter(|ty| ty.kind == TypeKind::Object)
        .map(|ty| ty.name.clone())
        .collect::<Vec<_>>();
    object_names.sort();
    for name in object_names {
        for implement in &composite_schema.types[&name].implements {
            possible_types
                .entry(implement.clone())
                .or_default()
                .insert(name.clone());
        }
    }
    for (name, types) in possible_types {
        if let Some(ty) = composite_schema.types.get_mut(&name) {
            if ty.kind == TypeKind::Interface {
                ty.possible_types = types;
            }
        }
    }

    // Source schemas in declaration order, then in order of first appearance.
    let mut type_names = composite_schema.types.keys().cloned().collect::<Vec<_>>();
    type_names.sort();
    for name in &type_names {
        let ty = &composite_schema.types[name];
        let mut seen = Vec::new();
        seen.extend(ty.sources.iter().cloned());
        for field in ty.fields.values() {
            seen.extend(field.sources.iter().map(|source| source.schema.clone()));
        }
        for schema in seen {
            composite_schema.source_schemas.insert(schema);
        }
    }

    // Composite types without `@source` are defined wherever one of their fields is served.
    for name in &type_names {
        if let Some(ty) = composite_schema.types.get_mut(name) {
            if ty.sources.is_empty() && ty.kind != TypeKind::Union {
                let sources = ty
                    .fields
                    .values()
                    .flat_map(|field| field.sources.iter().map(|source| source.schema.clone()))
                    .collect::<IndexSet<_>>();
                ty.sources = sources;
            }
        }
    }
    for name in &type_names {
        let ty = &composite_schema.types[name];
        if ty.kind == TypeKind::Union && ty.sources.is_empty() {
            let sources = ty
                .possible_types
                .iter()
                .filter_map(|member| composite_schema.types.get(member))
                .flat_map(|member| member.sources.iter().cloned())
                .collect::<IndexSet<_>>();
            if let Some(ty) = composite_schema.types.get_mut(name) {
                ty.sources = sources;
            }
        }
    }

    // Field roles.
    for ty in composite_schema.types.values_mut() {
        for field in ty.fields.values_mut() {
            let shareable = field.sources.len() > 1 || field.is_shareable;
            let lookup_schemas = field.lookup_schemas.clone();
            for source in &mut field.sources {
                source.role = if lookup_schemas.contains(&source.schema) {
                    FieldRole::Lookup
                } else if !source.requirements.is_empty() {
                    FieldRole::Requirement
                } else if shareable {
                    FieldRole::Shareable
                } else {
                    FieldRole::Plain
                };
            }
        }
    }

    build_lookups(composite_schema)
}

fn build_lookups(composite_schema: &mut CompositeSchema) -> Result<(), SchemaError> {
    let query_type = Name::new(composite_schema.query_type());
    let mut lookups = Vec::new();

    for field in composite_schema.types[&query_type].fields.values() {
        for schema in &field.lookup_schemas {
            let return_type = match composite_schema.concrete_type_by_name(&field.ty) {
                Some(ty) if ty.is_composite() && !field.ty.is_list() => ty,
                _ => {
                    return Err(SchemaError::InvalidLookup {
                        field: field.name.to_string(),
                        schema: schema.clone(),
                    })
                }
            };

            let mut arguments = Vec::new();
            for argument in field.arguments.values() {
                let key = argument
                    .is
                    .clone()
                    .unwrap_or_else(|| vec![argument.name.clone()]);
                let key_exists = composite_schema
                    .possible_types(return_type)
                    .iter()
                    .all(|ty| path_exists(composite_schema, ty, &key));
                if !key_exists {
                    return Err(SchemaError::UnknownLookupKey {
                        field: field.name.to_string(),
                        argument: argument.name.to_string(),
                        path: key
                            .iter()
                            .map(|name| name.as_str())
                            .collect::<Vec<_>>()
                            .join("."),
                        type_name: return_type.name.to_string(),
                    });
                }
                arguments.push(LookupArgument {
                    name: argument.name.clone(),
                    ty: argument.ty.clone(),
                    key,
                });
            }

            lookups.push(Lookup {
                schema: schema.clone(),
                field_name: field.name.clone(),
                original_name: field
                    .source(schema)
                    .map(|source| source.original_name.clone())
                    .unwrap_or_else(|| field.name.clone()),
                return_type: return_type.name.clone(),
                arguments,
            });
        }
    }

    for lookup in lookups {
        if let Some(ty) = composite_schema.types.get_mut(&lookup.return_type) {
            ty.lookups.push(lookup);
        }
    }
    Ok(())
}

fn path_exists(composite_schema: &CompositeSchema, ty: &MetaType, path: &[Name]) -> bool {
    match path.split_first() {
        Some((first, rest)) => match ty.fields.get(first) {
            Some(_) if rest.is_empty() => true,
            Some(field) => match composite_schema.concrete_type_by_name(&field.ty) {
                Some(field_type) => path_exists(composite_schema, field_type, rest),
                None => false,
            },
            None => false,
        },
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SCHEMA: &str = r#"
        schema @source_schema(name: "b") @source_schema(name: "a") { query: Query }

        type Query {
            productById(id: ID!): Product
                @source(schema: "a")
                @source(schema: "b", name: "product")
                @lookup(schema: "b")
            products: [Product!]! @source(schema: "a")
        }

        type Product @key(schema: "a", fields: "id") @key(schema: "b", fields: "id") {
            id: ID! @source(schema: "a") @source(schema: "b")
            name: String @source(schema: "a")
            weight: Int @source(schema: "a")
            shipping: Int
                @source(schema: "b")
                @require(schema: "b", argument: "weight", type: "Int", field: "weight")
        }
    "#;

    #[test]
    fn field_roles() {
        let schema = CompositeSchema::parse(SCHEMA).unwrap();
        let query = schema.type_by_name("Query").unwrap();
        let lookup = query.field_by_name("productById").unwrap();
        assert_eq!(lookup.source("a").unwrap().role, FieldRole::Shareable);
        assert_eq!(lookup.source("b").unwrap().role, FieldRole::Lookup);
        assert_eq!(lookup.source("b").unwrap().original_name, "product");

        let product = schema.type_by_name("Product").unwrap();
        assert_eq!(
            product.field_by_name("name").unwrap().sources[0].role,
            FieldRole::Plain
        );
        let shipping = product.field_by_name("shipping").unwrap();
        assert_eq!(shipping.sources[0].role, FieldRole::Requirement);
        assert_eq!(shipping.sources[0].requirements[0].argument, "weight");
    }

    #[test]
    fn lookups_and_declaration_order() {
        let schema = CompositeSchema::parse(SCHEMA).unwrap();
        assert_eq!(
            schema.source_schemas.iter().cloned().collect::<Vec<_>>(),
            vec!["b".to_string(), "a".to_string()]
        );
        assert!(schema.schema_order("b") < schema.schema_order("a"));

        let lookups = schema.lookups_for("Product", "b").collect::<Vec<_>>();
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].field_name, "productById");
        assert_eq!(lookups[0].original_name, "product");
        assert_eq!(lookups[0].arguments[0].key, vec![Name::new("id")]);
        assert_eq!(schema.lookups_for("Product", "a").count(), 0);
    }

    #[test]
    fn reject_invalid_schemas() {
        assert!(matches!(
            CompositeSchema::parse("type Foo { a: Int }"),
            Err(SchemaError::MissingQueryType)
        ));
        assert!(matches!(
            CompositeSchema::parse(
                r#"
                type Query {
                    itemById(code: ID!): Item @source(schema: "a") @lookup(schema: "a")
                }
                type Item { id: ID! @source(schema: "a") }
                "#
            ),
            Err(SchemaError::UnknownLookupKey { .. })
        ));
    }
}
