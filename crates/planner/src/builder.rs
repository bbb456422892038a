use std::collections::{HashMap, VecDeque};

use fusiongate_schema::{CompositeSchema, FieldRole, Lookup, MetaField, MetaType, SourceMapping};
use fusiongate_schema::{FieldSelectionMap, TypeExt};
use indexmap::IndexSet;
use parser::types::{ExecutableDocument, OperationType, Type};
use serde::Deserialize;
use value::Name;

use crate::compiler::{compile, CompiledField, CompiledOperation, CompiledSelectionSet, FieldKind};
use crate::normalizer::normalize;
use crate::plan::{
    CompositeMode, CompositeNode, ExecutionNode, IntrospectionNode, KeyBinding, LookupCall,
    NodeId, OperationPlan, PathSegment, RequirementBinding, RequirementNode, ResolveNode,
    ResponsePath, RootNode, ValueSelection,
};
use crate::types::{PlanField, PlanSelection, PlanSelectionSet, RenderContext};
use crate::{PlanError, PlanningError};

/// Response key of the `__typename` selection added under abstract types.
pub const TYPENAME_ALIAS: &str = "__fusion_typename";

const INJECTED_PREFIX: &str = "__fusion_";

/// How the planner chooses between source schemas able to serve the same field.
///
/// Candidates are compared by, in order: whether the schema already serves the
/// parent selection (`prefer_parent`), the number of lookup hops needed to reach
/// it (`minimize_hops`), the position in `priority` and finally the declaration
/// order of the composite schema.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchemaSelectionPolicy {
    pub prefer_parent: bool,
    pub minimize_hops: bool,
    pub priority: Vec<String>,
}

impl Default for SchemaSelectionPolicy {
    fn default() -> Self {
        Self {
            prefer_parent: true,
            minimize_hops: true,
            priority: Vec::new(),
        }
    }
}

impl SchemaSelectionPolicy {
    fn rank(&self, schema: &CompositeSchema, name: &str) -> (usize, usize) {
        let priority = self
            .priority
            .iter()
            .position(|item| item == name)
            .unwrap_or(usize::MAX);
        (priority, schema.schema_order(name))
    }
}

/// Operation plan generator
pub struct PlanBuilder<'a> {
    schema: &'a CompositeSchema,
    document: ExecutableDocument,
    operation_name: Option<String>,
    policy: SchemaSelectionPolicy,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(schema: &'a CompositeSchema, document: ExecutableDocument) -> Self {
        Self {
            schema,
            document,
            operation_name: None,
            policy: Default::default(),
        }
    }

    pub fn operation_name(mut self, operation: impl Into<String>) -> Self {
        self.operation_name = Some(operation.into());
        self
    }

    pub fn policy(self, policy: SchemaSelectionPolicy) -> Self {
        Self { policy, ..self }
    }

    pub fn plan(&self) -> Result<OperationPlan, PlanningError> {
        let operation = normalize(self.schema, &self.document, self.operation_name.as_deref())?;
        if matches!(operation.ty, OperationType::Subscription) {
            return Err(PlanError::SubscriptionNotSupported.into());
        }
        let operation = compile(self.schema, operation)?;
        let (nodes, dependencies) = Context::new(self.schema, &self.policy, &operation).build()?;

        let conditions = operation.conditions.clone();
        let mut plan = OperationPlan {
            operation,
            nodes,
            dependencies,
            conditions,
        };

        let rendered = plan
            .executable_nodes()
            .filter_map(|id| plan.render_node(id, None, 1).map(|op| (id, op.query)))
            .collect::<Vec<_>>();
        for (id, query) in rendered {
            match &mut plan.nodes[id] {
                ExecutionNode::Resolve(node) => node.operation = query,
                ExecutionNode::NodeWithRequirement(node) => node.node.operation = query,
                _ => {}
            }
        }

        tracing::debug!(
            operation = ?plan.operation.name,
            nodes = plan.nodes.len(),
            "Operation planned."
        );
        Ok(plan)
    }
}

enum DraftKind<'a> {
    Root,
    Composite(CompositeMode),
    Introspection(Vec<Name>),
    Resolve,
    Lookup(&'a Lookup, &'a MetaType),
}

struct PendingKey<'a> {
    argument: &'a Name,
    ty: &'a Type,
    provider: NodeId,
    field_path: Vec<Name>,
}

enum PendingValue {
    Path {
        provider: NodeId,
        field_path: Vec<Name>,
    },
    Object(Vec<(Name, PendingValue)>),
}

struct PendingRequirement<'a> {
    argument: &'a Name,
    ty: &'a Type,
    coordinate: String,
    value: PendingValue,
}

enum PendingItem<'a> {
    Field(&'a CompiledField, Vec<(Name, usize)>),
    Inject(Vec<Name>),
}

struct NodeDraft<'a> {
    kind: DraftKind<'a>,
    schema: &'a str,
    path: ResponsePath,
    keys: Vec<PendingKey<'a>>,
    requirements: Vec<PendingRequirement<'a>>,
    depends_on: IndexSet<NodeId>,
    children: Vec<NodeId>,
    selection_set: PlanSelectionSet,
    pending: Vec<PendingItem<'a>>,
}

impl<'a> NodeDraft<'a> {
    fn new(kind: DraftKind<'a>, schema: &'a str, path: ResponsePath) -> Self {
        Self {
            kind,
            schema,
            path,
            keys: Vec::new(),
            requirements: Vec::new(),
            depends_on: IndexSet::new(),
            children: Vec::new(),
            selection_set: Default::default(),
            pending: Vec::new(),
        }
    }
}

/// All entities of one type at one response path, resolved by one schema.
#[derive(Hash, Eq, PartialEq)]
struct EntityGroupKey<'a> {
    schema: &'a str,
    path: ResponsePath,
    ty: &'a str,
}

type InjectionKey = (NodeId, ResponsePath, Vec<Name>);

struct Context<'a> {
    schema: &'a CompositeSchema,
    policy: &'a SchemaSelectionPolicy,
    operation: &'a CompiledOperation,
    nodes: Vec<NodeDraft<'a>>,
    groups: HashMap<EntityGroupKey<'a>, NodeId>,
    /// Response keys of the fields injected into a node for an entity path.
    injections: HashMap<InjectionKey, Vec<Name>>,
}

type BuildResult = (Vec<ExecutionNode>, Vec<Vec<NodeId>>);

impl<'a> Context<'a> {
    fn new(
        schema: &'a CompositeSchema,
        policy: &'a SchemaSelectionPolicy,
        operation: &'a CompiledOperation,
    ) -> Self {
        Self {
            schema,
            policy,
            operation,
            nodes: Vec::new(),
            groups: HashMap::new(),
            injections: HashMap::new(),
        }
    }

    fn build(mut self) -> Result<BuildResult, PlanError> {
        let operation = self.operation;
        let mode = match operation.ty {
            OperationType::Mutation => CompositeMode::Sequential,
            _ => CompositeMode::Parallel,
        };
        self.nodes
            .push(NodeDraft::new(DraftKind::Root, "", ResponsePath::default()));
        self.nodes.push(NodeDraft::new(
            DraftKind::Composite(mode),
            "",
            ResponsePath::default(),
        ));

        let root_type = self
            .schema
            .type_by_name(&operation.root_type)
            .ok_or_else(|| PlanError::UnservableField {
                coordinate: operation.root_type.to_string(),
            })?;

        let mut introspection = Vec::new();
        let mut groups: Vec<(&'a str, Vec<&'a CompiledField>)> = Vec::new();
        for field in &operation.selection_set.shared {
            match field.kind {
                FieldKind::Typename => {}
                FieldKind::Introspection => introspection.push(field.response_key.clone()),
                FieldKind::Data => {
                    let meta_field = root_field(root_type, field)?;
                    let schema = self.root_source(field, meta_field, &groups)?;
                    let group = match operation.ty {
                        OperationType::Mutation => groups
                            .last_mut()
                            .filter(|(group_schema, _)| *group_schema == schema),
                        _ => groups
                            .iter_mut()
                            .find(|(group_schema, _)| *group_schema == schema),
                    };
                    match group {
                        Some((_, fields)) => fields.push(field),
                        None => groups.push((schema, vec![field])),
                    }
                }
            }
        }

        if !introspection.is_empty() {
            self.nodes.push(NodeDraft::new(
                DraftKind::Introspection(introspection),
                "",
                ResponsePath::default(),
            ));
        }

        let mut previous: Vec<NodeId> = Vec::new();
        for (schema, fields) in groups {
            let id = self.nodes.len();
            let mut draft = NodeDraft::new(DraftKind::Resolve, schema, ResponsePath::default());
            draft.depends_on.extend(previous.iter().copied());
            self.nodes.push(draft);
            self.nodes[1].children.push(id);

            let mut selection_set = PlanSelectionSet::default();
            let path = ResponsePath::default();
            let result = fields.into_iter().try_for_each(|field| {
                self.plan_local_field(id, schema, &path, root_type, field, Vec::new(), &mut selection_set)
            });
            self.nodes[id].selection_set = selection_set;
            result?;

            if matches!(operation.ty, OperationType::Mutation) {
                self.drain()?;
                previous = (id..self.nodes.len()).collect();
            }
        }

        self.drain()?;
        self.finish()
    }

    /// Chooses the schema serving a root field.
    fn root_source(
        &self,
        field: &CompiledField,
        meta_field: &'a MetaField,
        groups: &[(&'a str, Vec<&'a CompiledField>)],
    ) -> Result<&'a str, PlanError> {
        let mutation = matches!(self.operation.ty, OperationType::Mutation);
        meta_field
            .sources
            .iter()
            .filter(|source| is_direct(source))
            .min_by_key(|source| {
                let grouped = if mutation {
                    groups
                        .last()
                        .map(|(schema, _)| *schema == source.schema)
                        .unwrap_or_default()
                } else {
                    groups.iter().any(|(schema, _)| *schema == source.schema)
                };
                (
                    self.policy.prefer_parent && !grouped,
                    self.policy.rank(self.schema, &source.schema),
                )
            })
            .map(|source| source.schema.as_str())
            .ok_or_else(|| PlanError::UnservableField {
                coordinate: field.coordinate(),
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_local_field(
        &mut self,
        node: NodeId,
        schema: &'a str,
        path: &ResponsePath,
        parent_type: &'a MetaType,
        field: &'a CompiledField,
        requirements: Vec<(Name, usize)>,
        out: &mut PlanSelectionSet,
    ) -> Result<(), PlanError> {
        match field.kind {
            FieldKind::Typename => {
                let alias = if field.response_key.as_str() != "__typename" {
                    Some(field.response_key.clone())
                } else {
                    None
                };
                let mut plan_field = PlanField::new(alias, Name::new("__typename"));
                plan_field.conditions = field.conditions.clone();
                out.0.push(PlanSelection::Field(plan_field));
                return Ok(());
            }
            FieldKind::Introspection => return Ok(()),
            FieldKind::Data => {}
        }

        let meta_field = parent_type.field_by_name(&field.name).ok_or_else(|| {
            PlanError::UnservableField {
                coordinate: field.coordinate(),
            }
        })?;
        let name = meta_field
            .source(schema)
            .map(|source| source.original_name.clone())
            .unwrap_or_else(|| field.name.clone());
        let alias = if field.alias.is_some() || name != field.name {
            Some(field.response_key.clone())
        } else {
            None
        };

        let mut plan_field = PlanField::new(alias, name);
        plan_field.arguments = field.arguments.clone();
        plan_field.directives = field.directives.clone();
        plan_field.conditions = field.conditions.clone();
        plan_field.requirements = requirements;

        if let Some(selection_set) = &field.selection_set {
            let field_type = self.schema.concrete_type_by_name(&field.ty).ok_or_else(|| {
                PlanError::UnservableField {
                    coordinate: field.coordinate(),
                }
            })?;
            let mut sub_path = path.clone();
            sub_path.push(PathSegment {
                name: field.response_key.clone(),
                is_list: field.ty.is_list(),
                possible_type: None,
            });
            self.plan_selection_set(
                node,
                schema,
                &sub_path,
                field_type,
                selection_set,
                &mut plan_field.selection_set,
            )?;
        }

        out.0.push(PlanSelection::Field(plan_field));
        Ok(())
    }

    fn plan_selection_set(
        &mut self,
        node: NodeId,
        schema: &'a str,
        path: &ResponsePath,
        parent_type: &'a MetaType,
        selection_set: &'a CompiledSelectionSet,
        out: &mut PlanSelectionSet,
    ) -> Result<(), PlanError> {
        if !parent_type.is_abstract() {
            let fields = selection_set.fields_for(&parent_type.name).collect();
            return self.plan_fields(node, schema, path, parent_type, fields, out);
        }

        if out
            .find_field_mut(|field| field.response_key().as_str() == TYPENAME_ALIAS)
            .is_none()
        {
            out.0.push(PlanSelection::Field(PlanField::new(
                Some(Name::new(TYPENAME_ALIAS)),
                Name::new("__typename"),
            )));
        }

        // Interface fields the schema serves itself are selected once, above the type branches.
        let mut deferred = Vec::new();
        for field in &selection_set.shared {
            let served = field.kind == FieldKind::Typename
                || parent_type
                    .field_by_name(&field.name)
                    .and_then(|meta_field| meta_field.source(schema))
                    .map(is_direct)
                    .unwrap_or_default();
            if served {
                self.plan_local_field(node, schema, path, parent_type, field, Vec::new(), out)?;
            } else {
                deferred.push(field);
            }
        }

        for type_name in &selection_set.possible_types {
            let ty = match self.schema.type_by_name(type_name) {
                Some(ty) if ty.is_defined_in(schema) => ty,
                _ => continue,
            };
            let fields = deferred
                .iter()
                .copied()
                .chain(selection_set.by_type.get(type_name).into_iter().flatten())
                .collect::<Vec<_>>();
            if fields.is_empty() {
                continue;
            }

            let mut sub_path = path.clone();
            if let Some(segment) = sub_path.last_mut() {
                segment.possible_type = Some(type_name.clone());
            }
            let mut fragment = PlanSelectionSet::default();
            self.plan_fields(node, schema, &sub_path, ty, fields, &mut fragment)?;
            if !fragment.is_empty() {
                out.0.push(PlanSelection::InlineFragment {
                    type_condition: type_name.clone(),
                    selection_set: fragment,
                });
            }
        }
        Ok(())
    }

    fn plan_fields(
        &mut self,
        node: NodeId,
        schema: &'a str,
        path: &ResponsePath,
        parent_type: &'a MetaType,
        fields: Vec<&'a CompiledField>,
        out: &mut PlanSelectionSet,
    ) -> Result<(), PlanError> {
        let mut remote = Vec::new();
        for field in fields {
            if field.kind != FieldKind::Data {
                self.plan_local_field(node, schema, path, parent_type, field, Vec::new(), out)?;
                continue;
            }
            match self.select_source(schema, parent_type, field)? {
                None => {
                    self.plan_local_field(node, schema, path, parent_type, field, Vec::new(), out)?
                }
                Some(source) => remote.push((field, source)),
            }
        }

        for (field, source) in remote {
            let group = self.entity_group(node, schema, path, parent_type, &source.schema, out)?;
            let mut bindings = Vec::new();
            for requirement in &source.requirements {
                let value = self.requirement_value(
                    node,
                    schema,
                    path,
                    parent_type,
                    field,
                    &requirement.map,
                    &source.schema,
                    group,
                    out,
                )?;
                let draft = &mut self.nodes[group];
                bindings.push((requirement.argument.clone(), draft.requirements.len()));
                draft.requirements.push(PendingRequirement {
                    argument: &requirement.argument,
                    ty: &requirement.ty,
                    coordinate: field.coordinate(),
                    value,
                });
            }
            self.nodes[group]
                .pending
                .push(PendingItem::Field(field, bindings));
        }
        Ok(())
    }

    /// Returns the source mapping to fetch the field through, `None` when the current schema serves it.
    fn select_source(
        &self,
        schema: &'a str,
        parent_type: &'a MetaType,
        field: &CompiledField,
    ) -> Result<Option<&'a SourceMapping>, PlanError> {
        let meta_field = parent_type.field_by_name(&field.name).ok_or_else(|| {
            PlanError::UnservableField {
                coordinate: field.coordinate(),
            }
        })?;
        if meta_field.sources.is_empty() {
            return Err(PlanError::UnservableField {
                coordinate: field.coordinate(),
            });
        }

        let mut best: Option<((bool, usize, (usize, usize)), &'a SourceMapping, bool)> = None;
        for source in &meta_field.sources {
            let local = source.schema == schema && is_direct(source);
            if local && self.policy.prefer_parent {
                return Ok(None);
            }
            let hops = if local {
                0
            } else {
                match self.lookup_chain(schema, &source.schema, parent_type) {
                    Some(chain) => chain.len(),
                    None => continue,
                }
            };
            let rank = (
                self.policy.prefer_parent && !local,
                if self.policy.minimize_hops { hops } else { 0 },
                self.policy.rank(self.schema, &source.schema),
            );
            if best.as_ref().map(|(best, _, _)| rank < *best).unwrap_or(true) {
                best = Some((rank, source, local));
            }
        }

        match best {
            Some((_, _, true)) => Ok(None),
            Some((_, source, false)) => Ok(Some(source)),
            None => {
                let source = &meta_field.sources[0];
                if self
                    .schema
                    .lookups_for(&parent_type.name, &source.schema)
                    .next()
                    .is_none()
                {
                    Err(PlanError::NoLookup {
                        type_name: parent_type.name.to_string(),
                        schema: source.schema.clone(),
                    })
                } else {
                    Err(PlanError::UnresolvableKey {
                        type_name: parent_type.name.to_string(),
                        schema: source.schema.clone(),
                        path: field.coordinate(),
                    })
                }
            }
        }
    }

    /// A lookup of `target` whose key `provider` can produce for the entity.
    fn usable_lookup(
        &self,
        provider: &str,
        target: &'a str,
        entity: &'a MetaType,
    ) -> Option<&'a Lookup> {
        let schema = self.schema;
        schema.lookups_for(&entity.name, target).find(|lookup| {
            lookup
                .arguments
                .iter()
                .all(|argument| entity.can_provide(schema, provider, &argument.key))
        })
    }

    /// Shortest chain of lookups reaching `to` from data `from` can produce.
    fn lookup_chain(&self, from: &'a str, to: &'a str, entity: &'a MetaType) -> Option<Vec<&'a Lookup>> {
        let mut candidates = self
            .schema
            .source_schemas
            .iter()
            .map(|schema| schema.as_str())
            .collect::<Vec<_>>();
        candidates.sort_by_key(|schema| self.policy.rank(self.schema, schema));

        let mut visited = IndexSet::new();
        visited.insert(from);
        let mut queue = VecDeque::new();
        queue.push_back((from, Vec::new()));

        while let Some((schema, chain)) = queue.pop_front() {
            if let Some(lookup) = self.usable_lookup(schema, to, entity) {
                let mut chain = chain;
                chain.push(lookup);
                return Some(chain);
            }
            for next in &candidates {
                if visited.contains(next) || *next == to {
                    continue;
                }
                if let Some(lookup) = self.usable_lookup(schema, next, entity) {
                    visited.insert(*next);
                    let mut next_chain = chain.clone();
                    next_chain.push(lookup);
                    queue.push_back((*next, next_chain));
                }
            }
        }
        None
    }

    /// The node resolving all entities at `path` through `target`, created on first use.
    fn entity_group(
        &mut self,
        node: NodeId,
        schema: &'a str,
        path: &ResponsePath,
        entity: &'a MetaType,
        target: &'a str,
        out: &mut PlanSelectionSet,
    ) -> Result<NodeId, PlanError> {
        let key = EntityGroupKey {
            schema: target,
            path: path.clone(),
            ty: &entity.name,
        };
        if let Some(id) = self.groups.get(&key) {
            return Ok(*id);
        }

        let chain = self
            .lookup_chain(schema, target, entity)
            .ok_or_else(|| PlanError::UnresolvableKey {
                type_name: entity.name.to_string(),
                schema: target.to_string(),
                path: path.to_string(),
            })?;

        let mut provider = node;
        for lookup in chain {
            let key = EntityGroupKey {
                schema: &lookup.schema,
                path: path.clone(),
                ty: &entity.name,
            };
            if let Some(id) = self.groups.get(&key) {
                provider = *id;
                continue;
            }

            let id = self.nodes.len();
            let mut draft = NodeDraft::new(
                DraftKind::Lookup(lookup, entity),
                &lookup.schema,
                path.clone(),
            );
            draft.depends_on.insert(provider);
            for argument in &lookup.arguments {
                draft.keys.push(PendingKey {
                    argument: &argument.name,
                    ty: &argument.ty,
                    provider,
                    field_path: argument.key.clone(),
                });
            }
            self.nodes.push(draft);
            for argument in &lookup.arguments {
                self.inject(provider, node, path, entity, &argument.key, out);
            }
            tracing::trace!(node = id, schema = %lookup.schema, path = %path, "Entity lookup added.");

            self.groups.insert(key, id);
            provider = id;
        }
        Ok(provider)
    }

    fn inject(
        &mut self,
        provider: NodeId,
        node: NodeId,
        path: &ResponsePath,
        entity: &'a MetaType,
        field_path: &[Name],
        out: &mut PlanSelectionSet,
    ) {
        if provider == node {
            let schema = self.nodes[node].schema;
            let keys = self.inject_path(schema, entity, out, field_path);
            self.injections
                .insert((provider, path.clone(), field_path.to_vec()), keys);
        } else {
            self.nodes[provider]
                .pending
                .push(PendingItem::Inject(field_path.to_vec()));
        }
    }

    /// Selects `field_path` in `selection_set`, reusing the client's fields where possible.
    fn inject_path(
        &self,
        schema: &str,
        parent_type: &MetaType,
        selection_set: &mut PlanSelectionSet,
        field_path: &[Name],
    ) -> Vec<Name> {
        let (first, rest) = match field_path.split_first() {
            Some(split) => split,
            None => return Vec::new(),
        };
        let meta_field = parent_type.field_by_name(first);
        let name = meta_field
            .and_then(|meta_field| meta_field.source(schema))
            .map(|source| source.original_name.clone())
            .unwrap_or_else(|| first.clone());
        let alias = Name::new(format!("{}{}", INJECTED_PREFIX, first));

        let reusable = |field: &PlanField| {
            field.is_plain()
                && field.name == name
                && (field.response_key() == first || field.response_key() == &alias)
        };
        let position = selection_set.0.iter().position(|selection| {
            matches!(selection, PlanSelection::Field(field) if reusable(field))
        });
        let index = match position {
            Some(index) => index,
            None => {
                selection_set
                    .0
                    .push(PlanSelection::Field(PlanField::new(Some(alias.clone()), name.clone())));
                selection_set.0.len() - 1
            }
        };
        let field = match &mut selection_set.0[index] {
            PlanSelection::Field(field) => field,
            PlanSelection::InlineFragment { .. } => return Vec::new(),
        };

        let mut keys = vec![field.response_key().clone()];
        if !rest.is_empty() {
            let field_type = meta_field.and_then(|meta_field| self.schema.concrete_type_by_name(&meta_field.ty));
            if let Some(field_type) = field_type {
                keys.extend(self.inject_path(schema, field_type, &mut field.selection_set, rest));
            }
        }
        keys
    }

    #[allow(clippy::too_many_arguments)]
    fn requirement_value(
        &mut self,
        node: NodeId,
        schema: &'a str,
        path: &ResponsePath,
        entity: &'a MetaType,
        field: &CompiledField,
        map: &FieldSelectionMap,
        target: &'a str,
        group: NodeId,
        out: &mut PlanSelectionSet,
    ) -> Result<PendingValue, PlanError> {
        match map {
            FieldSelectionMap::Path(field_path) => {
                let provider =
                    self.provide_path(node, schema, path, entity, field, field_path, target, out)?;
                if provider != group {
                    self.nodes[group].depends_on.insert(provider);
                }
                Ok(PendingValue::Path {
                    provider,
                    field_path: field_path.clone(),
                })
            }
            FieldSelectionMap::Object(entries) => {
                let mut values = Vec::new();
                for (name, map) in entries {
                    let value = self.requirement_value(
                        node, schema, path, entity, field, map, target, group, out,
                    )?;
                    values.push((name.clone(), value));
                }
                Ok(PendingValue::Object(values))
            }
        }
    }

    /// Finds a node selecting `field_path` on the entity, returns its id.
    #[allow(clippy::too_many_arguments)]
    fn provide_path(
        &mut self,
        node: NodeId,
        schema: &'a str,
        path: &ResponsePath,
        entity: &'a MetaType,
        field: &CompiledField,
        field_path: &[Name],
        target: &'a str,
        out: &mut PlanSelectionSet,
    ) -> Result<NodeId, PlanError> {
        if self.provides_directly(schema, entity, field_path) {
            self.inject(node, node, path, entity, field_path, out);
            return Ok(node);
        }

        let mut candidates = self
            .schema
            .source_schemas
            .iter()
            .map(|name| name.as_str())
            .filter(|other| *other != target && *other != schema)
            .collect::<Vec<_>>();
        candidates.sort_by_key(|other| self.policy.rank(self.schema, other));
        for other in candidates {
            if !self.provides_directly(other, entity, field_path)
                || self.lookup_chain(schema, other, entity).is_none()
            {
                continue;
            }
            let provider = self.entity_group(node, schema, path, entity, other, out)?;
            self.inject(provider, node, path, entity, field_path, out);
            return Ok(provider);
        }

        Err(PlanError::UnresolvableRequirement {
            coordinate: field.coordinate(),
            path: join_path(field_path),
        })
    }

    fn provides_directly(&self, schema: &str, entity: &MetaType, field_path: &[Name]) -> bool {
        let direct = field_path
            .first()
            .and_then(|first| entity.field_by_name(first))
            .and_then(|meta_field| meta_field.source(schema))
            .map(is_direct)
            .unwrap_or(true);
        direct && entity.can_provide(self.schema, schema, field_path)
    }

    /// Plans the items queued on entity nodes until none are left.
    fn drain(&mut self) -> Result<(), PlanError> {
        while let Some(id) = self.nodes.iter().position(|node| !node.pending.is_empty()) {
            let pending = std::mem::take(&mut self.nodes[id].pending);
            let mut selection_set = std::mem::take(&mut self.nodes[id].selection_set);
            let result = self.drain_node(id, pending, &mut selection_set);
            self.nodes[id].selection_set = selection_set;
            result?;
        }
        Ok(())
    }

    fn drain_node(
        &mut self,
        id: NodeId,
        pending: Vec<PendingItem<'a>>,
        selection_set: &mut PlanSelectionSet,
    ) -> Result<(), PlanError> {
        let draft = &self.nodes[id];
        let schema = draft.schema;
        let path = draft.path.clone();
        let entity = match draft.kind {
            DraftKind::Lookup(_, entity) => entity,
            _ => return Ok(()),
        };

        let (fields, injections): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|item| matches!(item, PendingItem::Field(..)));
        for item in fields.into_iter().chain(injections) {
            match item {
                PendingItem::Field(field, requirements) => {
                    self.plan_local_field(id, schema, &path, entity, field, requirements, selection_set)?;
                }
                PendingItem::Inject(field_path) => {
                    let keys = self.inject_path(schema, entity, selection_set, &field_path);
                    self.injections.insert((id, path.clone(), field_path), keys);
                }
            }
        }
        Ok(())
    }

    fn resolve_value(&self, value: &PendingValue, path: &ResponsePath) -> Option<ValueSelection> {
        match value {
            PendingValue::Path {
                provider,
                field_path,
            } => self
                .injections
                .get(&(*provider, path.clone(), field_path.clone()))
                .map(|keys| ValueSelection::Path(keys.clone())),
            PendingValue::Object(entries) => entries
                .iter()
                .map(|(name, value)| Some((name.clone(), self.resolve_value(value, path)?)))
                .collect::<Option<Vec<_>>>()
                .map(ValueSelection::Object),
        }
    }

    /// Key and requirement bindings of a lookup draft.
    fn bindings(
        &self,
        draft: &NodeDraft<'a>,
        entity: &MetaType,
    ) -> Result<(Vec<KeyBinding>, Vec<RequirementBinding>), PlanError> {
        let mut arguments = Vec::new();
        for key in &draft.keys {
            let path = self
                .injections
                .get(&(key.provider, draft.path.clone(), key.field_path.clone()))
                .ok_or_else(|| PlanError::UnresolvableKey {
                    type_name: entity.name.to_string(),
                    schema: draft.schema.to_string(),
                    path: draft.path.to_string(),
                })?;
            arguments.push(KeyBinding {
                argument: key.argument.clone(),
                ty: key.ty.clone(),
                path: path.clone(),
            });
        }

        let mut requirements = Vec::new();
        for requirement in &draft.requirements {
            let value = self
                .resolve_value(&requirement.value, &draft.path)
                .ok_or_else(|| PlanError::UnresolvableRequirement {
                    coordinate: requirement.coordinate.clone(),
                    path: draft.path.to_string(),
                })?;
            requirements.push(RequirementBinding {
                argument: requirement.argument.clone(),
                ty: requirement.ty.clone(),
                value,
            });
        }
        Ok((arguments, requirements))
    }

    /// Folds lookups fetching the same entities with the same selection into one node.
    ///
    /// Returns the node each draft is folded into.
    fn merge_lookups(
        &self,
        nodes: &[NodeDraft<'a>],
        bindings: &[Option<(Vec<KeyBinding>, Vec<RequirementBinding>)>],
    ) -> Vec<NodeId> {
        let mut selections = Vec::with_capacity(nodes.len());
        for node in nodes {
            let selection = match node.kind {
                DraftKind::Lookup(..) => RenderContext::new(&self.operation.conditions, None)
                    .selection_items(&node.selection_set),
                _ => None,
            };
            selections.push(selection);
        }

        let mut target = (0..nodes.len()).collect::<Vec<_>>();
        let depends_on = |target: &[NodeId], id: NodeId| {
            let mut depends_on = nodes[id]
                .depends_on
                .iter()
                .map(|dependency| target[*dependency])
                .collect::<Vec<_>>();
            depends_on.sort_unstable();
            depends_on.dedup();
            depends_on
        };

        // Folding two lookups can make their dependents equal as well.
        let mut changed = true;
        while changed {
            changed = false;
            for id in 0..nodes.len() {
                if target[id] != id || bindings[id].is_none() || selections[id].is_none() {
                    continue;
                }
                let same = (0..id).find(|other| {
                    let other = *other;
                    target[other] == other
                        && same_lookup(&nodes[other].kind, &nodes[id].kind)
                        && nodes[other].schema == nodes[id].schema
                        && bindings[other] == bindings[id]
                        && selections[other] == selections[id]
                        && depends_on(&target, other) == depends_on(&target, id)
                });
                if let Some(other) = same {
                    tracing::trace!(node = id, into = other, "Entity lookup merged.");
                    for item in target.iter_mut() {
                        if *item == id {
                            *item = other;
                        }
                    }
                    changed = true;
                }
            }
        }
        target
    }

    fn finish(mut self) -> Result<BuildResult, PlanError> {
        let nodes = std::mem::take(&mut self.nodes);
        let dependencies = nodes
            .iter()
            .map(|node| node.depends_on.iter().copied().collect::<Vec<_>>())
            .collect::<Vec<_>>();
        check_acyclic(&dependencies)?;

        let mut bindings = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let binding = match node.kind {
                DraftKind::Lookup(_, entity) => Some(self.bindings(node, entity)?),
                _ => None,
            };
            bindings.push(binding);
        }

        let target = self.merge_lookups(&nodes, &bindings);
        let mut ids = vec![0; nodes.len()];
        let mut next = 0;
        for id in 0..nodes.len() {
            if target[id] == id {
                ids[id] = next;
                next += 1;
            }
        }
        let remap = |id: NodeId| ids[target[id]];

        let mut additional_paths = vec![Vec::new(); nodes.len()];
        for (id, node) in nodes.iter().enumerate() {
            if target[id] != id {
                additional_paths[target[id]].push(node.path.clone());
            }
        }

        let root_children = remap_ids(
            std::iter::once(1).chain(nodes.iter().enumerate().filter_map(|(id, node)| {
                matches!(node.kind, DraftKind::Introspection(_) | DraftKind::Lookup(..))
                    .then_some(id)
            })),
            remap,
        );

        let mut execution_nodes = Vec::with_capacity(next);
        let mut dependencies = Vec::with_capacity(next);
        for (((old, draft), binding), additional_paths) in nodes
            .into_iter()
            .enumerate()
            .zip(bindings)
            .zip(additional_paths)
        {
            if target[old] != old {
                continue;
            }
            let id = ids[old];
            let depends_on = remap_ids(draft.depends_on.iter().copied(), remap);
            dependencies.push(depends_on.clone());

            let node = match draft.kind {
                DraftKind::Root => ExecutionNode::Root(RootNode {
                    children: root_children.clone(),
                }),
                DraftKind::Composite(mode) => ExecutionNode::Composite(CompositeNode {
                    mode,
                    children: remap_ids(draft.children.iter().copied(), remap),
                }),
                DraftKind::Introspection(fields) => {
                    ExecutionNode::Introspection(IntrospectionNode { id, fields })
                }
                DraftKind::Resolve => ExecutionNode::Resolve(ResolveNode {
                    id,
                    schema: draft.schema.to_string(),
                    path: draft.path,
                    additional_paths,
                    lookup: None,
                    operation: String::new(),
                    selection_set: draft.selection_set,
                }),
                DraftKind::Lookup(lookup, entity) => {
                    let (arguments, requirements) = binding.unwrap_or_default();
                    ExecutionNode::NodeWithRequirement(RequirementNode {
                        depends_on,
                        requirements,
                        node: ResolveNode {
                            id,
                            schema: draft.schema.to_string(),
                            path: draft.path,
                            additional_paths,
                            lookup: Some(LookupCall {
                                field: lookup.original_name.clone(),
                                return_type: lookup.return_type.clone(),
                                entity_type: entity.name.clone(),
                                arguments,
                            }),
                            operation: String::new(),
                            selection_set: draft.selection_set,
                        },
                    })
                }
            };
            execution_nodes.push(node);
        }

        Ok((execution_nodes, dependencies))
    }
}

fn remap_ids(ids: impl Iterator<Item = NodeId>, remap: impl Fn(NodeId) -> NodeId) -> Vec<NodeId> {
    ids.map(remap).collect::<IndexSet<_>>().into_iter().collect()
}

fn same_lookup(a: &DraftKind<'_>, b: &DraftKind<'_>) -> bool {
    match (a, b) {
        (DraftKind::Lookup(a, a_entity), DraftKind::Lookup(b, b_entity)) => {
            std::ptr::eq(*a, *b) && a_entity.name == b_entity.name
        }
        _ => false,
    }
}

fn root_field<'a>(root_type: &'a MetaType, field: &CompiledField) -> Result<&'a MetaField, PlanError> {
    root_type
        .field_by_name(&field.name)
        .ok_or_else(|| PlanError::UnservableField {
            coordinate: field.coordinate(),
        })
}

/// Whether the schema can serve the field without arguments taken from other data.
#[inline]
fn is_direct(source: &SourceMapping) -> bool {
    match source.role {
        FieldRole::Requirement => false,
        FieldRole::Lookup => source.requirements.is_empty(),
        FieldRole::Plain | FieldRole::Shareable => true,
    }
}

fn join_path(path: &[Name]) -> String {
    path.iter()
        .map(|name| name.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

fn check_acyclic(dependencies: &[Vec<NodeId>]) -> Result<(), PlanError> {
    let mut in_degree = dependencies.iter().map(Vec::len).collect::<Vec<_>>();
    let mut dependents = vec![Vec::new(); dependencies.len()];
    for (id, depends_on) in dependencies.iter().enumerate() {
        for dependency in depends_on {
            dependents[*dependency].push(id);
        }
    }

    let mut queue = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| id)
        .collect::<VecDeque<_>>();
    while let Some(id) = queue.pop_front() {
        for dependent in &dependents[id] {
            in_degree[*dependent] -= 1;
            if in_degree[*dependent] == 0 {
                queue.push_back(*dependent);
            }
        }
    }

    let nodes = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree > 0)
        .map(|(id, _)| id)
        .collect::<Vec<_>>();
    if nodes.is_empty() {
        Ok(())
    } else {
        Err(PlanError::CyclicRequirement { nodes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acyclic_dependencies() {
        assert!(check_acyclic(&[vec![], vec![0], vec![0, 1]]).is_ok());
        assert_eq!(
            check_acyclic(&[vec![], vec![2], vec![1], vec![2]]),
            Err(PlanError::CyclicRequirement {
                nodes: vec![1, 2, 3]
            })
        );
    }

    #[test]
    fn policy_rank() {
        let schema = CompositeSchema::parse(
            r#"
            schema @source_schema(name: "a") @source_schema(name: "b") { query: Query }
            type Query { a: Int @source(schema: "a") @source(schema: "b") }
            "#,
        )
        .unwrap();
        let policy = SchemaSelectionPolicy::default();
        assert!(policy.rank(&schema, "a") < policy.rank(&schema, "b"));

        let policy = SchemaSelectionPolicy {
            priority: vec!["b".to_string()],
            ..Default::default()
        };
        assert!(policy.rank(&schema, "b") < policy.rank(&schema, "a"));
    }
}
