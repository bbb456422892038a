use std::fmt::{Debug, Display, Formatter, Result as FmtResult, Write};
use std::ops::{Deref, DerefMut};

use parser::types::{OperationType, Type};
use serde::{Serialize, Serializer};
use value::Name;

use crate::compiler::CompiledOperation;
use crate::normalizer::Condition;
use crate::types::{
    key_variable, requirement_variable, write_variable_definitions, PlanSelectionSet,
    RenderContext,
};

pub type NodeId = usize;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct PathSegment {
    pub name: Name,
    pub is_list: bool,
    pub possible_type: Option<Name>,
}

#[derive(Clone, Default, Hash, Eq, PartialEq)]
pub struct ResponsePath(Vec<PathSegment>);

impl Debug for ResponsePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (idx, segment) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ".")?;
            }
            if segment.is_list {
                write!(f, "[{}]", segment.name)?;
            } else {
                write!(f, "{}", segment.name)?;
            }
            if let Some(possible_type) = &segment.possible_type {
                write!(f, "({})", possible_type)?;
            }
        }
        Ok(())
    }
}

impl Display for ResponsePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Debug::fmt(self, f)
    }
}

impl Serialize for ResponsePath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl Deref for ResponsePath {
    type Target = Vec<PathSegment>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for ResponsePath {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

fn serialize_display<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Selects a value out of an entity in the result, by response keys.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ValueSelection {
    Path(Vec<Name>),
    Object(Vec<(Name, ValueSelection)>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyBinding {
    pub argument: Name,
    #[serde(serialize_with = "serialize_display")]
    pub ty: Type,
    pub path: Vec<Name>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementBinding {
    pub argument: Name,
    #[serde(serialize_with = "serialize_display")]
    pub ty: Type,
    pub value: ValueSelection,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupCall {
    pub field: Name,
    pub return_type: Name,
    pub entity_type: Name,
    pub arguments: Vec<KeyBinding>,
}

/// One request to one source schema.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveNode {
    pub id: NodeId,
    pub schema: String,
    pub path: ResponsePath,
    /// Further paths holding entities of the same lookup, fetched in the same request.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional_paths: Vec<ResponsePath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup: Option<LookupCall>,
    /// The request for a single entity with every condition printed as a directive.
    pub operation: String,
    #[serde(skip)]
    pub selection_set: PlanSelectionSet,
}

impl ResolveNode {
    /// Every response path this node resolves entities at.
    pub fn paths(&self) -> impl Iterator<Item = &ResponsePath> {
        std::iter::once(&self.path).chain(&self.additional_paths)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementNode {
    pub depends_on: Vec<NodeId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<RequirementBinding>,
    pub node: ResolveNode,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CompositeMode {
    Sequential,
    Parallel,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeNode {
    pub mode: CompositeMode,
    pub children: Vec<NodeId>,
}

/// Root `__schema` and `__type` fields, by response key.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrospectionNode {
    pub id: NodeId,
    pub fields: Vec<Name>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootNode {
    pub children: Vec<NodeId>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExecutionNode {
    Root(RootNode),
    Resolve(ResolveNode),
    Composite(CompositeNode),
    Introspection(IntrospectionNode),
    NodeWithRequirement(RequirementNode),
}

impl ExecutionNode {
    #[inline]
    pub fn is_executable(&self) -> bool {
        matches!(
            self,
            ExecutionNode::Resolve(_)
                | ExecutionNode::Introspection(_)
                | ExecutionNode::NodeWithRequirement(_)
        )
    }
}

/// A source schema request rendered for one execution.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RenderedOperation {
    pub query: String,
    /// Operation variables the request refers to.
    pub variables: Vec<Name>,
    /// Requirement indices the request refers to.
    pub requirements: Vec<usize>,
}

/// The immutable execution plan of one operation.
///
/// Node `0` is always the [`RootNode`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPlan {
    #[serde(skip)]
    pub operation: CompiledOperation,
    pub nodes: Vec<ExecutionNode>,
    pub dependencies: Vec<Vec<NodeId>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl OperationPlan {
    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&ExecutionNode> {
        self.nodes.get(id)
    }

    pub fn resolve_node(&self, id: NodeId) -> Option<&ResolveNode> {
        match self.nodes.get(id)? {
            ExecutionNode::Resolve(node) => Some(node),
            ExecutionNode::NodeWithRequirement(node) => Some(&node.node),
            _ => None,
        }
    }

    pub fn requirement_node(&self, id: NodeId) -> Option<&RequirementNode> {
        match self.nodes.get(id)? {
            ExecutionNode::NodeWithRequirement(node) => Some(node),
            _ => None,
        }
    }

    #[inline]
    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        self.dependencies
            .get(id)
            .map(|dependencies| dependencies.as_slice())
            .unwrap_or_default()
    }

    pub fn executable_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_executable())
            .map(|(id, _)| id)
    }

    /// Renders the request of a resolve node for the visible conditions and the number of entities.
    ///
    /// Returns `None` when runtime conditions prune the whole selection.
    pub fn render(
        &self,
        id: NodeId,
        visible: &[bool],
        entities: usize,
    ) -> Option<RenderedOperation> {
        self.render_node(id, Some(visible), entities)
    }

    pub(crate) fn render_node(
        &self,
        id: NodeId,
        visible: Option<&[bool]>,
        entities: usize,
    ) -> Option<RenderedOperation> {
        let node = self.resolve_node(id)?;
        let mut ctx = RenderContext::new(&self.conditions, visible);
        let mut definitions = Vec::new();
        let mut used_requirements = Vec::new();

        let (keyword, body) = match &node.lookup {
            None => {
                let items = ctx.selection_items(&node.selection_set)?;
                let keyword = match self.operation.ty {
                    OperationType::Mutation => "mutation",
                    _ => "query",
                };
                (keyword, format!("{{ {} }}", items))
            }
            Some(lookup) => {
                if entities == 0 {
                    return None;
                }
                let requirements = self
                    .requirement_node(id)
                    .map(|node| node.requirements.as_slice())
                    .unwrap_or_default();
                let mut calls = Vec::new();
                for entity in 0..entities {
                    ctx.entity = entity;
                    let items = ctx.selection_items(&node.selection_set)?;
                    let selection = if lookup.return_type != lookup.entity_type {
                        format!("{{ ... on {} {{ {} }} }}", lookup.entity_type, items)
                    } else {
                        format!("{{ {} }}", items)
                    };

                    let mut arguments = Vec::new();
                    for key in &lookup.arguments {
                        let variable = key_variable(entity, &key.argument);
                        arguments.push(format!("{}: ${}", key.argument, variable));
                        definitions.push(format!("${}: {}", variable, key.ty));
                    }
                    for idx in &ctx.requirements {
                        if let Some(requirement) = requirements.get(*idx) {
                            definitions.push(format!(
                                "${}: {}",
                                requirement_variable(entity, *idx),
                                requirement.ty
                            ));
                        }
                    }
                    if entity == 0 {
                        used_requirements = ctx.requirements.iter().copied().collect();
                    }
                    ctx.requirements.clear();

                    let arguments = if arguments.is_empty() {
                        String::new()
                    } else {
                        format!("({})", arguments.join(", "))
                    };
                    calls.push(format!(
                        "e{}: {}{} {}",
                        entity, lookup.field, arguments, selection
                    ));
                }
                ("query", format!("{{ {} }}", calls.join(" ")))
            }
        };

        let mut variables = Vec::new();
        let mut client_definitions = Vec::new();
        for name in &ctx.variables {
            if let Some(definition) = self.operation.variable_definition(name) {
                client_definitions.push(format!("${}: {}", name, definition.var_type.node));
                variables.push(name.clone());
            }
        }
        client_definitions.extend(definitions);

        let mut query = String::from(keyword);
        write_variable_definitions(&mut query, &client_definitions).ok()?;
        write!(query, " {}", body).ok()?;

        Some(RenderedOperation {
            query,
            variables,
            requirements: used_requirements,
        })
    }
}
