#![forbid(unsafe_code)]

mod builder;
mod compiler;
mod error;
mod normalizer;
mod plan;
mod request;
mod response;
mod types;

pub use builder::{PlanBuilder, SchemaSelectionPolicy, TYPENAME_ALIAS};
pub use compiler::{
    compile, CompiledField, CompiledOperation, CompiledSelectionSet, ConditionId, FieldKind,
};
pub use error::{CompileError, NormalizeError, PlanError, PlanningError};
pub use normalizer::{
    normalize, Condition, NormalizedDirective, NormalizedField, NormalizedInlineFragment,
    NormalizedOperation, NormalizedSelection, NormalizedSelectionSet,
};
pub use plan::{
    CompositeMode, CompositeNode, ExecutionNode, IntrospectionNode, KeyBinding, LookupCall, NodeId,
    OperationPlan, PathSegment, RenderedOperation, RequirementBinding, RequirementNode,
    ResolveNode, ResponsePath, RootNode, ValueSelection,
};
pub use request::Request;
pub use response::{ErrorPath, Response, ServerError};
pub use types::{key_variable, requirement_variable, PlanField, PlanSelection, PlanSelectionSet};
