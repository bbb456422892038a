use fusiongate_schema::SchemaError;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum NormalizeError {
    #[error("Unknown operation named '{0}'.")]
    OperationNotFound(String),

    #[error("Must provide operation name if query contains multiple operations.")]
    AmbiguousOperation,

    #[error("Unknown fragment '{0}'.")]
    UnknownFragment(String),

    #[error("Cannot spread fragment '{0}' within itself.")]
    FragmentCycle(String),

    #[error("Fields '{response_key}' conflict because they select different fields or arguments.")]
    FieldConflict { response_key: String },
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum CompileError {
    #[error("Schema does not define the root type for '{0}' operations.")]
    MissingRootType(&'static str),

    #[error("Unknown type '{0}'.")]
    UnknownType(String),

    #[error("Cannot query field '{field}' on type '{type_name}'.")]
    UnknownField { type_name: String, field: String },

    #[error("Field '{type_name}.{field}' is not accessible.")]
    InaccessibleField { type_name: String, field: String },

    #[error("Unknown argument '{argument}' on field '{type_name}.{field}'.")]
    UnknownArgument {
        type_name: String,
        field: String,
        argument: String,
    },

    #[error("Field '{field}' must not have a selection since type '{ty}' has no subfields.")]
    LeafSelection { field: String, ty: String },

    #[error("Field '{field}' of type '{ty}' must have a selection of subfields.")]
    MissingSelection { field: String, ty: String },

    #[error("Fragment on '{fragment_type}' can never be spread within type '{parent_type}'.")]
    ImpossibleFragment {
        fragment_type: String,
        parent_type: String,
    },
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum PlanError {
    #[error("Subscriptions are not supported.")]
    SubscriptionNotSupported,

    #[error("No source schema can serve field '{coordinate}'.")]
    UnservableField { coordinate: String },

    #[error("Type '{type_name}' has no lookup in source schema '{schema}'.")]
    NoLookup { type_name: String, schema: String },

    #[error("No source schema can provide the key of '{type_name}' required by source schema '{schema}' at '{path}'.")]
    UnresolvableKey {
        type_name: String,
        schema: String,
        path: String,
    },

    #[error("No source schema can provide '{path}' required by field '{coordinate}'.")]
    UnresolvableRequirement { coordinate: String, path: String },

    #[error("The requirements of the operation form a cycle between nodes {nodes:?}.")]
    CyclicRequirement { nodes: Vec<usize> },
}

/// Any static failure turning an operation into a plan.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error(transparent)]
    Parse(#[from] parser::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Plan(#[from] PlanError),
}
