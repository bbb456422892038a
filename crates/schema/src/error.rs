use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error(transparent)]
    Parse(#[from] parser::Error),

    #[error("The composite schema does not define a query type.")]
    MissingQueryType,

    #[error("Directive '@{directive}' on '{coordinate}' requires the argument '{argument}'.")]
    MissingDirectiveArgument {
        directive: &'static str,
        coordinate: String,
        argument: &'static str,
    },

    #[error("Invalid field selection map '{map}': {message}")]
    InvalidSelectionMap { map: String, message: String },

    #[error("Invalid type '{ty}' on '{coordinate}'.")]
    InvalidType { coordinate: String, ty: String },

    #[error("Lookup field '{field}' in schema '{schema}' must return a composite type.")]
    InvalidLookup { field: String, schema: String },

    #[error("Lookup argument '{field}({argument}:)' maps to '{path}', which does not exist on type '{type_name}'.")]
    UnknownLookupKey {
        field: String,
        argument: String,
        path: String,
        type_name: String,
    },

    #[error("Field '{coordinate}' declares a requirement for schema '{schema}' but is not served by it.")]
    RequirementWithoutSource { coordinate: String, schema: String },
}
