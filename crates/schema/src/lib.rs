#![forbid(unsafe_code)]

mod composite_schema;
mod error;
mod selection_map;
mod type_ext;
mod value_ext;

pub use composite_schema::{
    CompositeSchema, FieldRole, KeyFields, Lookup, LookupArgument, MetaField, MetaInputValue,
    MetaType, Requirement, SourceMapping, TypeKind,
};
pub use error::SchemaError;
pub use selection_map::FieldSelectionMap;
pub use type_ext::TypeExt;
pub use value_ext::ValueExt;
