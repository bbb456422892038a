use opentelemetry::Key;

pub const KEY_SCHEMA: Key = Key::from_static_str("fusiongate.schema");
pub const KEY_QUERY: Key = Key::from_static_str("fusiongate.query");
pub const KEY_PATH: Key = Key::from_static_str("fusiongate.path");
pub const KEY_NODE: Key = Key::from_static_str("fusiongate.node");
pub const KEY_VARIABLES: Key = Key::from_static_str("fusiongate.variables");
pub const KEY_ERROR: Key = Key::from_static_str("fusiongate.error");
