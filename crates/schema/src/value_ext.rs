use indexmap::IndexSet;
use value::{Name, Value};

pub trait ValueExt {
    /// Every variable the value refers to, in order of first appearance.
    fn referenced_variables(&self) -> IndexSet<&str>;

    /// The boolean literal, if the value is one.
    fn as_bool_literal(&self) -> Option<bool>;

    /// The variable name, if the value is exactly one variable.
    fn as_variable(&self) -> Option<&Name>;
}

impl ValueExt for Value {
    fn referenced_variables(&self) -> IndexSet<&str> {
        fn collect<'a>(value: &'a Value, vars: &mut IndexSet<&'a str>) {
            match value {
                Value::Variable(name) => {
                    vars.insert(name);
                }
                Value::List(values) => values.iter().for_each(|value| collect(value, vars)),
                Value::Object(obj) => obj.values().for_each(|value| collect(value, vars)),
                _ => {}
            }
        }

        let mut vars = IndexSet::new();
        collect(self, &mut vars);
        vars
    }

    fn as_bool_literal(&self) -> Option<bool> {
        match self {
            Value::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    fn as_variable(&self) -> Option<&Name> {
        match self {
            Value::Variable(name) => Some(name),
            _ => None,
        }
    }
}
