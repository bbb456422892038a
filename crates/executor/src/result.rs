use fusiongate_planner::{ErrorPath, PathSegment, ResponsePath, TYPENAME_ALIAS};
use serde_json::{Map, Value};

/// A concrete position in the response, such as `books.1.writer`.
pub type Location = Vec<ErrorPath>;

/// The shared response tree every node merges its data into.
#[derive(Debug)]
pub struct ResultTree {
    data: Value,
}

impl Default for ResultTree {
    fn default() -> Self {
        Self {
            data: Value::Object(Map::new()),
        }
    }
}

impl ResultTree {
    #[inline]
    pub fn data(&self) -> &Value {
        &self.data
    }

    #[inline]
    pub fn into_data(self) -> Value {
        self.data
    }

    pub fn merge_root(&mut self, value: Value) {
        merge_data(&mut self.data, value);
    }

    pub fn merge_at(&mut self, location: &[ErrorPath], value: Value) {
        if let Some(target) = get_mut(&mut self.data, location) {
            merge_data(target, value);
        }
    }

    pub fn get(&self, location: &[ErrorPath]) -> Option<&Value> {
        let mut current = &self.data;
        for segment in location {
            current = match (segment, current) {
                (ErrorPath::Name(name), Value::Object(object)) => object.get(name)?,
                (ErrorPath::Index(idx), Value::Array(items)) => items.get(*idx)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Every object reached by the path, lists flattened, in document order.
    ///
    /// Segments carrying a possible type only match objects of that concrete type.
    pub fn entities(&self, path: &ResponsePath) -> Vec<Location> {
        let mut entities = Vec::new();
        let mut location = Vec::new();
        collect_entities(&self.data, path, &mut location, &mut entities);
        entities
    }
}

fn get_mut<'a>(mut current: &'a mut Value, location: &[ErrorPath]) -> Option<&'a mut Value> {
    for segment in location {
        current = match (segment, current) {
            (ErrorPath::Name(name), Value::Object(object)) => object.get_mut(name)?,
            (ErrorPath::Index(idx), Value::Array(items)) => items.get_mut(*idx)?,
            _ => return None,
        };
    }
    Some(current)
}

fn collect_entities(
    value: &Value,
    segments: &[PathSegment],
    location: &mut Location,
    entities: &mut Vec<Location>,
) {
    let (segment, rest) = match segments.split_first() {
        Some(split) => split,
        None => {
            if value.is_object() {
                entities.push(location.clone());
            }
            return;
        }
    };
    if let Some(next) = value.as_object().and_then(|object| object.get(segment.name.as_str())) {
        location.push(ErrorPath::Name(segment.name.to_string()));
        visit_segment(next, segment, rest, location, entities);
        location.pop();
    }
}

fn visit_segment(
    value: &Value,
    segment: &PathSegment,
    rest: &[PathSegment],
    location: &mut Location,
    entities: &mut Vec<Location>,
) {
    match value {
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                location.push(ErrorPath::Index(idx));
                visit_segment(item, segment, rest, location, entities);
                location.pop();
            }
        }
        Value::Object(object) => {
            if let Some(possible_type) = &segment.possible_type {
                if typename(object) != Some(possible_type.as_str()) {
                    return;
                }
            }
            collect_entities(value, rest, location, entities);
        }
        _ => {}
    }
}

/// The concrete type recorded on an object of an abstract position.
pub(crate) fn typename(object: &Map<String, Value>) -> Option<&str> {
    object
        .get(TYPENAME_ALIAS)
        .or_else(|| object.get("__typename"))
        .and_then(Value::as_str)
}

pub(crate) fn merge_data(target: &mut Value, value: Value) {
    match (target, value) {
        (target @ Value::Null, fragment) => *target = fragment,
        (Value::Object(object), Value::Object(fragment_object)) => {
            for (key, value) in fragment_object {
                match object.get_mut(&key) {
                    Some(target) => merge_data(target, value),
                    None => {
                        object.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(array), Value::Array(fragment_array))
            if array.len() == fragment_array.len() =>
        {
            for (idx, element) in fragment_array.into_iter().enumerate() {
                merge_data(&mut array[idx], element);
            }
        }
        _ => {}
    }
}
