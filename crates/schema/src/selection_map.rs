use std::fmt::{self, Display, Formatter};
use std::iter::Peekable;
use std::str::CharIndices;

use serde::Serialize;
use value::Name;

use crate::SchemaError;

/// A field selection map, selecting values out of an entity.
///
/// ```text
/// dimension.weight
/// { weight: dimension.weight height }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
#[serde(untagged)]
pub enum FieldSelectionMap {
    Path(Vec<Name>),
    Object(Vec<(Name, FieldSelectionMap)>),
}

impl FieldSelectionMap {
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        let mut parser = MapParser {
            input,
            chars: input.char_indices().peekable(),
        };
        let map = parser.parse_map()?;
        parser.skip_ignored();
        if let Some(&(_, ch)) = parser.chars.peek() {
            return Err(parser.error(format!("unexpected character '{}'", ch)));
        }
        Ok(map)
    }

}

impl Display for FieldSelectionMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FieldSelectionMap::Path(path) => {
                for (idx, name) in path.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", name)?;
                }
                Ok(())
            }
            FieldSelectionMap::Object(fields) => {
                write!(f, "{{ ")?;
                for (name, map) in fields {
                    write!(f, "{}: {} ", name, map)?;
                }
                write!(f, "}}")
            }
        }
    }
}

struct MapParser<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> MapParser<'a> {
    fn error(&self, message: impl Into<String>) -> SchemaError {
        SchemaError::InvalidSelectionMap {
            map: self.input.to_string(),
            message: message.into(),
        }
    }

    fn skip_ignored(&mut self) {
        while let Some((_, ch)) = self.chars.peek() {
            if ch.is_whitespace() || *ch == ',' {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ignored();
        match self.chars.peek() {
            Some((_, ch)) if *ch == expected => {
                self.chars.next();
                true
            }
            _ => false,
        }
    }

    fn parse_name(&mut self) -> Result<Name, SchemaError> {
        self.skip_ignored();
        let start = match self.chars.peek() {
            Some((idx, ch)) if ch.is_ascii_alphabetic() || *ch == '_' => *idx,
            Some(&(_, ch)) => return Err(self.error(format!("expected a name, found '{}'", ch))),
            None => return Err(self.error("expected a name, found the end of input")),
        };
        let mut end = start;
        while let Some((idx, ch)) = self.chars.peek() {
            if ch.is_ascii_alphanumeric() || *ch == '_' {
                end = *idx + ch.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        Ok(Name::new(&self.input[start..end]))
    }

    fn parse_map(&mut self) -> Result<FieldSelectionMap, SchemaError> {
        if self.eat('{') {
            let mut fields = Vec::new();
            loop {
                if self.eat('}') {
                    break;
                }
                let name = self.parse_name()?;
                let map = if self.eat(':') {
                    self.parse_map()?
                } else {
                    FieldSelectionMap::Path(vec![name.clone()])
                };
                fields.push((name, map));
            }
            if fields.is_empty() {
                return Err(self.error("an object selection must not be empty"));
            }
            Ok(FieldSelectionMap::Object(fields))
        } else {
            let mut path = vec![self.parse_name()?];
            while self.eat('.') {
                path.push(self.parse_name()?);
            }
            Ok(FieldSelectionMap::Path(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> FieldSelectionMap {
        FieldSelectionMap::Path(segments.iter().map(Name::new).collect())
    }

    #[test]
    fn parse_path() {
        assert_eq!(
            FieldSelectionMap::parse("dimension.weight").unwrap(),
            path(&["dimension", "weight"])
        );
        assert_eq!(FieldSelectionMap::parse(" id ").unwrap(), path(&["id"]));
    }

    #[test]
    fn parse_object() {
        let map = FieldSelectionMap::parse("{ weight: dimension.weight, height }").unwrap();
        assert_eq!(
            map,
            FieldSelectionMap::Object(vec![
                (Name::new("weight"), path(&["dimension", "weight"])),
                (Name::new("height"), path(&["height"])),
            ])
        );
    }

    #[test]
    fn reject_malformed() {
        assert!(FieldSelectionMap::parse("").is_err());
        assert!(FieldSelectionMap::parse("a.").is_err());
        assert!(FieldSelectionMap::parse("{ }").is_err());
        assert!(matches!(
            FieldSelectionMap::parse("a b"),
            Err(SchemaError::InvalidSelectionMap { message, .. }) if message == "unexpected character 'b'"
        ));
        assert!(matches!(
            FieldSelectionMap::parse("a.1"),
            Err(SchemaError::InvalidSelectionMap { message, .. }) if message == "expected a name, found '1'"
        ));
    }
}
