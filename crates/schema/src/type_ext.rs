use parser::types::{BaseType, Type};

pub trait TypeExt {
    fn concrete_typename(&self) -> &str;
    fn is_list(&self) -> bool;
    fn is_non_null(&self) -> bool;
}

impl TypeExt for Type {
    fn concrete_typename(&self) -> &str {
        match &self.base {
            BaseType::Named(name) => name.as_str(),
            BaseType::List(ty) => ty.concrete_typename(),
        }
    }

    #[inline]
    fn is_list(&self) -> bool {
        matches!(self.base, BaseType::List(_))
    }

    #[inline]
    fn is_non_null(&self) -> bool {
        !self.nullable
    }
}
