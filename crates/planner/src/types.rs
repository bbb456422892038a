use std::fmt::{Result as FmtResult, Write};

use fusiongate_schema::ValueExt;
use indexmap::IndexSet;
use value::{Name, Value};

use crate::compiler::ConditionId;
use crate::normalizer::{Condition, NormalizedDirective};

/// A field sent to a source schema, using the field name of that schema.
#[derive(Debug, Clone)]
pub struct PlanField {
    pub alias: Option<Name>,
    pub name: Name,
    pub arguments: Vec<(Name, Value)>,
    pub directives: Vec<NormalizedDirective>,
    pub conditions: Vec<ConditionId>,
    /// Hidden arguments bound to a requirement of the node, by requirement index.
    pub requirements: Vec<(Name, usize)>,
    pub selection_set: PlanSelectionSet,
}

impl PlanField {
    pub fn new(alias: Option<Name>, name: Name) -> Self {
        Self {
            alias,
            name,
            arguments: Vec::new(),
            directives: Vec::new(),
            conditions: Vec::new(),
            requirements: Vec::new(),
            selection_set: Default::default(),
        }
    }

    #[inline]
    pub fn response_key(&self) -> &Name {
        self.alias.as_ref().unwrap_or(&self.name)
    }

    /// A field without arguments, directives or conditions.
    #[inline]
    pub fn is_plain(&self) -> bool {
        self.arguments.is_empty()
            && self.directives.is_empty()
            && self.conditions.is_empty()
            && self.requirements.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum PlanSelection {
    Field(PlanField),
    InlineFragment {
        type_condition: Name,
        selection_set: PlanSelectionSet,
    },
}

#[derive(Debug, Clone, Default)]
pub struct PlanSelectionSet(pub Vec<PlanSelection>);

impl PlanSelectionSet {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fields selected directly in this selection set.
    pub fn fields(&self) -> impl Iterator<Item = &PlanField> {
        self.0.iter().filter_map(|selection| match selection {
            PlanSelection::Field(field) => Some(field),
            PlanSelection::InlineFragment { .. } => None,
        })
    }

    pub(crate) fn find_field_mut(
        &mut self,
        predicate: impl Fn(&PlanField) -> bool,
    ) -> Option<&mut PlanField> {
        self.0.iter_mut().find_map(|selection| match selection {
            PlanSelection::Field(field) if predicate(field) => Some(field),
            _ => None,
        })
    }
}

pub(crate) struct RenderContext<'a> {
    pub conditions: &'a [Condition],
    /// Per-condition visibility of this request; `None` prints the conditions as directives.
    pub visible: Option<&'a [bool]>,
    pub entity: usize,
    pub variables: IndexSet<Name>,
    pub requirements: IndexSet<usize>,
}

impl<'a> RenderContext<'a> {
    pub fn new(conditions: &'a [Condition], visible: Option<&'a [bool]>) -> Self {
        Self {
            conditions,
            visible,
            entity: 0,
            variables: IndexSet::new(),
            requirements: IndexSet::new(),
        }
    }

    fn is_visible(&self, conditions: &[ConditionId]) -> bool {
        match self.visible {
            Some(visible) => conditions
                .iter()
                .all(|id| visible.get(*id).copied().unwrap_or(true)),
            None => true,
        }
    }

    fn collect_variables(&mut self, value: &Value) {
        for name in value.referenced_variables() {
            self.variables.insert(Name::new(name));
        }
    }

    /// Renders the selections of a set without braces, `None` if nothing is left.
    pub fn selection_items(&mut self, selection_set: &PlanSelectionSet) -> Option<String> {
        let mut items = Vec::new();
        for selection in &selection_set.0 {
            let mut w = String::new();
            let written = match selection {
                PlanSelection::Field(field) => self.write_field(&mut w, field),
                PlanSelection::InlineFragment {
                    type_condition,
                    selection_set,
                } => match self.selection_items(selection_set) {
                    Some(inner) => write!(w, "... on {} {{ {} }}", type_condition, inner)
                        .map(|_| true),
                    None => Ok(false),
                },
            };
            if let Ok(true) = written {
                items.push(w);
            }
        }

        if items.is_empty() {
            None
        } else {
            Some(items.join(" "))
        }
    }

    fn write_field(&mut self, w: &mut String, field: &PlanField) -> Result<bool, std::fmt::Error> {
        if !self.is_visible(&field.conditions) {
            return Ok(false);
        }

        if let Some(alias) = &field.alias {
            write!(w, "{}: ", alias)?;
        }
        write!(w, "{}", field.name)?;

        let mut arguments = Vec::new();
        for (name, value) in &field.arguments {
            self.collect_variables(value);
            arguments.push(format!("{}: {}", name, value));
        }
        for (name, idx) in &field.requirements {
            self.requirements.insert(*idx);
            arguments.push(format!(
                "{}: ${}",
                name,
                requirement_variable(self.entity, *idx)
            ));
        }
        if !arguments.is_empty() {
            write!(w, "({})", arguments.join(", "))?;
        }

        for directive in &field.directives {
            write!(w, " @{}", directive.name)?;
            if !directive.arguments.is_empty() {
                let mut arguments = Vec::new();
                for (name, value) in &directive.arguments {
                    self.collect_variables(value);
                    arguments.push(format!("{}: {}", name, value));
                }
                write!(w, "({})", arguments.join(", "))?;
            }
        }

        if self.visible.is_none() {
            for id in &field.conditions {
                if let Some(condition) = self.conditions.get(*id) {
                    let (directive, variable) = match condition {
                        Condition::Skip(variable) => ("skip", variable),
                        Condition::Include(variable) => ("include", variable),
                    };
                    self.variables.insert(variable.clone());
                    write!(w, " @{}(if: ${})", directive, variable)?;
                }
            }
        }

        if !field.selection_set.is_empty() {
            let inner = self
                .selection_items(&field.selection_set)
                .unwrap_or_else(|| "__typename".to_string());
            write!(w, " {{ {} }}", inner)?;
        }
        Ok(true)
    }
}

/// Variable carrying a lookup argument of the entity at `entity` in a batch.
#[inline]
pub fn key_variable(entity: usize, argument: &str) -> String {
    format!("__fusion_e{}_{}", entity, argument)
}

/// Variable carrying a requirement value of the entity at `entity` in a batch.
#[inline]
pub fn requirement_variable(entity: usize, idx: usize) -> String {
    format!("__fusion_e{}_r{}", entity, idx)
}

pub(crate) fn write_variable_definitions(w: &mut String, definitions: &[String]) -> FmtResult {
    if !definitions.is_empty() {
        write!(w, "({})", definitions.join(", "))?;
    }
    Ok(())
}
