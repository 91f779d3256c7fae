//! Declarative form schema.
//!
//! A [`FormSchema`] is an id (the persistence key) plus an ordered list of
//! [`FieldSchema`] nodes. Nodes are a recursive sum type: `group` and
//! `repeater` carry child fields, the three leaf kinds do not.
//!
//! Schemas are plain serde data (`type` discriminant, camelCase keys). The
//! two capabilities a schema author supplies in code, `asyncValidate` and
//! `loadOptions`, are skipped by serde and attached after loading with
//! [`FormSchema::attach_async_validator`] / [`FormSchema::attach_option_loader`]
//! or the builder methods on [`FieldSchema`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::path;
use crate::traits::{AsyncValidator, OptionLoader};
use crate::types::Value;

/// Comparison used by a [`VisibleIf`] rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Equals,
    GreaterThan,
    /// Any operator this engine does not know. Treated as always visible.
    #[serde(other)]
    Unknown,
}

/// Conditional visibility rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleIf {
    /// Absolute value-tree path of the field being compared.
    pub field_id: String,
    pub operator: Operator,
    pub value: Value,
}

/// Synchronous rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRule {
    #[serde(default)]
    pub required: bool,
    /// Minimum character count. Only checked on text fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
}

/// Kind-specific part of a field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Checkbox,
    Select {
        #[serde(skip)]
        load_options: Option<Arc<dyn OptionLoader>>,
    },
    Group {
        fields: Vec<FieldSchema>,
    },
    Repeater {
        fields: Vec<FieldSchema>,
        #[serde(default, rename = "minItems", skip_serializing_if = "Option::is_none")]
        min_items: Option<usize>,
        #[serde(default, rename = "maxItems", skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },
}

/// One node of the form schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    /// Key of this field within its parent object. Unique among siblings.
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_if: Option<VisibleIf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRule>,
    #[serde(skip)]
    pub async_validate: Option<Arc<dyn AsyncValidator>>,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldSchema {
    fn new(id: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            visible_if: None,
            validation: None,
            async_validate: None,
            kind,
        }
    }

    #[must_use]
    pub fn text(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, label, FieldKind::Text)
    }

    #[must_use]
    pub fn checkbox(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, label, FieldKind::Checkbox)
    }

    #[must_use]
    pub fn select(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, label, FieldKind::Select { load_options: None })
    }

    #[must_use]
    pub fn group(id: impl Into<String>, label: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self::new(id, label, FieldKind::Group { fields })
    }

    #[must_use]
    pub fn repeater(
        id: impl Into<String>,
        label: impl Into<String>,
        fields: Vec<FieldSchema>,
    ) -> Self {
        Self::new(
            id,
            label,
            FieldKind::Repeater {
                fields,
                min_items: None,
                max_items: None,
            },
        )
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.validation.get_or_insert_with(ValidationRule::default).required = true;
        self
    }

    #[must_use]
    pub fn min_length(mut self, min: usize) -> Self {
        self.validation.get_or_insert_with(ValidationRule::default).min_length = Some(min);
        self
    }

    #[must_use]
    pub fn visible_if(
        mut self,
        field_id: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.visible_if = Some(VisibleIf {
            field_id: field_id.into(),
            operator,
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn with_async_validator(mut self, validator: Arc<dyn AsyncValidator>) -> Self {
        self.async_validate = Some(validator);
        self
    }

    /// Attaches an option loader. Ignored on anything but a select field.
    #[must_use]
    pub fn with_option_loader(mut self, loader: Arc<dyn OptionLoader>) -> Self {
        if let FieldKind::Select { load_options } = &mut self.kind {
            *load_options = Some(loader);
        }
        self
    }

    /// Sets repeater item bounds. Ignored on anything but a repeater.
    #[must_use]
    pub fn with_item_bounds(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        if let FieldKind::Repeater {
            min_items,
            max_items,
            ..
        } = &mut self.kind
        {
            *min_items = min;
            *max_items = max;
        }
        self
    }

    /// Lower-case kind name, matching the serialized `type` tag.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            FieldKind::Text => "text",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Select { .. } => "select",
            FieldKind::Group { .. } => "group",
            FieldKind::Repeater { .. } => "repeater",
        }
    }

    /// Child fields of a group or repeater; empty for leaves.
    #[must_use]
    pub fn children(&self) -> &[FieldSchema] {
        match &self.kind {
            FieldKind::Group { fields } | FieldKind::Repeater { fields, .. } => fields,
            _ => &[],
        }
    }

    fn children_mut(&mut self) -> Option<&mut Vec<FieldSchema>> {
        match &mut self.kind {
            FieldKind::Group { fields } | FieldKind::Repeater { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Initial value for a freshly created instance of this field.
    ///
    /// Text and select start as `""`, checkboxes as `false`, groups as an
    /// object of their children's defaults and repeaters as an empty list.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match &self.kind {
            FieldKind::Text | FieldKind::Select { .. } => Value::String(String::new()),
            FieldKind::Checkbox => Value::Bool(false),
            FieldKind::Group { fields } => item_default(fields),
            FieldKind::Repeater { .. } => Value::Array(Vec::new()),
        }
    }
}

/// Default object for one repeater item (or group) with the given fields.
#[must_use]
pub fn item_default(fields: &[FieldSchema]) -> Value {
    Value::Map(
        fields
            .iter()
            .map(|f| (f.id.clone(), f.default_value()))
            .collect::<BTreeMap<_, _>>(),
    )
}

/// Top-level schema. The id doubles as the persistence key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSchema {
    pub id: String,
    pub fields: Vec<FieldSchema>,
}

/// A schema node resolved from a value path, with the chain of enclosing
/// groups and repeaters (outermost first).
#[derive(Debug)]
pub struct Located<'a> {
    pub field: &'a FieldSchema,
    pub ancestors: Vec<&'a FieldSchema>,
}

impl FormSchema {
    #[must_use]
    pub fn new(id: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Parses a schema from JSON. Capabilities must be attached afterwards.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the document is not a valid schema.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Resolves a value path (`addresses.0.street`) to its schema node.
    ///
    /// Repeater children require an item index segment; group children do
    /// not. Returns `None` for paths that name no field.
    #[must_use]
    pub fn locate(&self, value_path: &str) -> Option<Located<'_>> {
        let mut segments = value_path.split('.').peekable();
        let mut level: &[FieldSchema] = &self.fields;
        let mut ancestors = Vec::new();
        while let Some(segment) = segments.next() {
            let field = level.iter().find(|f| f.id == segment)?;
            if segments.peek().is_none() {
                return Some(Located { field, ancestors });
            }
            match &field.kind {
                FieldKind::Group { fields } => level = fields,
                FieldKind::Repeater { fields, .. } => {
                    if !path::is_index_segment(segments.next()?) {
                        return None;
                    }
                    if segments.peek().is_none() {
                        // Path names a whole repeater item, not a field.
                        return None;
                    }
                    level = fields;
                }
                _ => return None,
            }
            ancestors.push(field);
        }
        None
    }

    /// Finds a field by its id chain (`addresses.street`). Index segments are
    /// skipped, so value paths work too.
    pub fn field_mut(&mut self, schema_path: &str) -> Option<&mut FieldSchema> {
        let mut ids = schema_path
            .split('.')
            .filter(|s| !path::is_index_segment(s));
        let first = ids.next()?;
        let mut cur = self.fields.iter_mut().find(|f| f.id == first)?;
        for id in ids {
            cur = cur.children_mut()?.iter_mut().find(|f| f.id == id)?;
        }
        Some(cur)
    }

    /// Attaches an async validator to the field at `schema_path`. Returns
    /// `false` if no such field exists.
    pub fn attach_async_validator(
        &mut self,
        schema_path: &str,
        validator: Arc<dyn AsyncValidator>,
    ) -> bool {
        match self.field_mut(schema_path) {
            Some(field) => {
                field.async_validate = Some(validator);
                true
            }
            None => false,
        }
    }

    /// Attaches an option loader to the select field at `schema_path`.
    /// Returns `false` if the path does not name a select field.
    pub fn attach_option_loader(
        &mut self,
        schema_path: &str,
        loader: Arc<dyn OptionLoader>,
    ) -> bool {
        match self.field_mut(schema_path).map(|f| &mut f.kind) {
            Some(FieldKind::Select { load_options }) => {
                *load_options = Some(loader);
                true
            }
            _ => false,
        }
    }
}
