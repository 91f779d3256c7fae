//! Field tree walker: turns schema + value tree into a render tree.
//!
//! Hidden fields produce no node, and nothing under a hidden group or
//! repeater is visited. Every visible select is mounted in the
//! [`OptionsRegistry`] as it is walked; newly mounted selects are handed back
//! as [`PendingLoad`]s for the caller to start.

use std::collections::HashSet;
use std::sync::Arc;

use formsync_core::{is_visible, path, FieldKind, FieldSchema, OptionLoader, Value};

use crate::options::{Mount, OptionsRegistry, OptionsState};
use crate::store::FormStore;

/// One visible field, ready for presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderNode {
    /// Full value path.
    pub path: String,
    /// Schema id of the field.
    pub id: String,
    pub label: String,
    /// Current validation message. `None` when there is nothing to show.
    pub error: Option<String>,
    /// An async validation is in flight.
    pub validating: bool,
    pub kind: RenderKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderKind {
    /// Bound text input. Non-string values are shown as `""`.
    Text { value: String },
    /// Bound checkbox. Anything but `true` is unchecked.
    Checkbox { checked: bool },
    Select { value: String, options: OptionsState },
    Group { children: Vec<RenderNode> },
    Repeater {
        /// Visible child nodes of each item, in order.
        items: Vec<Vec<RenderNode>>,
        min_items: Option<usize>,
        max_items: Option<usize>,
        can_add: bool,
        can_remove: bool,
    },
}

impl RenderNode {
    /// Depth-first search for the node at `path` in `nodes`.
    #[must_use]
    pub fn find<'a>(nodes: &'a [RenderNode], path: &str) -> Option<&'a RenderNode> {
        for node in nodes {
            if node.path == path {
                return Some(node);
            }
            let found = match &node.kind {
                RenderKind::Group { children } => RenderNode::find(children, path),
                RenderKind::Repeater { items, .. } => {
                    items.iter().find_map(|item| RenderNode::find(item, path))
                }
                _ => None,
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

/// A select mounted by this walk whose options must now be loaded.
#[derive(Debug)]
pub struct PendingLoad {
    pub path: String,
    pub mount_id: u64,
    pub loader: Arc<dyn OptionLoader>,
}

/// Result of one walk.
#[derive(Debug, Default)]
pub struct Walk {
    pub nodes: Vec<RenderNode>,
    /// Value paths of every select rendered by this walk.
    pub selects: HashSet<String>,
    pub pending: Vec<PendingLoad>,
}

pub(crate) struct Walker<'a> {
    values: &'a Value,
    store: &'a FormStore,
    options: &'a OptionsRegistry,
    walk: Walk,
}

impl<'a> Walker<'a> {
    pub(crate) fn new(values: &'a Value, store: &'a FormStore, options: &'a OptionsRegistry) -> Self {
        Self {
            values,
            store,
            options,
            walk: Walk::default(),
        }
    }

    /// Walks `fields` from the root of the value tree.
    pub(crate) fn run(mut self, fields: &[FieldSchema]) -> Walk {
        self.walk.nodes = self.fields(fields, "");
        self.walk
    }

    fn fields(&mut self, fields: &[FieldSchema], parent: &str) -> Vec<RenderNode> {
        fields
            .iter()
            .filter(|field| is_visible(field, self.values))
            .map(|field| self.field(field, parent))
            .collect()
    }

    fn field(&mut self, field: &FieldSchema, parent: &str) -> RenderNode {
        let path = if parent.is_empty() {
            field.id.clone()
        } else {
            path::join(parent, &field.id)
        };
        let value = path::get(self.values, &path);

        let kind = match &field.kind {
            FieldKind::Text => RenderKind::Text {
                value: value.and_then(Value::as_str).unwrap_or_default().to_string(),
            },
            FieldKind::Checkbox => RenderKind::Checkbox {
                checked: matches!(value, Some(Value::Bool(true))),
            },
            FieldKind::Select { load_options } => RenderKind::Select {
                value: value.and_then(Value::as_str).unwrap_or_default().to_string(),
                options: self.mount_select(&path, load_options.as_ref()),
            },
            FieldKind::Group { fields } => RenderKind::Group {
                children: self.fields(fields, &path),
            },
            FieldKind::Repeater {
                fields,
                min_items,
                max_items,
            } => {
                let count = value.and_then(Value::as_array).map_or(0, Vec::len);
                let items = (0..count)
                    .map(|index| self.fields(fields, &path::join(&path, index)))
                    .collect();
                RenderKind::Repeater {
                    items,
                    min_items: *min_items,
                    max_items: *max_items,
                    can_add: max_items.map_or(true, |max| count < max),
                    can_remove: count > min_items.unwrap_or(0),
                }
            }
        };

        RenderNode {
            error: self.store.error(&path).filter(|message| !message.is_empty()),
            validating: self.store.is_validating(&path),
            id: field.id.clone(),
            label: field.label.clone(),
            kind,
            path,
        }
    }

    fn mount_select(&mut self, path: &str, loader: Option<&Arc<dyn OptionLoader>>) -> OptionsState {
        self.walk.selects.insert(path.to_string());
        match loader {
            Some(loader) => {
                if let Mount::Started(mount_id) = self.options.mount(path) {
                    self.walk.pending.push(PendingLoad {
                        path: path.to_string(),
                        mount_id,
                        loader: Arc::clone(loader),
                    });
                }
            }
            None => self.options.mount_static(path),
        }
        self.options.state(path).unwrap_or(OptionsState::Loading)
    }
}
