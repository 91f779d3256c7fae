//! Two "tabs" editing the same form over one shared in-memory storage.
//!
//! Walks through validation on blur, debounced autosave, restore on mount and
//! both ways of settling a cross-tab conflict.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use formsync_core::{FieldSchema, FnLoader, FnValidator, FormSchema, Operator, SelectOption, Value};
use formsync_engine::telemetry::{init_tracing, LogFormat};
use formsync_engine::{
    ContextId, EngineConfig, FormSession, RenderKind, RenderNode, Resolution, SharedMemoryStorage,
    SnapshotStorage,
};

#[derive(Parser, Debug)]
#[command(name = "formsync-demo", version, about = "Two-tab form persistence walkthrough")]
struct Args {
    /// Autosave quiet period in milliseconds.
    #[arg(long, env = "FORMSYNC_DEBOUNCE_MS", default_value_t = 300)]
    debounce_ms: u64,

    /// Log output format: pretty or json.
    #[arg(long, env = "FORMSYNC_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    /// JSON schema file to use instead of the built-in profile form.
    #[arg(long)]
    schema: Option<PathBuf>,
}

fn builtin_schema() -> FormSchema {
    let taken = Arc::new(FnValidator(|value: Value, _values: Value| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok::<_, anyhow::Error>((value.as_str() == Some("admin")).then(|| "Name is taken".to_string()))
    }));
    let countries = Arc::new(FnLoader(|| async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok::<_, anyhow::Error>(vec![
            SelectOption::new("India", "IN"),
            SelectOption::new("Germany", "DE"),
        ])
    }));

    FormSchema::new(
        "profile",
        vec![
            FieldSchema::text("name", "Name")
                .required()
                .min_length(3)
                .with_async_validator(taken),
            FieldSchema::checkbox("hasAddress", "Has address"),
            FieldSchema::group(
                "address",
                "Address",
                vec![
                    FieldSchema::text("street", "Street").required(),
                    FieldSchema::select("country", "Country").with_option_loader(countries),
                ],
            )
            .visible_if("hasAddress", Operator::Equals, true),
            FieldSchema::repeater("phones", "Phones", vec![FieldSchema::text("number", "Number")])
                .with_item_bounds(None, Some(3)),
        ],
    )
}

fn print_tree(label: &str, nodes: &[RenderNode]) {
    println!("--- {label} ---");
    print_nodes(nodes, 1);
}

fn print_nodes(nodes: &[RenderNode], depth: usize) {
    let indent = "  ".repeat(depth);
    for node in nodes {
        let error = node
            .error
            .as_deref()
            .map(|e| format!("  [error: {e}]"))
            .unwrap_or_default();
        match &node.kind {
            RenderKind::Text { value } => println!("{indent}{} = {value:?}{error}", node.path),
            RenderKind::Checkbox { checked } => println!("{indent}{} = {checked}{error}", node.path),
            RenderKind::Select { value, options } => {
                println!("{indent}{} = {value:?} options={options:?}{error}", node.path);
            }
            RenderKind::Group { children } => {
                println!("{indent}{}:", node.label);
                print_nodes(children, depth + 1);
            }
            RenderKind::Repeater { items, can_add, can_remove, .. } => {
                println!("{indent}{} ({} items, add={can_add}, remove={can_remove}):", node.label, items.len());
                for item in items {
                    print_nodes(item, depth + 1);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format, "info")?;

    let schema = match &args.schema {
        Some(path) => FormSchema::from_json(&std::fs::read_to_string(path)?)?,
        None => builtin_schema(),
    };
    let config = EngineConfig::default().with_debounce_ms(args.debounce_ms);
    let pause = Duration::from_millis(args.debounce_ms + 100);
    let form_id = schema.id.clone();
    let shared = SharedMemoryStorage::new();

    // Tab A: fill in the form.
    let tab_a_storage: Arc<dyn SnapshotStorage> = Arc::new(shared.context(ContextId::named("tab-a")));
    let tab_a = FormSession::mount(schema.clone(), tab_a_storage, config.clone());
    tab_a.wait_hydrated().await?;

    tab_a.set_value("name", "ab");
    tab_a.blur("name").await;
    tab_a.set_value("hasAddress", true);
    print_tree("tab A after a short name", &tab_a.render());

    tab_a.set_value("name", "abcd");
    tab_a.blur("name").await;
    if let Err(err) = tab_a.add_item("phones") {
        tracing::warn!(error = %err, "schema has no phone list");
    }
    tab_a.set_value("phones.0.number", "555-0100");
    tokio::time::sleep(pause).await;
    print_tree("tab A after fixes (options loaded)", &tab_a.render());

    // Tab B: mounts later and restores what tab A saved.
    let tab_b_storage: Arc<dyn SnapshotStorage> = Arc::new(shared.context(ContextId::named("tab-b")));
    let tab_b = FormSession::mount(schema, tab_b_storage, config);
    tab_b.wait_hydrated().await?;
    println!("tab B restored: {}", tab_b.values());

    // Tab A saves a change; tab B now disagrees with storage and holds back.
    let mut b_conflicts = tab_b.conflict_changes();
    tab_a.set_value("name", "Alice");
    b_conflicts.wait_for(Option::is_some).await?;
    if let Some(conflict) = tab_b.conflict() {
        println!("tab B conflict: remote {} at {}", conflict.remote_values, conflict.remote_saved_at);
    }
    tab_b.set_value("name", "Bob");
    tokio::time::sleep(pause).await;

    // Tab B keeps its own values, which in turn conflicts with tab A.
    let mut a_conflicts = tab_a.conflict_changes();
    tab_b.resolve_conflict(Resolution::KeepLocal).await?;
    a_conflicts.wait_for(Option::is_some).await?;
    tab_a.resolve_conflict(Resolution::AcceptRemote).await?;

    println!("tab A: {}", tab_a.values());
    println!("tab B: {}", tab_b.values());
    if let Some(raw) = shared.raw(&form_id) {
        println!("stored: {raw}");
    }

    tab_a.unmount();
    tab_b.unmount();
    Ok(())
}
