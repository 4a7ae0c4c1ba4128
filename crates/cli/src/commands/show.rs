use invsync_refresh::InventoryGraph;
use invsync_storage::{EntityKind, EntityRecord};

use crate::{Context, OutputFormat};

pub(crate) fn cmd_show(ctx: &Context, target: Option<&str>, kind: Option<EntityKind>) {
    let config = ctx.load_config();
    let target_id = ctx.target_id(target, &config);
    let storage = ctx.open_store();
    let rt = ctx.runtime();
    let graph = match rt.block_on(InventoryGraph::load(&storage, &target_id)) {
        Ok(g) => g,
        Err(e) => ctx.fail(&e.to_string()),
    };

    match (ctx.output, kind) {
        (OutputFormat::Json, None) => {
            let json = serde_json::json!({
                "target": &graph.target,
                "counts": counts_json(&graph),
            });
            print_json(ctx, &json);
        }
        (OutputFormat::Json, Some(kind)) => {
            let records: Vec<&EntityRecord> = graph.records(kind).collect();
            print_json(ctx, &records);
        }
        (OutputFormat::Text, None) => {
            let t = &graph.target;
            println!("target {} ({})", t.id, t.url);
            println!("  api version   {}", t.api_version.as_deref().unwrap_or("-"));
            println!("  last refresh  {}", t.last_refresh_at.as_deref().unwrap_or("never"));
            if let Some(err) = &t.last_refresh_error {
                println!("  last error    {}", err);
            }
            for (kind, count) in graph.counts() {
                println!("  {:<30} {}", kind.as_str(), count);
            }
        }
        (OutputFormat::Text, Some(kind)) => {
            for record in graph.records(kind) {
                println!("{}\t{}\t{}", record.local_id, record.remote_ref, describe(&graph, record));
            }
        }
    }
}

fn counts_json(graph: &InventoryGraph) -> serde_json::Map<String, serde_json::Value> {
    graph
        .counts()
        .into_iter()
        .map(|(kind, count)| (kind.as_str().to_string(), count.into()))
        .collect()
}

/// One-line description of a record with its main edge.
fn describe(graph: &InventoryGraph, record: &EntityRecord) -> String {
    let name = record.attributes.name();
    match record.kind() {
        EntityKind::ConfiguredSystem | EntityKind::ConfigurationScript => {
            let group = graph.inventory_group_of(record);
            let parent = graph.parent_of(record);
            let mut line = name.to_string();
            if let Some(group) = group {
                line.push_str(&format!(" [inventory {}]", group.attributes.name()));
            }
            if let Some(parent) = parent {
                line.push_str(&format!(" <- {}", parent.attributes.name()));
            }
            line
        }
        EntityKind::ScriptSource => {
            format!("{} ({} payloads)", name, graph.payloads_of(record).len())
        }
        EntityKind::ScriptPayload => match graph.source_of(record) {
            Some(source) => format!("{} in {}", name, source.attributes.name()),
            None => name.to_string(),
        },
        EntityKind::Credential => match record.as_credential() {
            Some(c) => format!("{} ({})", name, c.kind.as_str()),
            None => name.to_string(),
        },
        EntityKind::InventoryGroup => {
            format!("{} ({} systems)", name, graph.systems_in_group(record).len())
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(ctx: &Context, value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => ctx.fail(&format!("serialization error: {}", e)),
    }
}
