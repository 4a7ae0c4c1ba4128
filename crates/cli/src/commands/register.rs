use invsync_storage::{InventoryStorage, TargetRecord};

use crate::{Context, OutputFormat};

pub(crate) fn cmd_register(
    ctx: &Context,
    id: Option<String>,
    url: Option<String>,
    userid: Option<String>,
    no_verify_ssl: bool,
) {
    let config = ctx.load_config();
    let configured = config.target.as_ref();

    let Some(id) = id.or_else(|| configured.map(|t| t.id.clone())) else {
        ctx.fail("target id required (argument or [target].id in config)");
    };
    let Some(url) = url.or_else(|| configured.map(|t| t.url.clone())) else {
        ctx.fail("target url required (argument or [target].url in config)");
    };

    let mut target = TargetRecord::new(id, url);
    target.userid = userid.or_else(|| configured.and_then(|t| t.userid.clone()));
    target.verify_ssl = !no_verify_ssl && configured.map_or(true, |t| t.verify_ssl);

    let (_lock, storage) = ctx.open_store_for_update();
    let rt = ctx.runtime();
    if let Err(e) = rt.block_on(storage.register_target(target.clone())) {
        ctx.fail(&e.to_string());
    }
    ctx.save_store(&storage);

    if ctx.quiet {
        return;
    }
    match ctx.output {
        OutputFormat::Text => println!("registered target '{}' at {}", target.id, target.url),
        OutputFormat::Json => match serde_json::to_string_pretty(&target) {
            Ok(json) => println!("{}", json),
            Err(e) => ctx.fail(&format!("serialization error: {}", e)),
        },
    }
}

pub(crate) fn cmd_targets(ctx: &Context) {
    let storage = ctx.open_store();
    let rt = ctx.runtime();
    let targets = match rt.block_on(storage.list_targets()) {
        Ok(t) => t,
        Err(e) => ctx.fail(&e.to_string()),
    };

    match ctx.output {
        OutputFormat::Json => match serde_json::to_string_pretty(&targets) {
            Ok(json) => println!("{}", json),
            Err(e) => ctx.fail(&format!("serialization error: {}", e)),
        },
        OutputFormat::Text => {
            if targets.is_empty() {
                if !ctx.quiet {
                    println!("no targets registered");
                }
                return;
            }
            for t in &targets {
                let status = match (&t.last_refresh_at, &t.last_refresh_error) {
                    (None, _) => "never refreshed".to_string(),
                    (Some(at), None) => format!("ok at {}", at),
                    (Some(at), Some(err)) => format!("failed at {}: {}", at, err),
                };
                println!(
                    "{}\t{}\tapi {}\t{}",
                    t.id,
                    t.url,
                    t.api_version.as_deref().unwrap_or("-"),
                    status
                );
            }
        }
    }
}
