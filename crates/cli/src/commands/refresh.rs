use std::collections::HashMap;
use std::path::Path;
use std::process;

use tracing::info;

use invsync_refresh::{
    Config, FetchSource, FileFetcher, HttpSettings, RefreshReport, Refresher, TowerApiFetcher,
};
use invsync_storage::{
    EntityKind, InventoryStorage, MemoryStorage, StaticCounterparts, StorageError, TargetRecord,
};

use crate::{read_file, Context, OutputFormat};

/// Exit status of a pass that ran but recorded a failure on the target.
const EXIT_REFRESH_FAILED: i32 = 2;

pub(crate) fn cmd_refresh(
    ctx: &Context,
    target: Option<&str>,
    snapshot: Option<&Path>,
    counterparts: Option<&Path>,
) {
    let config = ctx.load_config();
    let target_id = ctx.target_id(target, &config);
    let counterparts = load_counterparts(ctx, counterparts.or(config.counterparts.path.as_deref()));
    let (_lock, storage) = ctx.open_store_for_update();
    let rt = ctx.runtime();

    if let Err(e) = rt.block_on(ensure_registered(&storage, &config, &target_id)) {
        ctx.fail(&e.to_string());
    }

    let policy = config.retirement.policy();
    let result = match (snapshot, config.fetch.source) {
        (Some(path), _) => {
            let refresher = Refresher::new(storage.clone(), FileFetcher::new(path), counterparts)
                .with_retirement(policy);
            rt.block_on(refresher.refresh(&target_id))
        }
        (None, FetchSource::File) => {
            let Some(path) = config.fetch.snapshot_path.clone() else {
                ctx.fail("fetch.source is 'file' but no --snapshot or fetch.snapshot_path given");
            };
            let refresher = Refresher::new(storage.clone(), FileFetcher::new(path), counterparts)
                .with_retirement(policy);
            rt.block_on(refresher.refresh(&target_id))
        }
        (None, FetchSource::Http) => {
            let fetcher = TowerApiFetcher::new(HttpSettings::from_config(&config.fetch));
            let refresher =
                Refresher::new(storage.clone(), fetcher, counterparts).with_retirement(policy);
            rt.block_on(refresher.refresh(&target_id))
        }
    };

    let report = match result {
        Ok(report) => report,
        Err(e) => ctx.fail(&e.to_string()),
    };
    ctx.save_store(&storage);
    print_report(ctx, &report);

    if !report.is_ok() {
        process::exit(EXIT_REFRESH_FAILED);
    }
}

/// Register the configured target on first use so `refresh` works straight
/// from a config file.
async fn ensure_registered(
    storage: &MemoryStorage,
    config: &Config,
    target_id: &str,
) -> Result<(), StorageError> {
    match storage.get_target(target_id).await {
        Ok(_) => Ok(()),
        Err(StorageError::TargetNotFound { .. }) => {
            let Some(configured) = config.target.as_ref().filter(|t| t.id == target_id) else {
                return Err(StorageError::TargetNotFound {
                    target_id: target_id.to_string(),
                });
            };
            let mut target = TargetRecord::new(&configured.id, &configured.url);
            target.userid = configured.userid.clone();
            target.verify_ssl = configured.verify_ssl;
            info!(target_id, "registering target from config");
            storage.register_target(target).await
        }
        Err(e) => Err(e),
    }
}

fn load_counterparts(ctx: &Context, path: Option<&Path>) -> StaticCounterparts {
    let Some(path) = path else {
        return StaticCounterparts::default();
    };
    let content = read_file(path, ctx.output, ctx.quiet);
    match serde_json::from_str::<HashMap<String, String>>(&content) {
        Ok(map) => StaticCounterparts::new(map),
        Err(e) => ctx.fail(&format!(
            "error parsing counterparts in '{}': {}",
            path.display(),
            e
        )),
    }
}

fn print_report(ctx: &Context, report: &RefreshReport) {
    match ctx.output {
        OutputFormat::Json => match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{}", json),
            Err(e) => ctx.fail(&format!("serialization error: {}", e)),
        },
        OutputFormat::Text => {
            if ctx.quiet {
                return;
            }
            match report.failure_reason() {
                None => println!(
                    "refresh of '{}' ok (api {}){}",
                    report.target_id,
                    report.api_version.as_deref().unwrap_or("unknown"),
                    if report.unchanged { ", snapshot unchanged" } else { "" }
                ),
                Some(reason) => println!("refresh of '{}' failed: {}", report.target_id, reason),
            }
            for kind in EntityKind::ALL {
                let s = report.stats_for(kind);
                println!(
                    "  {:<30} created {:>4}  updated {:>4}  unchanged {:>4}  reactivated {:>4}  retired {:>4}  skipped {:>4}",
                    kind.as_str(),
                    s.created,
                    s.updated,
                    s.unchanged,
                    s.reactivated,
                    s.retired,
                    s.skipped
                );
            }
            if !report.warnings.is_empty() {
                println!("warnings:");
                for w in &report.warnings {
                    println!("  - {}", w);
                }
            }
        }
    }
}
