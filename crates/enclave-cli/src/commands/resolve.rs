//! `enclave resolve`: explain routing and resolution under a policy file.

use anyhow::Context;
use enclave_core::{Boundary, PolicyConfig, Resolver};
use enclave_sdk::EntryRegistry;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

pub fn execute(policy_path: &Path, symbols: &[String], route_only: bool, json: bool) -> anyhow::Result<()> {
    let config = PolicyConfig::from_file(policy_path)
        .with_context(|| format!("cannot load policy {}", policy_path.display()))?;

    if route_only {
        let policy = config.into_policy();
        for symbol in symbols {
            let route = policy.route(symbol);
            if json {
                println!("{}", json!({ "symbol": symbol, "route": route.to_string() }));
            } else {
                println!("{} -> {}", symbol, route);
            }
        }
        return Ok(());
    }

    // no work is run, so units link against an empty registry
    let registry = Arc::new(EntryRegistry::new());
    let host: Arc<dyn Resolver> = Arc::new(
        config
            .host_loader(registry.clone())
            .context("cannot open host archives")?,
    );
    let boundary = Boundary::new(config.into_policy(), host, registry).context("cannot build boundary")?;

    let mut failed = 0;
    for symbol in symbols {
        match boundary.explain(symbol) {
            Ok(explanation) if json => println!(
                "{}",
                json!({
                    "symbol": explanation.symbol,
                    "route": explanation.route.to_string(),
                    "loader": explanation.loader.as_u64(),
                    "location": explanation.location,
                    "sha256": explanation.digest,
                })
            ),
            Ok(explanation) => println!("{}", explanation),
            Err(e) => {
                failed += 1;
                let route = boundary.policy().route(symbol);
                if json {
                    println!(
                        "{}",
                        json!({ "symbol": symbol, "route": route.to_string(), "error": e.to_string() })
                    );
                } else {
                    eprintln!("{} -> {}: {}", symbol, route, e);
                }
            }
        }
    }
    boundary.close();

    if failed > 0 {
        anyhow::bail!("{} of {} symbols could not be resolved", failed, symbols.len());
    }
    Ok(())
}
