use anyhow::Result;
use huskycat_commons::ExitCode;
use huskycat_core::mode::Mode;
use huskycat_core::registry::ToolRegistry;
use huskycat_core::router::route;
use huskycat_core::store::RunStore;

use crate::cli::context::StartupContext;

/// Print detected mode, per-tool routing verdicts, and storage locations.
pub fn run(explicit_mode: Option<Mode>) -> Result<ExitCode> {
    let context = StartupContext::resolve(explicit_mode, false)?;
    let registry = ToolRegistry::builtin()?;
    let host = context.host_state();
    let store = RunStore::new(context.repo.runs_dir());

    println!("mode:        {}", context.mode.as_str());
    println!("repo root:   {}", context.repo.root.display());
    println!(
        "bundle cache: {}",
        context
            .bundle_cache
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!("run store:   {}", store.root().display());
    println!(
        "sandbox:     {} ({})",
        host.sandbox.runtime,
        if host.sandbox_reachable {
            "reachable"
        } else {
            "not reachable"
        }
    );

    println!("\ntools:");
    for level in registry.levels() {
        for name in level {
            if let Some(tool) = registry.lookup(name) {
                let verdict = route(tool, &host);
                println!("  {name:<14} {:<20} {}", verdict.label(), tool.description);
            }
        }
    }

    match store.read_last_run() {
        Some(pointer) => println!(
            "\nlast run:    {} ({}) at {}",
            pointer.run_id,
            if pointer.success { "ok" } else { "failed" },
            pointer.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("\nlast run:    none"),
    }

    Ok(ExitCode::Success)
}
