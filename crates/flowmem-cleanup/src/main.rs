//! Operator utility: unlink named flowmem shared-memory segments left
//! behind by a crashed process (spec §6 "Cleanup... an operator utility
//! removes them by name").
//!
//! Intentionally not a CLI framework: this takes one or more segment names
//! as bare positional arguments and unlinks each, printing what happened.
//! CLI front-ends are out of scope (spec §1); this is a thin operator
//! script, not the interface itself.

use std::process::ExitCode;

fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let names: Vec<String> = std::env::args().skip(1).collect();
    if names.is_empty() {
        eprintln!("usage: flowmem-cleanup <segment-name> [segment-name...]");
        eprintln!("  removes named POSIX shared-memory segments (e.g. /flowmem-registry)");
        return ExitCode::FAILURE;
    }

    let mut failed = false;
    for name in &names {
        match flowmem_shm::unlink_segment(name) {
            Ok(()) => tracing::info!(segment = %name, "unlinked"),
            Err(err) => {
                tracing::warn!(segment = %name, error = %err, "failed to unlink");
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
