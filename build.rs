use anyhow::Result;
use chrono::TimeZone;
use std::env;
use std::fs;
use std::process::Command;
use vergen_gitcl::{Emitter, GitclBuilder};

fn main() -> Result<()> {
    // Generate git information
    let gitcl = GitclBuilder::default()
        .describe(true, true, Some("[0-9]*"))
        .build()?;

    let gitcl_res = Emitter::default()
        .idempotent()
        .fail_on_error()
        .add_instructions(&gitcl)
        .and_then(|emitter| emitter.emit());

    if let Err(e) = gitcl_res {
        eprintln!("error occurred while generating instructions: {e:?}");
        Emitter::default().idempotent().fail_on_error().emit()?;
    }

    // Add build timestamp
    let now = match env::var("SOURCE_DATE_EPOCH") {
        Ok(val) => chrono::Utc
            .timestamp_opt(val.parse::<i64>()?, 0)
            .single()
            .unwrap_or_else(chrono::Utc::now),
        Err(_) => chrono::Utc::now(),
    };

    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );

    // Get demux library version using cargo metadata
    let demux_version = get_demux_version_from_metadata().unwrap_or_else(|_| {
        read_demux_version_fallback().unwrap_or_else(|_| "unknown".to_string())
    });
    println!("cargo:rustc-env=DEMUX_VERSION={demux_version}");

    // Tell cargo to rerun this build script if the demux Cargo.toml changes
    println!("cargo:rerun-if-changed=demux/Cargo.toml");

    Ok(())
}

/// Version of the `demux` package as resolved by cargo.
fn get_demux_version_from_metadata() -> Result<String> {
    let output = Command::new("cargo")
        .args(["metadata", "--format-version", "1", "--no-deps"])
        .output()?;

    if !output.status.success() {
        anyhow::bail!("cargo metadata failed");
    }

    let metadata: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    metadata["packages"]
        .as_array()
        .into_iter()
        .flatten()
        .find(|package| package["name"].as_str() == Some("demux"))
        .and_then(|package| package["version"].as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("demux package not found in metadata"))
}

/// Reads the version line of demux/Cargo.toml directly.
fn read_demux_version_fallback() -> Result<String> {
    let toml_content = fs::read_to_string("demux/Cargo.toml")?;

    toml_content
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("version"))
        .find_map(|line| line.split_once('='))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .ok_or_else(|| anyhow::anyhow!("Could not find version in demux/Cargo.toml"))
}
