//! Parameter block and partition table commands.

use anyhow::{Context, Result};
use console::style;
use rkflash::error::SyntaxError;
use rkflash::partition::{self, PartitionSize};
use rkflash::PartitionSpec;
use std::io::{Read, Write};
use std::path::Path;

use super::flash::{open_sink, open_source};
use crate::config::Config;
use crate::device::open_flasher;
use crate::{Cli, status};

/// Read params command implementation.
pub(crate) fn cmd_read_params(cli: &Cli, config: &Config, output: Option<&Path>) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;
    let payload = flasher
        .read_params()
        .context("Failed to read parameter block")?;

    let mut sink = open_sink(output)?;
    sink.write_all(&payload)?;
    sink.flush()?;

    status(
        cli,
        &style("✓").green().to_string(),
        format!("Read {} bytes of parameters", payload.len()),
    );
    Ok(())
}

/// Write params command implementation.
pub(crate) fn cmd_write_params(cli: &Cli, config: &Config, input: Option<&Path>) -> Result<()> {
    let mut payload = Vec::new();
    open_source(input)?
        .read_to_end(&mut payload)
        .context("Failed to read parameter text")?;

    let mut flasher = open_flasher(cli, config)?;
    flasher
        .write_params(&payload)
        .context("Failed to write parameter block")?;

    status(
        cli,
        &style("✓").green().to_string(),
        format!("Wrote {} bytes of parameters", payload.len()),
    );
    Ok(())
}

/// Resolve every partition in the parameter text.
///
/// `total_sectors` is only called when some partition extends to the end.
fn partitions_from_text(
    text: &str,
    total_sectors: impl FnOnce() -> Result<u32>,
) -> Result<Vec<PartitionSpec>> {
    let mtdparts = partition::find_mtdparts(text)
        .ok_or_else(|| rkflash::Error::from(SyntaxError::MissingMtdparts))?;
    let layouts = partition::list(mtdparts).map_err(rkflash::Error::from)?;

    let total = if layouts.iter().any(|l| l.size == PartitionSize::ToEnd) {
        total_sectors()?
    } else {
        0
    };
    layouts
        .into_iter()
        .map(|l| {
            l.into_spec(total)
                .map_err(|e| anyhow::Error::from(rkflash::Error::from(e)))
        })
        .collect()
}

/// Partitions command implementation.
pub(crate) fn cmd_partitions(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;
    let payload = flasher
        .read_params_unchecked()
        .context("Failed to read parameter block")?;
    let text = String::from_utf8_lossy(&payload);

    let parts = partitions_from_text(&text, || {
        Ok(flasher
            .read_flash_info()
            .context("Failed to read flash info")?
            .total_sectors)
    })?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "partitions": parts,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{:<16} {:>10} {:>10}", "NAME", "OFFSET", "SIZE");
    for part in &parts {
        println!(
            "{:<16} {:>#10x} {:>#10x}",
            part.name, part.offset, part.size
        );
    }
    Ok(())
}
