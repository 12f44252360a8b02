//! Device command implementations: flash, IDB and RAM transfers, reboot, info.

use anyhow::{Context, Result};
use console::style;
use rkflash::{Region, ResetMode, TransferRequest, TransferSummary};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::config::Config;
use crate::device::{CliFlasher, open_flasher};
use crate::{Cli, CliError, FlashTarget, Span, progress_bar, status};

/// Output file, or stdout when none is given.
pub(crate) fn open_sink(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        },
        None => Ok(Box::new(BufWriter::new(io::stdout().lock()))),
    }
}

/// Input file, or stdin when none is given.
pub(crate) fn open_source(input: Option<&Path>) -> Result<Box<dyn Read>> {
    match input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open input file: {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        },
        None => Ok(Box::new(io::stdin().lock())),
    }
}

/// Hex bytes separated by spaces.
fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Flash request for a sector range or a named partition.
fn flash_request(
    cli: &Cli,
    flasher: &mut CliFlasher,
    target: &FlashTarget,
) -> Result<TransferRequest> {
    if let Some(name) = &target.partition {
        let spec = flasher
            .partition(name)
            .with_context(|| format!("Failed to resolve partition '{name}'"))?;
        status(
            cli,
            "ℹ",
            format!(
                "Partition {}: offset {:#x}, size {:#x} sectors",
                spec.name, spec.offset, spec.size
            ),
        );
        return Ok(TransferRequest::new(Region::Flash, spec.offset, spec.size)?);
    }

    match (target.offset, target.size) {
        (Some(offset), Some(size)) => Ok(TransferRequest::new(Region::Flash, offset, size)?),
        _ => Err(
            CliError::Usage("Give OFFSET and SIZE, or --partition NAME".to_string()).into(),
        ),
    }
}

/// Read `req` into the output, with a progress bar.
fn read_to(
    cli: &Cli,
    flasher: &mut CliFlasher,
    req: &TransferRequest,
    output: Option<&Path>,
) -> Result<()> {
    let mut sink = open_sink(output)?;
    let pb = progress_bar(cli, req.length, req.region.unit_name());

    let bytes = flasher
        .read_region(req, &mut sink, |done, _| pb.set_position(u64::from(done)))
        .with_context(|| {
            format!(
                "Failed to read {} {:#x}+{:#x}",
                req.region, req.offset, req.length
            )
        })?;
    pb.finish_and_clear();

    status(
        cli,
        &style("✓").green().to_string(),
        format!("Read {bytes} bytes from {} at {:#x}", req.region, req.offset),
    );
    Ok(())
}

/// Write `req` from the input, with a progress bar.
fn write_from(
    cli: &Cli,
    flasher: &mut CliFlasher,
    req: &TransferRequest,
    input: Option<&Path>,
) -> Result<()> {
    let mut source = open_source(input)?;
    let pb = progress_bar(cli, req.length, req.region.unit_name());

    let summary = flasher
        .write_region(req, &mut source, |done, _| pb.set_position(u64::from(done)))
        .with_context(|| {
            format!(
                "Failed to write {} {:#x}+{:#x}",
                req.region, req.offset, req.length
            )
        })?;
    pb.finish_and_clear();

    report_write(cli, req, &summary);
    Ok(())
}

fn report_write(cli: &Cli, req: &TransferRequest, summary: &TransferSummary) {
    let unit = req.region.unit_name();
    if summary.truncated {
        status(
            cli,
            &style("⚠").yellow().to_string(),
            format!(
                "Input ended early: {} bytes written as {} {unit}s of {} requested",
                summary.bytes, summary.units, req.length
            ),
        );
    } else {
        status(
            cli,
            &style("✓").green().to_string(),
            format!("Wrote {} {unit}s to {} at {:#x}", summary.units, req.region, req.offset),
        );
    }
}

/// Reboot command implementation.
pub(crate) fn cmd_reboot(cli: &Cli, config: &Config, maskrom: bool) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;
    let mode = if maskrom {
        ResetMode::Maskrom
    } else {
        ResetMode::Normal
    };
    flasher.reset(mode).context("Failed to reset device")?;
    status(cli, "🔄", format!("Rebooting device ({mode:?})"));
    Ok(())
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;
    let flash_id = flasher.read_flash_id().context("Failed to read flash ID")?;
    let flash_info = flasher
        .read_flash_info()
        .context("Failed to read flash info")?;
    let chip_info = flasher.read_chip_info().context("Failed to read chip info")?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "flash_id": hex(&flash_id),
                "flash_info": flash_info,
                "manufacturer": flash_info.manufacturer(),
                "chip_info": hex(&chip_info),
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Flash ID: {}", hex(&flash_id));
    println!("{flash_info}");
    println!("Chip info: {}", hex(&chip_info));
    Ok(())
}

/// Read command implementation.
pub(crate) fn cmd_read(
    cli: &Cli,
    config: &Config,
    target: &FlashTarget,
    output: Option<&Path>,
) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;
    let req = flash_request(cli, &mut flasher, target)?;
    read_to(cli, &mut flasher, &req, output)
}

/// Write command implementation.
pub(crate) fn cmd_write(
    cli: &Cli,
    config: &Config,
    target: &FlashTarget,
    input: Option<&Path>,
) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;
    let req = flash_request(cli, &mut flasher, target)?;
    write_from(cli, &mut flasher, &req, input)
}

/// Erase command implementation.
pub(crate) fn cmd_erase(cli: &Cli, config: &Config, target: &FlashTarget) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;
    let req = flash_request(cli, &mut flasher, target)?;
    let pb = progress_bar(cli, req.length, req.region.unit_name());

    let summary = flasher
        .erase_region(&req, |done, _| pb.set_position(u64::from(done)))
        .with_context(|| format!("Failed to erase flash {:#x}+{:#x}", req.offset, req.length))?;
    pb.finish_and_clear();

    status(
        cli,
        &style("✓").green().to_string(),
        format!("Erased {} sectors at {:#x}", summary.units, req.offset),
    );
    Ok(())
}

/// Read IDB command implementation.
pub(crate) fn cmd_read_idb(
    cli: &Cli,
    config: &Config,
    span: Span,
    output: Option<&Path>,
) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;
    let req = TransferRequest::new(Region::Idb, span.offset, span.size)?;
    read_to(cli, &mut flasher, &req, output)
}

/// Write IDB command implementation.
pub(crate) fn cmd_write_idb(
    cli: &Cli,
    config: &Config,
    span: Span,
    input: Option<&Path>,
) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;
    let req = TransferRequest::new(Region::Idb, span.offset, span.size)?;
    write_from(cli, &mut flasher, &req, input)
}

/// Read RAM command implementation.
pub(crate) fn cmd_read_mem(
    cli: &Cli,
    config: &Config,
    span: Span,
    output: Option<&Path>,
) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;
    let req = TransferRequest::new(Region::Sdram, span.offset, span.size)?;
    read_to(cli, &mut flasher, &req, output)
}

/// Write RAM command implementation.
pub(crate) fn cmd_write_mem(
    cli: &Cli,
    config: &Config,
    span: Span,
    input: Option<&Path>,
) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;
    let req = TransferRequest::new(Region::Sdram, span.offset, span.size)?;
    write_from(cli, &mut flasher, &req, input)
}

/// Execute RAM command implementation.
pub(crate) fn cmd_exec_mem(cli: &Cli, config: &Config, address: u32) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;
    flasher
        .execute_sdram(address)
        .with_context(|| format!("Failed to execute code at {address:#010x}"))?;
    status(cli, "🚀", format!("Jumped to {address:#010x}"));
    Ok(())
}
