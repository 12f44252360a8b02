//! Firmware image command implementations.

use anyhow::{Context, Result};
use console::style;
use rkflash::Container;
use rkflash::image::unpack::unpack;
use rkflash::image::wrap::{self, WrapKind};
use std::fs;
use std::path::Path;

use crate::{Cli, status, use_fancy_output};

/// Unpack command implementation.
pub(crate) fn cmd_unpack(cli: &Cli, image: &Path, out_dir: &Path) -> Result<()> {
    status(cli, "📦", format!("Loading {}", image.display()));

    let (container, data) = Container::from_file(image)
        .with_context(|| format!("Failed to load firmware image: {}", image.display()))?;
    let written = unpack(&container, &data, out_dir)
        .with_context(|| format!("Failed to unpack into {}", out_dir.display()))?;

    if !cli.quiet {
        for path in &written {
            if use_fancy_output() {
                eprintln!("    {} {}", style("•").dim(), path.display());
            } else {
                eprintln!("    {}", path.display());
            }
        }
    }
    status(
        cli,
        &style("✓").green().to_string(),
        format!(
            "Extracted {} files from {} image",
            written.len(),
            container.kind()
        ),
    );
    Ok(())
}

/// Wrap command implementation.
pub(crate) fn cmd_wrap(
    cli: &Cli,
    kernel: bool,
    param: bool,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let kind = if kernel {
        WrapKind::Kernel
    } else if param {
        WrapKind::Parameter
    } else {
        WrapKind::Plain
    };

    let payload =
        fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let wrapped = wrap::wrap(kind, &payload)?;
    fs::write(output, &wrapped)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    status(
        cli,
        &style("✓").green().to_string(),
        format!(
            "Wrapped {} bytes as {kind} image ({} bytes)",
            payload.len(),
            wrapped.len()
        ),
    );
    Ok(())
}
