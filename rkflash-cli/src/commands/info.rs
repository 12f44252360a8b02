//! Image inspection and device listing command implementations.

use {
    anyhow::{Context, Result},
    console::style,
    rkflash::{Container, DetectedDevice, device::detect_devices},
    std::path::Path,
};

/// List devices command implementation.
pub(crate) fn cmd_list_devices(json: bool) -> Result<()> {
    let detected = detect_devices();

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "devices": detected,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Rockchip devices").bold().underlined());
    if detected.is_empty() {
        eprintln!("  {}", style("No devices found").dim());
        return Ok(());
    }

    for device in &detected {
        eprintln!("  {} {}", style("•").green(), device_line(device));
    }
    Ok(())
}

fn device_line(device: &DetectedDevice) -> String {
    let address = style(format!("{}:{}", device.bus, device.address)).cyan();
    let chip = if device.chip.is_known() {
        style(device.chip.to_string()).yellow().to_string()
    } else {
        style(device.chip.to_string()).dim().to_string()
    };
    format!(
        "{address} {:04x}:{:04x} {chip} ({})",
        device.vid, device.pid, device.mode
    )
}

/// Inspect command implementation.
pub(crate) fn cmd_inspect(image: &Path, json: bool) -> Result<()> {
    let (container, data) = Container::from_file(image)
        .with_context(|| format!("Failed to load firmware image: {}", image.display()))?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "format": container.kind(),
                "size": data.len(),
                "entries": container.entries(),
                "image": container,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{container}");
    Ok(())
}
