//! Device selection and channel opening.
//!
//! Picks the bootloader to talk to:
//! - The in-memory emulator with `--dummy` or `--dummy-flash`
//! - An explicit `--device BUS:ADDR`
//! - The only attached Rockchip device
//! - An interactive choice when several are attached

use {
    crate::{Cli, CliError, config::Config},
    anyhow::{Context, Result},
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    rkflash::{
        BulkChannel, DetectedDevice, DummyConfig, DummyDevice, Flasher, UsbChannel,
        device::detect_devices,
    },
    std::{cmp::Ordering, fs, io::IsTerminal},
};

/// Flasher over whichever channel was selected.
pub(crate) type CliFlasher = Flasher<Box<dyn BulkChannel>>;

/// A `BUS:ADDR` device address as printed by `list-devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeviceAddress {
    pub bus: String,
    pub address: u8,
}

/// Parse `BUS:ADDR`.
pub(crate) fn parse_device_address(s: &str) -> Result<DeviceAddress, String> {
    let (bus, address) = s
        .split_once(':')
        .ok_or_else(|| format!("Invalid device '{s}'. Expected 'BUS:ADDR' (e.g., '1:4')"))?;
    if bus.is_empty() {
        return Err(format!("Invalid device '{s}': empty bus"));
    }
    let address = address
        .parse::<u8>()
        .map_err(|e| format!("Invalid device address '{address}': {e}"))?;
    Ok(DeviceAddress {
        bus: bus.to_string(),
        address,
    })
}

/// Open a flasher for the command line's device selection.
pub(crate) fn open_flasher(cli: &Cli, config: &Config) -> Result<CliFlasher> {
    let channel: Box<dyn BulkChannel> = if cli.dummy || cli.dummy_flash.is_some() {
        Box::new(open_dummy(cli)?)
    } else {
        Box::new(open_usb(cli, config)?)
    };

    let mut flasher = Flasher::new(channel);
    flasher
        .test_unit_ready()
        .context("Device did not answer TEST UNIT READY")?;
    Ok(flasher)
}

fn open_dummy(cli: &Cli) -> Result<DummyDevice> {
    let config = DummyConfig::default();
    let device = match &cli.dummy_flash {
        Some(path) => {
            let data = fs::read(path)
                .with_context(|| format!("Failed to read flash image: {}", path.display()))?;
            debug!("Dummy flash preloaded with {} bytes", data.len());
            DummyDevice::with_flash(config, &data)
        },
        None => DummyDevice::new(config),
    };
    info!("Using in-memory dummy device");
    Ok(device)
}

fn open_usb(cli: &Cli, config: &Config) -> Result<UsbChannel> {
    let mut usb = config.usb_config(cli.timeout);

    if let Some(device) = &cli.device {
        usb.bus = Some(device.bus.clone());
        usb.address = Some(device.address);
    } else {
        let candidates: Vec<DetectedDevice> = detect_devices()
            .into_iter()
            .filter(|d| usb.matches(d.vid, d.pid, &d.bus, d.address))
            .collect();
        let selected = select_device(candidates, cli.non_interactive)?;
        usb.bus = Some(selected.bus);
        usb.address = Some(selected.address);
    }

    Ok(UsbChannel::open(&usb)?)
}

/// Choose among the matching devices.
fn select_device(candidates: Vec<DetectedDevice>, non_interactive: bool) -> Result<DetectedDevice> {
    match candidates.len().cmp(&1) {
        Ordering::Less => Err(rkflash::Error::DeviceNotFound.into()),
        Ordering::Equal => {
            let device = candidates
                .into_iter()
                .next()
                .ok_or(rkflash::Error::DeviceNotFound)?;
            info!("Auto-selected {device}");
            Ok(device)
        },
        Ordering::Greater => {
            if non_interactive {
                return Err(CliError::Usage(format!(
                    "{} devices found; pick one with --device BUS:ADDR",
                    candidates.len()
                ))
                .into());
            }
            ensure_interactive_terminal()?;
            select_device_interactive(candidates)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(
            "Several devices found and no terminal to choose from; use --device BUS:ADDR"
                .to_string(),
        )
        .into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Device selection cancelled".to_string()).into()
            } else {
                CliError::Usage(format!("Device prompt failed: {io_err}")).into()
            }
        },
    }
}

/// Interactive device selection.
fn select_device_interactive(mut devices: Vec<DetectedDevice>) -> Result<DetectedDevice> {
    eprintln!(
        "{} {} Rockchip devices detected",
        style("ℹ").blue(),
        devices.len()
    );

    // Known chips in loader mode first
    devices.sort_by_key(|d| (!d.chip.is_known(), !d.is_loader()));

    let labels: Vec<String> = devices
        .iter()
        .map(|d| {
            if d.chip.is_known() {
                style(d.to_string()).bold().to_string()
            } else {
                d.to_string()
            }
        })
        .collect();

    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = labels
        .into_iter()
        .map(|l| console::truncate_str(&l, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a device")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => devices
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid device index: {index}")),
        None => Err(CliError::Cancelled("Device selection cancelled".to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(bus: &str, address: u8, pid: u16) -> DetectedDevice {
        DetectedDevice::new(bus, address, 0x2207, pid, 0x0201)
    }

    #[test]
    fn test_parse_device_address() {
        assert_eq!(
            parse_device_address("1:4").unwrap(),
            DeviceAddress {
                bus: "1".to_string(),
                address: 4
            }
        );
        assert!(parse_device_address("14").is_err());
        assert!(parse_device_address(":4").is_err());
        assert!(parse_device_address("1:300").is_err());
    }

    #[test]
    fn test_select_none_is_not_found() {
        let err = select_device(Vec::new(), true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<rkflash::Error>(),
            Some(rkflash::Error::DeviceNotFound)
        ));
    }

    #[test]
    fn test_select_single() {
        let selected = select_device(vec![device("2", 7, 0x350a)], true).unwrap();
        assert_eq!(selected.address, 7);
    }

    #[test]
    fn test_select_many_non_interactive_is_usage_error() {
        let err =
            select_device(vec![device("1", 3, 0x350a), device("1", 4, 0x320a)], true).unwrap_err();
        let cli_err = err.downcast_ref::<CliError>().unwrap();
        assert_eq!(cli_err.exit_code(), 2);
        assert!(err.to_string().contains("--device"));
    }
}
