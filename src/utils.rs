use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::capture::source::CaptureSource;

/// Names of all devices the source enumerates, in ordinal order.
pub fn device_names(source: &dyn CaptureSource) -> Vec<String> {
    (0..source.device_count())
        .filter_map(|i| source.device_name(i))
        .collect()
}

/// Names of the display modes supported by the device at `device_index`.
pub fn display_mode_names(source: &dyn CaptureSource, device_index: usize) -> Result<Vec<String>> {
    let input = source.open_input(device_index)?;
    Ok(input
        .display_modes()
        .into_iter()
        .map(|mode| mode.name)
        .collect())
}

/// Pick the first enumerated device that has input capability.
pub fn auto_select_device(source: &dyn CaptureSource) -> Result<usize> {
    for index in 0..source.device_count() {
        if source.open_input(index).is_ok() {
            if let Some(name) = source.device_name(index) {
                info!("Found capture device: {} (index {})", name, index);
            }
            return Ok(index);
        }
    }

    Err(eyre!("No suitable capture device found"))
}
