use crate::config::{self, ChdkConfig};
use tauri::command;

/// Get the current configuration
#[command]
pub async fn get_config() -> Result<ChdkConfig, String> {
    Ok(config::global())
}

/// Update configuration
///
/// Sessions opened afterwards use the new values.
#[command]
pub async fn update_config(new_config: ChdkConfig) -> Result<(), String> {
    config::set_global(new_config.clone()).map_err(|e| e.to_string())?;

    // Save to file
    new_config
        .save_to_file(ChdkConfig::default_path())
        .map_err(|e| e.to_string())?;

    Ok(())
}

/// Reset configuration to defaults
#[command]
pub async fn reset_config() -> Result<ChdkConfig, String> {
    let default_config = ChdkConfig::default();
    config::set_global(default_config.clone()).map_err(|e| e.to_string())?;

    default_config
        .save_to_file(ChdkConfig::default_path())
        .map_err(|e| e.to_string())?;

    Ok(default_config)
}

#[command]
pub async fn get_transfer_config() -> Result<config::TransferConfig, String> {
    Ok(config::global().transfer)
}

#[command]
pub async fn get_capture_config() -> Result<config::CaptureConfig, String> {
    Ok(config::global().capture)
}
