use super::devices::with_device;
use crate::device::ShootOptions;
use crate::types::{Frame, FrameFormat};
use tauri::command;

/// Shoot a picture; streamed or downloaded image data is returned
#[command]
pub async fn shoot(handle: String, options: Option<ShootOptions>) -> Result<Option<Vec<u8>>, String> {
    let options = match options {
        Some(options) => options,
        None => ShootOptions {
            stream: crate::config::global().capture.stream,
            ..Default::default()
        },
    };
    log::info!("Shooting on device {}", handle);

    match with_device(&handle, move |device| device.shoot(&options)).await {
        Ok(data) => {
            if let Some(data) = &data {
                log::info!("Captured {} bytes", data.len());
            }
            Ok(data)
        }
        Err(e) => {
            log::error!("Failed to shoot: {}", e);
            Err(format!("Failed to shoot: {}", e))
        }
    }
}

/// Grab one live-view frame
#[command]
pub async fn get_live_frame(
    handle: String,
    format: Option<FrameFormat>,
    scaled: Option<bool>,
) -> Result<Frame, String> {
    let format = format.unwrap_or(FrameFormat::Jpeg);
    let frame = with_device(&handle, move |device| device.get_frame(format, scaled)).await?;
    log::debug!(
        "Live frame: {}x{} ({} bytes)",
        frame.width,
        frame.height,
        frame.size_bytes()
    );
    Ok(frame)
}

/// Grab several live-view frames in a row
#[command]
pub async fn get_live_frames(
    handle: String,
    count: u32,
    format: Option<FrameFormat>,
    scaled: Option<bool>,
) -> Result<Vec<Frame>, String> {
    if count == 0 || count > 100 {
        return Err("Invalid frame count (must be 1-100)".to_string());
    }
    let format = format.unwrap_or(FrameFormat::Jpeg);
    with_device(&handle, move |device| {
        device
            .frames(format, scaled)
            .take(count as usize)
            .collect::<crate::errors::Result<Vec<_>>>()
    })
    .await
}
