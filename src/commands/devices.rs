use crate::device::{self, ChdkDevice};
use crate::types::{CaptureMode, DeviceFilter, DeviceInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex};
use tauri::command;
use tokio::sync::RwLock;

// Open sessions by handle; the map is async-locked, each session sync-locked
lazy_static::lazy_static! {
    static ref DEVICE_REGISTRY: Arc<RwLock<HashMap<String, RegisteredDevice>>> = Arc::new(RwLock::new(HashMap::new()));
}

// Identification is copied out of the session at registration
struct RegisteredDevice {
    info: DeviceInfo,
    session: Arc<SyncMutex<ChdkDevice>>,
}

/// An open session as reported to the frontend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedDevice {
    pub handle: String,
    pub info: DeviceInfo,
}

/// Put an open session into the registry and return its handle.
pub async fn register_device(device: ChdkDevice) -> String {
    let handle = uuid::Uuid::new_v4().to_string();
    log::debug!("Registering {} as {}", device.info().address(), handle);
    let entry = RegisteredDevice {
        info: device.info().clone(),
        session: Arc::new(SyncMutex::new(device)),
    };
    let mut registry = DEVICE_REGISTRY.write().await;
    registry.insert(handle.clone(), entry);
    handle
}

async fn get_device(handle: &str) -> Result<Arc<SyncMutex<ChdkDevice>>, String> {
    let registry = DEVICE_REGISTRY.read().await;
    registry
        .get(handle)
        .map(|entry| Arc::clone(&entry.session))
        .ok_or_else(|| format!("No open device with handle {}", handle))
}

/// Run blocking work against a registered session.
pub(crate) async fn with_device<T, F>(handle: &str, f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&mut ChdkDevice) -> crate::errors::Result<T> + Send + 'static,
{
    let device = get_device(handle).await?;
    tokio::task::spawn_blocking(move || {
        let mut guard = device.lock().map_err(|_| "Mutex poisoned".to_string())?;
        f(&mut *guard).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("Task join error: {}", e))?
}

/// List CHDK cameras on the USB bus
#[command]
pub async fn list_chdk_devices() -> Result<Vec<DeviceInfo>, String> {
    let result = tokio::task::spawn_blocking(device::list_devices)
        .await
        .map_err(|e| format!("Task join error: {}", e))?;
    match result {
        Ok(devices) => {
            log::info!("Found {} CHDK devices", devices.len());
            for info in &devices {
                log::debug!(
                    "Device: {} at {} (CHDK API {})",
                    info.model_name,
                    info.address(),
                    info.chdk_api
                );
            }
            Ok(devices)
        }
        Err(e) => {
            log::error!("Failed to list devices: {}", e);
            Err(format!("Failed to list devices: {}", e))
        }
    }
}

/// List CHDK cameras matching a filter
#[command]
pub async fn find_chdk_devices(filter: DeviceFilter) -> Result<Vec<DeviceInfo>, String> {
    let devices = list_chdk_devices().await?;
    Ok(devices
        .into_iter()
        .filter(|info| filter.matches(info))
        .collect())
}

/// Open a session to a camera, returning its handle
#[command]
pub async fn connect_device(info: DeviceInfo) -> Result<String, String> {
    log::info!("Connecting to {} at {}", info.model_name, info.address());
    let device = tokio::task::spawn_blocking(move || ChdkDevice::open(&info))
        .await
        .map_err(|e| format!("Task join error: {}", e))?
        .map_err(|e| {
            log::error!("Failed to connect: {}", e);
            format!("Failed to connect: {}", e)
        })?;
    Ok(register_device(device).await)
}

/// Close a session and remove it from the registry
#[command]
pub async fn disconnect_device(handle: String) -> Result<(), String> {
    let device = {
        let mut registry = DEVICE_REGISTRY.write().await;
        registry
            .remove(&handle)
            .ok_or_else(|| format!("No open device with handle {}", handle))?
            .session
    };
    tokio::task::spawn_blocking(move || {
        let mut guard = device.lock().map_err(|_| "Mutex poisoned".to_string())?;
        guard.disconnect().map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("Task join error: {}", e))??;
    log::info!("Closed device {}", handle);
    Ok(())
}

/// List open sessions
#[command]
pub async fn list_connected_devices() -> Result<Vec<ConnectedDevice>, String> {
    let registry = DEVICE_REGISTRY.read().await;
    Ok(registry
        .iter()
        .map(|(handle, entry)| ConnectedDevice {
            handle: handle.clone(),
            info: entry.info.clone(),
        })
        .collect())
}

/// Check whether a session's camera still answers
#[command]
pub async fn is_device_connected(handle: String) -> Result<bool, String> {
    with_device(&handle, |device| device.is_connected()).await
}

#[command]
pub async fn get_device_mode(handle: String) -> Result<CaptureMode, String> {
    with_device(&handle, |device| device.mode()).await
}

/// Switch between play and record mode
#[command]
pub async fn switch_device_mode(handle: String, mode: CaptureMode) -> Result<(), String> {
    log::info!("Switching device {} to {} mode", handle, mode);
    with_device(&handle, move |device| device.switch_mode(mode)).await
}

#[command]
pub async fn reconnect_device(handle: String, wait_ms: Option<u64>) -> Result<(), String> {
    with_device(&handle, move |device| device.reconnect(wait_ms)).await
}

/// Reboot the camera, optionally into a boot file on its card
#[command]
pub async fn reboot_device(
    handle: String,
    wait_ms: Option<u64>,
    bootfile: Option<String>,
) -> Result<(), String> {
    log::info!("Rebooting device {}", handle);
    with_device(&handle, move |device| device.reboot(wait_ms, bootfile.as_deref())).await
}
