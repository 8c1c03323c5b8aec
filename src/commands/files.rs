use super::devices::with_device;
use crate::types::FileEntry;
use std::path::PathBuf;
use tauri::command;

/// Upload a local file, returning the path it got on the camera
#[command]
pub async fn upload_file(
    handle: String,
    local_path: String,
    remote_path: Option<String>,
    skip_checks: Option<bool>,
) -> Result<String, String> {
    with_device(&handle, move |device| {
        let remote = remote_path.unwrap_or_else(|| device.config().transfer.upload_directory.clone());
        device.upload_file(&PathBuf::from(&local_path), &remote, skip_checks.unwrap_or(false))
    })
    .await
}

/// Upload several local files or directories
#[command]
pub async fn batch_upload(
    handle: String,
    local_paths: Vec<String>,
    remote_path: Option<String>,
) -> Result<(), String> {
    log::info!("Uploading {} paths to device {}", local_paths.len(), handle);
    with_device(&handle, move |device| {
        let remote = remote_path.unwrap_or_else(|| device.config().transfer.upload_directory.clone());
        let locals: Vec<PathBuf> = local_paths.iter().map(PathBuf::from).collect();
        device.batch_upload(&locals, &remote)
    })
    .await
}

/// Download a file; without a local path its content is returned
#[command]
pub async fn download_file(
    handle: String,
    remote_path: String,
    local_path: Option<String>,
) -> Result<Option<Vec<u8>>, String> {
    with_device(&handle, move |device| {
        let local = local_path.map(PathBuf::from);
        device.download_file(&remote_path, local.as_deref())
    })
    .await
}

/// Download several files or directories into a local directory
#[command]
pub async fn batch_download(
    handle: String,
    remote_paths: Vec<String>,
    local_path: String,
    overwrite: Option<bool>,
) -> Result<(), String> {
    log::info!("Downloading {} paths from device {}", remote_paths.len(), handle);
    with_device(&handle, move |device| {
        let overwrite = overwrite.unwrap_or(device.config().transfer.overwrite);
        device.batch_download(&remote_paths, &PathBuf::from(&local_path), overwrite)
    })
    .await
}

#[command]
pub async fn delete_files(handle: String, remote_paths: Vec<String>) -> Result<(), String> {
    with_device(&handle, move |device| device.delete_files(&remote_paths)).await
}

/// List a camera directory
#[command]
pub async fn list_files(handle: String, remote_path: Option<String>) -> Result<Vec<String>, String> {
    with_device(&handle, move |device| {
        let remote = remote_path.unwrap_or_else(|| device.config().transfer.list_directory.clone());
        device.list_files(&remote)
    })
    .await
}

/// List a camera directory with size, mtime and attributes
#[command]
pub async fn list_files_detailed(
    handle: String,
    remote_path: Option<String>,
) -> Result<Vec<FileEntry>, String> {
    with_device(&handle, move |device| {
        let remote = remote_path.unwrap_or_else(|| device.config().transfer.list_directory.clone());
        device.list_files_detailed(&remote)
    })
    .await
}

#[command]
pub async fn make_directory(handle: String, remote_path: String) -> Result<(), String> {
    with_device(&handle, move |device| device.mkdir(&remote_path)).await
}
