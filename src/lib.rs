//! chdkptp: CHDK camera control for Rust and Tauri applications
//!
//! This crate drives CHDK-enabled Canon cameras through chdkptp, running
//! chdkptp's Lua code in an embedded Lua 5.2 runtime and converting what it
//! returns into native data.
//!
//! # Features
//! - Device enumeration and sessions over PTP/USB
//! - Lua execution on the camera with structured return values and messages
//! - File upload, download, listing and deletion
//! - Live view frames as PPM, JPEG or PNG
//! - Remote capture, streamed as JPEG/DNG or saved to the card
//!
//! # Usage
//! Add this to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! chdkptp = "0.2"
//! tauri = { version = "2.0", features = ["protocol-asset"] }
//! ```
//!
//! Then in your Tauri app:
//! ```rust,ignore
//! fn main() {
//!     tauri::Builder::default()
//!         .plugin(chdkptp::init())
//!         .run(tauri::generate_context!())
//!         .expect("error while running tauri application");
//! }
//! ```
//!
//! Or directly:
//! ```rust,ignore
//! let devices = chdkptp::list_devices()?;
//! let device = chdkptp::ChdkDevice::open(&devices[0])?;
//! let mode = device.lua_execute("get_mode()", &Default::default())?;
//! ```
pub mod commands;
pub mod config;
pub mod device;
pub mod errors;
pub mod lua;
pub mod types;
pub mod util;

// Testing utilities - emulated camera for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::ChdkConfig;
pub use device::{find_devices, list_devices, ChdkDevice, ExecOptions, ShootOptions};
pub use errors::ChdkError;
pub use lua::LuaContext;
pub use types::{
    CaptureMode, DeviceFilter, DeviceInfo, FileEntry, Frame, FrameFormat, LuaValue, Message,
    MessageType,
};

use tauri::{
    plugin::{Builder, TauriPlugin},
    Runtime,
};

/// Initialize the chdkptp plugin with all commands
pub fn init<R: Runtime>() -> TauriPlugin<R> {
    Builder::new("chdkptp")
        .invoke_handler(tauri::generate_handler![
            // Device commands
            commands::devices::list_chdk_devices,
            commands::devices::find_chdk_devices,
            commands::devices::connect_device,
            commands::devices::disconnect_device,
            commands::devices::list_connected_devices,
            commands::devices::is_device_connected,
            commands::devices::get_device_mode,
            commands::devices::switch_device_mode,
            commands::devices::reconnect_device,
            commands::devices::reboot_device,
            // Scripting commands
            commands::scripting::execute_lua,
            commands::scripting::read_messages,
            commands::scripting::send_script_message,
            commands::scripting::kill_scripts,
            // File commands
            commands::files::upload_file,
            commands::files::batch_upload,
            commands::files::download_file,
            commands::files::batch_download,
            commands::files::delete_files,
            commands::files::list_files,
            commands::files::list_files_detailed,
            commands::files::make_directory,
            // Capture commands
            commands::capture::shoot,
            commands::capture::get_live_frame,
            commands::capture::get_live_frames,
            // Configuration commands
            commands::config::get_config,
            commands::config::update_config,
            commands::config::reset_config,
            commands::config::get_transfer_config,
            commands::config::get_capture_config,
        ])
        .build()
}

/// Initialize logging for chdkptp
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "chdkptp=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        lua_version: "Lua 5.2".to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub lua_version: String,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "chdkptp");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_embedded_runtime_version() {
        let ctx = LuaContext::bare().unwrap();
        let version: String = ctx.eval("return _VERSION").unwrap();
        assert_eq!(version, get_info().lua_version);
    }
}
