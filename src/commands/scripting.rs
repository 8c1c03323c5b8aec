use super::devices::with_device;
use crate::device::ExecOptions;
use crate::types::{LuaValue, Message};
use tauri::command;

/// Execute Lua code on the camera
#[command]
pub async fn execute_lua(
    handle: String,
    code: String,
    wait: Option<bool>,
    do_return: Option<bool>,
    remote_libs: Option<Vec<String>>,
    clobber: Option<bool>,
) -> Result<LuaValue, String> {
    let defaults = ExecOptions::default();
    let options = ExecOptions {
        wait: wait.unwrap_or(defaults.wait),
        do_return: do_return.unwrap_or(defaults.do_return),
        remote_libs: remote_libs.unwrap_or_default(),
        clobber: clobber.unwrap_or(defaults.clobber),
    };
    log::debug!("Executing on {}: {}", handle, code);
    with_device(&handle, move |device| device.lua_execute(&code, &options)).await
}

/// Read all messages queued by camera scripts
#[command]
pub async fn read_messages(handle: String) -> Result<Vec<Message>, String> {
    with_device(&handle, |device| device.drain_messages()).await
}

/// Send a message to a running script
#[command]
pub async fn send_script_message(
    handle: String,
    message: String,
    script_id: Option<i64>,
) -> Result<(), String> {
    with_device(&handle, move |device| device.send_message(&message, script_id)).await
}

/// Terminate running scripts
#[command]
pub async fn kill_scripts(handle: String, flush: Option<bool>) -> Result<(), String> {
    with_device(&handle, move |device| device.kill_scripts(flush.unwrap_or(true))).await
}
