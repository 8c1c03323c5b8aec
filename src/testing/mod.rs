//! Testing utilities for chdkptp
//!
//! Provides an emulated camera that runs inside a bare Lua runtime, so device
//! sessions can be exercised offline without chdkptp or hardware. The
//! emulation keeps its state in the Lua global `mock`; tests inspect and
//! tweak it with [`mock_state`] and [`LuaContext::execute`].

use crate::config::ChdkConfig;
use crate::device::ChdkDevice;
use crate::errors::Result;
use crate::lua::{from_lua, LuaContext};
use crate::types::{ApiVersion, DeviceInfo, LuaValue};

const MOCK_CAMERA: &str = include_str!("mock_camera.lua");

/// Bare runtime with the emulated chdkptp connection installed.
pub fn mock_context() -> Result<LuaContext> {
    let ctx = LuaContext::bare()?;
    ctx.lua().load(MOCK_CAMERA).set_name("mock_camera").exec()?;
    ctx.install_log_bridge()?;
    ctx.execute("con = chdku.connection()")?;
    Ok(ctx)
}

/// Identification of the single emulated camera
pub fn mock_device_info() -> DeviceInfo {
    DeviceInfo {
        model_name: "Canon PowerShot A2200".to_string(),
        bus_num: "001".to_string(),
        device_num: "004".to_string(),
        vendor_id: 0x04a9,
        product_id: 0x3218,
        serial_num: Some("MOCK0001".to_string()),
        chdk_api: ApiVersion { major: 2, minor: 6 },
    }
}

/// A session connected to the emulated camera.
pub fn mock_device() -> Result<ChdkDevice> {
    mock_device_with_config(ChdkConfig::default())
}

pub fn mock_device_with_config(config: ChdkConfig) -> Result<ChdkDevice> {
    ChdkDevice::open_with_context(mock_context()?, mock_device_info(), config)
}

/// Evaluate an expression against the emulated camera's state,
/// e.g. `mock.record` or `mock.files['A/test.txt']`.
pub fn mock_state(ctx: &LuaContext, expr: &str) -> Result<LuaValue> {
    from_lua(&ctx.peval(expr)?)
}
