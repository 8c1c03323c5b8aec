//! Device sessions
//!
//! A [`ChdkDevice`] is one connection to one CHDK camera. It owns its own
//! Lua runtime, in which chdkptp's connection object lives as the global
//! `con`. Code is executed on the camera by handing it to that object.
//! Return values and script messages come back as [`Message`]s.

mod files;
mod frames;
mod shoot;

pub use frames::{parse_ppm_header, Frames};
pub use shoot::ShootOptions;

use crate::config::ChdkConfig;
use crate::errors::{ChdkError, Result};
use crate::lua::{from_lua, LuaContext};
use crate::types::{
    ApiVersion, CaptureMode, DeviceFilter, DeviceInfo, LuaValue, Message, MessageType,
};
use mlua::{Function, IntoLuaMulti, Value};
use std::borrow::Cow;

const LIST_DEVICES: &str = r#"
local devices = {}
local skipped = {}
for i, desc in ipairs(chdk.list_usb_devices()) do
    local lcon = chdku.connection(desc)
    local ok, err = pcall(lcon.connect, lcon)
    if ok then
        local api = lcon.apiver or {}
        table.insert(devices, {
            model_name = lcon.ptpdev.model,
            bus_num = lcon.condev.bus,
            device_num = lcon.condev.dev,
            vendor_id = lcon.condev.vendor_id,
            product_id = lcon.condev.product_id,
            serial_num = lcon.ptpdev.serial_number,
            chdk_api = {major = api.MAJOR or -1, minor = api.MINOR or -1},
        })
        lcon:disconnect()
    else
        table.insert(skipped, tostring(desc.bus) .. ':' .. tostring(desc.dev)
                              .. ' ' .. tostring(type(err) == 'table' and err.msg or err))
    end
end
return {devices = devices, skipped = skipped}
"#;

const CONNECT: &str = r#"
con = chdku.connection({bus = devspec.bus_num, dev = devspec.device_num})
con:connect()
"#;

/// Runs code on the camera. Code and library names arrive as arguments.
const EXEC: &str = r#"
return function(code, libs, wait, clobber)
    local opts = {libs = libs, clobber = clobber}
    if not wait then
        con:exec(code, opts)
        return
    end
    opts.rets = {}
    opts.msgs = {}
    con:execwait(code, opts)
    return opts.rets
end
"#;

/// List all PTP devices on the USB bus, using the process-wide runtime.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    crate::lua::with_global(list_devices_in)
}

/// List all PTP devices visible to `ctx`.
///
/// Every device is connected to briefly to read its identification; devices
/// that refuse the connection are skipped.
pub fn list_devices_in(ctx: &LuaContext) -> Result<Vec<DeviceInfo>> {
    let result = from_lua(&ctx.pexecute(LIST_DEVICES)?)?;

    if let Some(skipped) = result.get("skipped").and_then(LuaValue::as_list) {
        for entry in skipped {
            log::warn!("Skipping device {}", entry.as_str().unwrap_or("?"));
        }
    }

    let devices = match result.get("devices") {
        Some(LuaValue::List(items)) => items
            .iter()
            .map(device_info_from)
            .collect::<Result<Vec<_>>>()?,
        _ => Vec::new(),
    };
    log::debug!("Found {} PTP device(s)", devices.len());
    Ok(devices)
}

/// Devices matching `filter`.
pub fn find_devices(filter: &DeviceFilter) -> Result<Vec<DeviceInfo>> {
    Ok(list_devices()?
        .into_iter()
        .filter(|info| filter.matches(info))
        .collect())
}

fn device_info_from(value: &LuaValue) -> Result<DeviceInfo> {
    let text = |key: &str| -> Option<String> {
        match value.get(key)? {
            LuaValue::String(s) => Some(s.clone()),
            LuaValue::Integer(i) => Some(i.to_string()),
            _ => None,
        }
    };
    let id = |key: &str| -> Result<u16> {
        value
            .get(key)
            .and_then(LuaValue::as_i64)
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| ChdkError::Runtime(format!("device reported an invalid {key}")))
    };
    let api = value.get("chdk_api");
    let api_part = |key: &str| api.and_then(|a| a.get(key)).and_then(LuaValue::as_i64).unwrap_or(-1);

    Ok(DeviceInfo {
        model_name: text("model_name").unwrap_or_default(),
        bus_num: text("bus_num")
            .ok_or_else(|| ChdkError::Runtime("device reported no bus number".to_string()))?,
        device_num: text("device_num")
            .ok_or_else(|| ChdkError::Runtime("device reported no device number".to_string()))?,
        vendor_id: id("vendor_id")?,
        product_id: id("product_id")?,
        serial_num: text("serial_num"),
        chdk_api: ApiVersion {
            major: api_part("major"),
            minor: api_part("minor"),
        },
    })
}

/// How [`ChdkDevice::lua_execute`] runs code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOptions {
    /// Block until the script has finished
    pub wait: bool,
    /// Collect the script's return values (only with `wait`)
    pub do_return: bool,
    /// chdkptp `rlibs` modules to send along with the code
    pub remote_libs: Vec<String>,
    /// Kill a running script instead of failing
    pub clobber: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            wait: true,
            do_return: true,
            remote_libs: Vec::new(),
            clobber: false,
        }
    }
}

impl ExecOptions {
    /// Start the script and return immediately.
    pub fn no_wait() -> Self {
        Self {
            wait: false,
            ..Default::default()
        }
    }

    pub fn with_libs(mut self, libs: &[&str]) -> Self {
        self.remote_libs = libs.iter().map(|l| l.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connected,
    Disconnected,
}

/// A connection to one CHDK camera
pub struct ChdkDevice {
    info: DeviceInfo,
    ctx: LuaContext,
    config: ChdkConfig,
    state: SessionState,
}

impl std::fmt::Debug for ChdkDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChdkDevice")
            .field("info", &self.info)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ChdkDevice {
    /// Connect to a camera with a fresh runtime built from the global
    /// configuration.
    pub fn open(info: &DeviceInfo) -> Result<Self> {
        let config = crate::config::global();
        let ctx = LuaContext::new(&config.runtime)?;
        Self::open_with_context(ctx, info.clone(), config)
    }

    /// Connect to a camera through an already prepared runtime.
    pub fn open_with_context(ctx: LuaContext, info: DeviceInfo, config: ChdkConfig) -> Result<Self> {
        let devspec = ctx.table_from([
            ("bus_num", info.bus_num.as_str()),
            ("device_num", info.device_num.as_str()),
        ])?;
        ctx.set_global("devspec", devspec)?;
        ctx.pexecute(CONNECT)?;
        log::info!("Connected to {} at {}", info.model_name, info.address());

        Ok(Self {
            info,
            ctx,
            config,
            state: SessionState::Connected,
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn config(&self) -> &ChdkConfig {
        &self.config
    }

    /// The runtime this session drives, for calls the session does not wrap.
    pub fn context(&self) -> &LuaContext {
        &self.ctx
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state {
            SessionState::Connected => Ok(()),
            SessionState::Disconnected => Err(ChdkError::NotConnected(self.info.address())),
        }
    }

    pub fn is_connected(&self) -> Result<bool> {
        if self.state == SessionState::Disconnected {
            return Ok(false);
        }
        Ok(self.ctx.call_value("con:is_connected", (), None)?.is_truthy())
    }

    /// Current mode of the camera.
    pub fn mode(&self) -> Result<CaptureMode> {
        let value = self.lua_execute("return get_mode()", &ExecOptions::default())?;
        let is_record = match &value {
            LuaValue::List(items) => items.first().is_some_and(LuaValue::is_truthy),
            other => other.is_truthy(),
        };
        Ok(if is_record {
            CaptureMode::Record
        } else {
            CaptureMode::Play
        })
    }

    /// Switch between play and record mode, polling until the camera
    /// reports the new mode or the configured timeout passes.
    pub fn switch_mode(&self, mode: CaptureMode) -> Result<()> {
        if self.mode()? == mode {
            return Ok(());
        }
        let mode_num = i64::from(mode == CaptureMode::Record);
        let polls = (self.config.connection.mode_switch_timeout_ms / 10).max(1);
        let code = format!(
            "switch_mode_usb({mode_num})
local i = 0
while (get_mode() and 1 or 0) ~= {mode_num} and i < {polls} do
    sleep(10)
    i = i + 1
end
if (get_mode() and 1 or 0) ~= {mode_num} then
    return false, 'switch failed'
end
return true, ''"
        );
        let result = self.lua_execute(&code, &ExecOptions::default())?;
        let status = match &result {
            LuaValue::List(items) => items.first().is_some_and(LuaValue::is_truthy),
            other => other.is_truthy(),
        };
        if !status {
            return Err(ChdkError::ptp("Could not switch mode"));
        }
        log::info!("Switched {} to {} mode", self.info.model_name, mode);
        Ok(())
    }

    /// Iterate over the messages queued on the camera.
    pub fn messages(&self) -> Messages<'_> {
        Messages {
            device: self,
            done: false,
        }
    }

    /// Read every queued message.
    pub fn drain_messages(&self) -> Result<Vec<Message>> {
        self.messages().collect()
    }

    /// Send a message to a script, by default the most recently started one.
    pub fn send_message(&self, message: &str, script_id: Option<i64>) -> Result<()> {
        self.ensure_connected()?;
        match script_id {
            Some(id) => self.ctx.call("con:write_msg", (message, id), None)?,
            None => self.ctx.call("con:write_msg", message, None)?,
        };
        Ok(())
    }

    fn read_message(&self) -> Result<Message> {
        self.ensure_connected()?;
        let raw = self.ctx.call("con:read_msg", (), None)?;
        self.parse_message(&raw)
    }

    fn parse_message(&self, raw: &Value) -> Result<Message> {
        let table = match raw {
            Value::Table(t) => t,
            other => {
                return Err(ChdkError::Runtime(format!(
                    "malformed message of type {}",
                    other.type_name()
                )))
            }
        };
        let msg_type: String = table.get("type")?;
        let subtype: Option<String> = table.get("subtype")?;
        let script_id: Option<i64> = table.get("script_id")?;
        let value: Value = table.get("value")?;

        let value = match (subtype.as_deref(), &value) {
            (Some("table"), Value::String(text)) => {
                self.ctx.parse_serialized(&text.to_string_lossy())?
            }
            _ => from_lua(&value)?,
        };

        Ok(Message {
            msg_type: MessageType::from_wire(&msg_type),
            script_id: script_id.unwrap_or_default(),
            value,
        })
    }

    /// Execute Lua code on the camera.
    ///
    /// Without `wait` this returns [`LuaValue::Nil`] as soon as the script
    /// has started. With `do_return`, a single return value is returned as
    /// is, several become a [`LuaValue::List`] and none gives `Nil`.
    pub fn lua_execute(&self, code: &str, options: &ExecOptions) -> Result<LuaValue> {
        self.ensure_connected()?;
        let code = if options.wait && options.do_return {
            prepare_return(code)?
        } else {
            Cow::Borrowed(code)
        };

        let libs = self
            .ctx
            .sequence(options.remote_libs.iter().map(String::as_str))?;
        let exec: Function = self.ctx.eval(EXEC)?;
        let args = (code.as_ref(), libs, options.wait, options.clobber)
            .into_lua_multi(self.ctx.lua())?;
        let rets = self.ctx.protected_call(&exec, args)?;

        if !options.wait || !options.do_return {
            return Ok(LuaValue::Nil);
        }

        let mut values = Vec::new();
        if let Value::Table(rets) = rets {
            for raw in rets.sequence_values::<Value>() {
                values.push(self.parse_message(&raw?)?.value);
            }
        }
        Ok(match values.len() {
            0 => LuaValue::Nil,
            1 => values.pop().unwrap_or(LuaValue::Nil),
            _ => LuaValue::List(values),
        })
    }

    /// Terminate any running script, optionally discarding its messages.
    pub fn kill_scripts(&self, flush: bool) -> Result<()> {
        self.ensure_connected()?;
        let opts = self.ctx.table_from([
            ("flush_cam_msgs", flush),
            ("flush_host_msgs", flush),
            ("clobber", true),
        ])?;
        self.ctx.call("con:exec", "", Some(opts))?;
        let opts = self.ctx.table_from([("run", false)])?;
        self.ctx.call("con:wait_status", (), Some(opts))?;
        Ok(())
    }

    /// Close the connection. Further operations fail with
    /// [`ChdkError::NotConnected`].
    pub fn disconnect(&mut self) -> Result<()> {
        if self.state == SessionState::Disconnected {
            return Ok(());
        }
        self.state = SessionState::Disconnected;
        self.ctx.call("con:disconnect", (), None)?;
        log::info!("Disconnected from {}", self.info.address());
        Ok(())
    }
}

impl Drop for ChdkDevice {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            log::warn!("Error disconnecting device in drop: {}", e);
        }
    }
}

/// Prepend `return` to single-statement code that has none.
fn prepare_return(code: &str) -> Result<Cow<'_, str>> {
    if code.contains("return") {
        return Ok(Cow::Borrowed(code));
    }
    let head = code.strip_suffix(|_: char| true).unwrap_or(code);
    if !head.contains(';') && !code.contains('\n') {
        Ok(Cow::Owned(format!("return {code}")))
    } else {
        Err(ChdkError::invalid_argument(
            "`do_return` was specified, but the code has no return statement. \
             Change the script so that it returns the value you want.",
        ))
    }
}

/// Messages read from the camera until its queue is empty
pub struct Messages<'a> {
    device: &'a ChdkDevice,
    done: bool,
}

impl Iterator for Messages<'_> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.device.read_message() {
            Ok(msg) if msg.msg_type == MessageType::None => {
                self.done = true;
                None
            }
            Ok(msg) => Some(Ok(msg)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_return_single_statement() {
        assert_eq!(prepare_return("get_mode()").unwrap(), "return get_mode()");
        assert_eq!(prepare_return("1 + 1;").unwrap(), "return 1 + 1;");
    }

    #[test]
    fn test_prepare_return_keeps_explicit_return() {
        let code = "local x = 1\nreturn x";
        assert!(matches!(prepare_return(code).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_prepare_return_rejects_multiple_statements() {
        assert!(prepare_return("a = 1; b = 2").is_err());
        assert!(prepare_return("a = 1\nb = 2").is_err());
    }

    #[test]
    fn test_device_info_from_table() {
        let ctx = LuaContext::bare().unwrap();
        let value = from_lua(
            &ctx.pexecute(
                "return {model_name = 'Canon PowerShot S95', bus_num = '001', device_num = 5,
                         vendor_id = 1193, product_id = 12762,
                         chdk_api = {major = 2, minor = 6}}",
            )
            .unwrap(),
        )
        .unwrap();
        let info = device_info_from(&value).unwrap();
        assert_eq!(info.device_num, "5");
        assert_eq!(info.vendor_id, 0x04a9);
        assert_eq!(info.serial_num, None);
        assert_eq!(info.chdk_api, ApiVersion { major: 2, minor: 6 });
    }

    #[test]
    fn test_device_info_rejects_bad_ids() {
        let ctx = LuaContext::bare().unwrap();
        let value = from_lua(
            &ctx.pexecute("return {bus_num = '001', device_num = '002', vendor_id = -1, product_id = 1}")
                .unwrap(),
        )
        .unwrap();
        assert!(device_info_from(&value).is_err());
    }
}
