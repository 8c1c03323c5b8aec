//! Remote capture.

use super::{ChdkDevice, ExecOptions};
use crate::errors::{ChdkError, Result};
use crate::types::LuaValue;
use crate::util::{join_camera_path, Distance};
use mlua::{Function, IntoLuaMulti, Value};
use serde::{Deserialize, Serialize};

/// Receives the capture chunks of a streamed shot and joins them.
///
/// JPEGs arrive as one chunk list; DNGs are assembled from the header, the
/// thumbnail produced by `chdku.rc_process_dng` and the raw data.
const COLLECT_CAPTURE: &str = r#"
return function(dng, timeout)
    local chunks = {}
    local rcopts = {}
    if dng then
        local dng_info = {lstart = 0, lcount = 0, badpix = 0}
        rcopts.dng_hdr = chdku.rc_handler_store(function(chunk)
            dng_info.hdr = chunk.data
        end)
        rcopts.raw = function(lcon, hdata)
            local status, raw = lcon:capture_get_chunk_pcall(hdata.id)
            if not status then
                return false, raw
            end
            table.insert(chunks, {data = dng_info.hdr})
            local ok, err = chdku.rc_process_dng(dng_info, raw)
            if ok then
                table.insert(chunks, {data = dng_info.thumb})
                table.insert(chunks, raw)
            end
            return ok, err
        end
    else
        rcopts.jpg = chdku.rc_handler_store(chunks)
    end

    local status, err = con:capture_get_data_pcall(rcopts)
    if not status then
        error(err, 0)
    end
    local status, wstatus = con:wait_status_pcall({run = false, timeout = timeout})
    if not status then
        error(wstatus, 0)
    end
    if type(wstatus) == 'table' and wstatus.timeout then
        error({etype = 'timeout', msg = 'timed out waiting for the capture to finish'}, 0)
    end

    local parts = {}
    for i, c in ipairs(chunks) do
        if type(c.data) == 'string' then
            parts[#parts + 1] = c.data
        else
            parts[#parts + 1] = c.data:string()
        end
    end
    return table.concat(parts)
end
"#;

/// Parameters of a shot. `None` keeps the camera's current setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShootOptions {
    /// Tv96
    pub shutter_speed: Option<f64>,
    /// Canon "real" ISO, Sv96
    pub real_iso: Option<f64>,
    /// Canon "market" ISO, Sv96
    pub market_iso: Option<f64>,
    /// Av96
    pub aperture: Option<f64>,
    /// ISO as listed in the Canon UI; needs a mode with manual ISO
    pub isomode: Option<i64>,
    /// `true` swings the ND filter in, `false` out
    pub nd_filter: Option<bool>,
    /// Subject distance
    pub distance: Option<Distance>,
    /// Dump the raw framebuffer as DNG
    pub dng: bool,
    pub raw: bool,
    /// Wait for the capture to complete
    pub wait: bool,
    pub download_after: bool,
    pub remove_after: bool,
    /// Stream the image over USB instead of saving it on the card
    pub stream: bool,
}

impl Default for ShootOptions {
    fn default() -> Self {
        Self {
            shutter_speed: None,
            real_iso: None,
            market_iso: None,
            aperture: None,
            isomode: None,
            nd_filter: None,
            distance: None,
            dng: false,
            raw: false,
            wait: true,
            download_after: false,
            remove_after: false,
            stream: true,
        }
    }
}

impl ShootOptions {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("shutter_speed", self.shutter_speed),
            ("real_iso", self.real_iso),
            ("market_iso", self.market_iso),
            ("aperture", self.aperture),
        ] {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(ChdkError::invalid_argument(format!("`{name}` must be a number")));
            }
        }

        let iso_settings = [
            self.real_iso.is_some(),
            self.market_iso.is_some(),
            self.isomode.is_some(),
        ];
        if iso_settings.iter().filter(|set| **set).count() > 1 {
            return Err(ChdkError::invalid_argument(
                "Only one of `real_iso`, `market_iso` or `isomode` can be set.",
            ));
        }

        if let Some(distance) = &self.distance {
            if !distance.value.is_finite() || distance.value < 0.0 {
                return Err(ChdkError::invalid_argument(
                    "`distance` must be a non-negative length",
                ));
            }
        }

        if !self.wait && (self.stream || self.download_after || self.remove_after) {
            return Err(ChdkError::invalid_argument(
                "Cannot stream, remove/download after when `wait` is `false`",
            ));
        }

        if !self.stream && self.dng && (self.download_after || self.remove_after) {
            return Err(ChdkError::Unsupported(
                "Non-streaming capture with subsequent download/removal is only \
                 supported for JPEG at the moment."
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Option table understood by chdkptp's `rlib_shoot` and `rs_init`.
    pub fn camera_options(&self) -> Vec<(&'static str, LuaValue)> {
        let mut options = Vec::new();
        if let Some(av) = self.aperture {
            options.push(("av", LuaValue::Number(av)));
        }
        if let Some(sv) = self.real_iso {
            options.push(("sv", LuaValue::Number(sv)));
        }
        if let Some(svm) = self.market_iso {
            options.push(("svm", LuaValue::Number(svm)));
        }
        if let Some(isomode) = self.isomode {
            options.push(("isomode", LuaValue::Integer(isomode)));
        }
        if let Some(tv) = self.shutter_speed {
            options.push(("tv", LuaValue::Number(tv)));
        }
        if let Some(nd_in) = self.nd_filter {
            options.push(("nd", LuaValue::Integer(if nd_in { 1 } else { 2 })));
        }
        if let Some(distance) = &self.distance {
            options.push(("sd", LuaValue::Integer(distance.to_mm())));
        }
        if self.dng {
            options.push(("dng", LuaValue::Integer(1)));
        }
        if self.dng || self.raw {
            options.push(("raw", LuaValue::Integer(1)));
        }
        if self.stream {
            let fformat = if self.dng {
                6
            } else if self.raw {
                4
            } else {
                1
            };
            options.push(("fformat", LuaValue::Integer(fformat)));
        } else {
            options.push(("info", LuaValue::Boolean(true)));
        }
        options
    }

    /// [`camera_options`](Self::camera_options) as a Lua table constructor.
    pub fn to_lua_literal(&self) -> String {
        let fields: Vec<String> = self
            .camera_options()
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    LuaValue::Boolean(b) => b.to_string(),
                    LuaValue::Integer(i) => i.to_string(),
                    LuaValue::Number(n) => lua_number(n),
                    _ => "nil".to_string(),
                };
                format!("{key}={value}")
            })
            .collect();
        format!("{{{}}}", fields.join(","))
    }
}

fn lua_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn first_truthy(value: &LuaValue) -> bool {
    match value {
        LuaValue::List(items) => items.first().is_some_and(LuaValue::is_truthy),
        other => other.is_truthy(),
    }
}

/// Error text of a `false, err` style result.
fn failure_message(value: &LuaValue) -> String {
    match value.get("2").and_then(LuaValue::as_str) {
        Some(msg) => msg.to_string(),
        None => format!("{value:?}"),
    }
}

impl ChdkDevice {
    /// Shoot a picture.
    ///
    /// Returns the image data when it was streamed or downloaded after the
    /// shot, `None` otherwise.
    pub fn shoot(&self, options: &ShootOptions) -> Result<Option<Vec<u8>>> {
        self.ensure_connected()?;
        options.validate()?;
        let table = options.to_lua_literal();
        log::info!("Shooting on {} with {}", self.info.model_name, table);

        if options.stream {
            self.shoot_streaming(&table, options.dng).map(Some)
        } else {
            self.shoot_to_card(&table, options)
        }
    }

    fn shoot_to_card(&self, table: &str, options: &ShootOptions) -> Result<Option<Vec<u8>>> {
        if !options.wait {
            self.lua_execute(
                &format!("rlib_shoot({table})"),
                &ExecOptions::no_wait().with_libs(&["rlib_shoot"]),
            )?;
            return Ok(None);
        }

        let status = self.lua_execute(
            &format!("return rlib_shoot({table})"),
            &ExecOptions::default().with_libs(&["serialize_msgs", "rlib_shoot"]),
        )?;
        let dir = status.get("dir").and_then(LuaValue::as_str);
        let exp = status.get("exp").and_then(LuaValue::as_i64);
        let (dir, exp) = match (dir, exp) {
            (Some(dir), Some(exp)) => (dir, exp),
            _ => {
                return Err(ChdkError::ptp(format!(
                    "Shooting failed: {}",
                    failure_message(&status)
                )))
            }
        };
        let image_path = join_camera_path(dir, &format!("IMG_{exp:04}.JPG"));
        log::debug!("Shot saved as {}", image_path);

        let mut data = None;
        if options.download_after {
            data = self.download_file(&image_path, None)?;
        }
        if options.remove_after {
            self.delete_files(&[image_path.as_str()])?;
        }
        Ok(data)
    }

    fn shoot_streaming(&self, table: &str, dng: bool) -> Result<Vec<u8>> {
        let init = self.lua_execute(
            &format!("return rs_init({table})"),
            &ExecOptions::default().with_libs(&["rs_shoot_init"]),
        )?;
        if !first_truthy(&init) {
            return Err(ChdkError::ptp(format!(
                "Could not initialize remote capture: {}",
                failure_message(&init)
            )));
        }
        self.lua_execute(
            &format!("rs_shoot({table})"),
            &ExecOptions::no_wait().with_libs(&["rs_shoot"]),
        )?;

        let result = self.collect_capture(dng);
        let reset = self.lua_execute(
            "init_usb_capture(0)",
            &ExecOptions {
                do_return: false,
                ..Default::default()
            },
        );
        match (result, reset) {
            (Ok(data), Ok(_)) => Ok(data),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), reset) => {
                if let Err(reset_err) = reset {
                    log::warn!("Failed to reset remote capture: {}", reset_err);
                }
                Err(e)
            }
        }
    }

    fn collect_capture(&self, dng: bool) -> Result<Vec<u8>> {
        let collect: Function = self.ctx.eval(COLLECT_CAPTURE)?;
        let args = (dng, self.config.capture.capture_timeout_ms).into_lua_multi(self.ctx.lua())?;
        match self.ctx.protected_call(&collect, args)? {
            Value::String(data) => {
                let data = data.as_bytes().to_vec();
                log::debug!("Received {} bytes of capture data", data.len());
                Ok(data)
            }
            other => Err(ChdkError::Runtime(format!(
                "capture returned {} instead of image data",
                other.type_name()
            ))),
        }
    }
}
