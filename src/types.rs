//! Data types shared by the device session, the interop layer and the
//! Tauri commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A value produced by the embedded Lua runtime, converted to native data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LuaValue {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    /// Table whose keys are exactly `1..n`
    List(Vec<LuaValue>),
    Table(BTreeMap<String, LuaValue>),
    /// String that is not valid UTF-8
    Bytes(Vec<u8>),
    /// Functions, userdata and threads, carried by type name only
    Opaque(String),
}

impl LuaValue {
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// Lua truthiness: everything except `nil` and `false` is true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            LuaValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            LuaValue::Integer(i) => Some(*i),
            LuaValue::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            LuaValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LuaValue::Integer(i) => Some(*i as f64),
            LuaValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LuaValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Raw bytes of a string value, whether or not it is valid UTF-8.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            LuaValue::String(s) => Some(s.as_bytes()),
            LuaValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[LuaValue]> {
        match self {
            LuaValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&BTreeMap<String, LuaValue>> {
        match self {
            LuaValue::Table(map) => Some(map),
            _ => None,
        }
    }

    /// Field lookup on a table value; list values are indexed from "1".
    pub fn get(&self, key: &str) -> Option<&LuaValue> {
        match self {
            LuaValue::Table(map) => map.get(key),
            LuaValue::List(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| i.checked_sub(1))
                .and_then(|i| items.get(i)),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            LuaValue::Nil => "nil",
            LuaValue::Boolean(_) => "boolean",
            LuaValue::Integer(_) | LuaValue::Number(_) => "number",
            LuaValue::String(_) | LuaValue::Bytes(_) => "string",
            LuaValue::List(_) | LuaValue::Table(_) => "table",
            LuaValue::Opaque(_) => "opaque",
        }
    }
}

impl From<bool> for LuaValue {
    fn from(value: bool) -> Self {
        LuaValue::Boolean(value)
    }
}

impl From<i64> for LuaValue {
    fn from(value: i64) -> Self {
        LuaValue::Integer(value)
    }
}

impl From<f64> for LuaValue {
    fn from(value: f64) -> Self {
        LuaValue::Number(value)
    }
}

impl From<&str> for LuaValue {
    fn from(value: &str) -> Self {
        LuaValue::String(value.to_string())
    }
}

impl From<String> for LuaValue {
    fn from(value: String) -> Self {
        LuaValue::String(value)
    }
}

/// CHDK protocol version reported by the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApiVersion {
    pub major: i64,
    pub minor: i64,
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Identification of one PTP device on the USB bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model_name: String,
    pub bus_num: String,
    pub device_num: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_num: Option<String>,
    pub chdk_api: ApiVersion,
}

impl DeviceInfo {
    /// Stable key for registries: `bus:device`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.bus_num, self.device_num)
    }
}

/// Criteria for [`crate::device::find_devices`]. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFilter {
    pub bus_num: Option<String>,
    pub device_num: Option<String>,
    pub serial_num: Option<String>,
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    pub fn matches(&self, info: &DeviceInfo) -> bool {
        self.bus_num.as_ref().map_or(true, |b| *b == info.bus_num)
            && self.device_num.as_ref().map_or(true, |d| *d == info.device_num)
            && self
                .serial_num
                .as_ref()
                .map_or(true, |s| info.serial_num.as_deref() == Some(s.as_str()))
            && self.product_id.map_or(true, |p| p == info.product_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Return value of a script
    Return,
    /// Message written by a script with `write_usb_msg`
    User,
    /// Script error
    Error,
    /// Message queue is empty
    None,
    Other(String),
}

impl MessageType {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "return" => MessageType::Return,
            "user" => MessageType::User,
            "error" => MessageType::Error,
            "none" => MessageType::None,
            other => MessageType::Other(other.to_string()),
        }
    }
}

/// Structured outcome of a device operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: MessageType,
    pub script_id: i64,
    pub value: LuaValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Record,
    Play,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Record => "record",
            CaptureMode::Play => "play",
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureMode {
    type Err = crate::errors::ChdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "record" | "rec" => Ok(CaptureMode::Record),
            "play" => Ok(CaptureMode::Play),
            _ => Err(crate::errors::ChdkError::invalid_argument(
                "`mode` must be one of 'play' or 'record'",
            )),
        }
    }
}

/// One entry of a directory listing on the camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub mtime: Option<i64>,
    /// Remaining stat fields reported by the camera
    pub extra: BTreeMap<String, LuaValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    Ppm,
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
}

impl FrameFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FrameFormat::Ppm => "ppm",
            FrameFormat::Jpeg => "jpg",
            FrameFormat::Png => "png",
        }
    }
}

impl FromStr for FrameFormat {
    type Err = crate::errors::ChdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ppm" => Ok(FrameFormat::Ppm),
            "jpg" | "jpeg" => Ok(FrameFormat::Jpeg),
            "png" => Ok(FrameFormat::Png),
            _ => Err(crate::errors::ChdkError::invalid_argument(
                "`format` has to be one of 'ppm', 'jpg' or 'png'",
            )),
        }
    }
}

/// A live-view frame grabbed from the camera's viewport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}
