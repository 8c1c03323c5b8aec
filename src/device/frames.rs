//! Live-view frames from the camera's viewport.

use super::ChdkDevice;
use crate::errors::{ChdkError, Result};
use crate::types::{Frame, FrameFormat};
use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use mlua::{Function, IntoLuaMulti, Value};
use std::io::Cursor;

/// Grabs one viewport frame and renders it as binary PPM.
const GRAB_FRAME: &str = r#"
return function(skip)
    local frame = con:get_live_data(nil, 1)
    local pimg = liveimg.get_viewport_pimg(nil, frame, skip)
    local lb = pimg:to_lbuf_packed_rgb(nil)
    local header = string.format('P6\n%d\n%d\n%d\n', pimg:width(), pimg:height(), 255)
    return header .. lb:string()
end
"#;

/// Width, height and data offset of a binary (P6) PPM image.
pub fn parse_ppm_header(data: &[u8]) -> Result<(u32, u32, usize)> {
    let malformed = || ChdkError::Image("malformed PPM header".to_string());
    let mut fields = Vec::with_capacity(4);
    let mut pos = 0;

    while fields.len() < 4 {
        while data.get(pos).is_some_and(u8::is_ascii_whitespace) {
            pos += 1;
        }
        let start = pos;
        while data.get(pos).is_some_and(|b| !b.is_ascii_whitespace()) {
            pos += 1;
        }
        if start == pos {
            return Err(malformed());
        }
        fields.push(std::str::from_utf8(&data[start..pos]).map_err(|_| malformed())?);
    }
    // exactly one whitespace byte separates the header from the pixels
    pos += 1;

    if fields[0] != "P6" {
        return Err(malformed());
    }
    let width: u32 = fields[1].parse().map_err(|_| malformed())?;
    let height: u32 = fields[2].parse().map_err(|_| malformed())?;
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(3))
        .and_then(|bytes| bytes.checked_add(pos))
        .ok_or_else(malformed)?;
    if data.len() < expected {
        return Err(ChdkError::Image(format!(
            "truncated PPM frame: expected {expected} bytes, got {}",
            data.len()
        )));
    }
    Ok((width, height, pos))
}

fn encode(image: &DynamicImage, format: FrameFormat, jpeg_quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match format {
        FrameFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut out, jpeg_quality);
            image.to_rgb8().write_with_encoder(encoder)?;
        }
        FrameFormat::Png => image.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?,
        FrameFormat::Ppm => image.write_to(&mut Cursor::new(&mut out), ImageFormat::Pnm)?,
    }
    Ok(out)
}

impl ChdkDevice {
    fn grab_ppm(&self, scaled: bool) -> Result<Vec<u8>> {
        self.ensure_connected()?;
        let grab: Function = self.ctx.eval(GRAB_FRAME)?;
        let args = scaled.into_lua_multi(self.ctx.lua())?;
        match self.ctx.protected_call(&grab, args)? {
            Value::String(data) => Ok(data.as_bytes().to_vec()),
            other => Err(ChdkError::Runtime(format!(
                "live view returned {} instead of image data",
                other.type_name()
            ))),
        }
    }

    fn next_frame(&self, sequence: u64, format: FrameFormat, scaled: bool) -> Result<Frame> {
        let ppm = self.grab_ppm(scaled)?;
        let captured_at = Utc::now();
        let (width, height, _) = parse_ppm_header(&ppm)?;

        if format == FrameFormat::Ppm {
            return Ok(Frame {
                sequence,
                captured_at,
                width,
                height,
                format,
                data: ppm,
            });
        }

        let mut image = image::load_from_memory_with_format(&ppm, ImageFormat::Pnm)?;
        if !scaled {
            // the viewport buffer is twice as wide as its aspect ratio
            image = image.resize_exact((width / 2).max(1), height, FilterType::Triangle);
        }
        let data = encode(&image, format, self.config.capture.jpeg_quality)?;
        Ok(Frame {
            sequence,
            captured_at,
            width: image.width(),
            height: image.height(),
            format,
            data,
        })
    }

    /// Grab a single live-view frame.
    ///
    /// `scaled` lets the camera correct the aspect ratio, which is fast but
    /// lossy. It defaults to true for PPM and false otherwise.
    pub fn get_frame(&self, format: FrameFormat, scaled: Option<bool>) -> Result<Frame> {
        let scaled = scaled.unwrap_or(format == FrameFormat::Ppm);
        self.next_frame(1, format, scaled)
    }

    /// Endless stream of live-view frames.
    pub fn frames(&self, format: FrameFormat, scaled: Option<bool>) -> Frames<'_> {
        Frames {
            device: self,
            format,
            scaled: scaled.unwrap_or(format == FrameFormat::Ppm),
            sequence: 0,
        }
    }
}

/// Iterator over live-view frames; it never ends on its own.
pub struct Frames<'a> {
    device: &'a ChdkDevice,
    format: FrameFormat,
    scaled: bool,
    sequence: u64,
}

impl Frames<'_> {
    pub fn format(&self) -> FrameFormat {
        self.format
    }
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.sequence += 1;
        Some(self.device.next_frame(self.sequence, self.format, self.scaled))
    }
}
