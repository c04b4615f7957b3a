//! Display frames and their wire encoding
//!
//! A frame travels to the display controller as one binary buffer:
//! a 1-byte acknowledgement token (0 = no acknowledgement requested),
//! a little-endian `u16` light count, then one RGB triple per light in
//! index order.

use bytemuck::{Pod, Zeroable};

use crate::error::{CalibrationError, CalibrationResult};

/// Size of the frame header (token + light count)
pub const HEADER_LEN: usize = 3;

/// One light's colour
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Linear blend towards `other`; `t` is clamped to 0.0..=1.0
    pub fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Rgb::new(mix(self.r, other.r), mix(self.g, other.g), mix(self.b, other.b))
    }

    /// Colour from hue (degrees), saturation and value (0.0..=1.0)
    pub fn from_hsv(hue: f64, saturation: f64, value: f64) -> Rgb {
        let h = hue.rem_euclid(360.0) / 60.0;
        let s = saturation.clamp(0.0, 1.0);
        let v = value.clamp(0.0, 1.0);
        let c = v * s;
        let x = c * (1.0 - (h % 2.0 - 1.0).abs());
        let (r, g, b) = match h as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        let m = v - c;
        let to_byte = |channel: f64| ((channel + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Rgb::new(to_byte(r), to_byte(g), to_byte(b))
    }
}

/// A full set of light colours plus the acknowledgement token it carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub ack_id: u8,
    pub pixels: Vec<Rgb>,
}

impl Frame {
    /// All lights off, no acknowledgement requested
    pub fn new(light_count: usize) -> Self {
        Self::filled(light_count, Rgb::BLACK)
    }

    pub fn filled(light_count: usize, color: Rgb) -> Self {
        Self {
            ack_id: 0,
            pixels: vec![color; light_count],
        }
    }

    pub fn light_count(&self) -> usize {
        self.pixels.len()
    }

    /// Return this frame carrying `ack_id`
    pub fn with_ack(mut self, ack_id: u8) -> Self {
        self.ack_id = ack_id;
        self
    }

    /// Cross-fade towards `other`. Lights missing from either frame are black.
    pub fn blend(&self, other: &Frame, t: f64) -> Frame {
        let count = self.light_count().max(other.light_count());
        let pixels = (0..count)
            .map(|i| {
                let a = self.pixels.get(i).copied().unwrap_or_default();
                let b = other.pixels.get(i).copied().unwrap_or_default();
                a.lerp(b, t)
            })
            .collect();
        Frame { ack_id: 0, pixels }
    }

    /// Encode into the controller's binary format.
    ///
    /// Strings longer than `u16::MAX` lights are truncated.
    pub fn encode(&self) -> Vec<u8> {
        let count = u16::try_from(self.pixels.len()).unwrap_or(u16::MAX);
        let pixels = &self.pixels[..count as usize];

        let mut data = Vec::with_capacity(HEADER_LEN + pixels.len() * 3);
        data.push(self.ack_id);
        data.extend_from_slice(&count.to_le_bytes());
        data.extend_from_slice(bytemuck::cast_slice(pixels));
        data
    }

    /// Decode a buffer produced by [`Frame::encode`]
    pub fn decode(data: &[u8]) -> CalibrationResult<Frame> {
        if data.len() < HEADER_LEN {
            return Err(CalibrationError::MalformedPayload(format!(
                "frame of {} bytes is shorter than its header",
                data.len()
            )));
        }

        let ack_id = data[0];
        let count = u16::from_le_bytes([data[1], data[2]]) as usize;
        let body = &data[HEADER_LEN..];
        if body.len() != count * 3 {
            return Err(CalibrationError::MalformedPayload(format!(
                "frame declares {} lights but carries {} colour bytes",
                count,
                body.len()
            )));
        }

        let pixels: &[Rgb] = bytemuck::try_cast_slice(body)
            .map_err(|e| CalibrationError::MalformedPayload(e.to_string()))?;

        Ok(Frame {
            ack_id,
            pixels: pixels.to_vec(),
        })
    }
}
