//! Raw frame buffer exchanged with the capture and detector collaborators.

use lookout_protocol::BoundingBox;

use crate::error::{EngineError, Result};

/// Packed RGB8 image, row-major.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(EngineError::InvalidInput(format!(
                "frame buffer {}x{} expects {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Uniform-color frame; handy for harnesses and tests.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Copy out the region under `bbox`, clamped to frame bounds. An empty
    /// clamped region falls back to the full frame rather than failing.
    pub fn crop(&self, bbox: &BoundingBox) -> FrameBuffer {
        let x1 = (bbox.x.floor().max(0.0) as u32).min(self.width);
        let y1 = (bbox.y.floor().max(0.0) as u32).min(self.height);
        let x2 = ((bbox.x + bbox.w).ceil().max(0.0) as u32).min(self.width);
        let y2 = ((bbox.y + bbox.h).ceil().max(0.0) as u32).min(self.height);

        if x2 <= x1 || y2 <= y1 {
            return self.clone();
        }

        let (w, h) = (x2 - x1, y2 - y1);
        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for row in y1..y2 {
            let start = (row as usize * self.width as usize + x1 as usize) * 3;
            let end = start + w as usize * 3;
            data.extend_from_slice(&self.data[start..end]);
        }
        FrameBuffer {
            width: w,
            height: h,
            data,
        }
    }
}
