//! Framebuffer layout and the DMA engines walking it.
use crate::error::ConfigError;

pub mod persist;
pub mod scanout;

pub use persist::{PersistConfig, PersistState, PersistStats, Persistence};
pub use scanout::{Scanout, ScanoutConfig, ScanoutState, ScanoutStats};

/// One byte of framebuffer: color in the low nibble, intensity in the high.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pixel {
    pub color: u8,
    pub intensity: u8,
}

impl Pixel {
    pub fn new(color: u8, intensity: u8) -> Self {
        Pixel { color: color & 0xf, intensity: intensity & 0xf }
    }

    pub fn from_byte(b: u8) -> Self {
        Pixel { color: b & 0xf, intensity: b >> 4 }
    }

    pub fn to_byte(self) -> u8 {
        (self.intensity << 4) | (self.color & 0xf)
    }

    pub fn decayed(self, decay: u8) -> Self {
        Pixel { intensity: self.intensity.saturating_sub(decay), ..self }
    }
}

/// Four pixels of a bus word, pixel 0 in the least significant byte.
pub fn unpack(word: u32) -> [Pixel; 4] {
    word.to_le_bytes().map(Pixel::from_byte)
}

pub fn pack(pixels: [Pixel; 4]) -> u32 {
    u32::from_le_bytes(pixels.map(Pixel::to_byte))
}

/// Apply `decay` to every pixel of a word.
pub fn decay_word(word: u32, decay: u8) -> u32 {
    pack(unpack(word).map(|p| p.decayed(decay)))
}

/// A packed framebuffer region in the backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramebufferWindow {
    /// word address of the first pixel
    pub base: u32,
    /// bytes per row
    pub stride: u32,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
}

impl FramebufferWindow {
    pub fn new(
        base: u32,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    ) -> Result<Self, ConfigError> {
        Self::with_stride(base, width * bytes_per_pixel, width, height, bytes_per_pixel)
    }

    pub fn with_stride(
        base: u32,
        stride: u32,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    ) -> Result<Self, ConfigError> {
        if !matches!(bytes_per_pixel, 1 | 2 | 4) {
            return Err(ConfigError::InvalidWindow("bytes per pixel must be 1, 2 or 4"));
        }
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidWindow("window is empty"));
        }
        if stride != width * bytes_per_pixel {
            return Err(ConfigError::InvalidWindow(
                "rows must be packed (stride = width * bytes per pixel)",
            ));
        }
        if (stride * height) % 4 != 0 {
            return Err(ConfigError::InvalidWindow("size must be a whole number of words"));
        }
        Ok(FramebufferWindow { base, stride, width, height, bytes_per_pixel })
    }

    pub fn len_words(&self) -> u32 {
        self.stride * self.height / 4
    }

    /// one past the last word of the window
    pub fn end(&self) -> u32 {
        self.base + self.len_words()
    }

    pub fn contains(&self, adr: u32) -> bool {
        (self.base..self.end()).contains(&adr)
    }

    /// Word address and byte lane of pixel (x, y), if it is on screen.
    pub fn pixel_address(&self, x: i32, y: i32) -> Option<(u32, u32)> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        let byte = y as u32 * self.stride + x as u32 * self.bytes_per_pixel;
        Some((self.base + byte / 4, byte % 4))
    }
}

/// Word offset into a window, wrapping from the last word back to 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmaCursor {
    len: u32,
    offset: u32,
    wraps: u64,
}

impl DmaCursor {
    pub fn new(len: u32) -> Self {
        DmaCursor { len, offset: 0, wraps: 0 }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// words left before the wrap
    pub fn remaining(&self) -> u32 {
        self.len - self.offset
    }

    pub fn wraps(&self) -> u64 {
        self.wraps
    }

    pub fn advance(&mut self, words: u32) {
        self.offset += words;
        if self.offset >= self.len {
            self.offset -= self.len;
            self.wraps += 1;
        }
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_layout() {
        let p = Pixel::new(0x3, 0xa);
        assert_eq!(p.to_byte(), 0xa3);
        assert_eq!(Pixel::from_byte(0xa3), p);
        assert_eq!(decay_word(0xf1_00_21_a3, 2), 0xd1_00_01_83);
        assert_eq!(unpack(0x000000a3)[0], p);
    }

    #[test]
    fn window_validation() {
        assert!(FramebufferWindow::new(0x100, 8, 4, 1).is_ok());
        assert!(FramebufferWindow::new(0x100, 8, 4, 3).is_err());
        assert!(FramebufferWindow::new(0x100, 3, 1, 1).is_err());
        assert!(FramebufferWindow::with_stride(0x100, 16, 8, 4, 1).is_err());
        let w = FramebufferWindow::new(0x100, 8, 4, 2).unwrap();
        assert_eq!(w.len_words(), 16);
        assert_eq!(w.pixel_address(3, 1), Some((0x100 + 5, 2)));
        assert_eq!(w.pixel_address(8, 0), None);
        assert_eq!(w.pixel_address(-1, 0), None);
    }

    #[test]
    fn cursor_wraps_exactly() {
        let mut c = DmaCursor::new(10);
        c.advance(4);
        c.advance(4);
        assert_eq!(c.remaining(), 2);
        c.advance(2);
        assert_eq!(c.offset(), 0);
        assert_eq!(c.wraps(), 1);
    }
}
