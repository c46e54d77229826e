//! A single flip-dot tile and its serial command.

use super::{END_BYTE, START_BYTES_BUFFER, START_BYTES_FLUSH};

/// One physical module, `width` x `height` pixels, addressed by a single byte.
pub struct Module {
    width: usize,
    height: usize,
    address: u8,
    /// Row-major flat content, one bit per pixel.
    content: Vec<u8>,
}

impl Module {
    pub fn new(width: usize, height: usize, address: u8) -> Self {
        Self {
            width,
            height,
            address,
            content: vec![0; width * height],
        }
    }

    /// Replace this module's content from a `height` x `width` matrix.
    pub fn set_content(&mut self, content: &[Vec<u8>]) {
        debug_assert_eq!(content.len(), self.height);
        self.content.clear();
        for row in content {
            debug_assert_eq!(row.len(), self.width);
            self.content.extend_from_slice(row);
        }
    }

    /// Build this module's serial command: start marker, address, one packed
    /// byte per column (top pixel at the LSB), end marker.
    pub fn serial_command(&self, flush: bool) -> Vec<u8> {
        let start = if flush {
            START_BYTES_FLUSH
        } else {
            START_BYTES_BUFFER
        };

        let mut out = Vec::with_capacity(2 + 1 + self.width + 1);
        out.extend_from_slice(&start);
        out.push(self.address);

        for col in 0..self.width {
            let mut byte = 0u8;
            for row in 0..self.height {
                let bit = self.content[row * self.width + col];
                if bit != 0 {
                    byte |= 1 << row;
                }
            }
            out.push(byte);
        }

        out.push(END_BYTE);
        out
    }
}
