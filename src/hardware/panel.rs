//! A rectangular grid of modules forming the logical display.

use crate::error::PanelError;

use super::Module;

pub struct Panel {
    modules: Vec<Vec<Module>>,
    n_rows: usize,
    n_cols: usize,
    module_width: usize,
    module_height: usize,
}

impl Panel {
    pub fn new(
        layout: &[Vec<u8>],
        module_width: usize,
        module_height: usize,
    ) -> Result<Self, PanelError> {
        if layout.is_empty() || layout[0].is_empty() {
            return Err(PanelError::EmptyLayout);
        }
        let n_cols = layout[0].len();
        for (i, row) in layout.iter().enumerate() {
            if row.len() != n_cols {
                return Err(PanelError::RaggedLayout(i));
            }
        }

        let modules = layout
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&addr| Module::new(module_width, module_height, addr))
                    .collect()
            })
            .collect();

        Ok(Self {
            modules,
            n_rows: layout.len(),
            n_cols,
            module_width,
            module_height,
        })
    }

    /// (height, width) of the full panel.
    pub fn dimensions(&self) -> (usize, usize) {
        (
            self.n_rows * self.module_height,
            self.n_cols * self.module_width,
        )
    }

    /// Split a full-size matrix into per-module chunks and build the
    /// concatenated serial command for the whole panel, in row-major order.
    pub fn set_content(&mut self, matrix: &[Vec<u8>]) -> Result<Vec<u8>, PanelError> {
        let (panel_height, panel_width) = self.dimensions();
        if matrix.len() != panel_height || matrix.iter().any(|r| r.len() != panel_width) {
            return Err(PanelError::DimensionMismatch {
                matrix_height: matrix.len(),
                matrix_width: matrix.first().map(|r| r.len()).unwrap_or(0),
                panel_height,
                panel_width,
            });
        }

        for (row_idx, module_row) in self.modules.iter_mut().enumerate() {
            let row_start = row_idx * self.module_height;
            for (col_idx, module) in module_row.iter_mut().enumerate() {
                let col_start = col_idx * self.module_width;
                let sub: Vec<Vec<u8>> = matrix[row_start..row_start + self.module_height]
                    .iter()
                    .map(|row| row[col_start..col_start + self.module_width].to_vec())
                    .collect();
                module.set_content(&sub);
            }
        }

        let mut out = Vec::new();
        for module_row in &self.modules {
            for module in module_row {
                out.extend(module.serial_command(true));
            }
        }
        Ok(out)
    }

    /// Unpack `data` (row-major, LSB-first within each byte) to a matrix
    /// sized `width`x`height`, then delegate to `set_content`.
    pub fn set_content_from_packed(
        &mut self,
        data: &[u8],
        width: usize,
        height: usize,
    ) -> Result<Vec<u8>, PanelError> {
        let (panel_height, panel_width) = self.dimensions();
        if width != panel_width || height != panel_height {
            return Err(PanelError::DimensionMismatch {
                matrix_height: height,
                matrix_width: width,
                panel_height,
                panel_width,
            });
        }

        let mut matrix = Vec::with_capacity(height);
        let mut bit_idx = 0usize;
        for _ in 0..height {
            let mut row = Vec::with_capacity(width);
            for _ in 0..width {
                let byte_idx = bit_idx / 8;
                let bit_pos = bit_idx % 8;
                let bit = data.get(byte_idx).map(|b| (b >> bit_pos) & 1).unwrap_or(0);
                row.push(bit);
                bit_idx += 1;
            }
            matrix.push(row);
        }

        self.set_content(&matrix)
    }

    /// A blank matrix sized to this panel, for clear-display operations.
    pub fn blank_matrix(&self) -> Vec<Vec<u8>> {
        let (h, w) = self.dimensions();
        vec![vec![0u8; w]; h]
    }
}
