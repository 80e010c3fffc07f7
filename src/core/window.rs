//! Row-parallel surface filling and summed-area window queries shared by the
//! raster feature extractors.

use crate::types::{ScoutError, ScoutResult};
use ndarray::Array2;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Build a `rows x cols` surface by filling each row independently.
///
/// Rows start as NaN; the closure writes only the pixels it can compute.
pub(crate) fn fill_rows<F>(rows: usize, cols: usize, f: F) -> ScoutResult<Array2<f64>>
where
    F: Fn(usize, &mut [f64]) + Sync + Send,
{
    if rows == 0 || cols == 0 {
        return Err(ScoutError::InvalidParameter(format!(
            "Cannot build an empty {}x{} surface",
            rows, cols
        )));
    }

    let mut data = vec![f64::NAN; rows * cols];

    #[cfg(feature = "parallel")]
    data.par_chunks_mut(cols)
        .enumerate()
        .for_each(|(row, out)| f(row, out));

    #[cfg(not(feature = "parallel"))]
    data.chunks_mut(cols)
        .enumerate()
        .for_each(|(row, out)| f(row, out));

    Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| ScoutError::InvalidParameter(format!("Failed to shape surface: {}", e)))
}

/// Compute one value per row, in row order
pub(crate) fn map_rows<T, F>(rows: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    #[cfg(feature = "parallel")]
    let out = (0..rows).into_par_iter().map(f).collect();

    #[cfg(not(feature = "parallel"))]
    let out = (0..rows).map(f).collect();

    out
}

/// Summed-area table with a zero guard row and column
pub(crate) struct SummedArea {
    table: Array2<f64>,
}

impl SummedArea {
    pub(crate) fn new(values: &Array2<f64>) -> Self {
        let (rows, cols) = values.dim();
        let mut table = Array2::<f64>::zeros((rows + 1, cols + 1));
        for r in 0..rows {
            let mut row_sum = 0.0;
            for c in 0..cols {
                row_sum += values[[r, c]];
                table[[r + 1, c + 1]] = table[[r, c + 1]] + row_sum;
            }
        }
        Self { table }
    }

    /// Sum over rows `r0..r1` and cols `c0..c1` (half-open)
    pub(crate) fn sum(&self, r0: usize, c0: usize, r1: usize, c1: usize) -> f64 {
        self.table[[r1, c1]] - self.table[[r0, c1]] - self.table[[r1, c0]] + self.table[[r0, c0]]
    }

    /// Sum of the `(2r+1)^2` window centred on a pixel, `None` if it leaves the grid
    pub(crate) fn centred_sum(&self, row: usize, col: usize, radius: usize) -> Option<f64> {
        let (rows, cols) = (self.table.nrows() - 1, self.table.ncols() - 1);
        if row < radius || col < radius || row + radius >= rows || col + radius >= cols {
            return None;
        }
        Some(self.sum(row - radius, col - radius, row + radius + 1, col + radius + 1))
    }
}

/// Pixels whose full `(2r+1)^2` window lies inside the grid and holds only valid pixels
pub(crate) fn clean_windows(valid: &Array2<bool>, radius: usize) -> Array2<bool> {
    let invalid = valid.mapv(|v| if v { 0.0 } else { 1.0 });
    let table = SummedArea::new(&invalid);
    let (rows, cols) = valid.dim();
    let mut clean = Array2::from_elem((rows, cols), false);
    for r in 0..rows {
        for c in 0..cols {
            if let Some(count) = table.centred_sum(r, c, radius) {
                clean[[r, c]] = count < 0.5;
            }
        }
    }
    clean
}

/// Normalized 1D Gaussian kernel truncated at 3 sigma
pub(crate) fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let half = (3.0 * sigma).ceil() as usize;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f64> = (0..=2 * half)
        .map(|i| {
            let x = i as f64 - half as f64;
            (-x * x / denom).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summed_area_window() {
        let values = Array2::from_shape_fn((5, 5), |(r, c)| (r * 5 + c) as f64);
        let table = SummedArea::new(&values);
        let expected: f64 = (1..4)
            .flat_map(|r| (1..4).map(move |c| (r * 5 + c) as f64))
            .sum();
        assert_eq!(table.centred_sum(2, 2, 1), Some(expected));
        assert_eq!(table.centred_sum(0, 2, 1), None);
        assert_eq!(table.centred_sum(2, 4, 1), None);
    }

    #[test]
    fn test_clean_windows_respects_holes_and_edges() {
        let mut valid = Array2::from_elem((7, 7), true);
        valid[[3, 5]] = false;
        let clean = clean_windows(&valid, 1);
        assert!(!clean[[0, 0]]);
        assert!(clean[[2, 2]]);
        assert!(!clean[[3, 4]]);
        assert!(!clean[[2, 4]]);
        assert!(clean[[3, 2]]);
    }

    #[test]
    fn test_gaussian_kernel_normalized() {
        let k = gaussian_kernel(2.0);
        assert_eq!(k.len(), 13);
        let sum: f64 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(k[6] > k[5] && (k[5] - k[7]).abs() < 1e-15);
    }

    #[test]
    fn test_fill_rows() {
        let surface = fill_rows(3, 4, |row, out| {
            for (c, v) in out.iter_mut().enumerate() {
                *v = (row * 10 + c) as f64;
            }
        })
        .unwrap();
        assert_eq!(surface[[2, 3]], 23.0);
        assert!(fill_rows(0, 4, |_, _| {}).is_err());
    }
}
