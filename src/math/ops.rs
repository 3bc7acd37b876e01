//! Matrix-product and convolution-unfolding kernels.
//!
//! All matrices are row-major slices. Products are parallelized over output
//! rows with rayon; each row is summed sequentially by a single task, so the
//! result does not depend on the number of threads.

use rayon::prelude::*;

/// `a[m×k] · b[k×n]`
pub fn matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), k * n);
    let mut out = vec![0.0f32; m * n];
    if n == 0 {
        return out;
    }
    out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        let a_row = &a[i * k..(i + 1) * k];
        for (p, &a_ip) in a_row.iter().enumerate() {
            if a_ip == 0.0 {
                continue;
            }
            let b_row = &b[p * n..(p + 1) * n];
            for (o, &b_pj) in row.iter_mut().zip(b_row) {
                *o += a_ip * b_pj;
            }
        }
    });
    out
}

/// `a[m×k] · bᵀ` where `b` is stored as `[n×k]`.
pub fn matmul_bt(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), n * k);
    let mut out = vec![0.0f32; m * n];
    if n == 0 {
        return out;
    }
    out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        let a_row = &a[i * k..(i + 1) * k];
        for (j, o) in row.iter_mut().enumerate() {
            let b_row = &b[j * k..(j + 1) * k];
            *o = a_row.iter().zip(b_row).map(|(x, y)| x * y).sum();
        }
    });
    out
}

/// `aᵀ · b` where `a` is stored as `[k×m]` and `b` as `[k×n]`.
pub fn matmul_at(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    debug_assert_eq!(a.len(), k * m);
    debug_assert_eq!(b.len(), k * n);
    let mut out = vec![0.0f32; m * n];
    if n == 0 {
        return out;
    }
    out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        for p in 0..k {
            let a_pi = a[p * m + i];
            if a_pi == 0.0 {
                continue;
            }
            let b_row = &b[p * n..(p + 1) * n];
            for (o, &b_pj) in row.iter_mut().zip(b_row) {
                *o += a_pi * b_pj;
            }
        }
    });
    out
}

/// Geometry of a stride-1 square-kernel convolution over one `(C, H, W)` image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub kernel: usize,
    pub padding: usize,
    pub out_height: usize,
    pub out_width: usize,
}

impl ConvGeometry {
    /// `None` when the padded input is smaller than the kernel.
    pub fn new(channels: usize, height: usize, width: usize, kernel: usize, padding: usize) -> Option<ConvGeometry> {
        let padded_h = height + 2 * padding;
        let padded_w = width + 2 * padding;
        if kernel == 0 || padded_h < kernel || padded_w < kernel {
            return None;
        }
        Some(ConvGeometry {
            channels,
            height,
            width,
            kernel,
            padding,
            out_height: padded_h - kernel + 1,
            out_width: padded_w - kernel + 1,
        })
    }

    /// Rows of the unfolded matrix: `C·k·k`.
    pub fn patch_len(&self) -> usize {
        self.channels * self.kernel * self.kernel
    }

    /// Columns of the unfolded matrix: `H_out·W_out`.
    pub fn out_len(&self) -> usize {
        self.out_height * self.out_width
    }

    /// Input coordinate for output `(oy, ox)` and kernel tap `(ky, kx)`, or
    /// `None` when it falls in the zero padding.
    #[inline]
    fn source(&self, oy: usize, ox: usize, ky: usize, kx: usize) -> Option<(usize, usize)> {
        let y = (oy + ky).checked_sub(self.padding)?;
        let x = (ox + kx).checked_sub(self.padding)?;
        if y < self.height && x < self.width {
            Some((y, x))
        } else {
            None
        }
    }
}

/// Unfolds one `(C, H, W)` image into a `[C·k·k × H_out·W_out]` matrix.
pub fn im2col(image: &[f32], g: &ConvGeometry) -> Vec<f32> {
    let cols = g.out_len();
    let mut out = vec![0.0f32; g.patch_len() * cols];
    for c in 0..g.channels {
        let plane = &image[c * g.height * g.width..(c + 1) * g.height * g.width];
        for ky in 0..g.kernel {
            for kx in 0..g.kernel {
                let row = (c * g.kernel + ky) * g.kernel + kx;
                let dst = &mut out[row * cols..(row + 1) * cols];
                for oy in 0..g.out_height {
                    for ox in 0..g.out_width {
                        if let Some((y, x)) = g.source(oy, ox, ky, kx) {
                            dst[oy * g.out_width + ox] = plane[y * g.width + x];
                        }
                    }
                }
            }
        }
    }
    out
}

/// Adjoint of [`im2col`]: folds a `[C·k·k × H_out·W_out]` matrix back into a
/// `(C, H, W)` image, summing overlapping taps.
pub fn col2im(cols_data: &[f32], g: &ConvGeometry) -> Vec<f32> {
    let cols = g.out_len();
    let mut image = vec![0.0f32; g.channels * g.height * g.width];
    for c in 0..g.channels {
        let plane = &mut image[c * g.height * g.width..(c + 1) * g.height * g.width];
        for ky in 0..g.kernel {
            for kx in 0..g.kernel {
                let row = (c * g.kernel + ky) * g.kernel + kx;
                let src = &cols_data[row * cols..(row + 1) * cols];
                for oy in 0..g.out_height {
                    for ox in 0..g.out_width {
                        if let Some((y, x)) = g.source(oy, ox, ky, kx) {
                            plane[y * g.width + x] += src[oy * g.out_width + ox];
                        }
                    }
                }
            }
        }
    }
    image
}

/// Sums a `[rows×cols]` matrix over its rows into `out[cols]`.
pub fn add_column_sums(matrix: &[f32], rows: usize, cols: usize, out: &mut [f32]) {
    for r in 0..rows {
        for (o, &v) in out.iter_mut().zip(&matrix[r * cols..(r + 1) * cols]) {
            *o += v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matmul_variants_agree() {
        // a: 2×3, b: 3×2
        let a = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let ab = matmul(&a, &b, 2, 3, 2);
        assert_eq!(ab, vec![58.0, 64.0, 139.0, 154.0]);

        // bᵀ stored as [2×3]
        let bt = vec![7.0, 9.0, 11.0, 8.0, 10.0, 12.0];
        assert_eq!(matmul_bt(&a, &bt, 2, 3, 2), ab);

        // aᵀ stored as [3×2]
        let at = vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
        assert_eq!(matmul_at(&at, &b, 2, 3, 2), ab);
    }

    #[test]
    fn geometry_matches_padding_rules() {
        let g = ConvGeometry::new(4, 8, 9, 5, 2).unwrap();
        assert_eq!((g.out_height, g.out_width), (8, 9));
        let g = ConvGeometry::new(64, 8, 9, 4, 1).unwrap();
        assert_eq!((g.out_height, g.out_width), (7, 8));
        assert!(ConvGeometry::new(1, 1, 1, 4, 1).is_none());
    }

    #[test]
    fn col2im_is_adjoint_of_im2col() {
        // <im2col(x), y> == <x, col2im(y)> for any x, y.
        let g = ConvGeometry::new(2, 4, 5, 3, 1).unwrap();
        let x: Vec<f32> = (0..2 * 4 * 5).map(|i| (i as f32 * 0.37).sin()).collect();
        let y: Vec<f32> = (0..g.patch_len() * g.out_len()).map(|i| (i as f32 * 0.11).cos()).collect();
        let lhs: f32 = im2col(&x, &g).iter().zip(&y).map(|(a, b)| a * b).sum();
        let rhs: f32 = x.iter().zip(&col2im(&y, &g)).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-3, "{lhs} vs {rhs}");
    }
}
