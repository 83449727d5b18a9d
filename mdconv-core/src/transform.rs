//! Affine coordinate transforms in homogeneous form.
//!
//! An [`AffineTransform`] maps `in_dims` input coordinates onto `out_dims`
//! output coordinates through an `(out_dims + 1) x (in_dims + 1)` matrix
//! whose last column holds the translation. The matrix lives in a single
//! row-major buffer, so [`AffineTransform::apply_into`] walks contiguous
//! memory and never allocates.

use crate::{Error, Result};
use std::fmt::Write;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const XML_TYPE: &str = "AffineMatrixParameter";

/// Dense row-major matrix.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Creates a zero-filled matrix.
    #[must_use]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Creates a matrix with ones on the leading diagonal.
    #[must_use]
    pub fn identity(rows: usize, cols: usize) -> Self {
        let mut m = Self::zeros(rows, cols);
        for i in 0..rows.min(cols) {
            m.set(i, i, 1.0);
        }
        m
    }

    /// Builds a matrix from row vectors.
    ///
    /// # Errors
    /// Returns `DimensionMismatch` for ragged or empty input.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        if cols == 0 {
            return Err(Error::DimensionMismatch(
                "matrix must have at least one row and one column".to_string(),
            ));
        }
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(Error::DimensionMismatch(format!(
                    "row {i} has {} columns, expected {cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    /// One row as a slice.
    #[inline]
    #[must_use]
    pub fn row(&self, row: usize) -> &[f64] {
        let start = row * self.cols;
        &self.data[start..start + self.cols]
    }

    /// Row-major contents.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Matrix product `self * rhs`.
    ///
    /// # Errors
    /// Returns `DimensionMismatch` if the inner dimensions differ.
    pub fn mul(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.cols != rhs.rows {
            return Err(Error::DimensionMismatch(format!(
                "cannot multiply {}x{} by {}x{}",
                self.rows, self.cols, rhs.rows, rhs.cols
            )));
        }
        let mut out = Matrix::zeros(self.rows, rhs.cols);
        for i in 0..self.rows {
            for j in 0..rhs.cols {
                let mut acc = 0.0;
                for k in 0..self.cols {
                    acc += self.get(i, k) * rhs.get(k, j);
                }
                out.set(i, j, acc);
            }
        }
        Ok(out)
    }
}

/// Homogeneous affine transform from `in_dims` to `out_dims` coordinates.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AffineTransform {
    in_dims: usize,
    out_dims: usize,
    matrix: Matrix,
}

impl AffineTransform {
    /// Creates the identity transform. Extra output dimensions map to zero,
    /// extra input dimensions are dropped.
    #[must_use]
    pub fn new(in_dims: usize, out_dims: usize) -> Self {
        let mut matrix = Matrix::identity(out_dims + 1, in_dims + 1);
        // Homogeneous corner is always 1 even when in/out differ.
        for i in in_dims.min(out_dims)..=out_dims {
            for j in in_dims.min(out_dims)..=in_dims {
                matrix.set(i, j, 0.0);
            }
        }
        matrix.set(out_dims, in_dims, 1.0);
        Self {
            in_dims,
            out_dims,
            matrix,
        }
    }

    /// Square identity transform.
    #[must_use]
    pub fn identity(dims: usize) -> Self {
        Self::new(dims, dims)
    }

    /// Wraps an augmented matrix, deriving the dimensions from its shape.
    ///
    /// # Errors
    /// Returns `DimensionMismatch` for a matrix smaller than 1x1.
    pub fn from_matrix(matrix: Matrix) -> Result<Self> {
        if matrix.rows() == 0 || matrix.cols() == 0 {
            return Err(Error::DimensionMismatch(
                "augmented matrix must be at least 1x1".to_string(),
            ));
        }
        Ok(Self {
            in_dims: matrix.cols() - 1,
            out_dims: matrix.rows() - 1,
            matrix,
        })
    }

    /// Builds an axis-aligned projection.
    ///
    /// Each output row is `basis[i] / scaling[i]`, with translation
    /// `-(origin . basis[i]) / scaling[i]`, so `origin` maps to zero.
    ///
    /// # Errors
    /// Returns `DimensionMismatch` if the basis vectors or scaling do not
    /// match the origin and basis counts, `InvalidArgument` for a zero scale.
    pub fn orthogonal(origin: &[f64], basis: &[Vec<f64>], scaling: &[f64]) -> Result<Self> {
        let in_dims = origin.len();
        let out_dims = basis.len();
        if scaling.len() != out_dims {
            return Err(Error::DimensionMismatch(format!(
                "{} scaling factors for {out_dims} basis vectors",
                scaling.len()
            )));
        }
        let mut matrix = Matrix::zeros(out_dims + 1, in_dims + 1);
        for (i, (axis, &scale)) in basis.iter().zip(scaling).enumerate() {
            if axis.len() != in_dims {
                return Err(Error::DimensionMismatch(format!(
                    "basis vector {i} has {} components, origin has {in_dims}",
                    axis.len()
                )));
            }
            if scale == 0.0 {
                return Err(Error::InvalidArgument(format!(
                    "scaling factor for axis {i} is zero"
                )));
            }
            let mut offset = 0.0;
            for (j, (&b, &o)) in axis.iter().zip(origin).enumerate() {
                matrix.set(i, j, b / scale);
                offset += o * b;
            }
            matrix.set(i, in_dims, -offset / scale);
        }
        matrix.set(out_dims, in_dims, 1.0);
        Ok(Self {
            in_dims,
            out_dims,
            matrix,
        })
    }

    #[must_use]
    pub fn in_dims(&self) -> usize {
        self.in_dims
    }

    #[must_use]
    pub fn out_dims(&self) -> usize {
        self.out_dims
    }

    #[must_use]
    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    /// Row-major augmented matrix.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        self.matrix.as_slice()
    }

    /// True if this transform maps every input onto itself.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.in_dims == self.out_dims && *self == Self::identity(self.in_dims)
    }

    /// Applies the transform, writing `out_dims` values into `output`.
    ///
    /// `input` must hold at least `in_dims` values and `output` at least
    /// `out_dims`.
    #[inline]
    pub fn apply_into(&self, input: &[f64], output: &mut [f64]) {
        let stride = self.in_dims + 1;
        let data = self.matrix.as_slice();
        let input = &input[..self.in_dims];
        for (out, row) in output[..self.out_dims]
            .iter_mut()
            .zip(data.chunks_exact(stride))
        {
            let (linear, translation) = row.split_at(self.in_dims);
            *out = linear
                .iter()
                .zip(input)
                .fold(translation[0], |acc, (m, x)| acc + m * x);
        }
    }

    /// Applies the transform, returning a new vector.
    #[must_use]
    pub fn apply(&self, input: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.out_dims];
        self.apply_into(input, &mut out);
        out
    }

    /// Replaces the matrix contents.
    ///
    /// # Errors
    /// Returns `DimensionMismatch` if the shape differs; the transform is
    /// left untouched in that case.
    pub fn set_matrix(&mut self, matrix: Matrix) -> Result<()> {
        if matrix.rows() != self.matrix.rows() || matrix.cols() != self.matrix.cols() {
            return Err(Error::DimensionMismatch(format!(
                "expected a {}x{} matrix, got {}x{}",
                self.matrix.rows(),
                self.matrix.cols(),
                matrix.rows(),
                matrix.cols()
            )));
        }
        self.matrix = matrix;
        Ok(())
    }

    /// Adds `translation` to the homogeneous column.
    ///
    /// # Errors
    /// Returns `DimensionMismatch` unless `translation` has `out_dims` values.
    pub fn add_translation(&mut self, translation: &[f64]) -> Result<()> {
        if translation.len() != self.out_dims {
            return Err(Error::DimensionMismatch(format!(
                "translation has {} components, transform outputs {}",
                translation.len(),
                self.out_dims
            )));
        }
        for (i, t) in translation.iter().enumerate() {
            let current = self.matrix.get(i, self.in_dims);
            self.matrix.set(i, self.in_dims, current + t);
        }
        Ok(())
    }

    /// Translation column (without the homogeneous entry).
    #[must_use]
    pub fn translation(&self) -> Vec<f64> {
        (0..self.out_dims)
            .map(|i| self.matrix.get(i, self.in_dims))
            .collect()
    }

    /// Composes two transforms: `first` is applied, then `second`.
    ///
    /// `combine(a, b).apply(x) == b.apply(&a.apply(x))`.
    ///
    /// # Errors
    /// Returns `DimensionMismatch` if `first.out_dims() != second.in_dims()`.
    pub fn combine(first: &AffineTransform, second: &AffineTransform) -> Result<Self> {
        if first.out_dims != second.in_dims {
            return Err(Error::DimensionMismatch(format!(
                "first transform outputs {} dimensions, second expects {}",
                first.out_dims, second.in_dims
            )));
        }
        let matrix = second.matrix.mul(&first.matrix)?;
        Ok(Self {
            in_dims: first.in_dims,
            out_dims: second.out_dims,
            matrix,
        })
    }

    /// Matrix contents as `r0c0,r0c1,...;r1c0,...`.
    #[must_use]
    pub fn value_string(&self) -> String {
        let mut out = String::new();
        for r in 0..self.matrix.rows() {
            if r > 0 {
                out.push(';');
            }
            for (c, v) in self.matrix.row(r).iter().enumerate() {
                if c > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{v}");
            }
        }
        out
    }

    /// Serializes as an `AffineMatrixParameter` XML fragment.
    #[must_use]
    pub fn to_xml(&self) -> String {
        format!(
            "<Parameter><Type>{XML_TYPE}</Type><Value>{}</Value></Parameter>",
            self.value_string()
        )
    }

    /// Parses a value string produced by [`Self::value_string`].
    ///
    /// # Errors
    /// Returns `Parse` for non-numeric entries and `DimensionMismatch` for
    /// ragged rows.
    pub fn from_value_string(value: &str) -> Result<Self> {
        let rows = value
            .trim()
            .split(';')
            .map(|row| {
                row.split(',')
                    .map(|v| {
                        v.trim()
                            .parse::<f64>()
                            .map_err(|e| Error::Parse(format!("bad matrix entry '{v}': {e}")))
                    })
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_matrix(Matrix::from_rows(&rows)?)
    }

    /// Parses an `AffineMatrixParameter` XML fragment.
    ///
    /// # Errors
    /// Returns `Parse` if the fragment is not an affine matrix parameter.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let kind = element_text(xml, "Type")?;
        if kind != XML_TYPE {
            return Err(Error::Parse(format!(
                "expected parameter type {XML_TYPE}, found '{kind}'"
            )));
        }
        Self::from_value_string(element_text(xml, "Value")?)
    }
}

fn element_text<'a>(xml: &'a str, tag: &str) -> Result<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml
        .find(&open)
        .ok_or_else(|| Error::Parse(format!("missing <{tag}> element")))?
        + open.len();
    let len = xml[start..]
        .find(&close)
        .ok_or_else(|| Error::Parse(format!("unterminated <{tag}> element")))?;
    Ok(&xml[start..start + len])
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use approx::assert_relative_eq;

    fn shear() -> AffineTransform {
        AffineTransform::from_matrix(
            Matrix::from_rows(&[
                vec![1.0, 2.0, 0.5],
                vec![0.0, -1.0, 3.0],
                vec![0.0, 0.0, 1.0],
            ])
            .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_identity_pads_and_truncates() {
        for in_dims in 1..=4 {
            for out_dims in 1..=4 {
                let t = AffineTransform::new(in_dims, out_dims);
                let input: Vec<f64> = (1..=in_dims).map(|v| v as f64).collect();
                let out = t.apply(&input);
                for (i, v) in out.iter().enumerate() {
                    let expected = if i < in_dims { input[i] } else { 0.0 };
                    assert_eq!(*v, expected, "in={in_dims} out={out_dims} dim={i}");
                }
            }
        }
    }

    #[test]
    fn test_apply_uses_translation_column() {
        let out = shear().apply(&[1.0, 1.0]);
        assert_eq!(out, vec![3.5, 2.0]);
    }

    #[test]
    fn test_set_matrix_mismatch_leaves_state() {
        let mut t = shear();
        let before = t.apply(&[2.0, -1.0]);
        let err = t.set_matrix(Matrix::identity(4, 4)).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch(_)));
        assert_eq!(t.apply(&[2.0, -1.0]), before);
        assert_eq!(t, shear());
    }

    #[test]
    fn test_set_matrix_replaces_contents() {
        let mut t = AffineTransform::identity(2);
        t.set_matrix(shear().matrix().clone()).unwrap();
        assert_eq!(t.apply(&[1.0, 1.0]), vec![3.5, 2.0]);
        assert_eq!(t.as_slice(), shear().as_slice());
    }

    #[test]
    fn test_add_translation() {
        let mut t = AffineTransform::identity(3);
        t.add_translation(&[1.0, 2.0, 3.0]).unwrap();
        t.add_translation(&[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(t.apply(&[0.0, 0.0, 0.0]), vec![2.0, 2.0, 3.0]);
        assert_eq!(t.translation(), vec![2.0, 2.0, 3.0]);
        assert!(t.add_translation(&[1.0]).is_err());
    }

    #[test]
    fn test_combine_order() {
        let a = shear();
        let mut b = AffineTransform::identity(2);
        b.set_matrix(
            Matrix::from_rows(&[
                vec![0.0, 1.0, 0.0],
                vec![2.0, 0.0, -1.0],
                vec![0.0, 0.0, 1.0],
            ])
            .unwrap(),
        )
        .unwrap();
        let x = [0.3, -1.7];
        let ab = AffineTransform::combine(&a, &b).unwrap();
        let expected = b.apply(&a.apply(&x));
        for (got, want) in ab.apply(&x).iter().zip(&expected) {
            assert_relative_eq!(*got, *want, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_combine_is_associative() {
        let a = shear();
        let b = AffineTransform::orthogonal(
            &[1.0, 2.0],
            &[vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]],
            &[2.0, 0.5, 1.0],
        )
        .unwrap();
        let mut c = AffineTransform::new(3, 2);
        c.add_translation(&[-4.0, 0.25]).unwrap();

        let left = AffineTransform::combine(&AffineTransform::combine(&a, &b).unwrap(), &c).unwrap();
        let right = AffineTransform::combine(&a, &AffineTransform::combine(&b, &c).unwrap()).unwrap();
        for x in [[0.0, 0.0], [1.5, -2.0], [100.0, 3.25]] {
            for (l, r) in left.apply(&x).iter().zip(right.apply(&x)) {
                assert_relative_eq!(*l, r, epsilon = 1e-9, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn test_combine_dimension_check() {
        let a = AffineTransform::new(2, 3);
        let b = AffineTransform::new(2, 2);
        assert!(matches!(
            AffineTransform::combine(&a, &b),
            Err(Error::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_orthogonal_maps_origin_to_zero() {
        let t = AffineTransform::orthogonal(
            &[1.0, 1.0, 1.0],
            &[vec![1.0, 0.0, 0.0], vec![0.0, 0.0, 1.0]],
            &[0.5, 2.0],
        )
        .unwrap();
        assert_eq!(t.in_dims(), 3);
        assert_eq!(t.out_dims(), 2);
        assert_eq!(t.apply(&[1.0, 1.0, 1.0]), vec![0.0, 0.0]);
        assert_eq!(t.apply(&[2.0, 5.0, 3.0]), vec![2.0, 1.0]);
        assert!(AffineTransform::orthogonal(&[0.0], &[vec![1.0]], &[0.0]).is_err());
    }

    #[test]
    fn test_xml_round_trip() {
        let rows: Vec<Vec<f64>> = (0..4)
            .map(|r| (0..4).map(|c| f64::from(r * 4 + c)).collect())
            .collect();
        let t = AffineTransform::from_matrix(Matrix::from_rows(&rows).unwrap()).unwrap();
        let xml = t.to_xml();
        assert_eq!(
            xml,
            "<Parameter><Type>AffineMatrixParameter</Type>\
             <Value>0,1,2,3;4,5,6,7;8,9,10,11;12,13,14,15</Value></Parameter>"
        );
        let parsed = AffineTransform::from_xml(&xml).unwrap();
        assert_eq!(parsed.matrix(), t.matrix());
        assert_eq!(parsed.in_dims(), 3);
    }

    #[test]
    fn test_xml_rejects_other_types() {
        let xml = "<Parameter><Type>InvalidParameter</Type><Value>1</Value></Parameter>";
        assert!(matches!(AffineTransform::from_xml(xml), Err(Error::Parse(_))));
        assert!(matches!(
            AffineTransform::from_value_string("1,2;3"),
            Err(Error::DimensionMismatch(_))
        ));
        assert!(matches!(
            AffineTransform::from_value_string("1,x"),
            Err(Error::Parse(_))
        ));
    }
}
