//! Tensor-like values carried by pipeline elements.
//!
//! A [`Tensor`] is a dtype, a concrete [`TensorShape`] and a contiguous
//! little-endian byte buffer holding `shape.num_elements()` values. Datasets
//! advertise their per-component shapes as [`PartialShape`]s, which may leave
//! single dimensions (or the whole rank) unknown.

use crate::allocator::Allocator;
use crate::error::BatchError;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a tensor buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// Width of one value in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Bool | Self::U8 => 1,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::U8 => "uint8",
            Self::I32 => "int32",
            Self::I64 => "int64",
            Self::F32 => "float",
            Self::F64 => "double",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fully defined shape of a concrete tensor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorShape(Vec<usize>);

impl TensorShape {
    #[must_use]
    pub fn new(dims: Vec<usize>) -> Self {
        Self(dims)
    }

    #[must_use]
    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Number of values described by this shape (1 for a scalar), or `None`
    /// if the product overflows. Any zero dimension makes it 0.
    #[must_use]
    pub fn num_elements(&self) -> Option<usize> {
        if self.0.contains(&0) {
            return Some(0);
        }
        self.0.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Size in bytes of a `dtype` buffer of this shape, or `None` on overflow.
    #[must_use]
    pub fn num_bytes(&self, dtype: DType) -> Option<usize> {
        self.num_elements()?.checked_mul(dtype.size())
    }

    /// Shape with `n` inserted as the new leading dimension.
    #[must_use]
    pub fn prepend(&self, n: usize) -> Self {
        let mut dims = Vec::with_capacity(self.0.len() + 1);
        dims.push(n);
        dims.extend_from_slice(&self.0);
        Self(dims)
    }
}

impl From<&[usize]> for TensorShape {
    fn from(dims: &[usize]) -> Self {
        Self(dims.to_vec())
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

/// One dimension of a [`PartialShape`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    Known(usize),
    Unknown,
}

/// Shape that may be only partially known at dataset construction time.
///
/// `dims == None` means the rank itself is unknown.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartialShape {
    dims: Option<Vec<Dim>>,
}

impl PartialShape {
    #[must_use]
    pub fn new(dims: Vec<Dim>) -> Self {
        Self { dims: Some(dims) }
    }

    #[must_use]
    pub fn unknown_rank() -> Self {
        Self { dims: None }
    }

    #[must_use]
    pub fn dims(&self) -> Option<&[Dim]> {
        self.dims.as_deref()
    }

    /// `self` followed by `other`. Unknown rank on either side stays unknown.
    #[must_use]
    pub fn concatenate(&self, other: &Self) -> Self {
        match (&self.dims, &other.dims) {
            (Some(a), Some(b)) => {
                let mut dims = a.clone();
                dims.extend_from_slice(b);
                Self { dims: Some(dims) }
            }
            _ => Self::unknown_rank(),
        }
    }

    /// Whether a concrete tensor shape could belong to this partial shape.
    #[must_use]
    pub fn is_compatible_with(&self, shape: &TensorShape) -> bool {
        let Some(dims) = &self.dims else {
            return true;
        };
        dims.len() == shape.rank()
            && dims.iter().zip(shape.dims()).all(|(d, s)| match d {
                Dim::Known(k) => k == s,
                Dim::Unknown => true,
            })
    }
}

impl From<&TensorShape> for PartialShape {
    fn from(shape: &TensorShape) -> Self {
        Self::new(shape.dims().iter().copied().map(Dim::Known).collect())
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(dims) = &self.dims else {
            return f.write_str("<unknown>");
        };
        write!(f, "[")?;
        for (i, d) in dims.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            match d {
                Dim::Known(k) => write!(f, "{k}")?,
                Dim::Unknown => write!(f, "?")?,
            }
        }
        write!(f, "]")
    }
}

/// Rust scalar types that can be stored in a [`Tensor`].
pub trait TensorValue: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    fn write_le(self, out: &mut [u8]);
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_tensor_value {
    ($($t:ty => $dtype:ident),* $(,)?) => {
        $(
            impl TensorValue for $t {
                const DTYPE: DType = DType::$dtype;

                fn write_le(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_tensor_value!(u8 => U8, i32 => I32, i64 => I64, f32 => F32, f64 => F64);

impl TensorValue for bool {
    const DTYPE: DType = DType::Bool;

    fn write_le(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// A typed, shaped, contiguous buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    dtype: DType,
    shape: TensorShape,
    data: Vec<u8>,
}

impl Tensor {
    /// Wrap raw little-endian bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidTensor`] if `data` does not hold exactly
    /// `shape.num_elements()` values of `dtype`.
    pub fn from_bytes(dtype: DType, shape: TensorShape, data: Vec<u8>) -> Result<Self> {
        let Some(expected) = shape.num_bytes(dtype) else {
            bail!(BatchError::InvalidTensor(format!(
                "{dtype} tensor of shape {shape} is too large"
            )));
        };
        if data.len() != expected {
            bail!(BatchError::InvalidTensor(format!(
                "{} tensor of shape {shape} needs {expected} bytes, got {}",
                dtype,
                data.len()
            )));
        }
        Ok(Self { dtype, shape, data })
    }

    /// Build a tensor from typed values laid out in row-major order.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidTensor`] if `values.len()` does not match the shape.
    pub fn from_values<T: TensorValue>(shape: TensorShape, values: &[T]) -> Result<Self> {
        let Some(expected) = shape.num_elements() else {
            bail!(BatchError::InvalidTensor(format!("shape {shape} is too large")));
        };
        if values.len() != expected {
            bail!(BatchError::InvalidTensor(format!(
                "shape {shape} holds {expected} values, got {}",
                values.len()
            )));
        }
        let width = T::DTYPE.size();
        let mut data = vec![0u8; values.len() * width];
        for (v, out) in values.iter().zip(data.chunks_exact_mut(width)) {
            v.write_le(out);
        }
        Ok(Self {
            dtype: T::DTYPE,
            shape,
            data,
        })
    }

    #[must_use]
    pub fn scalar<T: TensorValue>(value: T) -> Self {
        let mut data = vec![0u8; T::DTYPE.size()];
        value.write_le(&mut data);
        Self {
            dtype: T::DTYPE,
            shape: TensorShape::scalar(),
            data,
        }
    }

    /// Zero-filled tensor whose buffer comes from `allocator`.
    ///
    /// Returns `None` when the allocator cannot provide the buffer.
    pub fn allocate(allocator: &dyn Allocator, dtype: DType, shape: TensorShape) -> Option<Self> {
        let bytes = shape.num_bytes(dtype)?;
        let data = allocator.allocate(bytes)?;
        debug_assert_eq!(data.len(), bytes);
        Some(Self { dtype, shape, data })
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Decode the buffer back into typed values.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidTensor`] if `T` does not match the tensor dtype.
    pub fn to_values<T: TensorValue>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            bail!(BatchError::InvalidTensor(format!(
                "cannot read {} tensor as {}",
                self.dtype,
                T::DTYPE
            )));
        }
        Ok(self
            .data
            .chunks_exact(self.dtype.size())
            .map(T::read_le)
            .collect())
    }
}

/// Move `element` into `slot`, the `index`-th slice of a batch buffer.
///
/// The element is consumed; its storage is released once the copy is done.
pub(crate) fn copy_element_to_slice(
    element: Tensor,
    batch_dtype: DType,
    slot: &mut [u8],
    component_index: usize,
    index: usize,
) -> Result<()> {
    if element.dtype != batch_dtype {
        bail!(BatchError::DTypeMismatch {
            component_index,
            index,
            expected: batch_dtype,
            actual: element.dtype,
        });
    }
    if element.data.len() != slot.len() {
        bail!(BatchError::InvalidTensor(format!(
            "element {index} of component {component_index} has {} bytes but its batch slice has {}",
            element.data.len(),
            slot.len()
        )));
    }
    slot.copy_from_slice(&element.data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::HeapAllocator;

    #[test]
    fn shape_display_and_prepend() {
        let s = TensorShape::new(vec![2, 3]);
        assert_eq!(s.to_string(), "[2,3]");
        assert_eq!(s.prepend(4).dims(), &[4, 2, 3]);
        assert_eq!(TensorShape::scalar().to_string(), "[]");
        assert_eq!(TensorShape::scalar().num_elements(), Some(1));
    }

    #[test]
    fn element_count_overflow_is_detected() {
        let huge = TensorShape::new(vec![usize::MAX / 2 + 1, 2]);
        assert_eq!(huge.num_elements(), None);
        assert!(Tensor::from_bytes(DType::U8, huge.clone(), Vec::new()).is_err());
        assert!(Tensor::allocate(&HeapAllocator, DType::U8, huge).is_none());

        // A zero dimension anywhere wins over the overflowing ones.
        let empty = TensorShape::new(vec![2, usize::MAX / 2 + 1, 0]);
        assert_eq!(empty.num_elements(), Some(0));
        assert_eq!(empty.num_bytes(DType::F64), Some(0));
        assert_eq!(TensorShape::new(vec![usize::MAX]).num_bytes(DType::I64), None);
    }

    #[test]
    fn partial_shape_concatenate() {
        let batch = PartialShape::new(vec![Dim::Unknown]);
        let inner = PartialShape::new(vec![Dim::Known(3)]);
        assert_eq!(batch.concatenate(&inner).to_string(), "[?,3]");
        assert_eq!(
            batch.concatenate(&PartialShape::unknown_rank()),
            PartialShape::unknown_rank()
        );
    }

    #[test]
    fn partial_shape_compatibility() {
        let p = PartialShape::new(vec![Dim::Unknown, Dim::Known(2)]);
        assert!(p.is_compatible_with(&TensorShape::new(vec![7, 2])));
        assert!(!p.is_compatible_with(&TensorShape::new(vec![7, 3])));
        assert!(!p.is_compatible_with(&TensorShape::new(vec![2])));
        assert!(PartialShape::unknown_rank().is_compatible_with(&TensorShape::scalar()));
    }

    #[test]
    fn values_survive_tensor_encoding() {
        let t = Tensor::from_values(TensorShape::new(vec![2, 2]), &[1.5f32, -2.0, 0.0, 8.25]).unwrap();
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.as_bytes().len(), 16);
        assert_eq!(t.to_values::<f32>().unwrap(), vec![1.5, -2.0, 0.0, 8.25]);
        assert!(t.to_values::<i32>().is_err());
    }

    #[test]
    fn from_values_rejects_wrong_length() {
        let err = Tensor::from_values(TensorShape::new(vec![3]), &[1i64, 2]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BatchError>(),
            Some(BatchError::InvalidTensor(_))
        ));
    }

    #[test]
    fn allocate_zero_fills() {
        let t = Tensor::allocate(&HeapAllocator, DType::I64, TensorShape::new(vec![3])).unwrap();
        assert_eq!(t.to_values::<i64>().unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn copy_checks_dtype() {
        let mut slot = [0u8; 8];
        let err = copy_element_to_slice(Tensor::scalar(1i32), DType::I64, &mut slot, 0, 2).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BatchError>(),
            Some(BatchError::DTypeMismatch { index: 2, .. })
        ));

        copy_element_to_slice(Tensor::scalar(9i64), DType::I64, &mut slot, 0, 0).unwrap();
        assert_eq!(i64::from_le_bytes(slot), 9);
    }
}
