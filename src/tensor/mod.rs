pub mod buffer;

pub use buffer::Buffer;

use crate::error::{Error, Result};

/// Shape of a tensor
pub type Shape = Vec<usize>;

/// Element types carried on graph edges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Float32,
    Int32,
    Uint8,
}

impl DataType {
    /// Get the size in bytes
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::Float32 => 4,
            DataType::Int32 => 4,
            DataType::Uint8 => 1,
        }
    }
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Float32
    }
}

/// Where a tensor's bytes live. Engine-allocated pool tensors are always
/// `Host`; `Device` exists for the boundary contract with an external
/// compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    Host,
    Device,
}

impl Default for MemoryType {
    fn default() -> Self {
        MemoryType::Host
    }
}

fn element_count(shape: &[usize]) -> Result<usize> {
    if shape.is_empty() {
        return Err(Error::InvalidShape("shape must not be empty".to_string()));
    }
    let mut count = 1usize;
    for &dim in shape {
        if dim == 0 {
            return Err(Error::InvalidShape(format!(
                "shape {:?} contains a zero dimension",
                shape
            )));
        }
        count = count.checked_mul(dim).ok_or_else(|| {
            Error::InvalidShape(format!("shape {:?} overflows element count", shape))
        })?;
    }
    Ok(count)
}

/// A sized, typed memory region plus its shape descriptor; the data element
/// carried on every edge of the graph.
///
/// The tensor owns its buffer exclusively. Producers and consumers never see
/// the tensor itself across the queue boundary, only [`TensorView`] /
/// [`TensorViewMut`] descriptors.
#[derive(Debug)]
pub struct Tensor {
    shape: Shape,
    data_type: DataType,
    mem_type: MemoryType,
    len: usize,
    buffer: Buffer,
}

impl Tensor {
    /// Allocate a host tensor of `Float32` elements.
    pub fn new(shape: &[usize]) -> Result<Self> {
        Self::with_type(shape, DataType::Float32)
    }

    /// Allocate a host tensor with the given element type.
    pub fn with_type(shape: &[usize], data_type: DataType) -> Result<Self> {
        let len = element_count(shape)?;
        let buffer = Buffer::new(len * data_type.size_in_bytes())?;
        Ok(Self {
            shape: shape.to_vec(),
            data_type,
            mem_type: MemoryType::Host,
            len,
            buffer,
        })
    }

    /// Allocate a `Float32` tensor initialized from `values`.
    pub fn from_f32(shape: &[usize], values: &[f32]) -> Result<Self> {
        let mut tensor = Self::new(shape)?;
        if values.len() != tensor.len {
            return Err(Error::InvalidShape(format!(
                "shape {:?} holds {} elements, got {} values",
                shape,
                tensor.len,
                values.len()
            )));
        }
        tensor.view_mut().as_f32_mut()?.copy_from_slice(values);
        Ok(tensor)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn mem_type(&self) -> MemoryType {
        self.mem_type
    }

    /// Number of elements (product of the shape).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stable non-owning descriptor of this tensor.
    pub fn view(&self) -> TensorView<'_> {
        TensorView {
            shape: &self.shape,
            data: self.buffer.as_slice(),
            data_type: self.data_type,
            mem_type: self.mem_type,
        }
    }

    /// Mutable descriptor of this tensor.
    pub fn view_mut(&mut self) -> TensorViewMut<'_> {
        TensorViewMut {
            shape: &self.shape,
            data: self.buffer.as_slice_mut(),
            data_type: self.data_type,
            mem_type: self.mem_type,
        }
    }

    /// Copy the payload of `src` into this tensor.
    ///
    /// Shape, element type and memory type must match exactly; a mismatch
    /// here means a build-time check was bypassed and is not recoverable at
    /// this layer.
    pub fn copy_from(&mut self, src: &TensorView<'_>) -> Result<()> {
        check_compatible(
            &self.shape,
            self.data_type,
            self.mem_type,
            src.shape,
            src.data_type,
            src.mem_type,
        )?;
        self.buffer.as_slice_mut().copy_from_slice(src.data);
        Ok(())
    }

    /// Copy this tensor's payload into `dst`.
    pub fn copy_to(&self, dst: &mut TensorViewMut<'_>) -> Result<()> {
        check_compatible(
            &self.shape,
            self.data_type,
            self.mem_type,
            dst.shape,
            dst.data_type,
            dst.mem_type,
        )?;
        dst.data.copy_from_slice(self.buffer.as_slice());
        Ok(())
    }
}

fn check_compatible(
    shape: &[usize],
    data_type: DataType,
    mem_type: MemoryType,
    other_shape: &[usize],
    other_data_type: DataType,
    other_mem_type: MemoryType,
) -> Result<()> {
    if shape != other_shape {
        return Err(Error::ShapeMismatch {
            expected: shape.to_vec(),
            actual: other_shape.to_vec(),
        });
    }
    if data_type != other_data_type {
        return Err(Error::DataTypeMismatch {
            expected: data_type,
            actual: other_data_type,
        });
    }
    if mem_type != other_mem_type {
        return Err(Error::MemoryTypeMismatch {
            expected: mem_type,
            actual: other_mem_type,
        });
    }
    Ok(())
}

/// Stable, non-owning read view of a tensor: shape, bytes, element type and
/// memory type. This is what crosses the queue boundary and what user tasks
/// receive as inputs.
#[derive(Clone, Copy)]
pub struct TensorView<'a> {
    shape: &'a [usize],
    data: &'a [u8],
    data_type: DataType,
    mem_type: MemoryType,
}

impl<'a> TensorView<'a> {
    pub fn shape(&self) -> &[usize] {
        self.shape
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn mem_type(&self) -> MemoryType {
        self.mem_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data
    }

    /// Reinterpret the payload as `f32` elements.
    pub fn as_f32(&self) -> Result<&'a [f32]> {
        self.check_type(DataType::Float32)?;
        // Buffers are 64-byte aligned and sized to a whole element count.
        Ok(unsafe {
            std::slice::from_raw_parts(self.data.as_ptr() as *const f32, self.data.len() / 4)
        })
    }

    /// Reinterpret the payload as `i32` elements.
    pub fn as_i32(&self) -> Result<&'a [i32]> {
        self.check_type(DataType::Int32)?;
        Ok(unsafe {
            std::slice::from_raw_parts(self.data.as_ptr() as *const i32, self.data.len() / 4)
        })
    }

    /// Reinterpret the payload as `u8` elements.
    pub fn as_u8(&self) -> Result<&'a [u8]> {
        self.check_type(DataType::Uint8)?;
        Ok(self.data)
    }

    fn check_type(&self, expected: DataType) -> Result<()> {
        if self.data_type != expected {
            return Err(Error::DataTypeMismatch {
                expected,
                actual: self.data_type,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for TensorView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorView")
            .field("shape", &self.shape)
            .field("data_type", &self.data_type)
            .field("mem_type", &self.mem_type)
            .finish()
    }
}

/// Mutable counterpart of [`TensorView`]; what user tasks receive as
/// outputs. The task must write every output exactly once and must not
/// retain the view past return.
pub struct TensorViewMut<'a> {
    shape: &'a [usize],
    data: &'a mut [u8],
    data_type: DataType,
    mem_type: MemoryType,
}

impl<'a> TensorViewMut<'a> {
    pub fn shape(&self) -> &[usize] {
        self.shape
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn mem_type(&self) -> MemoryType {
        self.mem_type
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.data
    }

    /// Reinterpret the payload as mutable `f32` elements.
    pub fn as_f32_mut(&mut self) -> Result<&mut [f32]> {
        if self.data_type != DataType::Float32 {
            return Err(Error::DataTypeMismatch {
                expected: DataType::Float32,
                actual: self.data_type,
            });
        }
        Ok(unsafe {
            std::slice::from_raw_parts_mut(self.data.as_mut_ptr() as *mut f32, self.data.len() / 4)
        })
    }

    /// Reinterpret the payload as mutable `i32` elements.
    pub fn as_i32_mut(&mut self) -> Result<&mut [i32]> {
        if self.data_type != DataType::Int32 {
            return Err(Error::DataTypeMismatch {
                expected: DataType::Int32,
                actual: self.data_type,
            });
        }
        Ok(unsafe {
            std::slice::from_raw_parts_mut(self.data.as_mut_ptr() as *mut i32, self.data.len() / 4)
        })
    }

    /// Downgrade to a read view.
    pub fn as_view(&self) -> TensorView<'_> {
        TensorView {
            shape: self.shape,
            data: self.data,
            data_type: self.data_type,
            mem_type: self.mem_type,
        }
    }
}

impl std::fmt::Debug for TensorViewMut<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorViewMut")
            .field("shape", &self.shape)
            .field("data_type", &self.data_type)
            .field("mem_type", &self.mem_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_from_shape() {
        let t = Tensor::new(&[2, 3]).unwrap();
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.len(), 6);
        assert_eq!(t.data_type(), DataType::Float32);
        assert_eq!(t.mem_type(), MemoryType::Host);
        assert!(t.view().as_f32().unwrap().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(matches!(Tensor::new(&[]), Err(Error::InvalidShape(_))));
        assert!(matches!(Tensor::new(&[4, 0]), Err(Error::InvalidShape(_))));
    }

    #[test]
    fn copy_roundtrip() {
        let src = Tensor::from_f32(&[4], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut dst = Tensor::new(&[4]).unwrap();
        dst.copy_from(&src.view()).unwrap();
        assert_eq!(dst.view().as_f32().unwrap(), &[1.0, 2.0, 3.0, 4.0]);

        let mut out = Tensor::new(&[4]).unwrap();
        dst.copy_to(&mut out.view_mut()).unwrap();
        assert_eq!(out.view().as_f32().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn copy_checks_shape() {
        let src = Tensor::new(&[4]).unwrap();
        let mut dst = Tensor::new(&[2, 2]).unwrap();
        let err = dst.copy_from(&src.view()).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn copy_checks_data_type() {
        let src = Tensor::with_type(&[4], DataType::Int32).unwrap();
        let mut dst = Tensor::new(&[4]).unwrap();
        let err = dst.copy_from(&src.view()).unwrap_err();
        assert!(matches!(err, Error::DataTypeMismatch { .. }));
    }

    #[test]
    fn typed_view_checks_element_type() {
        let t = Tensor::with_type(&[4], DataType::Int32).unwrap();
        assert!(t.view().as_f32().is_err());
        assert!(t.view().as_i32().is_ok());
    }
}
