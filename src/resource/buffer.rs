//! N-dimensional data buffers exchanged between tasks.

use anyhow::Result;

use crate::Error;

/// A fixed-shape, N-dimensional block of `f32` data.
///
/// Buffers are allocated by a [`ResourceManager`](crate::ResourceManager) and
/// then travel through the relation queues by value: the producing worker owns
/// a buffer while filling it, the data queue owns it in transit, and the
/// consuming worker owns it while reading. Returning a buffer to the recycle
/// queue hands ownership back to the producer side. There is no shared
/// mutable aliasing at any point in the lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    dims: Vec<usize>,
    data: Vec<f32>,
}

impl Buffer {
    /// Create a new zero-initialized buffer with the given shape.
    /// # Errors
    /// - Fails with [`Error::ResourceAllocation`] if the shape is empty or has a zero extent.
    pub fn new(dims: &[usize]) -> Result<Self> {
        if dims.is_empty() || dims.contains(&0) {
            return Err(Error::ResourceAllocation(format!("invalid buffer shape {dims:?}")).into());
        }
        let len = dims.iter().product();
        Ok(Buffer {
            dims: dims.to_vec(),
            data: vec![0.0; len],
        })
    }

    /// The extent of each dimension.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of dimensions of this buffer.
    pub fn n_dims(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the buffer holds no elements. Cannot happen for buffers
    /// obtained through a resource manager.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read access to the raw element storage, in row-major order.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Write access to the raw element storage, in row-major order.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Overwrite every element with `value`.
    pub fn fill_with_value(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Copy `src` into the buffer. Excess elements in `src` are ignored,
    /// missing elements leave the tail untouched.
    pub fn write_data(&mut self, src: &[f32]) {
        let n = src.len().min(self.data.len());
        self.data[..n].copy_from_slice(&src[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_shape_and_fill() {
        let mut buffer = Buffer::new(&[2, 3]).unwrap();
        assert_eq!(buffer.n_dims(), 2);
        assert_eq!(buffer.len(), 6);
        buffer.fill_with_value(1.5);
        assert!(buffer.data().iter().all(|&x| x == 1.5));
    }

    #[test]
    fn zero_extent_is_rejected() {
        let err = Buffer::new(&[4, 0]).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ResourceAllocation(_))));
    }

    #[test]
    fn short_write_keeps_tail() {
        let mut buffer = Buffer::new(&[4]).unwrap();
        buffer.fill_with_value(9.0);
        buffer.write_data(&[1.0, 2.0]);
        assert_eq!(buffer.data(), &[1.0, 2.0, 9.0, 9.0]);
    }
}
