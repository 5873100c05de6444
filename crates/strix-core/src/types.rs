//! Tensor element types, layouts, and dimension helpers.

/// Marker for a dimension the model leaves unresolved until run time.
pub const UNRESOLVED_DIM: i64 = -1;

/// Rank expected by image-size gear validation.
pub const IMAGE_RANK: usize = 4;

/// Element type of a tensor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DataType {
    Float32,
    Float16,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Bool,
    /// Variable-length strings; elements are stored as offset words, see
    /// the string packing helpers in `strings`.
    String,
}

impl DataType {
    /// Byte width of one element.  Strings count as one offset word.
    pub fn byte_width(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 | Self::Bool => 1,
            Self::Float16 | Self::Int16 | Self::UInt16 => 2,
            Self::Float32 | Self::Int32 | Self::UInt32 => 4,
            Self::Float64 | Self::Int64 | Self::UInt64 | Self::String => 8,
        }
    }
}

/// Memory layout of a tensor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TensorFormat {
    Nchw,
    Nhwc,
    /// No layout semantics; plain N-dimensional data.
    Nd,
}

impl TensorFormat {
    /// Axis indices of the height and width dims for rank-4 shapes.
    pub fn hw_axes(self) -> Option<(usize, usize)> {
        match self {
            Self::Nhwc => Some((1, 2)),
            Self::Nchw => Some((2, 3)),
            Self::Nd => None,
        }
    }
}

/// Element count of a shape.  Any non-positive dimension collapses the
/// count to zero, matching how slot sizes are reset when a shape is still
/// unresolved.
pub fn element_count(dims: &[i64]) -> usize {
    let mut count: usize = 1;
    for &d in dims {
        if d <= 0 {
            return 0;
        }
        count = count.saturating_mul(d as usize);
    }
    count
}

/// Whether any dimension is unresolved.
pub fn has_unresolved_dim(dims: &[i64]) -> bool {
    dims.iter().any(|&d| d < 0)
}

/// Byte size of a shape with the given element type.
pub fn byte_size(dims: &[i64], dtype: DataType) -> usize {
    element_count(dims).saturating_mul(dtype.byte_width())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_count_handles_unresolved() {
        assert_eq!(element_count(&[2, 3, 4]), 24);
        assert_eq!(element_count(&[2, UNRESOLVED_DIM, 4]), 0);
        assert_eq!(element_count(&[]), 1);
    }

    #[test]
    fn hw_axes_by_format() {
        assert_eq!(TensorFormat::Nhwc.hw_axes(), Some((1, 2)));
        assert_eq!(TensorFormat::Nchw.hw_axes(), Some((2, 3)));
        assert_eq!(TensorFormat::Nd.hw_axes(), None);
    }

    #[test]
    fn byte_widths() {
        assert_eq!(DataType::Float32.byte_width(), 4);
        assert_eq!(DataType::Float16.byte_width(), 2);
        assert_eq!(DataType::UInt8.byte_width(), 1);
        assert_eq!(DataType::String.byte_width(), 8);
    }
}
