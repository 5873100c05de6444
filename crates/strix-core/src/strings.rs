//! String tensor packing.
//!
//! A string tensor with N elements stores its host payload as a packed
//! buffer: N+1 little-endian `u64` offsets followed by the concatenated
//! string bytes.  `offsets[i]` is the byte position of element i within the
//! content region and `offsets[N]` equals the total content length, so every
//! element's span is `offsets[i]..offsets[i + 1]` without a separate length
//! table.

use crate::error::{EngineError, Result};
use crate::tensor::Tensor;
use crate::types::DataType;

const OFFSET_WIDTH: usize = std::mem::size_of::<u64>();

fn check_string_tensor(tensor: &Tensor) -> Result<usize> {
    if tensor.dtype() != DataType::String {
        return Err(EngineError::Config(format!(
            "string content requested on a {:?} tensor",
            tensor.dtype()
        )));
    }
    Ok(tensor.element_count())
}

/// Packs `items` into the tensor's host buffer, replacing its contents.
pub fn set_string_tensor_content(tensor: &Tensor, items: &[&str]) -> Result<()> {
    let count = check_string_tensor(tensor)?;
    if items.len() != count {
        return Err(EngineError::Shape(format!(
            "string tensor holds {count} elements, got {} items",
            items.len()
        )));
    }
    let content_len: usize = items.iter().map(|s| s.len()).sum();
    let mut packed = Vec::with_capacity((count + 1) * OFFSET_WIDTH + content_len);
    let mut offset = 0u64;
    for item in items {
        packed.extend_from_slice(&offset.to_le_bytes());
        offset += item.len() as u64;
    }
    packed.extend_from_slice(&offset.to_le_bytes());
    for item in items {
        packed.extend_from_slice(item.as_bytes());
    }
    tensor.write_host(|bytes| {
        bytes.clear();
        bytes.extend_from_slice(&packed);
    })
}

/// Unpacks the tensor's host buffer into the concatenated content bytes and
/// the N+1 offset table; the final offset equals the content length.
pub fn get_string_tensor_content(tensor: &Tensor) -> Result<(Vec<u8>, Vec<u64>)> {
    let count = check_string_tensor(tensor)?;
    let table_len = (count + 1) * OFFSET_WIDTH;
    tensor.read_host(|bytes| {
        if bytes.len() < table_len {
            return Err(EngineError::Consistency(format!(
                "string tensor buffer holds {} bytes, offset table needs {table_len}",
                bytes.len()
            )));
        }
        let offsets: Vec<u64> = bytes[..table_len]
            .chunks_exact(OFFSET_WIDTH)
            .map(|c| {
                let mut word = [0u8; OFFSET_WIDTH];
                word.copy_from_slice(c);
                u64::from_le_bytes(word)
            })
            .collect();
        let content = bytes[table_len..].to_vec();
        if offsets[count] != content.len() as u64 {
            return Err(EngineError::Consistency(format!(
                "final offset {} disagrees with content length {}",
                offsets[count],
                content.len()
            )));
        }
        Ok((content, offsets))
    })?
}

/// Byte length of the packed content region (offsets excluded).
pub fn string_tensor_byte_size(tensor: &Tensor) -> Result<usize> {
    let count = check_string_tensor(tensor)?;
    let table_len = (count + 1) * OFFSET_WIDTH;
    let total = tensor.host_len()?;
    Ok(total.saturating_sub(table_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TensorFormat;

    #[test]
    fn round_trip_preserves_bytes_and_offsets() {
        let t = Tensor::create(&[3], DataType::String, TensorFormat::Nd);
        set_string_tensor_content(&t, &["alpha", "", "strix"]).unwrap();

        let (content, offsets) = get_string_tensor_content(&t).unwrap();
        assert_eq!(content, b"alphastrix");
        assert_eq!(offsets, vec![0, 5, 5, 10]);
        assert_eq!(offsets.len(), 4);
        assert_eq!(*offsets.last().unwrap(), content.len() as u64);
        assert_eq!(string_tensor_byte_size(&t).unwrap(), 10);
    }

    #[test]
    fn element_count_must_match() {
        let t = Tensor::create(&[2], DataType::String, TensorFormat::Nd);
        assert!(matches!(
            set_string_tensor_content(&t, &["only"]),
            Err(EngineError::Shape(_))
        ));
    }

    #[test]
    fn rejects_non_string_dtype() {
        let t = Tensor::create(&[2], DataType::Float32, TensorFormat::Nd);
        assert!(matches!(
            get_string_tensor_content(&t),
            Err(EngineError::Config(_))
        ));
    }
}
