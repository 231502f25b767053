//! Fixed-layout record reading.

use std::io::Read;

use bytemuck::Pod;

use crate::error::{FormatError, Result};

/// Most bytes a size taken from a file header may reserve up front.
pub const MAX_PREALLOCATION: usize = 64 << 20;

/// Clamp a declared size to something safe to pass to `with_capacity`.
///
/// Buffers still grow past it while reading.
pub fn capacity_hint(declared: usize) -> usize {
    declared.min(MAX_PREALLOCATION)
}

/// Read as many bytes as the stream has, up to `buf.len()`.
///
/// Returns the number of bytes read, which is short only at end of stream.
pub fn read_fully<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Read one little-endian on-disk record.
///
/// Records are `#[repr(C)]` structs of explicitly sized fields without padding.
pub fn read_record<T: Pod, R: Read + ?Sized>(reader: &mut R) -> Result<T> {
    let mut buf = vec![0u8; std::mem::size_of::<T>()];
    let got = read_fully(reader, &mut buf)?;
    if got != buf.len() {
        return Err(FormatError::ShortRead {
            expected: buf.len(),
            got,
        });
    }
    Ok(bytemuck::pod_read_unaligned(&buf))
}

/// Read the remainder of a stream into memory, sized by a hint.
pub fn read_to_vec<R: Read + ?Sized>(reader: &mut R, size_hint: usize) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(capacity_hint(size_hint));
    reader.read_to_end(&mut data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_to_vec_ignores_bogus_hint() {
        let data = read_to_vec(&mut Cursor::new(vec![7u8; 10]), usize::MAX).unwrap();
        assert_eq!(data, vec![7u8; 10]);
        assert_eq!(capacity_hint(usize::MAX), MAX_PREALLOCATION);
        assert_eq!(capacity_hint(12), 12);
    }

    #[test]
    fn test_read_record_short() {
        let err = read_record::<u32, _>(&mut Cursor::new(vec![1u8, 2])).unwrap_err();
        assert!(matches!(err, FormatError::ShortRead { expected: 4, got: 2 }));
    }
}
