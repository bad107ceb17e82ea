//! Feature-descriptor cache file (`*.mat`, `spec.md` §4.B): a 20-byte header
//! followed by `rows * stride` bytes of row-major data, all little-endian.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::FormatError;

const HEADER_LEN: usize = 20;

/// Header of a `.mat` file. `id` is `0` for a standalone file not tied to a
/// particular media row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixHeader {
    /// Owning media id, or 0 if standalone.
    pub id: u32,
    /// Number of rows.
    pub rows: i32,
    /// Number of columns.
    pub cols: i32,
    /// Element type tag, opaque to this format (caller-defined).
    pub element_type: i32,
    /// Bytes per row, `>= cols * element_size`.
    pub stride: i32,
}

/// A loaded matrix: header plus `rows * stride` bytes of row-major data.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    /// The parsed header.
    pub header: MatrixHeader,
    /// Row-major payload bytes, `data.len() == rows * stride`.
    pub data: Vec<u8>,
}

/// Serialize a matrix to its on-disk byte layout.
pub fn encode(matrix: &Matrix) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + matrix.data.len());
    out.write_u32::<LittleEndian>(matrix.header.id).unwrap();
    out.write_i32::<LittleEndian>(matrix.header.rows).unwrap();
    out.write_i32::<LittleEndian>(matrix.header.cols).unwrap();
    out.write_i32::<LittleEndian>(matrix.header.element_type).unwrap();
    out.write_i32::<LittleEndian>(matrix.header.stride).unwrap();
    out.extend_from_slice(&matrix.data);
    out
}

/// Parse a `.mat` file's bytes. A file shorter than its declared length is
/// `FormatError::Corrupt`, not fatal (`spec.md` §4.B, §8).
pub fn decode(bytes: &[u8], path: &std::path::Path) -> Result<Matrix, FormatError> {
    if bytes.len() < HEADER_LEN {
        return Err(FormatError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("header truncated: {} bytes", bytes.len()),
        });
    }
    let mut cursor = Cursor::new(bytes);
    let id = cursor.read_u32::<LittleEndian>().unwrap();
    let rows = cursor.read_i32::<LittleEndian>().unwrap();
    let cols = cursor.read_i32::<LittleEndian>().unwrap();
    let element_type = cursor.read_i32::<LittleEndian>().unwrap();
    let stride = cursor.read_i32::<LittleEndian>().unwrap();

    if rows < 0 || stride < 0 {
        return Err(FormatError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("negative rows/stride: rows={rows} stride={stride}"),
        });
    }
    let expected_len = rows as usize * stride as usize;
    let mut data = vec![0u8; expected_len];
    if cursor.read_exact(&mut data).is_err() {
        return Err(FormatError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("expected {expected_len} bytes of row data, file too short"),
        });
    }

    Ok(Matrix { header: MatrixHeader { id, rows, cols, element_type, stride }, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn sample() -> Matrix {
        Matrix {
            header: MatrixHeader { id: 7, rows: 2, cols: 4, element_type: 1, stride: 32 },
            data: (0..64u8).collect(),
        }
    }

    #[test]
    fn round_trips() {
        let m = sample();
        let bytes = encode(&m);
        let decoded = decode(&bytes, Path::new("x.mat")).unwrap();
        assert_eq!(decoded, m);
    }

    #[test]
    fn truncated_header_is_corrupt_not_fatal() {
        let err = decode(&[1, 2, 3], Path::new("x.mat")).unwrap_err();
        assert!(matches!(err, FormatError::Corrupt { .. }));
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let bytes = encode(&sample());
        let truncated = &bytes[..bytes.len() - 10];
        let err = decode(truncated, Path::new("x.mat")).unwrap_err();
        assert!(matches!(err, FormatError::Corrupt { .. }));
    }

    #[test]
    fn standalone_file_has_zero_id() {
        let mut m = sample();
        m.header.id = 0;
        let bytes = encode(&m);
        let decoded = decode(&bytes, Path::new("x.mat")).unwrap();
        assert_eq!(decoded.header.id, 0);
    }
}
