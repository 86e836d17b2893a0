//! Reading NumPy `.npz` archives.
//!
//! An `.npz` file is a zip archive of `.npy` arrays. Only C-ordered arrays of
//! plain numeric dtypes are supported; that covers the satellite batches the
//! pipeline ingests (band stacks plus a label vector).

use crate::error::TransformError;
use std::io::{Read, Seek};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Element type of an `.npy` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl DType {
    /// Parse the kind+size part of a descr, e.g. `f4` or `i8`.
    fn parse(code: &str) -> Option<Self> {
        Some(match code {
            "b1" => DType::Bool,
            "i1" => DType::I8,
            "u1" => DType::U8,
            "i2" => DType::I16,
            "u2" => DType::U16,
            "i4" => DType::I32,
            "u4" => DType::U32,
            "i8" => DType::I64,
            "u8" => DType::U64,
            "f4" => DType::F32,
            "f8" => DType::F64,
            _ => return None,
        })
    }

    pub fn size(self) -> usize {
        match self {
            DType::Bool | DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }
}

/// Values of one sample, widened to the TFRecord feature types.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValues {
    Int(Vec<i64>),
    Float(Vec<f32>),
}

/// One array from an archive.
#[derive(Debug, Clone)]
pub struct NpyArray {
    /// Array name (the member file name without `.npy`)
    pub name: String,
    pub dtype: DType,
    pub big_endian: bool,
    pub shape: Vec<usize>,
    data: Vec<u8>,
}

impl NpyArray {
    /// Parse the contents of a `.npy` file.
    pub fn parse(name: &str, bytes: &[u8]) -> Result<Self, TransformError> {
        let fail = |reason: &str| TransformError::ArrayHeader {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if bytes.len() < 10 || !bytes.starts_with(NPY_MAGIC) {
            return Err(fail("missing NPY magic"));
        }

        let major = bytes[6];
        let (header_len, header_start) = match major {
            1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
            2 | 3 => {
                if bytes.len() < 12 {
                    return Err(fail("truncated header"));
                }
                (
                    u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                    12,
                )
            }
            _ => return Err(fail(&format!("unsupported format version {}", major))),
        };

        let data_start = header_start + header_len;
        if bytes.len() < data_start {
            return Err(fail("truncated header"));
        }
        let header = std::str::from_utf8(&bytes[header_start..data_start])
            .map_err(|_| fail("header is not text"))?;

        let descr = dict_value(header, "descr")
            .and_then(unquote)
            .ok_or_else(|| fail("no descr"))?;
        let (big_endian, code) = match descr.split_at_checked(1) {
            Some(("<", code)) | Some(("|", code)) | Some(("=", code)) => (false, code),
            Some((">", code)) => (true, code),
            _ => return Err(fail(&format!("bad descr '{}'", descr))),
        };
        let dtype = DType::parse(code).ok_or_else(|| fail(&format!("unsupported dtype '{}'", descr)))?;

        match dict_value(header, "fortran_order") {
            Some(v) if v.starts_with("False") => {}
            Some(_) => return Err(fail("Fortran-ordered arrays are not supported")),
            None => return Err(fail("no fortran_order")),
        }

        let shape = dict_value(header, "shape")
            .and_then(parse_shape)
            .ok_or_else(|| fail("bad shape"))?;
        if shape.is_empty() {
            return Err(fail("scalar arrays have no sample dimension"));
        }

        let expected = shape
            .iter()
            .try_fold(dtype.size(), |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| fail(&format!("shape {:?} is too large", shape)))?;
        let data = &bytes[data_start..];
        if data.len() != expected {
            return Err(fail(&format!(
                "expected {} data bytes for shape {:?}, found {}",
                expected,
                shape,
                data.len()
            )));
        }

        Ok(Self {
            name: name.to_string(),
            dtype,
            big_endian,
            shape,
            data: data.to_vec(),
        })
    }

    /// Length of the leading (sample) dimension.
    pub fn samples(&self) -> usize {
        self.shape[0]
    }

    /// Number of elements in one sample.
    pub fn sample_len(&self) -> usize {
        self.shape[1..].iter().product()
    }

    /// Flattened values of sample `i`.
    pub fn sample(&self, i: usize) -> SampleValues {
        let size = self.dtype.size();
        let stride = self.sample_len() * size;
        let chunk = &self.data[i * stride..(i + 1) * stride];
        let elements = chunk.chunks_exact(size);

        if self.dtype.is_float() {
            SampleValues::Float(elements.map(|b| self.read_f64(b) as f32).collect())
        } else {
            SampleValues::Int(elements.map(|b| self.read_i64(b)).collect())
        }
    }

    fn ordered<const N: usize>(&self, b: &[u8]) -> [u8; N] {
        let mut buf = [0u8; N];
        buf.copy_from_slice(b);
        if self.big_endian {
            buf.reverse();
        }
        buf
    }

    fn read_i64(&self, b: &[u8]) -> i64 {
        match self.dtype {
            DType::Bool => (b[0] != 0) as i64,
            DType::I8 => b[0] as i8 as i64,
            DType::U8 => b[0] as i64,
            DType::I16 => i16::from_le_bytes(self.ordered(b)) as i64,
            DType::U16 => u16::from_le_bytes(self.ordered(b)) as i64,
            DType::I32 => i32::from_le_bytes(self.ordered(b)) as i64,
            DType::U32 => u32::from_le_bytes(self.ordered(b)) as i64,
            DType::I64 => i64::from_le_bytes(self.ordered(b)),
            // int64 features cannot hold the top half of u64
            DType::U64 => u64::from_le_bytes(self.ordered(b)) as i64,
            DType::F32 | DType::F64 => self.read_f64(b) as i64,
        }
    }

    fn read_f64(&self, b: &[u8]) -> f64 {
        match self.dtype {
            DType::F32 => f32::from_le_bytes(self.ordered(b)) as f64,
            DType::F64 => f64::from_le_bytes(self.ordered(b)),
            _ => self.read_i64(b) as f64,
        }
    }
}

/// Raw text of the value for `key` in a Python dict literal.
fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("'{}':", key);
    let start = header.find(&needle)? + needle.len();
    Some(header[start..].trim_start())
}

fn unquote(value: &str) -> Option<&str> {
    let rest = value.strip_prefix('\'')?;
    let end = rest.find('\'')?;
    Some(&rest[..end])
}

fn parse_shape(value: &str) -> Option<Vec<usize>> {
    let rest = value.strip_prefix('(')?;
    let end = rest.find(')')?;
    rest[..end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}

/// Read every `.npy` member of an archive, sorted by name.
pub fn read_npz<R: Read + Seek>(reader: R) -> Result<Vec<NpyArray>, TransformError> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let mut arrays = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut member = archive.by_index(i)?;
        let Some(name) = member.name().strip_suffix(".npy").map(str::to_string) else {
            continue;
        };
        let mut bytes = Vec::with_capacity(member.size() as usize);
        member.read_to_end(&mut bytes)?;
        arrays.push(NpyArray::parse(&name, &bytes)?);
    }

    if arrays.is_empty() {
        return Err(TransformError::Empty);
    }
    arrays.sort_by(|a, b| a.name.cmp(&b.name));

    let expected = arrays[0].samples();
    if expected == 0 {
        return Err(TransformError::ArrayHeader {
            name: arrays[0].name.clone(),
            reason: "array has no samples".to_string(),
        });
    }
    if let Some(bad) = arrays.iter().find(|a| a.samples() != expected) {
        return Err(TransformError::SampleCount {
            name: bad.name.clone(),
            expected,
            found: bad.samples(),
        });
    }

    Ok(arrays)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_npy_header() {
        let bytes = npy("<f4", &[3, 2, 2], &f32_bytes(&[0.0; 12]));
        let array = NpyArray::parse("bands", &bytes).unwrap();
        assert_eq!(array.dtype, DType::F32);
        assert!(!array.big_endian);
        assert_eq!(array.shape, vec![3, 2, 2]);
        assert_eq!(array.samples(), 3);
        assert_eq!(array.sample_len(), 4);
    }

    #[test]
    fn test_sample_values() {
        let bytes = npy("<i8", &[3], &i64_bytes(&[7, -1, 2]));
        let array = NpyArray::parse("label", &bytes).unwrap();
        assert_eq!(array.sample(1), SampleValues::Int(vec![-1]));

        let bytes = npy("<f4", &[2, 2], &f32_bytes(&[1.0, 2.0, 3.0, 4.0]));
        let array = NpyArray::parse("x", &bytes).unwrap();
        assert_eq!(array.sample(1), SampleValues::Float(vec![3.0, 4.0]));
    }

    #[test]
    fn test_big_endian_values() {
        let data: Vec<u8> = [1i32, 256].iter().flat_map(|v| v.to_be_bytes()).collect();
        let bytes = npy(">i4", &[2], &data);
        let array = NpyArray::parse("x", &bytes).unwrap();
        assert!(array.big_endian);
        assert_eq!(array.sample(0), SampleValues::Int(vec![1]));
        assert_eq!(array.sample(1), SampleValues::Int(vec![256]));
    }

    #[test]
    fn test_rejects_bad_arrays() {
        assert!(NpyArray::parse("x", b"not an array").is_err());

        let bytes = npy("<c16", &[1], &[0u8; 16]);
        assert!(NpyArray::parse("x", &bytes).is_err());

        let bytes = npy("<f4", &[3], &f32_bytes(&[1.0]));
        assert!(NpyArray::parse("x", &bytes).is_err());

        let mut bytes = npy("<f4", &[1], &f32_bytes(&[1.0]));
        let pos = bytes.windows(5).position(|w| w == b"False").unwrap();
        bytes[pos..pos + 5].copy_from_slice(b"True ");
        assert!(NpyArray::parse("x", &bytes).is_err());
    }

    #[test]
    fn test_rejects_oversized_shape() {
        let bytes = npy("<f4", &[1 << 62, 4], &f32_bytes(&[1.0]));
        match NpyArray::parse("bands", &bytes) {
            Err(TransformError::ArrayHeader { name, reason }) => {
                assert_eq!(name, "bands");
                assert!(reason.contains("too large"));
            }
            other => panic!("expected header error, got {:?}", other.map(|a| a.shape)),
        }
    }

    #[test]
    fn test_read_npz() {
        let arrays = read_npz(Cursor::new(sample_batch(5))).unwrap();
        let names: Vec<_> = arrays.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["bands", "label"]);
        assert!(arrays.iter().all(|a| a.samples() == 5));
    }

    #[test]
    fn test_read_npz_sample_mismatch() {
        let data = npz(&[
            ("a", npy("<i8", &[2], &i64_bytes(&[1, 2]))),
            ("b", npy("<i8", &[3], &i64_bytes(&[1, 2, 3]))),
        ]);
        assert!(matches!(
            read_npz(Cursor::new(data)),
            Err(TransformError::SampleCount { .. })
        ));
    }

    #[test]
    fn test_read_npz_rejects_garbage_and_empty() {
        assert!(matches!(
            read_npz(Cursor::new(b"plain text".to_vec())),
            Err(TransformError::Archive(_))
        ));
        assert!(matches!(read_npz(Cursor::new(npz(&[]))), Err(TransformError::Empty)));
    }
}
