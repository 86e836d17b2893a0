//! TFRecord framing and `tf.train.Example` messages.
//!
//! Each record on disk is:
//!
//! ```text
//! u64     length        (little-endian)
//! u32     masked_crc32c(length)
//! [u8]    data
//! u32     masked_crc32c(data)
//! ```

use std::collections::BTreeMap;
use std::io::{self, Write};

const CRC_MASK_DELTA: u32 = 0xa282_ead8;

/// Masked CRC32-C as used by TFRecord.
pub fn masked_crc(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(CRC_MASK_DELTA)
}

/// `tf.train.Example`
#[derive(Clone, PartialEq, prost::Message)]
pub struct Example {
    #[prost(message, optional, tag = "1")]
    pub features: Option<Features>,
}

/// `tf.train.Features`. Ordered so that encoding is deterministic.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Features {
    #[prost(btree_map = "string, message", tag = "1")]
    pub feature: BTreeMap<String, Feature>,
}

/// `tf.train.Feature`
#[derive(Clone, PartialEq, prost::Message)]
pub struct Feature {
    #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
    pub kind: Option<feature::Kind>,
}

pub mod feature {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        BytesList(super::BytesList),
        #[prost(message, tag = "2")]
        FloatList(super::FloatList),
        #[prost(message, tag = "3")]
        Int64List(super::Int64List),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub value: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub value: Vec<f32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub value: Vec<i64>,
}

impl Feature {
    pub fn floats(value: Vec<f32>) -> Self {
        Self {
            kind: Some(feature::Kind::FloatList(FloatList { value })),
        }
    }

    pub fn int64s(value: Vec<i64>) -> Self {
        Self {
            kind: Some(feature::Kind::Int64List(Int64List { value })),
        }
    }
}

impl Example {
    pub fn new(feature: BTreeMap<String, Feature>) -> Self {
        Self {
            features: Some(Features { feature }),
        }
    }
}

/// Sequential TFRecord writer.
pub struct TfRecordWriter<W: Write> {
    inner: W,
    records: usize,
}

impl<W: Write> TfRecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, records: 0 }
    }

    pub fn write_record(&mut self, data: &[u8]) -> io::Result<()> {
        let len = (data.len() as u64).to_le_bytes();
        self.inner.write_all(&len)?;
        self.inner.write_all(&masked_crc(&len).to_le_bytes())?;
        self.inner.write_all(data)?;
        self.inner.write_all(&masked_crc(data).to_le_bytes())?;
        self.records += 1;
        Ok(())
    }

    pub fn write_example(&mut self, example: &Example) -> io::Result<()> {
        self.write_record(&prost::Message::encode_to_vec(example))
    }

    pub fn records(&self) -> usize {
        self.records
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Split a TFRecord buffer into record payloads, verifying both checksums.
pub fn read_records(mut buf: &[u8]) -> io::Result<Vec<&[u8]>> {
    let corrupt = |what: &str| io::Error::new(io::ErrorKind::InvalidData, what.to_string());
    let mut records = Vec::new();

    while !buf.is_empty() {
        if buf.len() < 12 {
            return Err(corrupt("truncated record header"));
        }
        let (len_bytes, rest) = buf.split_at(8);
        let (len_crc, rest) = rest.split_at(4);
        if masked_crc(len_bytes).to_le_bytes() != len_crc {
            return Err(corrupt("length checksum mismatch"));
        }

        let len = u64::from_le_bytes(len_bytes.try_into().map_err(|_| corrupt("bad length"))?) as usize;
        if rest.len() < len + 4 {
            return Err(corrupt("truncated record"));
        }
        let (data, rest) = rest.split_at(len);
        let (data_crc, rest) = rest.split_at(4);
        if masked_crc(data).to_le_bytes() != data_crc {
            return Err(corrupt("data checksum mismatch"));
        }

        records.push(data);
        buf = rest;
    }

    Ok(records)
}
