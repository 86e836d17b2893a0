//! Raw batch → processed artifact transformation.

mod npz;
mod tfrecord;

pub use npz::{read_npz, DType, NpyArray, SampleValues};
pub use tfrecord::{masked_crc, read_records, Example, Feature, TfRecordWriter};

#[cfg(test)]
pub(crate) use npz::test_support;

use crate::config::ProcessingConfig;
use crate::error::TransformError;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Turns a local raw file into a processed file in `out_dir`.
pub trait RawTransformer: Send + Sync {
    /// Transform `input`, writing `out_dir/output_name`. Returns the written path.
    fn transform(
        &self,
        input: &Path,
        out_dir: &Path,
        output_name: &str,
        assign_id: bool,
    ) -> Result<PathBuf, TransformError>;
}

/// Converts an `.npz` batch into TFRecord `Example`s, one per sample.
///
/// Every array contributes a feature named after it holding that sample's
/// flattened values. With `assign_id`, an `id` feature carries the sample index.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpzToTfRecord;

impl RawTransformer for NpzToTfRecord {
    fn transform(
        &self,
        input: &Path,
        out_dir: &Path,
        output_name: &str,
        assign_id: bool,
    ) -> Result<PathBuf, TransformError> {
        let arrays = read_npz(BufReader::new(File::open(input)?))?;
        let samples = arrays[0].samples();

        let output = out_dir.join(output_name);
        let mut writer = TfRecordWriter::new(BufWriter::new(File::create(&output)?));

        for i in 0..samples {
            let mut features = BTreeMap::new();
            for array in &arrays {
                let feature = match array.sample(i) {
                    SampleValues::Float(values) => Feature::floats(values),
                    SampleValues::Int(values) => Feature::int64s(values),
                };
                features.insert(array.name.clone(), feature);
            }
            if assign_id {
                features.insert("id".to_string(), Feature::int64s(vec![i as i64]));
            }
            writer.write_example(&Example::new(features))?;
        }

        tracing::debug!(
            "Wrote {} records ({} arrays) to {}",
            writer.records(),
            arrays.len(),
            output.display()
        );
        writer.finish()?;

        Ok(output)
    }
}

/// File name of the processed artifact for a raw file name.
///
/// `batch1.npz` → `batch1_processed.tfrecord` with the default settings.
pub fn processed_file_name(raw_name: &str, config: &ProcessingConfig) -> String {
    let stem = match raw_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => raw_name,
    };
    format!("{}{}.{}", stem, config.processed_suffix, config.processed_extension)
}

/// Split a key into its directory (possibly empty) and file name.
pub fn split_key(key: &str) -> (&str, &str) {
    match key.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", key),
    }
}

/// Bucket key of the processed artifact: beside the raw object.
pub fn processed_key(raw_key: &str, config: &ProcessingConfig) -> String {
    let (dir, name) = split_key(raw_key);
    let file_name = processed_file_name(name, config);
    if dir.is_empty() {
        file_name
    } else {
        format!("{}/{}", dir, file_name)
    }
}
