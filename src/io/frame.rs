//! Column-oriented view over a parquet artifact.

use crate::error::ObserveError;
use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{
    ArrowNativeType, ArrowPrimitiveType, DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    Int8Type, SchemaRef, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

/// A tabular dataset loaded from parquet.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Where the data came from (for error messages)
    name: String,

    schema: SchemaRef,

    batches: Vec<RecordBatch>,
}

impl Frame {
    /// Decode parquet bytes.
    pub fn from_parquet_bytes(name: &str, bytes: Bytes) -> Result<Self> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)
            .with_context(|| format!("{} is not a parquet file", name))?;
        let schema = builder.schema().clone();
        let reader = builder.build()?;

        let mut batches = Vec::new();
        for batch_result in reader {
            batches.push(batch_result.with_context(|| format!("Failed to decode {}", name))?);
        }

        tracing::debug!("Loaded {} rows from {}", batches.iter().map(|b| b.num_rows()).sum::<usize>(), name);

        Ok(Self {
            name: name.to_string(),
            schema,
            batches,
        })
    }

    /// Build a frame from in-memory batches sharing one schema.
    pub fn from_batches(name: &str, schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self {
            name: name.to_string(),
            schema,
            batches,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    /// All chunks of one column, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<ArrayRef>, ObserveError> {
        let (idx, _) = self
            .schema
            .column_with_name(name)
            .ok_or_else(|| ObserveError::MissingColumn(name.to_string()))?;
        Ok(self.batches.iter().map(|b| b.column(idx).clone()).collect())
    }

    /// Number of missing cells across every column.
    ///
    /// A cell is missing if it is null, a non-finite float, or an empty string.
    pub fn missing_cells(&self) -> usize {
        self.batches
            .iter()
            .flat_map(|batch| batch.columns().iter())
            .map(|array| missing_in_array(array.as_ref()))
            .sum()
    }

    /// Values of an integer-valued column; `None` marks a missing value.
    ///
    /// Float columns are accepted when every present value is integral.
    pub fn integer_column(&self, name: &str) -> Result<Vec<Option<i64>>, ObserveError> {
        let mut out = Vec::with_capacity(self.num_rows());
        for array in self.column(name)? {
            let array = array.as_ref();
            match array.data_type() {
                DataType::Int8 => push_integers::<Int8Type>(array, name, &mut out)?,
                DataType::Int16 => push_integers::<Int16Type>(array, name, &mut out)?,
                DataType::Int32 => push_integers::<Int32Type>(array, name, &mut out)?,
                DataType::Int64 => push_integers::<Int64Type>(array, name, &mut out)?,
                DataType::UInt8 => push_integers::<UInt8Type>(array, name, &mut out)?,
                DataType::UInt16 => push_integers::<UInt16Type>(array, name, &mut out)?,
                DataType::UInt32 => push_integers::<UInt32Type>(array, name, &mut out)?,
                DataType::UInt64 => push_integers::<UInt64Type>(array, name, &mut out)?,
                DataType::Float32 => push_floats::<Float32Type>(array, name, &mut out)?,
                DataType::Float64 => push_floats::<Float64Type>(array, name, &mut out)?,
                other => return Err(unsupported(name, other)),
            }
        }
        Ok(out)
    }
}

fn unsupported(column: &str, data_type: &DataType) -> ObserveError {
    ObserveError::UnsupportedColumnType {
        column: column.to_string(),
        data_type: data_type.to_string(),
    }
}

fn push_integers<T: ArrowPrimitiveType>(
    array: &dyn Array,
    column: &str,
    out: &mut Vec<Option<i64>>,
) -> Result<(), ObserveError> {
    let values = array
        .as_primitive_opt::<T>()
        .ok_or_else(|| unsupported(column, array.data_type()))?;

    for i in 0..values.len() {
        if values.is_null(i) {
            out.push(None);
            continue;
        }
        let value = values
            .value(i)
            .to_i64()
            .ok_or_else(|| unsupported(column, array.data_type()))?;
        out.push(Some(value));
    }
    Ok(())
}

fn push_floats<T>(array: &dyn Array, column: &str, out: &mut Vec<Option<i64>>) -> Result<(), ObserveError>
where
    T: ArrowPrimitiveType,
    T::Native: Into<f64>,
{
    let values = array
        .as_primitive_opt::<T>()
        .ok_or_else(|| unsupported(column, array.data_type()))?;

    for i in 0..values.len() {
        if values.is_null(i) {
            out.push(None);
            continue;
        }
        let value: f64 = values.value(i).into();
        if !value.is_finite() {
            out.push(None);
        } else if value.fract() != 0.0 || value.abs() > i64::MAX as f64 {
            return Err(ObserveError::NonIntegralLabel(value));
        } else {
            out.push(Some(value as i64));
        }
    }
    Ok(())
}

fn missing_in_array(array: &dyn Array) -> usize {
    let nulls = array.null_count();
    let invalid_values = match array.data_type() {
        DataType::Float32 => array
            .as_primitive_opt::<Float32Type>()
            .map(|a| a.iter().flatten().filter(|v| !v.is_finite()).count())
            .unwrap_or(0),
        DataType::Float64 => array
            .as_primitive_opt::<Float64Type>()
            .map(|a| a.iter().flatten().filter(|v| !v.is_finite()).count())
            .unwrap_or(0),
        DataType::Utf8 => array
            .as_string_opt::<i32>()
            .map(|a| a.iter().flatten().filter(|v| v.is_empty()).count())
            .unwrap_or(0),
        DataType::LargeUtf8 => array
            .as_string_opt::<i64>()
            .map(|a| a.iter().flatten().filter(|v| v.is_empty()).count())
            .unwrap_or(0),
        _ => 0,
    };
    nulls + invalid_values
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Parquet fixtures for tests.

    use arrow::array::{ArrayRef, Float64Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use bytes::Bytes;
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;

    /// Predictions table: `P_0..P_3` probabilities, `P_label` and `label`.
    pub fn predictions_batch(labels: &[Option<i64>]) -> RecordBatch {
        let n = labels.len();
        let mut columns: Vec<ArrayRef> = Vec::new();
        let mut fields = Vec::new();
        for k in 0..4 {
            let probs: Vec<Option<f64>> = labels
                .iter()
                .map(|l| l.map(|l| if l == k as i64 { 0.7 } else { 0.1 }))
                .collect();
            fields.push(Field::new(format!("P_{}", k), DataType::Float64, true));
            columns.push(Arc::new(Float64Array::from(probs)));
        }
        fields.push(Field::new("P_label", DataType::Float64, true));
        columns.push(Arc::new(Float64Array::from(
            labels.iter().map(|l| l.map(|_| 0.7)).collect::<Vec<_>>(),
        )));
        fields.push(Field::new("label", DataType::Int64, true));
        columns.push(Arc::new(Int64Array::from(labels.to_vec())));

        assert_eq!(columns[0].len(), n);
        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap()
    }

    pub fn to_parquet(batch: &RecordBatch) -> Bytes {
        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None).unwrap();
        writer.write(batch).unwrap();
        writer.close().unwrap();
        Bytes::from(buffer)
    }
}
