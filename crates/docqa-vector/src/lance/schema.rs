//! Arrow layout of a collection table and row encoding/decoding.

use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use std::sync::Arc;

use docqa_core::{Error, Metadata, Payload, Result};

pub const ID: &str = "id";
pub const TEXT: &str = "text";
pub const SOURCE_DOCUMENT_ID: &str = "source_document_id";
pub const FILENAME: &str = "filename";
pub const CHUNK_INDEX: &str = "chunk_index";
pub const UPLOADED_AT: &str = "uploaded_at";
pub const METADATA: &str = "metadata";
pub const VECTOR: &str = "vector";
pub const DISTANCE: &str = "_distance";

pub fn build_collection_schema(dimension: usize) -> Result<SchemaRef> {
    let size = i32::try_from(dimension).map_err(|_| Error::Config(format!("dimension {dimension} is too large")))?;
    Ok(Arc::new(Schema::new(vec![
        Field::new(ID, DataType::Utf8, false),
        Field::new(TEXT, DataType::Utf8, false),
        Field::new(SOURCE_DOCUMENT_ID, DataType::Utf8, false),
        Field::new(FILENAME, DataType::Utf8, false),
        Field::new(CHUNK_INDEX, DataType::Int64, false),
        Field::new(UPLOADED_AT, DataType::Utf8, false),
        Field::new(METADATA, DataType::Utf8, false),
        Field::new(VECTOR, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), size), true),
    ])))
}

/// Dimension of the `vector` column, if the schema has one.
pub fn vector_dimension(schema: &Schema) -> Option<usize> {
    match schema.field_with_name(VECTOR).ok()?.data_type() {
        DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
        _ => None,
    }
}

/// One row per `(id, payload, vector)`, all in the same order.
pub fn encode_rows(dimension: usize, rows: &[(String, Payload, &[f32])]) -> Result<RecordBatch> {
    let schema = build_collection_schema(dimension)?;
    let mut ids = Vec::with_capacity(rows.len());
    let mut texts = Vec::with_capacity(rows.len());
    let mut doc_ids = Vec::with_capacity(rows.len());
    let mut filenames = Vec::with_capacity(rows.len());
    let mut chunk_indices = Vec::with_capacity(rows.len());
    let mut uploaded = Vec::with_capacity(rows.len());
    let mut metadata = Vec::with_capacity(rows.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(rows.len());
    for (id, payload, vector) in rows {
        ids.push(id.clone());
        texts.push(payload.text.clone());
        doc_ids.push(payload.source_document_id.clone());
        filenames.push(payload.filename.clone());
        chunk_indices.push(i64::try_from(payload.chunk_index).unwrap_or(i64::MAX));
        uploaded.push(payload.uploaded_at.clone());
        metadata.push(serde_json::to_string(&payload.metadata)?);
        vectors.push(Some(vector.iter().map(|&x| Some(x)).collect()));
    }
    let size = i32::try_from(dimension).map_err(|_| Error::Config(format!("dimension {dimension} is too large")))?;
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(doc_ids)),
            Arc::new(StringArray::from(filenames)),
            Arc::new(Int64Array::from(chunk_indices)),
            Arc::new(StringArray::from(uploaded)),
            Arc::new(StringArray::from(metadata)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors.into_iter(), size)),
        ],
    )
    .map_err(|e| Error::Operation(format!("building record batch: {e}")))
}

/// A decoded table row.
#[derive(Debug, Clone)]
pub struct StoredRow {
    pub id: String,
    pub payload: Payload,
    pub vector: Option<Vec<f32>>,
    pub distance: Option<f32>,
}

fn string_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::Operation(format!("column '{name}' missing or not utf8")))
}

fn int_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| Error::Operation(format!("column '{name}' missing or not int64")))
}

pub fn decode_rows(batch: &RecordBatch) -> Result<Vec<StoredRow>> {
    let ids = string_col(batch, ID)?;
    let texts = string_col(batch, TEXT)?;
    let doc_ids = string_col(batch, SOURCE_DOCUMENT_ID)?;
    let filenames = string_col(batch, FILENAME)?;
    let chunk_indices = int_col(batch, CHUNK_INDEX)?;
    let uploaded = string_col(batch, UPLOADED_AT)?;
    let metadata = string_col(batch, METADATA)?;
    let vectors = batch.column_by_name(VECTOR).and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());
    let distances = batch.column_by_name(DISTANCE).and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let meta: Metadata = serde_json::from_str(metadata.value(i))?;
        let vector = match vectors {
            Some(fsl) if fsl.is_valid(i) => Some(fsl.value(i).as_primitive::<Float32Type>().values().to_vec()),
            _ => None,
        };
        rows.push(StoredRow {
            id: ids.value(i).to_string(),
            payload: Payload {
                text: texts.value(i).to_string(),
                source_document_id: doc_ids.value(i).to_string(),
                filename: filenames.value(i).to_string(),
                chunk_index: usize::try_from(chunk_indices.value(i)).unwrap_or(0),
                uploaded_at: uploaded.value(i).to_string(),
                metadata: meta,
            },
            vector,
            distance: distances.map(|d| d.value(i)),
        });
    }
    Ok(rows)
}
