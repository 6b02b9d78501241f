//! Plain-text matrix I/O for frames and background images.
//!
//! Background images and processed frames are exchanged as headerless CSV
//! matrices: one line per row, one field per column. This keeps the files
//! readable from any analysis environment without a binary image format.

use csv::{ReaderBuilder, WriterBuilder};
use ndarray::{Array2, ArrayView2};
use std::io;
use std::path::Path;

fn invalid_data<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Read a headerless CSV matrix into an `(nrow, ncol)` array.
///
/// Every row must have the same number of fields and every field must parse
/// as a float.
pub fn read_csv_matrix<P: AsRef<Path>>(path: P) -> io::Result<Array2<f64>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path.as_ref())
        .map_err(invalid_data)?;

    let mut values = Vec::new();
    let mut ncol = None;
    let mut nrow = 0;

    for record in reader.records() {
        let record = record.map_err(invalid_data)?;
        match ncol {
            None => ncol = Some(record.len()),
            Some(n) if n != record.len() => {
                return Err(invalid_data(format!(
                    "row {nrow} has {} fields, expected {n}",
                    record.len()
                )));
            }
            Some(_) => {}
        }
        for field in record.iter() {
            values.push(field.parse::<f64>().map_err(invalid_data)?);
        }
        nrow += 1;
    }

    let ncol = ncol.ok_or_else(|| invalid_data("empty matrix file"))?;
    Array2::from_shape_vec((nrow, ncol), values).map_err(invalid_data)
}

/// Write an array as a headerless CSV matrix, creating parent directories.
pub fn write_csv_matrix<P: AsRef<Path>>(image: &ArrayView2<f64>, path: P) -> io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(invalid_data)?;

    for row in image.rows() {
        writer
            .write_record(row.iter().map(|v| v.to_string()))
            .map_err(invalid_data)?;
    }
    writer.flush()
}
