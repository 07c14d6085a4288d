use std::io::BufRead;

use crate::error::GraphError;

/// Largest row or column count accepted for a matrix.
pub const MAX_DIMENSION: usize = 1 << 26;

/// Upper bound on entries reserved up front from a declared count.
const RESERVE_LIMIT: usize = 1 << 20;

/// Compressed sparse row matrix of `f64` values.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    rows: usize,
    cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

/// Row-major dense copy of a contiguous row range.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseBlock {
    pub first_row: usize,
    pub rows: usize,
    pub cols: usize,
    values: Vec<f64>,
}

impl DenseBlock {
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    /// Values of one block row, i.e. one cell across all features.
    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }
}

impl SparseMatrix {
    /// Builds a matrix from `(row, col, value)` triplets. Repeated coordinates
    /// are summed; explicit zeros are kept as stored entries.
    pub fn from_triplets(
        rows: usize,
        cols: usize,
        mut triplets: Vec<(usize, usize, f64)>,
    ) -> Result<Self, GraphError> {
        check_dimensions(rows, cols)?;
        if let Some(&(row, col, _)) = triplets.iter().find(|(r, c, _)| *r >= rows || *c >= cols) {
            return Err(GraphError::MatrixFormat(format!(
                "entry ({row}, {col}) outside {rows}x{cols} matrix"
            )));
        }
        triplets.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let slots = rows
            .checked_add(1)
            .ok_or_else(|| GraphError::MatrixFormat(format!("row count {rows} overflows")))?;
        let mut indptr = vec![0usize; slots];
        let mut indices = Vec::with_capacity(triplets.len());
        let mut data: Vec<f64> = Vec::with_capacity(triplets.len());
        let mut last: Option<(usize, usize)> = None;
        for (row, col, value) in triplets {
            if last == Some((row, col)) {
                if let Some(slot) = data.last_mut() {
                    *slot += value;
                }
                continue;
            }
            indices.push(col);
            data.push(value);
            indptr[row + 1] += 1;
            last = Some((row, col));
        }
        for row in 0..rows {
            indptr[row + 1] += indptr[row];
        }

        Ok(Self {
            rows,
            cols,
            indptr,
            indices,
            data,
        })
    }

    pub fn from_dense(values: &[Vec<f64>]) -> Result<Self, GraphError> {
        let rows = values.len();
        let cols = values.first().map(Vec::len).unwrap_or(0);
        let mut triplets = Vec::new();
        for (row, line) in values.iter().enumerate() {
            if line.len() != cols {
                return Err(GraphError::MatrixFormat(format!(
                    "row {row} has {} columns, expected {cols}",
                    line.len()
                )));
            }
            for (col, value) in line.iter().enumerate() {
                if *value != 0.0 {
                    triplets.push((row, col, *value));
                }
            }
        }
        Self::from_triplets(rows, cols, triplets)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Densifies rows `start..end`. Memory is `(end - start) * cols`.
    pub fn dense_rows(&self, start: usize, end: usize) -> Result<DenseBlock, GraphError> {
        if start > end || end > self.rows {
            return Err(GraphError::ChunkBoundsError {
                start,
                end,
                rows: self.rows,
            });
        }
        let block_rows = end - start;
        let mut values = vec![0.0; block_rows * self.cols];
        for row in start..end {
            let offset = (row - start) * self.cols;
            for idx in self.indptr[row]..self.indptr[row + 1] {
                values[offset + self.indices[idx]] = self.data[idx];
            }
        }
        Ok(DenseBlock {
            first_row: start,
            rows: block_rows,
            cols: self.cols,
            values,
        })
    }
}

/// Reads a Matrix Market coordinate file. `transpose` swaps rows and columns,
/// which turns a 10x features x cells file into cells x features.
pub fn read_matrix_market<R: BufRead>(reader: R, transpose: bool) -> Result<SparseMatrix, GraphError> {
    let mut lines = reader.lines();
    let header = lines
        .next()
        .ok_or_else(|| GraphError::MatrixFormat("empty matrix file".to_string()))?
        .map_err(|err| GraphError::Filesystem(err.to_string()))?;
    let header_fields = header
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>();
    if header_fields.len() < 5
        || header_fields[0] != "%%matrixmarket"
        || header_fields[1] != "matrix"
        || header_fields[2] != "coordinate"
    {
        return Err(GraphError::MatrixFormat(format!(
            "unsupported header: {header}"
        )));
    }
    let pattern = match header_fields[3].as_str() {
        "real" | "integer" => false,
        "pattern" => true,
        other => {
            return Err(GraphError::MatrixFormat(format!("unsupported field type {other}")));
        }
    };
    if header_fields[4] != "general" {
        return Err(GraphError::MatrixFormat(format!(
            "unsupported symmetry {}",
            header_fields[4]
        )));
    }

    let mut size: Option<(usize, usize, usize)> = None;
    let mut triplets = Vec::new();
    for (line_no, line) in lines.enumerate() {
        let line = line.map_err(|err| GraphError::Filesystem(err.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let fields = trimmed.split_whitespace().collect::<Vec<_>>();
        let parse_index = |value: &str| {
            value.parse::<usize>().map_err(|_| {
                GraphError::MatrixFormat(format!("line {}: invalid index {value}", line_no + 2))
            })
        };
        match size {
            None => {
                if fields.len() != 3 {
                    return Err(GraphError::MatrixFormat(format!("invalid size line: {trimmed}")));
                }
                let (rows, cols) = (parse_index(fields[0])?, parse_index(fields[1])?);
                let entries = parse_index(fields[2])?;
                check_dimensions(rows, cols)?;
                size = Some((rows, cols, entries));
                triplets.reserve(entries.min(RESERVE_LIMIT));
            }
            Some(_) => {
                let expected = if pattern { 2 } else { 3 };
                if fields.len() < expected {
                    return Err(GraphError::MatrixFormat(format!(
                        "line {}: expected {expected} fields",
                        line_no + 2
                    )));
                }
                let row = parse_index(fields[0])?;
                let col = parse_index(fields[1])?;
                if row == 0 || col == 0 {
                    return Err(GraphError::MatrixFormat(format!(
                        "line {}: indices are 1-based",
                        line_no + 2
                    )));
                }
                let value = if pattern {
                    1.0
                } else {
                    fields[2].parse::<f64>().map_err(|_| {
                        GraphError::MatrixFormat(format!(
                            "line {}: invalid value {}",
                            line_no + 2,
                            fields[2]
                        ))
                    })?
                };
                if transpose {
                    triplets.push((col - 1, row - 1, value));
                } else {
                    triplets.push((row - 1, col - 1, value));
                }
            }
        }
    }

    let (rows, cols, entries) =
        size.ok_or_else(|| GraphError::MatrixFormat("missing size line".to_string()))?;
    if triplets.len() != entries {
        return Err(GraphError::MatrixFormat(format!(
            "declared {entries} entries, found {}",
            triplets.len()
        )));
    }
    if transpose {
        SparseMatrix::from_triplets(cols, rows, triplets)
    } else {
        SparseMatrix::from_triplets(rows, cols, triplets)
    }
}

fn check_dimensions(rows: usize, cols: usize) -> Result<(), GraphError> {
    if rows > MAX_DIMENSION || cols > MAX_DIMENSION {
        return Err(GraphError::MatrixFormat(format!(
            "{rows}x{cols} exceeds the {MAX_DIMENSION} row/column limit"
        )));
    }
    Ok(())
}
