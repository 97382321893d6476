//! Result sink for routine invocations and multi-call zipping.

use std::collections::VecDeque;

use crate::catalog::types::SqlType;
use crate::storage::tuple::ScalarValue;

/// What an invocation hands back to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutineResult {
    Void,
    Value(ScalarValue),
    Set(ResultStream),
}

impl RoutineResult {
    /// Scalar view used where a single value is expected; a set yields its
    /// first row's first column.
    pub fn into_scalar(self) -> ScalarValue {
        match self {
            Self::Void => ScalarValue::Null,
            Self::Value(value) => value,
            Self::Set(mut stream) => stream
                .next()
                .and_then(|row| row.into_iter().next())
                .unwrap_or(ScalarValue::Null),
        }
    }
}

/// Ordered, append-only rows of a set-returning invocation, consumed once.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultStream {
    columns: Vec<(String, SqlType)>,
    rows: VecDeque<Vec<ScalarValue>>,
}

impl ResultStream {
    pub fn new(columns: Vec<(String, SqlType)>) -> Self {
        Self {
            columns,
            rows: VecDeque::new(),
        }
    }

    pub fn columns(&self) -> &[(String, SqlType)] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Width of the rows this stream yields. Without a column list the
    /// first pending row decides; an empty, column-less stream counts as one.
    pub fn row_width(&self) -> usize {
        match self.columns.len() {
            0 => self.rows.front().map_or(1, Vec::len).max(1),
            width => width,
        }
    }

    /// Adopts a column list when the stream was created without one.
    pub fn set_columns_if_empty(&mut self, columns: Vec<(String, SqlType)>) {
        if self.columns.is_empty() {
            self.columns = columns;
        }
    }

    pub fn push(&mut self, row: Vec<ScalarValue>) {
        self.rows.push_back(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Iterator for ResultStream {
    type Item = Vec<ScalarValue>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.pop_front()
    }
}

/// Zips several streams positionally, as `ROWS FROM (f(), g())` and
/// multiple set-returning calls in one select list do: the result is as long
/// as the longest input and exhausted inputs contribute NULLs. With
/// `with_ordinality` a 1-based `ordinality` column is appended.
pub fn zip_result_streams(streams: Vec<ResultStream>, with_ordinality: bool) -> ResultStream {
    let mut columns: Vec<(String, SqlType)> = streams
        .iter()
        .flat_map(|stream| stream.columns.iter().cloned())
        .collect();
    if with_ordinality {
        columns.push(("ordinality".to_string(), SqlType::Int8));
    }

    let longest = streams.iter().map(ResultStream::len).max().unwrap_or(0);
    let widths: Vec<usize> = streams.iter().map(ResultStream::row_width).collect();
    let mut zipped = ResultStream::new(columns);
    let mut streams = streams;

    for ordinal in 1..=longest {
        let mut row = Vec::with_capacity(zipped.width());
        for (stream, &width) in streams.iter_mut().zip(&widths) {
            match stream.next() {
                Some(values) => row.extend(values),
                None => row.extend(std::iter::repeat_n(ScalarValue::Null, width)),
            }
        }
        if with_ordinality {
            row.push(ScalarValue::Int(ordinal as i64));
        }
        zipped.push(row);
    }
    zipped
}
