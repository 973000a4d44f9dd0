//! DILIrank reference list.
//!
//! The spreadsheet carries a title row, so the header is the second row of
//! the sheet. Only `Compound Name` is required; the other known columns are
//! picked up by header name when present.

use std::path::Path;

use calamine::{Data, Range, Reader, open_workbook_auto};
use serde::{Deserialize, Serialize};

use crate::error::DiliError;

pub const COMPOUND_NAME_COLUMN: &str = "Compound Name";
pub const HEADER_ROW: usize = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundReference {
    pub ltkb_id: Option<String>,
    pub compound_name: String,
    pub severity_class: Option<i64>,
    pub label_section: Option<String>,
    pub vdili_concern: Option<String>,
    pub version: Option<String>,
}

pub fn read_reference(path: &Path, sheet: &str) -> Result<Vec<CompoundReference>, DiliError> {
    if !path.exists() {
        return Err(DiliError::ReferenceNotFound(path.to_path_buf()));
    }
    let mut workbook =
        open_workbook_auto(path).map_err(|err| DiliError::Spreadsheet(err.to_string()))?;
    let range = workbook
        .worksheet_range(sheet)
        .map_err(|err| DiliError::Spreadsheet(format!("sheet `{sheet}`: {err}")))?;

    parse_rows(&sheet_rows(&range))
}

/// Cell text indexed by sheet row. The used range can start below row 1 when
/// leading rows are blank, so those rows are restored as empty rows.
pub fn sheet_rows(range: &Range<Data>) -> Vec<Vec<Option<String>>> {
    let first_row = range.start().map_or(0, |(row, _)| row as usize);
    std::iter::repeat_with(Vec::new)
        .take(first_row)
        .chain(
            range
                .rows()
                .map(|row| row.iter().map(cell_text).collect::<Vec<_>>()),
        )
        .collect()
}

/// Interprets already-extracted cell text. `rows[HEADER_ROW]` is the header.
pub fn parse_rows(rows: &[Vec<Option<String>>]) -> Result<Vec<CompoundReference>, DiliError> {
    let header = rows
        .get(HEADER_ROW)
        .ok_or_else(|| DiliError::Spreadsheet("missing header row".to_string()))?;
    let column = |name: &str| {
        header
            .iter()
            .position(|cell| cell.as_deref().map(str::trim) == Some(name))
    };
    let name_idx = column(COMPOUND_NAME_COLUMN).ok_or_else(|| {
        DiliError::Spreadsheet(format!("missing `{COMPOUND_NAME_COLUMN}` column"))
    })?;
    let ltkb_idx = column("LTKBID");
    let severity_idx = column("Severity Class");
    let label_idx = column("Label Section");
    let concern_idx = column("vDILIConcern");
    let version_idx = column("Version");

    let cell = |row: &Vec<Option<String>>, idx: Option<usize>| {
        idx.and_then(|idx| row.get(idx).cloned().flatten())
    };

    let mut references = Vec::new();
    for row in rows.iter().skip(HEADER_ROW + 1) {
        let Some(compound_name) = cell(row, Some(name_idx)) else {
            continue;
        };
        references.push(CompoundReference {
            ltkb_id: cell(row, ltkb_idx),
            compound_name,
            severity_class: cell(row, severity_idx).and_then(|value| parse_integer(&value)),
            label_section: cell(row, label_idx),
            vdili_concern: cell(row, concern_idx),
            version: cell(row, version_idx),
        });
    }
    Ok(references)
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Data::Float(value) if value.fract() == 0.0 => Some(format!("{}", *value as i64)),
        other => Some(other.to_string()),
    }
}

fn parse_integer(value: &str) -> Option<i64> {
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|float| float as i64))
}
