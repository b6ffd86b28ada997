//! reads the Group / Event / Time table from xlsx or csv

use std::io::{Cursor, Read};
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use tracing::{debug, info};

use crate::data::{Dataset, Observation};
use crate::error::{KmError, Result};

pub const GROUP_COLUMN: &str = "Group";
pub const EVENT_COLUMN: &str = "Event";
pub const TIME_COLUMN: &str = "Time";

/// cell value independent of the source format
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
}

static EMPTY_CELL: Cell = Cell::Empty;

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::Bool(b) => Cell::Bool(*b),
            Data::String(s) if s.trim().is_empty() => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }
}

/// load by extension: spreadsheets via calamine, .csv via the csv reader
pub fn load_path(path: &Path) -> Result<Dataset> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let dataset = match extension.as_str() {
        "csv" => load_csv_reader(std::fs::File::open(path)?)?,
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => load_xlsx_bytes(&std::fs::read(path)?)?,
        other => {
            return Err(KmError::invalid_parameter(
                "input extension",
                if other.is_empty() { "<none>" } else { other },
            ))
        }
    };

    info!(path = %path.display(), rows = dataset.len(), "loaded dataset");
    Ok(dataset)
}

/// first worksheet of an in-memory workbook
pub fn load_xlsx_bytes(bytes: &[u8]) -> Result<Dataset> {
    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(KmError::spreadsheet)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| KmError::spreadsheet("workbook has no worksheets"))?
        .map_err(KmError::spreadsheet)?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header) => header.iter().map(|c| c.to_string().trim().to_string()).collect(),
        None => return Err(KmError::EmptyDataset),
    };
    let body: Vec<Vec<Cell>> = rows.map(|row| row.iter().map(Cell::from).collect()).collect();

    parse_table(&headers, body)
}

/// csv with a header row
pub fn load_csv_reader<R: Read>(reader: R) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut body = Vec::new();
    for record in reader.records() {
        let record = record?;
        body.push(
            record
                .iter()
                .map(|s| if s.is_empty() { Cell::Empty } else { Cell::Text(s.to_string()) })
                .collect(),
        );
    }

    parse_table(&headers, body)
}

fn find_column(headers: &[String], name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .or_else(|| headers.iter().position(|h| h.eq_ignore_ascii_case(name)))
        .ok_or_else(|| KmError::missing_column(name, headers))
}

fn parse_table(headers: &[String], body: Vec<Vec<Cell>>) -> Result<Dataset> {
    let group_col = find_column(headers, GROUP_COLUMN)?;
    let event_col = find_column(headers, EVENT_COLUMN)?;
    let time_col = find_column(headers, TIME_COLUMN)?;

    let mut observations = Vec::with_capacity(body.len());
    let mut skipped = 0;

    for (i, row) in body.iter().enumerate() {
        let row_number = i + 2; // 1-based, after the header
        if row.iter().all(|c| *c == Cell::Empty) {
            skipped += 1;
            continue;
        }

        let cell = |col: usize| row.get(col).unwrap_or(&EMPTY_CELL);
        let group = parse_group(cell(group_col), row_number)?;
        let event = parse_event(cell(event_col), row_number)?;
        let time = parse_time(cell(time_col), row_number)?;

        observations.push(Observation::new(group, time, event));
    }

    debug!(rows = observations.len(), skipped, "parsed table");
    Dataset::new(observations)
}

fn parse_group(cell: &Cell, row: usize) -> Result<String> {
    let label = match cell {
        Cell::Text(s) => s.trim().to_string(),
        Cell::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
        Cell::Number(n) => n.to_string(),
        Cell::Bool(b) => b.to_string(),
        Cell::Empty => String::new(),
    };

    if label.is_empty() {
        return Err(KmError::invalid_value(row, GROUP_COLUMN, "group label is empty"));
    }
    Ok(label)
}

fn parse_event(cell: &Cell, row: usize) -> Result<bool> {
    let value = match cell {
        Cell::Number(n) => *n,
        Cell::Bool(b) => return Ok(*b),
        Cell::Text(s) => s.trim().parse::<f64>().map_err(|_| {
            KmError::invalid_value(row, EVENT_COLUMN, format!("expected 0 or 1, got '{}'", s))
        })?,
        Cell::Empty => {
            return Err(KmError::invalid_value(row, EVENT_COLUMN, "missing value"));
        }
    };

    if value == 0.0 {
        Ok(false)
    } else if value == 1.0 {
        Ok(true)
    } else {
        Err(KmError::invalid_value(
            row,
            EVENT_COLUMN,
            format!("expected 0 or 1, got {}", value),
        ))
    }
}

fn parse_time(cell: &Cell, row: usize) -> Result<f64> {
    let value = match cell {
        Cell::Number(n) => *n,
        Cell::Text(s) => s.trim().parse::<f64>().map_err(|_| {
            KmError::invalid_value(row, TIME_COLUMN, format!("not a number: '{}'", s))
        })?,
        Cell::Bool(_) => {
            return Err(KmError::invalid_value(row, TIME_COLUMN, "not a number: boolean"));
        }
        Cell::Empty => return Err(KmError::invalid_value(row, TIME_COLUMN, "missing value")),
    };

    if !value.is_finite() || value < 0.0 {
        return Err(KmError::invalid_value(
            row,
            TIME_COLUMN,
            format!("time must be finite and >= 0, got {}", value),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(csv: &str) -> Result<Dataset> {
        load_csv_reader(csv.as_bytes())
    }

    #[test]
    fn test_load_csv() {
        let dataset = load("Group,Event,Time\n A ,1,10.5\nB,0,3\n").unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.observations()[0], Observation::new("A", 10.5, true));
        assert_eq!(dataset.observations()[1], Observation::new("B", 3.0, false));
    }

    #[test]
    fn test_column_order_and_extra_columns() {
        let dataset = load("id,time,event,group\n1,4,1.0,X\n2,5,0,Y\n").unwrap();
        assert_eq!(dataset.groups(), vec!["X".to_string(), "Y".to_string()]);
        assert!(dataset.observations()[0].event);
    }

    #[test]
    fn test_missing_column() {
        let err = load("Group,Time\nA,1\n").unwrap_err();
        assert!(matches!(err, KmError::MissingColumn { ref column, .. } if column == "Event"));
    }

    #[test]
    fn test_event_out_of_range() {
        let err = load("Group,Event,Time\nA,1,2\nA,2,3\n").unwrap_err();
        assert!(matches!(err, KmError::InvalidValue { row: 3, .. }));
    }

    #[test]
    fn test_non_numeric_time() {
        let err = load("Group,Event,Time\nA,1,soon\n").unwrap_err();
        assert!(matches!(err, KmError::InvalidValue { row: 2, ref column, .. } if column == "Time"));
    }

    #[test]
    fn test_negative_time_rejected() {
        assert!(load("Group,Event,Time\nA,1,-2\n").is_err());
    }

    #[test]
    fn test_blank_rows_skipped() {
        let dataset = load("Group,Event,Time\nA,1,2\n,,\nB,0,4\n").unwrap();
        assert_eq!(dataset.len(), 2);
    }

    #[test]
    fn test_empty_group_rejected() {
        let err = load("Group,Event,Time\n ,1,2\n").unwrap_err();
        assert!(matches!(err, KmError::InvalidValue { ref column, .. } if column == "Group"));
    }

    #[test]
    fn test_header_only_is_empty() {
        assert!(matches!(load("Group,Event,Time\n"), Err(KmError::EmptyDataset)));
    }

    #[test]
    fn test_unknown_extension() {
        assert!(load_path(Path::new("data.json")).is_err());
    }

    #[test]
    fn test_cells_from_spreadsheet_data() {
        assert_eq!(Cell::from(&Data::Int(1)), Cell::Number(1.0));
        assert_eq!(Cell::from(&Data::Float(2.5)), Cell::Number(2.5));
        assert_eq!(Cell::from(&Data::String("  ".into())), Cell::Empty);
        assert_eq!(Cell::from(&Data::Bool(true)), Cell::Bool(true));
        assert_eq!(parse_group(&Cell::Number(2.0), 2).unwrap(), "2");
        assert!(parse_event(&Cell::Number(0.5), 2).is_err());
    }
}
