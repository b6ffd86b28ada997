use thiserror::Error;

pub type Result<T> = std::result::Result<T, KmError>;

#[derive(Error, Debug)]
pub enum KmError {
    #[error("missing required column '{column}' (found: {found})")]
    MissingColumn { column: String, found: String },

    #[error("row {row}, column '{column}': {message}")]
    InvalidValue { row: usize, column: String, message: String },

    #[error("dataset has no data rows")]
    EmptyDataset,

    #[error("expected exactly 2 groups, found {found}: [{groups}]")]
    GroupCount { found: usize, groups: String },

    #[error("dimensions don't match: {message}")]
    InvalidDimensions { message: String },

    #[error("optimization blew up: {message}")]
    OptimizationFailed { message: String },

    #[error("model not fitted yet - call fit() first")]
    ModelNotFitted,

    #[error("bad parameter: {parameter} = {value}")]
    InvalidParameter { parameter: String, value: String },

    #[error("numerical issues: {message}")]
    NumericalError { message: String },

    #[error("can't read spreadsheet: {message}")]
    Spreadsheet { message: String },

    #[error("can't write export: {message}")]
    Export { message: String },

    #[error("bad config file {path}: {message}")]
    Config { path: String, message: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KmError {
    pub fn missing_column(column: impl Into<String>, found: &[String]) -> Self {
        Self::MissingColumn {
            column: column.into(),
            found: found.join(", "),
        }
    }

    pub fn invalid_value(row: usize, column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            row,
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn group_count(groups: &[String]) -> Self {
        Self::GroupCount {
            found: groups.len(),
            groups: groups.join(", "),
        }
    }

    pub fn invalid_dimensions(message: impl Into<String>) -> Self {
        Self::InvalidDimensions { message: message.into() }
    }

    pub fn optimization_failed(message: impl Into<String>) -> Self {
        Self::OptimizationFailed { message: message.into() }
    }

    pub fn invalid_parameter(parameter: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.to_string(),
        }
    }

    pub fn numerical_error(message: impl Into<String>) -> Self {
        Self::NumericalError { message: message.into() }
    }

    pub fn spreadsheet(message: impl ToString) -> Self {
        Self::Spreadsheet { message: message.to_string() }
    }

    pub fn export(message: impl ToString) -> Self {
        Self::Export { message: message.to_string() }
    }

    pub fn config(path: &std::path::Path, message: impl ToString) -> Self {
        Self::Config {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_lists_headers() {
        let err = KmError::missing_column("Event", &["Group".to_string(), "Time".to_string()]);
        assert_eq!(
            err.to_string(),
            "missing required column 'Event' (found: Group, Time)"
        );
    }

    #[test]
    fn test_group_count_message() {
        let err = KmError::group_count(&["A".to_string(), "B".to_string(), "C".to_string()]);
        assert_eq!(err.to_string(), "expected exactly 2 groups, found 3: [A, B, C]");
    }

    #[test]
    fn test_invalid_value_message() {
        let err = KmError::invalid_value(4, "Event", "expected 0 or 1, got 2");
        assert_eq!(err.to_string(), "row 4, column 'Event': expected 0 or 1, got 2");
    }
}
