use serde::Serialize;
use thiserror::Error;

/// Why a single result cell has no number.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CellError {
    #[error("outside the spectrum's wavenumber domain")]
    OutOfDomain,

    #[error("fewer than two samples inside the window")]
    TooFewSamples,

    #[error("division by zero")]
    ZeroDenominator,

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("operand '{0}' has no value")]
    InvalidOperand(String),

    #[error("result is not a finite number")]
    NonFinite,
}

impl CellError {
    /// Spreadsheet-style marker written in place of the number.
    pub fn marker(&self) -> &'static str {
        match self {
            CellError::OutOfDomain | CellError::TooFewSamples => "#N/A",
            CellError::ZeroDenominator => "#DIV/0!",
            CellError::UnknownVariable(_) => "#NAME?",
            CellError::InvalidOperand(_) => "#VALUE!",
            CellError::NonFinite => "#NUM!",
        }
    }
}

/// A computed number or the reason it could not be computed.
pub type CellValue = Result<f64, CellError>;

/// Render a cell for a sheet: the number, or its error marker.
pub fn format_cell(cell: &CellValue) -> String {
    match cell {
        Ok(v) => v.to_string(),
        Err(e) => e.marker().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers() {
        assert_eq!(format_cell(&Ok(1.5)), "1.5");
        assert_eq!(format_cell(&Err(CellError::ZeroDenominator)), "#DIV/0!");
        assert_eq!(
            format_cell(&Err(CellError::UnknownVariable("q".into()))),
            "#NAME?"
        );
    }
}
