use thiserror::Error;

/// Every failure the report pipeline can surface to the operator.
///
/// Variants carry the offending file, role or client so the CLI can print
/// something actionable without a backtrace.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("missing input: no file for role `{role}`")]
    MissingInput { role: String },
    #[error("ambiguous input: {reason}: {}", files.join(", "))]
    AmbiguousInput { reason: String, files: Vec<String> },
    #[error("schema error in {file}: column `{column}` for role `{role}` not found in header")]
    Schema {
        file: String,
        role: String,
        column: String,
    },
    #[error("invalid value in {file} line {line}: {message}")]
    InvalidValue {
        file: String,
        line: u64,
        message: String,
    },
    #[error("incomplete week calendar for client `{client}`: {message}")]
    IncompleteCalendar { client: String, message: String },
    #[error("population failed for client `{client}`: {message}")]
    Population { client: String, message: String },
    #[error("merge failed: {0}")]
    Merge(String),
    #[error("template error: {0}")]
    Template(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("task error: {0}")]
    Task(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error(transparent)]
    Excel(#[from] calamine::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReportError>;

impl ReportError {
    pub fn population(client: &str, message: impl Into<String>) -> Self {
        ReportError::Population {
            client: client.to_string(),
            message: message.into(),
        }
    }
}
