use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpandexError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("SRID lookup request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Column not found: {column}")]
    ColumnNotFound { column: String },

    #[error("Table not found: {table}")]
    TableNotFound { table: String },

    #[error("Expression error: {message}")]
    ExpressionError { message: String },

    #[error("Unknown metric type: {0:?}")]
    UnknownMetric(String),

    #[error("Synthesis error: {message}")]
    SynthesisError { message: String },

    #[error("Spatial operation failed: {message}")]
    SpatialError { message: String },

    #[error("Cannot reproject from SRID {from} to SRID {to}")]
    ProjectionError { from: i32, to: i32 },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Input,
    Network,
    Data,
    Spatial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl SpandexError {
    pub fn processing(message: impl Into<String>) -> Self {
        Self::ProcessingError {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    pub fn expression(message: impl Into<String>) -> Self {
        Self::ExpressionError {
            message: message.into(),
        }
    }

    pub fn spatial(message: impl Into<String>) -> Self {
        Self::SpatialError {
            message: message.into(),
        }
    }

    pub fn synthesis(message: impl Into<String>) -> Self {
        Self::SynthesisError {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn column_not_found(column: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            column: column.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
            Self::ApiError(_) => ErrorCategory::Network,
            Self::ZipError(_)
            | Self::IoError(_)
            | Self::CsvError(_)
            | Self::SerializationError(_)
            | Self::YamlError(_) => ErrorCategory::Input,
            Self::SpatialError { .. } | Self::ProjectionError { .. } => ErrorCategory::Spatial,
            Self::ColumnNotFound { .. }
            | Self::TableNotFound { .. }
            | Self::ExpressionError { .. }
            | Self::UnknownMetric(_)
            | Self::SynthesisError { .. }
            | Self::ProcessingError { .. }
            | Self::ValidationError { .. } => ErrorCategory::Data,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Configuration => ErrorSeverity::Critical,
            ErrorCategory::Input | ErrorCategory::Data | ErrorCategory::Spatial => {
                ErrorSeverity::High
            }
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::ApiError(_) => "Check network access to the SRID lookup service or disable [lookup]",
            Self::IoError(_) => "Check that the data directory and input files exist and are readable",
            Self::CsvError(_) => "Check the delimiter and that every row has the same number of fields",
            Self::YamlError(_) => "Check the schema file is valid YAML",
            Self::ColumnNotFound { .. } => "Check column names after sanitisation (spaces become '_')",
            Self::TableNotFound { .. } => "Tables are addressed as 'schema.table'; load them before use",
            Self::ExpressionError { .. } => "Check filter syntax, e.g. \"zone_id == 1 and persons > 2\"",
            Self::ProjectionError { .. } => "Only EPSG:4326 and EPSG:3857 can be converted; reproject inputs beforehand",
            Self::SynthesisError { .. } => "Check container ids and capacities in the geography table",
            _ if self.category() == ErrorCategory::Configuration => {
                "Check the project TOML file and SPANDEX_CFG"
            }
            _ => "Inspect the log output with --verbose for details",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Network => format!("Network problem: {}", self),
            ErrorCategory::Input => format!("Could not read input: {}", self),
            ErrorCategory::Data => format!("Data problem: {}", self),
            ErrorCategory::Spatial => format!("Spatial problem: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, SpandexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_and_severity() {
        let err = SpandexError::config("missing [data] section");
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(err.severity(), ErrorSeverity::Critical);

        let err = SpandexError::ProjectionError { from: 2227, to: 3857 };
        assert_eq!(err.category(), ErrorCategory::Spatial);
        assert!(err.to_string().contains("2227"));
    }

    #[test]
    fn test_user_friendly_message() {
        let err = SpandexError::column_not_found("persons");
        assert_eq!(err.user_friendly_message(), "Data problem: Column not found: persons");
    }
}
