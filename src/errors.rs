use std::path::PathBuf;
use std::process::ExitStatus;

#[derive(thiserror::Error, Debug)]
pub enum FgtoolsError {
    #[error("Could not launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} failed ({status})")]
    ChildProcess {
        program: String,
        status: ExitStatus,
        output: String,
    },

    #[error("Malformed progress line {line:?}: {detail}")]
    MalformedOutput { line: String, detail: String },

    #[error("Not enough timing data: {detail}")]
    InsufficientData { detail: String },

    #[error("No measurement runs to aggregate")]
    EmptyMeasurement,

    #[error("Failed to read composition table {path}: {source}")]
    ModelRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Bad composition table row at line {line}: {detail}")]
    ModelParse { line: usize, detail: String },

    #[error("Composition table has no '{column}' column")]
    MissingColumn { column: String },
}
