use std::path::PathBuf;

/// Everything that ties the service to one particular interpreter: how it is
/// invoked and how its diagnostics are recognized on stderr.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interpreter {
    pub program: PathBuf,
    /// Flag placed before the source text, which follows as a single argv entry.
    pub source_flag: String,
    /// Variables set in the otherwise empty child environment.
    pub env: Vec<(String, String)>,
    pub syntax_error_markers: Vec<String>,
    pub resource_error_markers: Vec<String>,
    /// Present on stderr only when the failure happened at run time.
    pub traceback_header: String,
}

impl Interpreter {
    pub fn python3(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            source_flag: "-c".to_string(),
            env: vec![
                ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
                ("PYTHONIOENCODING".to_string(), "utf-8".to_string()),
                ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
            ],
            syntax_error_markers: vec![
                "SyntaxError".to_string(),
                "IndentationError".to_string(),
                "TabError".to_string(),
            ],
            resource_error_markers: vec!["MemoryError".to_string(), "RecursionError".to_string()],
            traceback_header: "Traceback (most recent call last):".to_string(),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::python3("python3")
    }
}
