use crate::errors::AnalyzerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn from_pest(span: pest::Span<'_>) -> Self {
        let (line, column) = span.start_pos().line_col();
        Self { line, column }
    }
}

#[derive(Debug, Clone)]
pub struct SpannedError {
    pub error: LoadError,
    pub span: Option<Span>,
}

#[derive(Debug, Clone)]
pub enum LoadError {
    ParseError(String),
    BadCacheField(String),
    BadValue { field: String, value: String },
    NotPowerOfTwo { field: String, value: u64 },
    DuplicateCfg(String),
    UndeclaredCfg(String),
    DuplicateBlock(String),
    UndeclaredBlock(String),
    DuplicateLoop(String),
    UndeclaredLoop(String),
    EmptyRange { lo: u64, hi: u64 },
    Analyzer(AnalyzerError),
}

pub type Results<T> = std::result::Result<T, Vec<SpannedError>>;

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParseError(msg) => write!(f, "Parse error: {}", msg),
            Self::BadCacheField(name) => write!(f, "Unknown cache field: {}", name),
            Self::BadValue { field, value } => {
                write!(f, "Bad value '{}' for field '{}'", value, field)
            }
            Self::NotPowerOfTwo { field, value } => {
                write!(f, "Field '{}' must be a power of two, got {}", field, value)
            }
            Self::DuplicateCfg(name) => write!(f, "Duplicate CFG: {}", name),
            Self::UndeclaredCfg(name) => write!(f, "Undeclared CFG: {}", name),
            Self::DuplicateBlock(name) => write!(f, "Duplicate block: {}", name),
            Self::UndeclaredBlock(name) => write!(f, "Undeclared block: {}", name),
            Self::DuplicateLoop(name) => write!(f, "Duplicate loop: {}", name),
            Self::UndeclaredLoop(name) => write!(f, "Undeclared loop: {}", name),
            Self::EmptyRange { lo, hi } => {
                write!(f, "Empty address range [{:#x}, {:#x}]", lo, hi)
            }
            Self::Analyzer(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LoadError {}

pub fn format_errors(errors: &[SpannedError], source: &str) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, spanned)| {
            let mut result = format!("Error {}: {}", i + 1, spanned.error);
            if let Some(span) = &spanned.span {
                result.push_str(&format!("\n  --> {}:{}", span.line, span.column));
                if let Some(line_text) = source.lines().nth(span.line.saturating_sub(1)) {
                    result.push_str(&format!("\n   | {}", line_text));
                    result.push_str(&format!("\n   | {}^", " ".repeat(span.column.saturating_sub(1))));
                }
            }
            result
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
