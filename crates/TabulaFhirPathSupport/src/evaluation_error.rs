/// Failure categories raised during FHIRPath expression evaluation.
///
/// Evaluation never panics on malformed data: absent fields produce empty
/// results. Errors are reserved for genuine misuse of the language: wrong
/// argument counts, type-incompatible comparisons, or functions outside the
/// supported dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// Type mismatch in an operation or function argument.
    ///
    /// Example: "Operator '=' cannot compare String and Integer"
    TypeError(String),
    /// Incorrect number of arguments provided to a function.
    ///
    /// Example: "Function 'first' expects no arguments"
    InvalidArity(String),
    /// Invalid collection index (non-integer or non-singleton index value).
    InvalidIndex(String),
    /// Reference to an environment variable that is not defined.
    ///
    /// Example: "Variable '%threshold' not found"
    UndefinedVariable(String),
    /// A singleton was required but the value had more than one item.
    ///
    /// Example: "Operator 'and' requires singleton values"
    SingletonEvaluationError(String),
    /// A function outside the supported dialect was invoked.
    UnsupportedFunction(String),
    /// Invalid type name given to `ofType()` or `getReferenceKey()`.
    InvalidTypeSpecifier(String),
    /// Anything that does not fit the categories above.
    Other(String),
}

impl std::error::Error for EvaluationError {}

impl std::fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationError::TypeError(msg) => write!(f, "Type Error: {}", msg),
            EvaluationError::InvalidArity(msg) => write!(f, "Invalid Arity: {}", msg),
            EvaluationError::InvalidIndex(msg) => write!(f, "Invalid Index: {}", msg),
            EvaluationError::UndefinedVariable(name) => write!(f, "Undefined Variable: {}", name),
            EvaluationError::SingletonEvaluationError(msg) => {
                write!(f, "Singleton Evaluation Error: {}", msg)
            }
            EvaluationError::UnsupportedFunction(msg) => write!(f, "Unsupported Function: {}", msg),
            EvaluationError::InvalidTypeSpecifier(msg) => {
                write!(f, "Invalid Type Specifier: {}", msg)
            }
            EvaluationError::Other(msg) => write!(f, "Evaluation Error: {}", msg),
        }
    }
}
