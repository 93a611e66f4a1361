use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum LumeError {
    ResourceCreationFailed(String),
    PipelineCreationFailed(String),
    ShaderCompilationFailed(String),
    SubmissionFailed(String),
    BackendError(String),
    /// A buffer access that would touch bytes past the end of the allocation.
    OutOfBounds { offset: u64, len: u64, size: u64 },
    OutOfMemory,
    Generic(&'static str),
}

impl fmt::Display for LumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LumeError::ResourceCreationFailed(msg) => write!(f, "Resource Creation Failed: {}", msg),
            LumeError::PipelineCreationFailed(msg) => write!(f, "Pipeline Creation Failed: {}", msg),
            LumeError::ShaderCompilationFailed(msg) => write!(f, "Shader Compilation Failed: {}", msg),
            LumeError::SubmissionFailed(msg) => write!(f, "Submission Failed: {}", msg),
            LumeError::BackendError(msg) => write!(f, "Backend Error: {}", msg),
            LumeError::OutOfBounds { offset, len, size } => write!(
                f,
                "Out of Bounds: {} bytes at offset {} exceeds buffer size {}",
                len, offset, size
            ),
            LumeError::OutOfMemory => write!(f, "Out of Memory"),
            LumeError::Generic(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for LumeError {}

pub type LumeResult<T> = Result<T, LumeError>;
