//! Error model shared by every public operation.

/// Result of filesystem operations.
pub type Result<T> = std::result::Result<T, VfsError>;

/// Classification of a failed operation.
///
/// Callers are expected to act on the kind; the message is diagnostic only.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The path (or a component of it) does not exist. Also returned
    /// when symlink resolution exceeds the depth limit or cycles.
    NotFound,
    /// A node with the target name already exists.
    AlreadyExists,
    /// The operation is forbidden by the node's permission bits, a
    /// read-only mount, or a mount-point restriction.
    PermissionDenied,
    /// A file operation was attempted on a non-file node.
    NotFile,
    /// A directory operation was attempted on a non-directory node.
    NotDirectory,
    /// The supplied path is not an absolute, well-formed path.
    InvalidPath,
    /// The operation requires a mount that is not present.
    NotMounted,
    /// The path is held by an advisory lock belonging to another handle.
    Locked,
    /// The write would push total usage past the configured quota.
    QuotaExceeded,
    /// A persisted blob failed its CRC or could not be decoded.
    CorruptedData,
    /// Anything that does not map to the kinds above, including
    /// backend I/O failures surfaced verbatim.
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::NotFile => "not a file",
            ErrorKind::NotDirectory => "not a directory",
            ErrorKind::InvalidPath => "invalid path",
            ErrorKind::NotMounted => "not mounted",
            ErrorKind::Locked => "locked",
            ErrorKind::QuotaExceeded => "quota exceeded",
            ErrorKind::CorruptedData => "corrupted data",
            ErrorKind::Unknown => "unknown error",
        };
        f.write_str(name)
    }
}

/// Error returned by filesystem operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsError {
    kind: ErrorKind,
    message: String,
    path: Option<String>,
}

impl std::fmt::Display for VfsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {} ({})", self.kind, self.message, path),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for VfsError {}

impl VfsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), path: None }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, "no such file or directory").with_path(path)
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, "node already exists").with_path(path)
    }

    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, "permission denied").with_path(path)
    }

    pub fn not_file(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFile, "not a file").with_path(path)
    }

    pub fn not_directory(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotDirectory, "not a directory").with_path(path)
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPath, "path must be absolute").with_path(path)
    }

    pub fn locked(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::Locked, "held by another handle").with_path(path)
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CorruptedData, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }
}

impl From<std::io::Error> for VfsError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::Unknown,
        };
        Self::new(kind, err.to_string())
    }
}
