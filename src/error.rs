use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Which of the two inputs an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ImageRole {
    Reference,
    Crop,
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRole::Reference => write!(f, "reference image"),
            ImageRole::Crop => write!(f, "crop image"),
        }
    }
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Unable to load the {role} '{}': {source}", path.display())]
    Load {
        role: ImageRole,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Report rendering failed: {0}")]
    Render(String),
}

impl VerifyError {
    /// True for the one user-visible failure of a verification call.
    pub fn is_load_error(&self) -> bool {
        matches!(self, VerifyError::Load { .. })
    }
}

pub type Result<T> = std::result::Result<T, VerifyError>;
