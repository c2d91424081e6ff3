use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download error: {0}")]
    Download(#[from] hlsdl_engine::HlsDownloadError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Playlist error: {0}")]
    Playlist(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Download incomplete: {0}")]
    Incomplete(String),
}
