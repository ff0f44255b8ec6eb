use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("fetch playlist: {0}")]
    Http(#[from] reqwest::Error),

    #[error("fetch playlist: HTTP {0}")]
    Status(u16),

    #[error("parse playlist: {0}")]
    Parse(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("variant {0} contains no segments")]
    NoSegments(usize),

    #[error("master playlist contains no variants")]
    NoVariants,

    #[error("unknown variant index: {0}")]
    UnknownVariant(usize),
}
