pub type Result<T> = std::result::Result<T, TileError>;

#[derive(thiserror::Error, Debug)]
pub enum TileError {
    #[error("{0}")]
    OutsideBounds(String),
    #[error("Point is outside dataset bounds")]
    PointOutsideBounds,
    #[error("No asset contributed valid pixels to the mosaic")]
    EmptyMosaic,
    #[error("invalid world file: {0}")]
    InvalidWorldFile(String),
    #[error("band index {0} does not exist")]
    InvalidBandIndex(usize),
    #[error("tile shape {found:?} does not match mosaic shape {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
    #[error("unknown tile matrix set {0}")]
    UnknownTileMatrixSet(String),
    #[error("unknown pixel selection method {0}")]
    UnknownPixelSelection(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    TimeFormat(#[from] time::error::Format),
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl TileError {
    /// Errors meaning "there is no data here" rather than "something broke".
    pub fn is_outside_bounds(&self) -> bool {
        matches!(
            self,
            TileError::OutsideBounds(_)
                | TileError::PointOutsideBounds
                | TileError::EmptyMosaic
                | TileError::UnknownTileMatrixSet(_)
        )
    }
}
