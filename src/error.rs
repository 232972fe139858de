use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("download failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("download returned HTTP {0}")]
    Status(u16),
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("could not encode jpeg: {0}")]
    Encode(#[from] jpeg_encoder::EncodingError),
    #[error("image {0}x{1} exceeds encoder limits")]
    Dimensions(u32, u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("ffmpeg exited with {status}: {stderr}")]
    Process { status: String, stderr: String },
}

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("template not found: {0}")]
    Missing(String),
    #[error("template is not a valid zip package: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("worksheet xml in {part} is malformed: {reason}")]
    Xml { part: String, reason: String },
    #[error("spreadsheet could not be loaded: {0}")]
    Load(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
