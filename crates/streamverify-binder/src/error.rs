use thiserror::Error;

#[derive(Debug, Error)]
pub enum BinderError {
    #[error("document is not well-formed XHTML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("document has unbalanced tags")]
    Unbalanced,

    #[error("no verification group with index {0}")]
    UnknownGroup(usize),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
