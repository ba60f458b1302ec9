use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReviewSignalError {
    #[error("Notification error: {0}")]
    Notification(String),
}
