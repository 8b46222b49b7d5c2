use std::fmt::Display;

#[derive(Debug)]
pub enum Error {
    /// Network failure or timeout talking to the gateway.
    Http(reqwest::Error),
    /// The gateway answered with a status outside the usage contract.
    UnexpectedStatus(u16),
    /// The gateway's response body didn't match the usage contract.
    Parse(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::UnexpectedStatus(code) => write!(f, "Unexpected response status: {code}"),
            Error::Parse(message) => write!(f, "Failed to parse response: {message}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}
