//! Errors returned by the control plane.

use crate::client::ClientGone;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("uid {uid} is not allowed to manage freeform displays")]
    PermissionDenied { uid: u32 },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("required host services are not available yet")]
    NotReady,
    #[error("the client disconnected while its display was being created")]
    ClientGone,
    #[error(transparent)]
    Host(#[from] anyhow::Error),
}

impl From<ClientGone> for Error {
    fn from(_: ClientGone) -> Self {
        Error::ClientGone
    }
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}
