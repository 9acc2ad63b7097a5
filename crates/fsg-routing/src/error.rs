use fsg_types::PeerId;

/// Errors from DHT requests.
///
/// None of these abort a lookup; the failing peer is dropped and the lookup
/// carries on with the rest.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("peer {peer} unreachable: {reason}")]
    Unreachable { peer: PeerId, reason: String },

    #[error("request to {peer} timed out")]
    Timeout { peer: PeerId },

    #[error("peer {peer} rejected request: {message}")]
    Rejected { peer: PeerId, message: String },

    #[error("unexpected response from {peer} to {request}")]
    UnexpectedResponse { peer: PeerId, request: &'static str },
}

pub type RoutingResult<T> = Result<T, RoutingError>;
