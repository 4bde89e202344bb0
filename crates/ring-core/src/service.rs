use crate::error::TransportError;
use std::fmt;

/// Calls against the ring service. Implementations own the transport; the
/// monitor only sees raw bodies and outcomes.
pub trait RingService {
    /// `GET /ring`, returning the raw body.
    fn fetch_ring(&self) -> Result<String, TransportError>;

    /// `POST /nodes`.
    fn create_node(&self) -> Result<(), TransportError>;

    /// `DELETE /nodes/{id}`.
    fn delete_node(&self, node_id: &str) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateNode,
    DeleteNode { node_id: String },
}

impl Mutation {
    pub fn send<S: RingService + ?Sized>(&self, service: &S) -> Result<(), TransportError> {
        match self {
            Mutation::CreateNode => service.create_node(),
            Mutation::DeleteNode { node_id } => service.delete_node(node_id),
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::CreateNode => f.write_str("create node"),
            Mutation::DeleteNode { node_id } => write!(f, "delete node {node_id}"),
        }
    }
}
