pub mod probe;
pub mod repository;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use repository::{Git2Backend, GitBackend, GitError};
pub use transport::{Transport, TransportError};
