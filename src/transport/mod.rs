pub mod local;
#[cfg(feature = "ssh")]
pub mod ssh;
#[cfg(test)]
pub(crate) mod stub;
pub mod traits;

pub use local::{LocalSession, LocalTransport};
#[cfg(feature = "ssh")]
pub use ssh::{SshSession, SshTransport};
pub use traits::{ConnectParams, ExecOutput, RemoteSession, RemoteTransport};
