//! Remote execution channel to the machine being provisioned.
//!
//! The artifact provisioner works entirely through the DevTest Labs control
//! plane and never runs anything over the channel. It still receives one so
//! it can be driven by the same host loop as provisioners that do.

/// Channel to the target machine.
pub trait Communicator: Send + Sync {
    /// Short name of the transport, e.g. `ssh` or `winrm`.
    fn kind(&self) -> &str;
}

/// [`Communicator`] for hosts that provide no channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCommunicator;

impl Communicator for NullCommunicator {
    fn kind(&self) -> &str {
        "none"
    }
}
