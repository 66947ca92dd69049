mod channel;

pub use channel::ChannelTransport;

use thiserror::Error;

/// Control signals exchanged between race participants. The only other
/// traffic is the end-of-race gather; block content never crosses the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Go,
    Stop,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rank {0} is disconnected")]
    Disconnected(usize),
    #[error("gather lane closed before all ranks reported")]
    GatherClosed,
}

/// Abstract send/probe/receive/gather contract the race protocol runs on.
///
/// Implementations decide how messages actually move; the protocol only
/// ever relies on the semantics below.
pub trait Transport {
    /// This participant's rank, in `0..world_size()`.
    fn rank(&self) -> usize;

    /// Number of participants.
    fn world_size(&self) -> usize;

    /// Point-to-point control signal to `dest`.
    fn send(&self, signal: Signal, dest: usize) -> Result<(), TransportError>;

    /// Non-blocking check for a pending inbound signal.
    fn probe(&self) -> bool;

    /// Blocking receive of the next inbound signal with its source rank.
    fn recv(&self) -> Result<(usize, Signal), TransportError>;

    /// Many-to-one collection: every rank contributes one value, `root`
    /// receives them all, indexed by rank. Returns `Some` only at `root`.
    fn gather(&self, value: u128, root: usize) -> Result<Option<Vec<u128>>, TransportError>;
}
