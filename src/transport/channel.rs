use crossbeam_channel::{unbounded, Receiver, Sender};

use super::{Signal, Transport, TransportError};

/// In-memory transport: a fully connected channel mesh for single-process
/// simulation and testing. Control signals travel one mailbox per endpoint;
/// the gather runs on a dedicated per-endpoint lane so late control
/// messages can never be mistaken for results.
pub struct ChannelTransport {
    rank: usize,
    ctrl_txs: Vec<Sender<(usize, Signal)>>,
    ctrl_rx: Receiver<(usize, Signal)>,
    gather_txs: Vec<Sender<(usize, u128)>>,
    gather_rx: Receiver<(usize, u128)>,
}

impl ChannelTransport {
    /// Build a hub of `size` connected endpoints, one per rank.
    pub fn hub(size: usize) -> Vec<ChannelTransport> {
        assert!(size >= 1, "transport hub needs at least one endpoint");
        let (ctrl_txs, ctrl_rxs): (Vec<_>, Vec<_>) =
            (0..size).map(|_| unbounded()).unzip();
        let (gather_txs, gather_rxs): (Vec<_>, Vec<_>) =
            (0..size).map(|_| unbounded()).unzip();

        ctrl_rxs
            .into_iter()
            .zip(gather_rxs)
            .enumerate()
            .map(|(rank, (ctrl_rx, gather_rx))| ChannelTransport {
                rank,
                ctrl_txs: ctrl_txs.clone(),
                ctrl_rx,
                gather_txs: gather_txs.clone(),
                gather_rx,
            })
            .collect()
    }
}

impl Transport for ChannelTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.ctrl_txs.len()
    }

    fn send(&self, signal: Signal, dest: usize) -> Result<(), TransportError> {
        self.ctrl_txs
            .get(dest)
            .ok_or(TransportError::Disconnected(dest))?
            .send((self.rank, signal))
            .map_err(|_| TransportError::Disconnected(dest))
    }

    fn probe(&self) -> bool {
        !self.ctrl_rx.is_empty()
    }

    fn recv(&self) -> Result<(usize, Signal), TransportError> {
        self.ctrl_rx
            .recv()
            .map_err(|_| TransportError::Disconnected(self.rank))
    }

    fn gather(&self, value: u128, root: usize) -> Result<Option<Vec<u128>>, TransportError> {
        self.gather_txs
            .get(root)
            .ok_or(TransportError::Disconnected(root))?
            .send((self.rank, value))
            .map_err(|_| TransportError::Disconnected(root))?;

        if self.rank != root {
            return Ok(None);
        }

        let size = self.world_size();
        let mut values: Vec<Option<u128>> = vec![None; size];
        let mut reported = 0;
        while reported < size {
            let (source, v) = self
                .gather_rx
                .recv()
                .map_err(|_| TransportError::GatherClosed)?;
            if values[source].is_none() {
                reported += 1;
            }
            values[source] = Some(v);
        }
        Ok(Some(
            values
                .into_iter()
                .map(|v| v.expect("every rank reported"))
                .collect(),
        ))
    }
}
