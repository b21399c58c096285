use std::sync::Arc;

/// Long-running resource transfer started by a script.
///
/// `clear` stops the transfer and releases whatever it holds in the host; it is
/// called on context teardown, so it must tolerate being called more than once.
pub trait ResourceTransfer: Send + Sync {
    fn clear(&self);

    fn is_running(&self) -> bool {
        true
    }
}

pub type TransferRef = Arc<dyn ResourceTransfer>;

#[derive(Default)]
pub struct TransferSet {
    transfers: Vec<TransferRef>,
}

impl TransferSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, transfer: TransferRef) {
        self.transfers.push(transfer);
    }

    /// Clears every transfer, then empties the set.
    pub fn clear_all(&mut self) {
        for transfer in &self.transfers {
            transfer.clear();
        }
        self.transfers.clear();
    }

    pub fn running(&self) -> usize {
        self.transfers.iter().filter(|transfer| transfer.is_running()).count()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}
