//! Event channel factories and handles.

use crate::entities::ChangeEvent;
use tokio::sync::mpsc;

/// Buffer of the change event channel. A full buffer applies backpressure to
/// CRM writes rather than dropping events.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

pub type ChangeEventSender = mpsc::Sender<ChangeEvent>;
pub type ChangeEventReceiver = mpsc::Receiver<ChangeEvent>;

/// Channel from the CRM object store to the event dispatcher.
pub fn change_event_channel() -> (ChangeEventSender, ChangeEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
