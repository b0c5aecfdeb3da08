use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::{Result, TorexError};
use crate::types::Rank;

enum Slot {
    /// Messages that arrived before anyone asked for them.
    Queued(VecDeque<Vec<u8>>),
    /// A receiver parked until the message arrives.
    Waiting(oneshot::Sender<Vec<u8>>),
}

#[derive(Default)]
struct State {
    slots: HashMap<(Rank, u64), Slot>,
    closed: HashSet<Rank>,
}

/// Matches incoming `(src, tag)` messages with receivers, in either order.
///
/// Frames that arrive before their receiver registers are buffered; a
/// receiver that registers first parks on a oneshot channel. The lock is
/// never held across an `.await`.
#[derive(Default)]
pub(crate) struct Inbox {
    state: Mutex<State>,
}

impl Inbox {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| TorexError::LockPoisoned("inbox"))
    }

    pub fn deliver(&self, src: Rank, tag: u64, data: Vec<u8>) -> Result<()> {
        let mut st = self.lock()?;
        let data = match st.slots.remove(&(src, tag)) {
            Some(Slot::Waiting(tx)) => match tx.send(data) {
                Ok(()) => return Ok(()),
                // Receiver gave up (timed out); keep the message.
                Err(data) => data,
            },
            Some(Slot::Queued(mut queue)) => {
                queue.push_back(data);
                st.slots.insert((src, tag), Slot::Queued(queue));
                return Ok(());
            }
            None => data,
        };
        st.slots
            .insert((src, tag), Slot::Queued(VecDeque::from([data])));
        Ok(())
    }

    pub async fn take(&self, src: Rank, tag: u64) -> Result<Vec<u8>> {
        let rx = {
            let mut st = self.lock()?;
            let closed = st.closed.contains(&src);
            match st.slots.entry((src, tag)) {
                Entry::Occupied(mut e) => match e.get_mut() {
                    Slot::Queued(queue) => {
                        let msg = queue.pop_front();
                        if queue.is_empty() {
                            e.remove();
                        }
                        if let Some(msg) = msg {
                            return Ok(msg);
                        }
                        return Err(TorexError::transport(format!(
                            "empty queue for tag {tag:#x} from rank {src}"
                        )));
                    }
                    Slot::Waiting(tx) if !tx.is_closed() => {
                        return Err(TorexError::transport(format!(
                            "concurrent receive for tag {tag:#x} from rank {src}"
                        )));
                    }
                    Slot::Waiting(_) => {
                        if closed {
                            e.remove();
                            return Err(TorexError::PeerDisconnected { rank: src });
                        }
                        let (tx, rx) = oneshot::channel();
                        e.insert(Slot::Waiting(tx));
                        rx
                    }
                },
                Entry::Vacant(e) => {
                    if closed {
                        return Err(TorexError::PeerDisconnected { rank: src });
                    }
                    let (tx, rx) = oneshot::channel();
                    e.insert(Slot::Waiting(tx));
                    rx
                }
            }
        };
        rx.await
            .map_err(|_| TorexError::PeerDisconnected { rank: src })
    }

    /// Fail current and future receives from `src` once its queue is drained.
    pub fn close_peer(&self, src: Rank) {
        if let Ok(mut st) = self.lock() {
            st.closed.insert(src);
            st.slots
                .retain(|&(s, _), slot| s != src || matches!(slot, Slot::Queued(_)));
        }
    }
}
