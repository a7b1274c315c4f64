//! Message transport between the two parties.
//!
//! A `Transport` carries `Envelope`s for any number of swaps. The `Router`
//! sits on top of one transport, drops duplicates through an `Inbox` and
//! hands each swap its own `SwapChannel`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::error::SwapError;
use crate::messages::Message;
use crate::types::SwapId;

const CHANNEL_CAPACITY: usize = 32;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub swap_id: SwapId,
    pub seq: u64,
    pub message: Message,
}

impl Envelope {
    #[must_use]
    pub fn new(swap_id: SwapId, message: Message) -> Self {
        Self {
            swap_id,
            seq: message.ordinal(),
            message,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), SwapError>;

    /// Next inbound envelope. Fails once the peer is gone.
    async fn recv(&self) -> Result<Envelope, SwapError>;
}

/// One end of an in-memory transport.
pub struct ChannelTransport {
    outgoing: mpsc::Sender<Envelope>,
    incoming: tokio::sync::Mutex<mpsc::Receiver<Envelope>>,
}

/// Two connected in-memory transport ends.
#[must_use]
pub fn channel_transport() -> (ChannelTransport, ChannelTransport) {
    let (a_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (b_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
    (
        ChannelTransport {
            outgoing: a_tx,
            incoming: tokio::sync::Mutex::new(b_rx),
        },
        ChannelTransport {
            outgoing: b_tx,
            incoming: tokio::sync::Mutex::new(a_rx),
        },
    )
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), SwapError> {
        self.outgoing
            .send(envelope)
            .await
            .map_err(|_| SwapError::Transport("peer disconnected".into()))
    }

    async fn recv(&self) -> Result<Envelope, SwapError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| SwapError::Transport("peer disconnected".into()))
    }
}

/// Drops envelopes whose sequence number was already accepted for a swap.
#[derive(Debug, Default)]
pub struct Inbox {
    last_seen: HashMap<SwapId, u64>,
}

impl Inbox {
    /// Returns the message if it is new for its swap.
    pub fn accept(&mut self, envelope: Envelope) -> Option<Message> {
        let last = self.last_seen.entry(envelope.swap_id).or_insert(0);
        if envelope.seq <= *last && envelope.seq != u64::MAX {
            debug!(
                swap_id = %envelope.swap_id,
                seq = envelope.seq,
                "Dropping duplicate message"
            );
            return None;
        }
        *last = envelope.seq;
        Some(envelope.message)
    }

    /// Keeps the sequence state only of swaps `keep` accepts.
    pub fn retain(&mut self, mut keep: impl FnMut(&SwapId) -> bool) {
        self.last_seen.retain(|swap_id, _| keep(swap_id));
    }
}

/// Per-swap view of the transport.
pub struct SwapChannel {
    swap_id: SwapId,
    incoming: mpsc::Receiver<Message>,
    outgoing: mpsc::Sender<Envelope>,
}

impl SwapChannel {
    #[must_use]
    pub fn swap_id(&self) -> SwapId {
        self.swap_id
    }

    /// # Errors
    /// Returns `SwapError::Transport` if the router has shut down.
    pub async fn send(&self, message: Message) -> Result<(), SwapError> {
        debug!(swap_id = %self.swap_id, message = message.name(), "Sending message");
        self.outgoing
            .send(Envelope::new(self.swap_id, message))
            .await
            .map_err(|_| SwapError::Transport("router closed".into()))
    }

    /// # Errors
    /// Returns `SwapError::Transport` if the router has shut down.
    pub async fn recv(&mut self) -> Result<Message, SwapError> {
        self.incoming
            .recv()
            .await
            .ok_or_else(|| SwapError::Transport("router closed".into()))
    }
}

/// Receives the next message within `deadline`.
///
/// An `Abort` from the peer surfaces as a protocol violation.
pub(crate) async fn recv_within(
    channel: &mut SwapChannel,
    deadline: Duration,
) -> Result<Message, SwapError> {
    match tokio::time::timeout(deadline, channel.recv()).await {
        Err(_) => Err(SwapError::TimeoutBreach(format!(
            "no message from peer within {}s",
            deadline.as_secs()
        ))),
        Ok(Ok(Message::Abort { reason })) => Err(SwapError::ProtocolViolation(format!(
            "peer aborted: {reason}"
        ))),
        Ok(received) => received,
    }
}

type Routes = Arc<Mutex<HashMap<SwapId, mpsc::Sender<Message>>>>;

fn lock_routes(routes: &Routes) -> MutexGuard<'_, HashMap<SwapId, mpsc::Sender<Message>>> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forgets swaps whose channel was dropped.
fn prune(routes: &Routes, inbox: &mut Inbox) {
    let mut routes = lock_routes(routes);
    routes.retain(|_, route| !route.is_closed());
    inbox.retain(|swap_id| routes.contains_key(swap_id));
}

/// Demultiplexes one transport into per-swap channels.
#[derive(Clone)]
pub struct Router {
    routes: Routes,
    outgoing: mpsc::Sender<Envelope>,
}

/// First message of a swap the router has no channel for.
pub struct NewSwap {
    pub swap_id: SwapId,
    pub message: Message,
    pub channel: SwapChannel,
}

impl Router {
    /// Spawns the routing task over `transport`.
    ///
    /// Envelopes for unknown swaps are registered on the fly and reported on
    /// the returned receiver, which is how a maker learns of new requests.
    pub fn spawn<T: Transport + 'static>(transport: T) -> (Self, mpsc::Receiver<NewSwap>) {
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(CHANNEL_CAPACITY);
        let (new_tx, new_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let router = Self {
            routes: Arc::default(),
            outgoing: out_tx,
        };

        let routes = router.routes.clone();
        let loopback = router.clone();
        tokio::spawn(async move {
            let mut inbox = Inbox::default();
            loop {
                tokio::select! {
                    Some(envelope) = out_rx.recv() => {
                        if let Err(e) = transport.send(envelope).await {
                            warn!(error = %e, "Failed to send envelope");
                        }
                    }
                    received = transport.recv() => {
                        let envelope = match received {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                debug!(error = %e, "Transport closed; stopping router");
                                break;
                            }
                        };
                        prune(&routes, &mut inbox);
                        let swap_id = envelope.swap_id;
                        let Some(message) = inbox.accept(envelope) else {
                            continue;
                        };
                        let route = lock_routes(&routes).get(&swap_id).cloned();
                        match route {
                            Some(route) => match route.try_send(message) {
                                Ok(()) => {}
                                Err(TrySendError::Full(message)) => warn!(
                                    %swap_id,
                                    message = message.name(),
                                    "Swap is not reading its messages; dropping"
                                ),
                                Err(TrySendError::Closed(_)) => {
                                    debug!(%swap_id, "Swap channel closed; dropping message");
                                    prune(&routes, &mut inbox);
                                }
                            },
                            None => {
                                let channel = loopback.register(swap_id);
                                let new = NewSwap { swap_id, message, channel };
                                if let Err(e) = new_tx.try_send(new) {
                                    let (reason, new) = match e {
                                        TrySendError::Full(new) => ("acceptor is busy", new),
                                        TrySendError::Closed(new) => ("nobody accepts swaps", new),
                                    };
                                    warn!(
                                        %swap_id,
                                        message = new.message.name(),
                                        reason,
                                        "Dropping new swap"
                                    );
                                    drop(new);
                                    prune(&routes, &mut inbox);
                                }
                            }
                        }
                    }
                }
            }
        });

        (router, new_rx)
    }

    /// Opens the channel for `swap_id`, replacing any previous one.
    #[must_use]
    pub fn register(&self, swap_id: SwapId) -> SwapChannel {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        lock_routes(&self.routes).insert(swap_id, tx);
        SwapChannel {
            swap_id,
            incoming: rx,
            outgoing: self.outgoing.clone(),
        }
    }
}

/// Two swap channels wired directly to each other.
#[must_use]
pub fn channel_pair(swap_id: SwapId) -> (SwapChannel, SwapChannel) {
    let (a_out, mut a_out_rx) = mpsc::channel::<Envelope>(CHANNEL_CAPACITY);
    let (b_out, mut b_out_rx) = mpsc::channel::<Envelope>(CHANNEL_CAPACITY);
    let (a_in, a_in_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (b_in, b_in_rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut inbox = Inbox::default();
        while let Some(envelope) = a_out_rx.recv().await {
            if let Some(message) = inbox.accept(envelope) {
                if b_in.send(message).await.is_err() {
                    break;
                }
            }
        }
    });
    tokio::spawn(async move {
        let mut inbox = Inbox::default();
        while let Some(envelope) = b_out_rx.recv().await {
            if let Some(message) = inbox.accept(envelope) {
                if a_in.send(message).await.is_err() {
                    break;
                }
            }
        }
    });

    (
        SwapChannel {
            swap_id,
            incoming: a_in_rx,
            outgoing: a_out,
        },
        SwapChannel {
            swap_id,
            incoming: b_in_rx,
            outgoing: b_out,
        },
    )
}

#[cfg(test)]
mod tests {
    use bitcoin::Amount;

    use super::*;
    use crate::messages::SwapRequest;

    fn request() -> Message {
        Message::SwapRequest(SwapRequest {
            btc: Amount::from_sat(1_000_000),
        })
    }

    #[test]
    fn inbox_drops_replayed_sequence_numbers() {
        let mut inbox = Inbox::default();
        let id = SwapId::random();
        assert!(inbox.accept(Envelope::new(id, request())).is_some());
        assert!(inbox.accept(Envelope::new(id, request())).is_none());

        let other = SwapId::random();
        assert!(inbox.accept(Envelope::new(other, request())).is_some());
    }

    #[test]
    fn inbox_always_delivers_abort() {
        let mut inbox = Inbox::default();
        let id = SwapId::random();
        let abort = || Message::Abort {
            reason: "bye".into(),
        };
        assert!(inbox.accept(Envelope::new(id, abort())).is_some());
        assert!(inbox.accept(Envelope::new(id, abort())).is_some());
    }

    #[tokio::test]
    async fn router_announces_new_swaps_and_routes_replies() {
        let (maker_end, taker_end) = channel_transport();
        let (maker, mut new_swaps) = Router::spawn(maker_end);
        let (taker, _) = Router::spawn(taker_end);

        let id = SwapId::random();
        let mut taker_channel = taker.register(id);
        taker_channel.send(request()).await.unwrap();
        taker_channel.send(request()).await.unwrap();

        let new = new_swaps.recv().await.expect("new swap");
        assert_eq!(new.swap_id, id);
        assert!(matches!(new.message, Message::SwapRequest(_)));
        drop(maker);

        new.channel
            .send(Message::Abort {
                reason: "no liquidity".into(),
            })
            .await
            .unwrap();
        match taker_channel.recv().await.unwrap() {
            Message::Abort { reason } => assert_eq!(reason, "no liquidity"),
            other => panic!("unexpected {}", other.name()),
        }
    }

    #[tokio::test]
    async fn closed_swap_is_forgotten_and_announced_again() {
        let (maker_end, taker_end) = channel_transport();
        let (maker, mut new_swaps) = Router::spawn(maker_end);
        let (taker, _) = Router::spawn(taker_end);

        let id = SwapId::random();
        drop(maker.register(id));
        taker.register(id).send(request()).await.unwrap();

        let new = new_swaps.recv().await.expect("swap announced again");
        assert_eq!(new.swap_id, id);
        assert_eq!(lock_routes(&maker.routes).len(), 1);
    }

    #[tokio::test]
    async fn stalled_swap_does_not_hold_up_others() {
        let (maker_end, taker_end) = channel_transport();
        let (maker, _new_swaps) = Router::spawn(maker_end);
        let (taker, _) = Router::spawn(taker_end);

        let (stalled, live) = (SwapId::random(), SwapId::random());
        let _never_read = maker.register(stalled);
        let mut live_channel = maker.register(live);

        let to_stalled = taker.register(stalled);
        for _ in 0..CHANNEL_CAPACITY * 2 {
            to_stalled
                .send(Message::Abort {
                    reason: "again".into(),
                })
                .await
                .unwrap();
        }
        taker.register(live).send(request()).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), live_channel.recv()).await;
        assert!(matches!(received, Ok(Ok(Message::SwapRequest(_)))));
    }

    #[test]
    fn inbox_retain_resets_forgotten_swaps() {
        let mut inbox = Inbox::default();
        let (kept, forgotten) = (SwapId::random(), SwapId::random());
        assert!(inbox.accept(Envelope::new(kept, request())).is_some());
        assert!(inbox.accept(Envelope::new(forgotten, request())).is_some());

        inbox.retain(|id| *id == kept);
        assert!(inbox.accept(Envelope::new(kept, request())).is_none());
        assert!(inbox.accept(Envelope::new(forgotten, request())).is_some());
    }

    #[tokio::test]
    async fn channel_pair_delivers_both_ways() {
        let id = SwapId::random();
        let (a, mut b) = channel_pair(id);
        a.send(request()).await.unwrap();
        assert!(matches!(b.recv().await.unwrap(), Message::SwapRequest(_)));
        assert_eq!(b.swap_id(), id);
    }
}
