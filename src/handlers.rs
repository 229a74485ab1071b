//! Embedder callbacks and the dispatcher that runs them.
//!
//! Handlers only ever run on the thread that calls
//! [`RpcClient::run_callbacks`](crate::client::RpcClient::run_callbacks),
//! never on the I/O thread.

use crate::mailbox::{Delivery, Mailbox, MailboxKind};
use crate::protocol::{Subscription, Subscriptions};

type Callback = Box<dyn FnMut() + Send>;
type WithError = Box<dyn FnMut(i32, &str) + Send>;
type WithSecret = Box<dyn FnMut(&str) + Send>;

/// Optional callbacks for each event the client reports.
///
/// Registering a presence-requested, join or spectate handler also
/// subscribes the client to that event on the peer.
///
/// # Example
///
/// ```
/// use rich_presence_client::EventHandlers;
///
/// let handlers = EventHandlers::new()
///     .on_ready(|| println!("connected"))
///     .on_join_game(|secret| println!("joining with {secret}"));
/// assert!(!handlers.subscriptions().is_empty());
/// ```
#[derive(Default)]
pub struct EventHandlers {
    ready: Option<Callback>,
    disconnected: Option<WithError>,
    errored: Option<WithError>,
    presence_requested: Option<Callback>,
    join_game: Option<WithSecret>,
    spectate_game: Option<WithSecret>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after every successful connection.
    #[must_use]
    pub fn on_ready(mut self, handler: impl FnMut() + Send + 'static) -> Self {
        self.ready = Some(Box::new(handler));
        self
    }

    /// Called with the close code and message when a connection is lost.
    #[must_use]
    pub fn on_disconnected(mut self, handler: impl FnMut(i32, &str) + Send + 'static) -> Self {
        self.disconnected = Some(Box::new(handler));
        self
    }

    /// Called with the code and message of an error response from the peer.
    #[must_use]
    pub fn on_errored(mut self, handler: impl FnMut(i32, &str) + Send + 'static) -> Self {
        self.errored = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_presence_requested(mut self, handler: impl FnMut() + Send + 'static) -> Self {
        self.presence_requested = Some(Box::new(handler));
        self
    }

    /// Called with the join secret when the user accepts a join.
    #[must_use]
    pub fn on_join_game(mut self, handler: impl FnMut(&str) + Send + 'static) -> Self {
        self.join_game = Some(Box::new(handler));
        self
    }

    /// Called with the spectate secret when the user chooses to spectate.
    #[must_use]
    pub fn on_spectate_game(mut self, handler: impl FnMut(&str) + Send + 'static) -> Self {
        self.spectate_game = Some(Box::new(handler));
        self
    }

    /// The peer events these handlers need a subscription for.
    pub fn subscriptions(&self) -> Subscriptions {
        let mut subscriptions = Subscriptions::NONE;
        if self.presence_requested.is_some() {
            subscriptions = subscriptions.with(Subscription::PresenceRequested);
        }
        if self.join_game.is_some() {
            subscriptions = subscriptions.with(Subscription::JoinGame);
        }
        if self.spectate_game.is_some() {
            subscriptions = subscriptions.with(Subscription::SpectateGame);
        }
        subscriptions
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("ready", &self.ready.is_some())
            .field("disconnected", &self.disconnected.is_some())
            .field("errored", &self.errored.is_some())
            .field("presence_requested", &self.presence_requested.is_some())
            .field("join_game", &self.join_game.is_some())
            .field("spectate_game", &self.spectate_game.is_some())
            .finish()
    }
}

/// Dispatch order. Errors and disconnects are reported before a fresh
/// `ready` so an embedder sees a reconnect in causal order.
const DISPATCH_ORDER: [MailboxKind; 6] = [
    MailboxKind::Errored,
    MailboxKind::Disconnected,
    MailboxKind::Connected,
    MailboxKind::PresenceRequested,
    MailboxKind::JoinGame,
    MailboxKind::SpectateGame,
];

/// Deliver every pending mailbox entry to its handler.
///
/// Entries are consumed whether or not a handler is registered, so an event
/// that arrives with no handler is not replayed once one is installed.
pub(crate) fn run_callbacks(mailbox: &Mailbox, handlers: &mut EventHandlers) {
    for kind in DISPATCH_ORDER {
        let Some(delivery) = mailbox.take_if_ready(kind) else {
            continue;
        };
        match delivery {
            Delivery::Errored(info) => {
                if let Some(handler) = handlers.errored.as_mut() {
                    handler(info.code, info.message.as_str());
                }
            }
            Delivery::Disconnected(info) => {
                if let Some(handler) = handlers.disconnected.as_mut() {
                    handler(info.code, info.message.as_str());
                }
            }
            Delivery::Connected => {
                if let Some(handler) = handlers.ready.as_mut() {
                    handler();
                }
            }
            Delivery::PresenceRequested => {
                if let Some(handler) = handlers.presence_requested.as_mut() {
                    handler();
                }
            }
            Delivery::JoinGame(secret) => {
                if let Some(handler) = handlers.join_game.as_mut() {
                    handler(secret.as_str());
                }
            }
            Delivery::SpectateGame(secret) => {
                if let Some(handler) = handlers.spectate_game.as_mut() {
                    handler(secret.as_str());
                }
            }
        }
    }
}
