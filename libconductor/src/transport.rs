use std::collections::HashMap;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use conductor_proto::{Address, Message};
use errors::*;

/// Receives messages delivered by the transport. Delivery happens as an
/// upcall on a transport-managed thread, never on the caller's thread.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, source: &Address, message: Message);
}

/// The point-to-point message transport contract. Implementations must be
/// reliable and preserve per-sender ordering; nothing is guaranteed across
/// senders.
pub trait Transport: Send + Sync {
    fn local_address(&self) -> Address;

    fn send(&self, destination: &Address, message: Message) -> Result<()>;

    /// Registers the single upcall handler for this endpoint. Messages that
    /// arrive before registration are held back, not dropped.
    fn register_handler(&self, handler: Arc<MessageHandler>);
}

struct Envelope {
    source: Address,
    message: Message,
}

/// An in-process transport: every endpoint is a named mailbox with its own
/// delivery thread. Used by the test suite and the single-process demo
/// cluster; a real deployment supplies its own `Transport`.
pub struct LocalExchange {
    mailboxes: Mutex<HashMap<Address, Sender<Envelope>>>,
}

impl LocalExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(LocalExchange {
            mailboxes: Mutex::new(HashMap::new()),
        })
    }

    /// Creates an endpoint on the exchange and starts its delivery thread.
    pub fn bind(exchange: &Arc<Self>, address: &str) -> Result<Arc<LocalTransport>> {
        let (sender, receiver) = channel::<Envelope>();

        {
            let mut mailboxes = exchange.mailboxes.lock().unwrap();
            if mailboxes.contains_key(address) {
                bail!(format!("Address {} is already bound", address));
            }
            mailboxes.insert(address.to_owned(), sender);
        }

        let transport = Arc::new(LocalTransport {
            exchange: Arc::clone(exchange),
            address: address.to_owned(),
            handler: Mutex::new(None),
            handler_registered: Condvar::new(),
        });

        let delivery = Arc::clone(&transport);
        thread::spawn(move || {
            for envelope in receiver {
                let handler = delivery.wait_for_handler();
                handler.on_message(&envelope.source, envelope.message);
            }
        });

        Ok(transport)
    }

    /// Removes an endpoint; its delivery thread drains and exits. Sends to
    /// the address fail from then on.
    pub fn unbind(&self, address: &str) {
        self.mailboxes.lock().unwrap().remove(address);
    }

    fn route(&self, source: &Address, destination: &Address, message: Message) -> Result<()> {
        let mailboxes = self.mailboxes.lock().unwrap();
        let mailbox = mailboxes
            .get(destination)
            .chain_err(|| format!("No endpoint bound at {}", destination))?;

        mailbox
            .send(Envelope {
                source: source.to_owned(),
                message: message,
            })
            .map_err(|_| format!("Endpoint {} is no longer receiving", destination).into())
    }
}

pub struct LocalTransport {
    exchange: Arc<LocalExchange>,
    address: Address,
    handler: Mutex<Option<Arc<MessageHandler>>>,
    handler_registered: Condvar,
}

impl LocalTransport {
    fn wait_for_handler(&self) -> Arc<MessageHandler> {
        let mut handler = self.handler.lock().unwrap();
        while handler.is_none() {
            handler = self.handler_registered.wait(handler).unwrap();
        }
        Arc::clone(handler.as_ref().unwrap())
    }
}

impl Transport for LocalTransport {
    fn local_address(&self) -> Address {
        self.address.clone()
    }

    fn send(&self, destination: &Address, message: Message) -> Result<()> {
        trace!(
            "{} -> {}: {}",
            self.address,
            destination,
            message.kind()
        );
        self.exchange.route(&self.address, destination, message)
    }

    fn register_handler(&self, handler: Arc<MessageHandler>) {
        let mut slot = self.handler.lock().unwrap();
        *slot = Some(handler);
        drop(slot);
        self.handler_registered.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_proto::message::KillJob;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Recorder {
        sender: Mutex<mpsc::Sender<(Address, Message)>>,
    }

    impl MessageHandler for Recorder {
        fn on_message(&self, source: &Address, message: Message) {
            self.sender
                .lock()
                .unwrap()
                .send((source.clone(), message))
                .unwrap();
        }
    }

    fn kill(id: u64) -> Message {
        Message::KillJob(KillJob { dispatch_id: id })
    }

    #[test]
    fn test_delivery_and_sender_order() {
        let exchange = LocalExchange::new();
        let alpha = LocalExchange::bind(&exchange, "alpha").unwrap();
        let beta = LocalExchange::bind(&exchange, "beta").unwrap();

        let (sender, receiver) = mpsc::channel();
        beta.register_handler(Arc::new(Recorder {
            sender: Mutex::new(sender),
        }));

        for i in 0..10 {
            alpha.send(&"beta".to_owned(), kill(i)).unwrap();
        }

        for i in 0..10 {
            let (source, message) = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(source, "alpha");
            match message {
                Message::KillJob(payload) => assert_eq!(payload.dispatch_id, i),
                other => panic!("Unexpected message {}", other.kind()),
            }
        }
    }

    #[test]
    fn test_messages_held_until_handler_registered() {
        let exchange = LocalExchange::new();
        let alpha = LocalExchange::bind(&exchange, "alpha2").unwrap();
        let beta = LocalExchange::bind(&exchange, "beta2").unwrap();

        alpha.send(&"beta2".to_owned(), kill(1)).unwrap();

        let (sender, receiver) = mpsc::channel();
        beta.register_handler(Arc::new(Recorder {
            sender: Mutex::new(sender),
        }));

        let (_, message) = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(message.kind(), "KillJob");
    }

    #[test]
    fn test_send_to_unknown_address_fails() {
        let exchange = LocalExchange::new();
        let alpha = LocalExchange::bind(&exchange, "alpha3").unwrap();

        assert!(alpha.send(&"nowhere".to_owned(), kill(2)).is_err());
    }

    #[test]
    fn test_duplicate_bind_fails() {
        let exchange = LocalExchange::new();
        let _first = LocalExchange::bind(&exchange, "dup").unwrap();
        assert!(LocalExchange::bind(&exchange, "dup").is_err());
    }
}
