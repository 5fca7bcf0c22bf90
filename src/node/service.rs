//! Hub services and service discovery.

use std::fmt;

use super::hub::BusHub;
use crate::message::{Letter, MessageType};
use crate::types::{Error, Result};

/// A named capability a hub provides to its members and their descendants.
pub trait BusService: Send + Sync + fmt::Debug {
    fn service_name(&self) -> &str;

    /// Called once when the service is provided on `hub`; installs routes.
    fn attach(&self, _hub: &BusHub) -> Result<()> {
        Ok(())
    }
}

/// Answers `echo` commands with their arguments and bounces `echo` events back
/// to their sender as `echo.reply`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoService;

impl EchoService {
    pub const NAME: &'static str = "echo";
    pub const REPLY: &'static str = "echo.reply";
}

impl BusService for EchoService {
    fn service_name(&self) -> &str {
        Self::NAME
    }

    fn attach(&self, hub: &BusHub) -> Result<()> {
        hub.node()
            .add_route(MessageType::new(Self::NAME), |node, envelope| {
                match envelope.letter() {
                    Letter::Command(command) => command.voucher.resolve(command.args.clone()),
                    Letter::Event(event) => {
                        let sender = envelope.message().sender();
                        match node.app().resolve(sender) {
                            Some(target) => node.publish(
                                &[target],
                                event.session.clone(),
                                Self::REPLY,
                                event.data.clone(),
                            ),
                            None => {
                                tracing::debug!(%sender, "echo sender not reachable");
                                Ok(())
                            }
                        }
                    }
                    Letter::Invitation(_) => {
                        Err(Error::validation("invitation routed to echo service"))
                    }
                }
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Session;
    use crate::node::{AppContext, Node};
    use crate::types::Config;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_echo_command_returns_args() {
        let app = AppContext::new(Config::default()).unwrap();
        let root = BusHub::new(&app);
        root.provide(Arc::new(EchoService)).unwrap();
        assert!(app.install_root(&root).standby().await.is_successful());

        let client = Node::new(&app);
        let voucher = client.command(root.node(), Session::new(), "echo", json!({"ping": 1}));
        assert!(voucher.standby().await.is_successful());
        assert_eq!(voucher.value().unwrap(), json!({"ping": 1}));
    }

    #[tokio::test]
    async fn test_echo_event_bounces_to_sender() {
        let app = AppContext::new(Config::default()).unwrap();
        let root = BusHub::new(&app);
        root.provide(Arc::new(EchoService)).unwrap();
        assert!(app.install_root(&root).standby().await.is_successful());

        let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let client = Node::builder(&app)
            .route(EchoService::REPLY, move |_, envelope| {
                if let Letter::Event(event) = envelope.letter() {
                    log.lock().push(event.data.clone());
                }
                Ok(())
            })
            .build();
        assert!(root.join(&client, "client").standby().await.is_successful());

        client
            .publish(&[root.node().clone()], Session::new(), "echo", json!("hi"))
            .unwrap();
        for _ in 0..50 {
            if !seen.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*seen.lock(), vec![json!("hi")]);
    }

    #[tokio::test]
    async fn test_service_lookup_walks_up_hubs() {
        let app = AppContext::new(Config::default()).unwrap();
        let root = BusHub::new(&app);
        root.provide(Arc::new(EchoService)).unwrap();
        assert!(app.install_root(&root).standby().await.is_successful());

        let child = BusHub::new(&app);
        assert!(root.join(child.node(), "child").standby().await.is_successful());
        assert!(child.service(EchoService::NAME).is_some());
        assert!(child.service("missing").is_none());
        assert!(root.provide(Arc::new(EchoService)).is_err());
    }
}
