use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceCommand {
    Restart,
    Stop,
}

impl ServiceCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCommand::Restart => "restart",
            ServiceCommand::Stop => "stop",
        }
    }
}

/// Process-lifecycle signals delivered to the node's serve loop.
#[derive(Debug, Clone)]
pub struct ServiceSignals {
    sender: broadcast::Sender<ServiceCommand>,
}

impl ServiceSignals {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(8);
        Self { sender }
    }

    /// Delivers `command` to every subscriber. Sending with no subscriber
    /// listening is not an error: the node simply is not serving yet.
    pub fn send(&self, command: ServiceCommand) {
        match self.sender.send(command) {
            Ok(receivers) => {
                tracing::info!("Delivered {} signal to {} listener(s)", command.as_str(), receivers)
            }
            Err(_) => tracing::warn!("No listener for {} signal", command.as_str()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceCommand> {
        self.sender.subscribe()
    }
}

impl Default for ServiceSignals {
    fn default() -> Self {
        Self::new()
    }
}
