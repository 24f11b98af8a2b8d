// Asynchronous results delivered to owner mailboxes

use crate::payload::Payload;
use crate::resource::ResourceId;
use tokio::sync::mpsc;

/// Delivery address for a resource's asynchronous results.
///
/// Captured once at load time; every accepted `load`/`send` produces exactly
/// one event on it. Delivery is fire-and-forget: a closed mailbox makes the
/// send a no-op.
pub type OwnerMailbox = mpsc::UnboundedSender<ScriptEvent>;

/// Create an owner mailbox pair.
///
/// The sender is the owner identity handed to
/// [`ScriptPool::load`](crate::ScriptPool::load); the receiver is where
/// the owner awaits replies and errors.
pub fn mailbox() -> (OwnerMailbox, mpsc::UnboundedReceiver<ScriptEvent>) {
    mpsc::unbounded_channel()
}

/// One asynchronous outcome of a load or send request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEvent {
    /// The script compiled and is ready to receive messages
    Loaded { id: ResourceId },

    /// The script failed to compile; the resource is already destroyed
    LoadFailed { id: ResourceId, message: String },

    /// A message was processed; carries the script's return value as JSON
    /// text, empty when the script returned nothing
    Reply { id: ResourceId, payload: Payload },

    /// The script raised during execution; the resource remains usable
    RuntimeError { id: ResourceId, message: String },

    /// The item targeted a resource destroyed between enqueue and execution
    ResourceGone { id: ResourceId },
}

impl ScriptEvent {
    /// The resource this event concerns
    pub fn id(&self) -> ResourceId {
        match self {
            ScriptEvent::Loaded { id }
            | ScriptEvent::LoadFailed { id, .. }
            | ScriptEvent::Reply { id, .. }
            | ScriptEvent::RuntimeError { id, .. }
            | ScriptEvent::ResourceGone { id } => *id,
        }
    }

    /// Stable tag for the embedding boundary
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptEvent::Loaded { .. } => "loaded",
            ScriptEvent::LoadFailed { .. } => "compile_error",
            ScriptEvent::Reply { .. } => "reply",
            ScriptEvent::RuntimeError { .. } => "runtime_error",
            ScriptEvent::ResourceGone { .. } => "resource_gone",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kinds_are_stable() {
        let id = ResourceId(7);
        assert_eq!(ScriptEvent::Loaded { id }.kind(), "loaded");
        assert_eq!(
            ScriptEvent::LoadFailed {
                id,
                message: "bad".to_string()
            }
            .kind(),
            "compile_error"
        );
        assert_eq!(
            ScriptEvent::Reply {
                id,
                payload: Payload::from("2")
            }
            .kind(),
            "reply"
        );
        assert_eq!(ScriptEvent::ResourceGone { id }.kind(), "resource_gone");
    }

    #[test]
    fn event_id_is_preserved() {
        let event = ScriptEvent::RuntimeError {
            id: ResourceId(42),
            message: "boom".to_string(),
        };
        assert_eq!(event.id(), ResourceId(42));
    }

    #[tokio::test]
    async fn mailbox_delivers_in_order() {
        let (tx, mut rx) = mailbox();
        tx.send(ScriptEvent::Loaded { id: ResourceId(1) }).unwrap();
        tx.send(ScriptEvent::Reply {
            id: ResourceId(1),
            payload: Payload::from("ok"),
        })
        .unwrap();

        assert_eq!(rx.recv().await.unwrap().kind(), "loaded");
        assert_eq!(rx.recv().await.unwrap().kind(), "reply");
    }

    #[test]
    fn closed_mailbox_send_fails_quietly() {
        let (tx, rx) = mailbox();
        drop(rx);
        assert!(tx.send(ScriptEvent::Loaded { id: ResourceId(1) }).is_err());
    }
}
