//! Hub actor implementation
//!
//! The central actor that owns the connection registry and the group map.
//! Every mutation and every broadcast goes through its command channel, so
//! the registry is never observed half-updated.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::dispatch;
use crate::error::AppError;
use crate::message::{Message, MessageDraft, MessageKind};
use crate::stats::{Stats, StatsSnapshot};
use crate::types::ConnectionId;

/// Commands submitted to the Hub actor
#[derive(Debug)]
pub enum HubCommand {
    /// Add a connection to the registry
    Register { connection: Connection },
    /// Remove a connection (idempotent)
    Unregister { connection_id: ConnectionId },
    /// Bind identity and room of an anonymous connection
    Identify {
        connection_id: ConnectionId,
        identity: String,
        room: String,
    },
    /// Room-filtered delivery to every connection
    Broadcast { draft: MessageDraft },
    /// Add a connection to a group
    JoinGroup {
        connection_id: ConnectionId,
        group: String,
    },
    /// Remove a connection from a group
    LeaveGroup {
        connection_id: ConnectionId,
        group: String,
    },
    /// Delivery to the members of one group
    SendToGroup { group: String, draft: MessageDraft },
    /// List registered connection ids
    Connections {
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
    /// List the members of a group
    GroupMembers {
        group: String,
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
}

/// The Hub actor
///
/// Single writer of the registry, the group map and the stats counters.
pub struct Hub {
    /// All registered connections: ConnectionId -> Connection
    connections: HashMap<ConnectionId, Connection>,
    /// Group label -> member ids
    groups: HashMap<String, HashSet<ConnectionId>>,
    /// Counters shared with every HubHandle
    stats: Arc<Stats>,
    /// Command receiver channel
    receiver: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// Create a hub and the handle used to talk to it
    pub fn channel(capacity: usize) -> (Self, HubHandle) {
        let (sender, receiver) = mpsc::channel(capacity);
        let stats = Arc::new(Stats::new());
        let hub = Self {
            connections: HashMap::new(),
            groups: HashMap::new(),
            stats: Arc::clone(&stats),
            receiver,
        };
        (hub, HubHandle { sender, stats })
    }

    /// Run the Hub event loop
    ///
    /// Processes commands one at a time until every handle is dropped.
    pub async fn run(mut self) {
        info!("Hub started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            "Hub shutting down, closing {} connections",
            self.connections.len()
        );
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { connection } => self.register(connection),
            HubCommand::Unregister { connection_id } => self.unregister(connection_id),
            HubCommand::Identify {
                connection_id,
                identity,
                room,
            } => self.identify(connection_id, identity, room),
            HubCommand::Broadcast { draft } => self.broadcast(draft),
            HubCommand::JoinGroup {
                connection_id,
                group,
            } => self.join_group(connection_id, group),
            HubCommand::LeaveGroup {
                connection_id,
                group,
            } => self.leave_group(connection_id, &group),
            HubCommand::SendToGroup { group, draft } => self.send_to_group(&group, draft),
            HubCommand::Connections { reply } => {
                let _ = reply.send(self.connections.keys().copied().collect());
            }
            HubCommand::GroupMembers { group, reply } => {
                let members = self
                    .groups
                    .get(&group)
                    .map(|m| m.iter().copied().collect())
                    .unwrap_or_default();
                let _ = reply.send(members);
            }
        }
    }

    /// Add a connection; identified connections announce themselves
    pub fn register(&mut self, connection: Connection) {
        let connection_id = connection.id;
        connection.state.activate();

        let join_notice = connection.identity.as_ref().map(|identity| {
            Message::notice(
                MessageKind::Join,
                format!("{} joined the chat", identity),
                connection.room.clone(),
            )
        });

        self.connections.insert(connection_id, connection);
        self.stats.connection_opened(self.connections.len());
        info!(
            "Connection {} registered. Total: {}",
            connection_id,
            self.connections.len()
        );

        if let Some(notice) = join_notice {
            self.publish(notice);
        }
    }

    /// Remove a connection; unknown ids are ignored
    pub fn unregister(&mut self, connection_id: ConnectionId) {
        if let Some(notice) = self.remove(connection_id) {
            self.publish(notice);
        }
    }

    /// Bind identity and room on the first identifying message
    pub fn identify(&mut self, connection_id: ConnectionId, identity: String, room: String) {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return;
        };
        if connection.has_identity() {
            return;
        }

        info!(
            "Connection {} identified as '{}' in room '{}'",
            connection_id, identity, room
        );
        connection.set_identity(identity, room);
    }

    /// Room-filtered delivery to every registered connection
    pub fn broadcast(&mut self, draft: MessageDraft) {
        let message = Message::from_draft(draft);
        if message.kind == MessageKind::Message {
            debug!(
                "Broadcast message from {} in room '{}'",
                message.sender, message.room
            );
        }
        self.publish(message);
    }

    /// Add a connection to a group
    pub fn join_group(&mut self, connection_id: ConnectionId, group: String) {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return;
        };

        connection.groups.insert(group.clone());
        debug!("Connection {} joined group '{}'", connection_id, group);
        self.groups.entry(group).or_default().insert(connection_id);
    }

    /// Remove a connection from a group; empty groups are dropped
    pub fn leave_group(&mut self, connection_id: ConnectionId, group: &str) {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return;
        };
        if !connection.groups.remove(group) {
            return;
        }

        debug!("Connection {} left group '{}'", connection_id, group);
        self.purge_from_group(connection_id, group);
    }

    /// Delivery to one group's members, ignoring rooms
    pub fn send_to_group(&mut self, group: &str, draft: MessageDraft) {
        let message = Arc::new(Message::from_draft(draft));
        self.stats.message_sent();

        let mut slow = Vec::new();
        if let Some(members) = self.groups.get(group) {
            for connection_id in members {
                let Some(connection) = self.connections.get(connection_id) else {
                    continue;
                };
                if let Err(e) = connection.try_enqueue(Arc::clone(&message)) {
                    debug!("Enqueue to {} failed: {}", connection_id, e);
                    slow.push(*connection_id);
                }
            }
        }

        for notice in self.evict(slow) {
            self.publish(notice);
        }
    }

    /// Current counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Two-phase broadcast
    ///
    /// Delivery never waits on a connection. Connections whose enqueue fails
    /// are removed after the pass, and the leave notices that removal
    /// produces are broadcast in turn.
    fn publish(&mut self, message: Message) {
        let mut pending = VecDeque::from([message]);

        while let Some(message) = pending.pop_front() {
            let message = Arc::new(message);
            self.stats.message_sent();

            let mut slow = Vec::new();
            for connection in self.connections.values() {
                if !dispatch::deliver(connection, &message) {
                    continue;
                }
                if let Err(e) = connection.try_enqueue(Arc::clone(&message)) {
                    debug!("Enqueue to {} failed: {}", connection.id, e);
                    slow.push(connection.id);
                }
            }

            pending.extend(self.evict(slow));
        }
    }

    /// Remove slow consumers, returning the leave notices to send
    fn evict(&mut self, slow: Vec<ConnectionId>) -> Vec<Message> {
        if slow.is_empty() {
            return Vec::new();
        }

        warn!("Evicting {} unresponsive connections", slow.len());
        slow.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Drop a connection from the registry and every group
    ///
    /// Returns the leave notice if the connection had identified itself.
    fn remove(&mut self, connection_id: ConnectionId) -> Option<Message> {
        let Some(mut connection) = self.connections.remove(&connection_id) else {
            debug!("Connection {} already unregistered", connection_id);
            return None;
        };

        for group in &connection.groups {
            self.purge_from_group(connection_id, group);
        }
        connection.close_outbound();
        connection.state.begin_drain();
        self.stats.set_active(self.connections.len());

        info!(
            "Connection {} unregistered. Total: {}",
            connection_id,
            self.connections.len()
        );

        connection.identity.map(|identity| {
            Message::notice(
                MessageKind::Leave,
                format!("{} left the chat", identity),
                connection.room,
            )
        })
    }

    fn purge_from_group(&mut self, connection_id: ConnectionId, group: &str) {
        if let Some(members) = self.groups.get_mut(group) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.groups.remove(group);
            }
        }
    }
}

/// Cloneable handle for submitting commands to the Hub
///
/// The only entry point for handlers; stats are read without going through
/// the actor.
#[derive(Debug, Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
    stats: Arc<Stats>,
}

impl HubHandle {
    /// Submit a new connection to the registry
    pub async fn register(&self, connection: Connection) -> Result<(), AppError> {
        self.submit(HubCommand::Register { connection }).await
    }

    /// Remove a connection; safe to call more than once
    pub async fn unregister(&self, connection_id: ConnectionId) -> Result<(), AppError> {
        self.submit(HubCommand::Unregister { connection_id }).await
    }

    /// Bind identity and room of an anonymous connection
    pub async fn identify(
        &self,
        connection_id: ConnectionId,
        identity: String,
        room: String,
    ) -> Result<(), AppError> {
        self.submit(HubCommand::Identify {
            connection_id,
            identity,
            room,
        })
        .await
    }

    /// Room-filtered delivery to every connection
    pub async fn broadcast(&self, draft: MessageDraft) -> Result<(), AppError> {
        self.submit(HubCommand::Broadcast { draft }).await
    }

    /// Add a connection to a group
    pub async fn join_group(
        &self,
        connection_id: ConnectionId,
        group: impl Into<String>,
    ) -> Result<(), AppError> {
        self.submit(HubCommand::JoinGroup {
            connection_id,
            group: group.into(),
        })
        .await
    }

    /// Remove a connection from a group
    pub async fn leave_group(
        &self,
        connection_id: ConnectionId,
        group: impl Into<String>,
    ) -> Result<(), AppError> {
        self.submit(HubCommand::LeaveGroup {
            connection_id,
            group: group.into(),
        })
        .await
    }

    /// Delivery to the members of one group
    pub async fn send_to_group(
        &self,
        group: impl Into<String>,
        draft: MessageDraft,
    ) -> Result<(), AppError> {
        self.submit(HubCommand::SendToGroup {
            group: group.into(),
            draft,
        })
        .await
    }

    /// Registered connection ids, as seen by the hub after all earlier commands
    pub async fn connections(&self) -> Result<Vec<ConnectionId>, AppError> {
        let (reply, rx) = oneshot::channel();
        self.submit(HubCommand::Connections { reply }).await?;
        rx.await.map_err(|_| AppError::HubClosed)
    }

    /// Members of a group, as seen by the hub after all earlier commands
    pub async fn group_members(
        &self,
        group: impl Into<String>,
    ) -> Result<Vec<ConnectionId>, AppError> {
        let (reply, rx) = oneshot::channel();
        self.submit(HubCommand::GroupMembers {
            group: group.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| AppError::HubClosed)
    }

    /// Lock-free counter snapshot
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    async fn submit(&self, cmd: HubCommand) -> Result<(), AppError> {
        self.sender.send(cmd).await.map_err(|_| AppError::HubClosed)
    }
}
