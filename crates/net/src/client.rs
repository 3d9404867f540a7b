//! TCP client for the room service

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

use santa_core::{AssignOutcome, CreatedRoom, LocalParticipant, NewRoom, Room};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{Event, Op, RemoteError, Reply, Request, ServerMessage};

/// Buffered events before new ones are dropped
const EVENT_CAPACITY: usize = 256;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Reply, RemoteError>>>>>;

/// Client handle for network operations
pub struct Client {
    next_id: AtomicU64,
    pending: Pending,
    state: Arc<RwLock<ConnectionState>>,
    event_rx: mpsc::Receiver<Event>,
    cmd_tx: mpsc::Sender<ClientCommand>,
}

enum ClientCommand {
    Send(Request),
    Disconnect,
}

impl Client {
    /// Connect to a room server
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        info!(addr = %addr, "Connecting to server");

        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = tokio::io::split(stream);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        tokio::spawn(connection_task(
            reader,
            writer,
            pending.clone(),
            state.clone(),
            event_tx,
            cmd_rx,
        ));

        Ok(Client {
            next_id: AtomicU64::new(1),
            pending,
            state,
            event_rx,
            cmd_tx,
        })
    }

    /// Get the next subscription event; `None` once disconnected
    pub async fn next_event(&mut self) -> Option<Event> {
        self.event_rx.recv().await
    }

    /// Send one request and wait for its response
    pub async fn request(&self, op: Op) -> Result<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self
            .cmd_tx
            .send(ClientCommand::Send(Request { id, op }))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(Error::NotConnected);
        }

        let result = rx.await.map_err(|_| Error::ConnectionClosed)?;
        result.map_err(Error::from)
    }

    pub async fn create_room(&self, new_room: NewRoom) -> Result<CreatedRoom> {
        match self.request(Op::CreateRoom(new_room)).await? {
            Reply::Created(created) => Ok(created),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_room(&self, room_id: &str) -> Result<Option<Room>> {
        let op = Op::GetRoom {
            room_id: room_id.to_string(),
        };
        match self.request(op).await? {
            Reply::Room(room) => Ok(room),
            other => Err(unexpected(other)),
        }
    }

    pub async fn update_room_name(&self, room_id: &str, name: &str) -> Result<Room> {
        self.expect_room(Op::UpdateRoomName {
            room_id: room_id.to_string(),
            name: name.to_string(),
        })
        .await
    }

    pub async fn update_room_participants(&self, room_id: &str, names: Vec<String>) -> Result<Room> {
        self.expect_room(Op::UpdateRoomParticipants {
            room_id: room_id.to_string(),
            names,
        })
        .await
    }

    pub async fn reset_room(&self, room_id: &str) -> Result<Room> {
        self.expect_room(Op::ResetRoom {
            room_id: room_id.to_string(),
        })
        .await
    }

    pub async fn delete_room(&self, room_id: &str) -> Result<()> {
        let op = Op::DeleteRoom {
            room_id: room_id.to_string(),
        };
        match self.request(op).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>> {
        match self.request(Op::ListRooms).await? {
            Reply::Rooms(rooms) => Ok(rooms),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_user_rooms(&self, creator_id: &str) -> Result<Vec<Room>> {
        let op = Op::ListUserRooms {
            creator_id: creator_id.to_string(),
        };
        match self.request(op).await? {
            Reply::Rooms(rooms) => Ok(rooms),
            other => Err(unexpected(other)),
        }
    }

    pub async fn verify_pin(&self, room_id: &str, pin: &str) -> Result<bool> {
        let op = Op::VerifyPin {
            room_id: room_id.to_string(),
            pin: pin.to_string(),
        };
        match self.request(op).await? {
            Reply::PinVerified(ok) => Ok(ok),
            other => Err(unexpected(other)),
        }
    }

    /// Draw a target for `participant_id`; read or subscribe to learn who
    pub async fn assign(&self, room_id: &str, participant_id: &str) -> Result<AssignOutcome> {
        let op = Op::Assign {
            room_id: room_id.to_string(),
            participant_id: participant_id.to_string(),
        };
        match self.request(op).await? {
            Reply::Assigned(outcome) => Ok(outcome),
            other => Err(unexpected(other)),
        }
    }

    pub async fn identify(&self, room_id: &str, name: &str) -> Result<LocalParticipant> {
        let op = Op::Identify {
            room_id: room_id.to_string(),
            name: name.to_string(),
        };
        match self.request(op).await? {
            Reply::Participant(me) => Ok(me),
            other => Err(unexpected(other)),
        }
    }

    /// Follow a room; returns its current state, later changes arrive as events
    pub async fn subscribe(&self, room_id: &str) -> Result<Option<Room>> {
        let op = Op::Subscribe {
            room_id: room_id.to_string(),
        };
        match self.request(op).await? {
            Reply::Subscribed(room) => Ok(room),
            other => Err(unexpected(other)),
        }
    }

    pub async fn unsubscribe(&self, room_id: &str) -> Result<()> {
        let op = Op::Unsubscribe {
            room_id: room_id.to_string(),
        };
        match self.request(op).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Send a ping
    pub async fn ping(&self) -> Result<()> {
        match self.request(Op::Ping).await? {
            Reply::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Disconnect from the server
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }

    /// Get current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn expect_room(&self, op: Op) -> Result<Room> {
        match self.request(op).await? {
            Reply::Room(Some(room)) => Ok(room),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(reply: Reply) -> Error {
    Error::Protocol(format!("Unexpected reply: {:?}", reply))
}

/// Main connection task
async fn connection_task(
    mut reader: ReadHalf<TcpStream>,
    mut writer: WriteHalf<TcpStream>,
    pending: Pending,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
) {
    loop {
        tokio::select! {
            result = read_frame::<_, ServerMessage>(&mut reader) => {
                match result {
                    Ok(ServerMessage::Response(response)) => {
                        match pending.lock().await.remove(&response.id) {
                            Some(tx) => {
                                let _ = tx.send(response.result);
                            }
                            None => debug!(id = response.id, "Response for unknown request"),
                        }
                    }
                    Ok(ServerMessage::Event(event)) => {
                        if event_tx.try_send(event).is_err() {
                            warn!("Event queue full, dropping room update");
                        }
                    }
                    Err(Error::ConnectionClosed) => {
                        debug!("Server closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Read error");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send(request)) => {
                        if let Err(e) = write_frame(&mut writer, &request).await {
                            warn!(error = %e, "Write error");
                            break;
                        }
                    }
                    Some(ClientCommand::Disconnect) | None => {
                        debug!("Disconnect requested");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup; closing first makes later requests fail fast, dropping the
    // senders fails every request already waiting
    *state.write().await = ConnectionState::Disconnected;
    cmd_rx.close();
    pending.lock().await.clear();
    info!("Disconnected from server");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorKind;
    use crate::server::Server;
    use santa_core::{DocumentStore, MemoryStore, RetryPolicy, RoomStatus};
    use std::net::{Ipv4Addr, SocketAddr};
    use std::time::Duration;

    async fn start_server() -> Server {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        Server::start(addr, store, RetryPolicy::default()).await.unwrap()
    }

    fn new_room(names: &[&str]) -> NewRoom {
        NewRoom {
            name: "Office".to_string(),
            participant_names: names.iter().map(|s| s.to_string()).collect(),
            creator_id: Some("admin".to_string()),
            secured: false,
        }
    }

    async fn next_room_event(client: &mut Client) -> (String, Option<Room>) {
        let event = tokio::time::timeout(Duration::from_secs(5), client.next_event())
            .await
            .unwrap()
            .unwrap();
        match event {
            Event::RoomChanged { room_id, room } => (room_id, room),
        }
    }

    #[tokio::test]
    async fn test_client_connect_and_ping() {
        let server = start_server().await;
        let client = Client::connect(server.addr()).await.unwrap();

        client.ping().await.unwrap();
        assert_eq!(client.connection_state().await, ConnectionState::Connected);

        client.disconnect().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_draw_over_the_wire() {
        let server = start_server().await;
        let client = Client::connect(server.addr()).await.unwrap();

        let created = client.create_room(new_room(&["Ann", "Ben"])).await.unwrap();
        let ann = client.identify(&created.room_id, "ann").await.unwrap();
        let ben = client.identify(&created.room_id, "Ben").await.unwrap();

        let outcome = client.assign(&created.room_id, &ann.participant_id).await.unwrap();
        assert_eq!(outcome, AssignOutcome::Assigned);
        let again = client.assign(&created.room_id, &ann.participant_id).await.unwrap();
        assert_eq!(again, AssignOutcome::AlreadyAssigned);
        client.assign(&created.room_id, &ben.participant_id).await.unwrap();

        let room = client.get_room(&created.room_id).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Completed);
        assert_eq!(room.target_name(&ann.participant_id), Some("Ben"));
        assert_eq!(room.target_name(&ben.participant_id), Some("Ann"));

        let rooms = client.list_user_rooms("admin").await.unwrap();
        assert_eq!(rooms.len(), 1);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_remote_errors_keep_their_kind() {
        let server = start_server().await;
        let client = Client::connect(server.addr()).await.unwrap();

        // A missing room reads as None rather than failing
        assert!(client.get_room("missing").await.unwrap().is_none());

        let err = client.assign("missing", "p1").await.unwrap_err();
        assert_eq!(err.remote_kind(), Some(ErrorKind::RoomNotFound));

        let err = client.create_room(new_room(&["Solo"])).await.unwrap_err();
        assert_eq!(err.remote_kind(), Some(ErrorKind::Validation));

        let created = client.create_room(new_room(&["Ann", "Ben"])).await.unwrap();
        let err = client.assign(&created.room_id, "nobody").await.unwrap_err();
        assert_eq!(err.remote_kind(), Some(ErrorKind::UnknownParticipant));

        // The connection survives failed requests
        client.ping().await.unwrap();
        server.shutdown();
    }

    #[tokio::test]
    async fn test_pin_and_room_edits() {
        let server = start_server().await;
        let client = Client::connect(server.addr()).await.unwrap();

        let mut input = new_room(&["Ann", "Ben"]);
        input.secured = true;
        let created = client.create_room(input).await.unwrap();
        let pin = created.pin.clone().unwrap();
        assert!(client.verify_pin(&created.room_id, &pin).await.unwrap());

        let fetched = client.get_room(&created.room_id).await.unwrap().unwrap();
        assert!(fetched.is_secured);
        assert!(fetched.pin.is_none());
        assert!(client.list_rooms().await.unwrap().iter().all(|r| r.pin.is_none()));
        assert!(client
            .list_user_rooms("admin")
            .await
            .unwrap()
            .iter()
            .all(|r| r.pin.is_none()));

        let room = client.update_room_name(&created.room_id, "Family").await.unwrap();
        assert_eq!(room.name, "Family");
        assert!(room.pin.is_none());
        assert!(client.verify_pin(&created.room_id, &pin).await.unwrap());

        let names = vec!["Ann".to_string(), "Cat".to_string(), "Dan".to_string()];
        let room = client
            .update_room_participants(&created.room_id, names)
            .await
            .unwrap();
        assert_eq!(room.participant_count(), 3);

        let room = client.reset_room(&created.room_id).await.unwrap();
        assert!(room.assignments.is_empty());

        client.delete_room(&created.room_id).await.unwrap();
        assert!(client.get_room(&created.room_id).await.unwrap().is_none());
        assert!(client.list_rooms().await.unwrap().is_empty());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_subscription_events() {
        let server = start_server().await;
        let mut watcher = Client::connect(server.addr()).await.unwrap();
        let actor = Client::connect(server.addr()).await.unwrap();

        let created = actor.create_room(new_room(&["Ann", "Ben"])).await.unwrap();
        let current = watcher.subscribe(&created.room_id).await.unwrap().unwrap();
        assert_eq!(current.assigned_count(), 0);

        let ann = actor.identify(&created.room_id, "Ann").await.unwrap();
        actor.assign(&created.room_id, &ann.participant_id).await.unwrap();

        let (room_id, room) = next_room_event(&mut watcher).await;
        assert_eq!(room_id, created.room_id);
        assert_eq!(room.unwrap().assigned_count(), 1);

        actor.delete_room(&created.room_id).await.unwrap();
        let (_, room) = next_room_event(&mut watcher).await;
        assert!(room.is_none());

        watcher.unsubscribe(&created.room_id).await.unwrap();
        server.shutdown();
    }

    #[tokio::test]
    async fn test_concurrent_clients_never_share_a_target() {
        let server = start_server().await;
        let admin = Client::connect(server.addr()).await.unwrap();

        let people = ["Ann", "Ben", "Cat", "Dan", "Eve", "Fay"];
        let created = admin.create_room(new_room(&people)).await.unwrap();
        let room = admin.get_room(&created.room_id).await.unwrap().unwrap();

        let mut handles = Vec::new();
        for participant_id in room.participants.keys().cloned() {
            let addr = server.addr();
            let room_id = created.room_id.clone();
            handles.push(tokio::spawn(async move {
                let client = Client::connect(addr).await.unwrap();
                client.assign(&room_id, &participant_id).await
            }));
        }

        let mut no_target = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(outcome) => assert_eq!(outcome, AssignOutcome::Assigned),
                Err(e) => {
                    assert_eq!(e.remote_kind(), Some(ErrorKind::NoEligibleTargets));
                    no_target += 1;
                }
            }
        }
        assert!(no_target <= 1);

        let room = admin.get_room(&created.room_id).await.unwrap().unwrap();
        assert_eq!(room.assigned_count() + no_target, people.len());
        assert!(santa_core::invariants::room_violations(&room).is_empty());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_requests_fail_after_shutdown() {
        let server = start_server().await;
        let mut client = Client::connect(server.addr()).await.unwrap();
        client.ping().await.unwrap();

        server.shutdown();
        // The event stream ends once the connection task exits
        let end = tokio::time::timeout(Duration::from_secs(5), client.next_event())
            .await
            .unwrap();
        assert!(end.is_none());

        assert!(client.ping().await.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_requests_fail_after_disconnect() {
        let server = start_server().await;
        let mut client = Client::connect(server.addr()).await.unwrap();
        client.ping().await.unwrap();

        client.disconnect().await;
        let end = tokio::time::timeout(Duration::from_secs(5), client.next_event())
            .await
            .unwrap();
        assert!(end.is_none());

        for _ in 0..3 {
            let result = tokio::time::timeout(Duration::from_secs(5), client.ping())
                .await
                .unwrap();
            assert!(matches!(result, Err(Error::NotConnected)));
        }
        assert!(client.pending.lock().await.is_empty());

        server.shutdown();
    }
}
