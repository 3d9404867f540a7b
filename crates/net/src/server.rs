//! TCP server exposing the room service
//!
//! Each connection gets a reader loop and a writer task. Store operations run
//! on the blocking pool; room subscriptions are forwarded by one task each.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::WriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use santa_core::{AssignmentEngine, DocumentStore, RetryPolicy, Room, RoomRepository, RoomSubscription};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{ErrorKind, Event, Op, RemoteError, Reply, Request, Response, ServerMessage};

/// Maximum number of concurrent connections
const MAX_CONNECTIONS: usize = 256;

/// Maximum rooms one connection may follow at a time
const MAX_SUBSCRIPTIONS: usize = 64;

/// Outgoing queue depth per connection
const OUTBOX_CAPACITY: usize = 64;

/// Repository and engine over one shared store
struct Services {
    rooms: RoomRepository<dyn DocumentStore>,
    engine: AssignmentEngine<dyn DocumentStore>,
}

/// Server state shared across tasks
struct ServerState {
    connections: HashMap<Uuid, SocketAddr>,
}

/// Room server handle
pub struct Server {
    addr: SocketAddr,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind `addr` (port 0 picks a free one) and start serving
    pub async fn start(
        addr: SocketAddr,
        store: Arc<dyn DocumentStore>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, max_attempts = policy.max_attempts, "Server started");

        let (shutdown_tx, _) = broadcast::channel(1);

        let services = Arc::new(Services {
            rooms: RoomRepository::new(store.clone()).with_policy(policy),
            engine: AssignmentEngine::new(store).with_policy(policy),
        });

        let state = Arc::new(RwLock::new(ServerState {
            connections: HashMap::new(),
        }));

        tokio::spawn(accept_loop(
            listener,
            state.clone(),
            services,
            shutdown_tx.clone(),
        ));

        Ok(Server {
            addr: bound_addr,
            state,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of open client connections
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Server shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    state: Arc<RwLock<ServerState>>,
    services: Arc<Services>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let conn_id = Uuid::new_v4();
                        {
                            let mut s = state.write().await;
                            if s.connections.len() >= MAX_CONNECTIONS {
                                warn!(addr = %addr, "Server full, dropping connection");
                                continue;
                            }
                            s.connections.insert(conn_id, addr);
                        }
                        debug!(addr = %addr, conn_id = %conn_id, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            conn_id,
                            state.clone(),
                            services.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    conn_id: Uuid,
    state: Arc<RwLock<ServerState>>,
    services: Arc<Services>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, writer) = tokio::io::split(stream);

    let (out_tx, out_rx) = mpsc::channel(OUTBOX_CAPACITY);
    let writer_handle = tokio::spawn(writer_task(writer, out_rx));

    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            result = read_frame::<_, Request>(&mut reader) => {
                match result {
                    Ok(request) => {
                        let (response, subscription) = handle_request(request, &services, &mut subscriptions).await;
                        if out_tx.send(ServerMessage::Response(response)).await.is_err() {
                            break;
                        }
                        // Events for a new subscription go out only after its reply
                        if let Some(subscription) = subscription {
                            let room_id = subscription.room_id().to_string();
                            let task = tokio::spawn(forward_room_changes(subscription, out_tx.clone()));
                            if let Some(previous) = subscriptions.insert(room_id, task) {
                                previous.abort();
                            }
                        }
                    }
                    Err(Error::ConnectionClosed) => {
                        debug!(conn_id = %conn_id, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(conn_id = %conn_id, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!(conn_id = %conn_id, "Closing connection for shutdown");
                break;
            }
        }
    }

    // Cleanup
    for (_, task) in subscriptions.drain() {
        task.abort();
    }
    writer_handle.abort();
    state.write().await.connections.remove(&conn_id);

    info!(conn_id = %conn_id, "Client disconnected");
}

/// Writer task - sends messages to the client
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<ServerMessage>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

/// Answer one request; a successful subscribe also hands back the subscription to forward
async fn handle_request(
    request: Request,
    services: &Arc<Services>,
    subscriptions: &mut HashMap<String, JoinHandle<()>>,
) -> (Response, Option<RoomSubscription>) {
    let Request { id, op } = request;
    let op_name = op.name();

    let mut subscription = None;
    let result = match op {
        Op::Subscribe { room_id } => match subscribe(room_id, services, subscriptions).await {
            Ok((started, current)) => {
                subscription = Some(started);
                Ok(Reply::Subscribed(current.map(without_pin)))
            }
            Err(e) => Err(e),
        },
        Op::Unsubscribe { room_id } => {
            if let Some(task) = subscriptions.remove(&room_id) {
                task.abort();
            }
            Ok(Reply::Done)
        }
        Op::Ping => Ok(Reply::Pong),
        op => dispatch(op, services).await,
    };

    if let Err(e) = &result {
        debug!(id, op = op_name, kind = ?e.kind, error = %e.message, "Request failed");
    }

    (Response { id, result }, subscription)
}

/// Rooms leave the server without their PIN; clients check it through `VerifyPin`
fn without_pin(mut room: Room) -> Room {
    room.pin = None;
    room
}

/// Run a store-backed operation on the blocking pool
async fn dispatch(op: Op, services: &Arc<Services>) -> std::result::Result<Reply, RemoteError> {
    run_blocking(services, move |s| match op {
        Op::CreateRoom(new_room) => s.rooms.create_room(new_room).map(Reply::Created),
        Op::GetRoom { room_id } => s
            .rooms
            .get_room(&room_id)
            .map(|room| Reply::Room(room.map(without_pin))),
        Op::UpdateRoomName { room_id, name } => s
            .rooms
            .update_room_name(&room_id, &name)
            .map(|room| Reply::Room(Some(without_pin(room)))),
        Op::UpdateRoomParticipants { room_id, names } => s
            .rooms
            .update_room_participants(&room_id, &names)
            .map(|room| Reply::Room(Some(without_pin(room)))),
        Op::ResetRoom { room_id } => s
            .rooms
            .reset_room_assignments(&room_id)
            .map(|room| Reply::Room(Some(without_pin(room)))),
        Op::DeleteRoom { room_id } => s.rooms.delete_room(&room_id).map(|()| Reply::Done),
        Op::ListRooms => s.rooms.list_rooms().map(rooms_without_pins),
        Op::ListUserRooms { creator_id } => s
            .rooms
            .list_user_rooms(&creator_id)
            .map(rooms_without_pins),
        Op::VerifyPin { room_id, pin } => s.rooms.verify_room_pin(&room_id, &pin).map(Reply::PinVerified),
        Op::Assign { room_id, participant_id } => {
            s.engine.assign(&room_id, &participant_id).map(Reply::Assigned)
        }
        Op::Identify { room_id, name } => s.rooms.identify(&room_id, &name).map(Reply::Participant),
        Op::Subscribe { .. } | Op::Unsubscribe { .. } | Op::Ping => Err(santa_core::Error::Validation(
            "Operation is handled by the connection".into(),
        )),
    })
    .await
}

fn rooms_without_pins(rooms: Vec<Room>) -> Reply {
    Reply::Rooms(rooms.into_iter().map(without_pin).collect())
}

async fn run_blocking<T, F>(services: &Arc<Services>, f: F) -> std::result::Result<T, RemoteError>
where
    T: Send + 'static,
    F: FnOnce(&Services) -> santa_core::Result<T> + Send + 'static,
{
    let services = services.clone();
    match tokio::task::spawn_blocking(move || f(&services)).await {
        Ok(result) => result.map_err(|e| {
            if !e.is_user_facing() {
                warn!(error = %e, "Store operation failed");
            }
            RemoteError::from(e)
        }),
        Err(e) => {
            error!(error = %e, "Blocking task failed");
            Err(RemoteError::new(ErrorKind::Internal, "Worker task failed"))
        }
    }
}

/// Open a subscription and read the room's current state; forwarding starts later
async fn subscribe(
    room_id: String,
    services: &Arc<Services>,
    subscriptions: &HashMap<String, JoinHandle<()>>,
) -> std::result::Result<(RoomSubscription, Option<Room>), RemoteError> {
    if !subscriptions.contains_key(&room_id) && subscriptions.len() >= MAX_SUBSCRIPTIONS {
        return Err(RemoteError::new(
            ErrorKind::BadRequest,
            format!("At most {} rooms can be followed at once", MAX_SUBSCRIPTIONS),
        ));
    }

    run_blocking(services, move |s| {
        let mut subscription = s.rooms.subscribe_to_room(&room_id)?;
        let current = subscription.latest()?;
        Ok((subscription, current))
    })
    .await
}

/// Push every change of one room to the client until either side goes away
async fn forward_room_changes(mut subscription: RoomSubscription, out_tx: mpsc::Sender<ServerMessage>) {
    let room_id = subscription.room_id().to_string();

    loop {
        let room = match subscription.changed().await {
            Ok(room) => room,
            Err(santa_core::Error::StoreClosed) => break,
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "Skipping undecodable room update");
                continue;
            }
        };

        let event = Event::RoomChanged {
            room_id: room_id.clone(),
            room: room.map(without_pin),
        };
        if out_tx.send(ServerMessage::Event(event)).await.is_err() {
            break;
        }
    }

    debug!(room_id = %room_id, "Room subscription ended");
}
