use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use futures_util::{SinkExt, StreamExt};
use oreflow_errors::OreflowError;
use oreflow_wire::{array_to_table, Value, WireCodec};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{spawn_local, JoinHandle};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};

use crate::action::{Action, ActionGroup, InFlight, QueuedAction};
use crate::promise::Promise;

/// Anything that names the agent it talks through.
///
/// Processes and storages address a machine through one or more accesses;
/// [`Server::best_access`] picks the least-loaded one each time.
pub trait Access {
    fn client(&self) -> &str;
}

type ClientId = u64;

struct ClientState {
    /// `addr:port`, extended with `(login)` once the peer identifies itself.
    peer: String,
    login: Option<String>,
    send_queue: VecDeque<Vec<QueuedAction>>,
    response_queue: VecDeque<InFlight>,
    /// Taken while a group is being written; only one group is in flight.
    writer: Option<FramedWrite<OwnedWriteHalf, WireCodec>>,
    read_task: Option<JoinHandle<()>>,
}

impl ClientState {
    fn pending(&self) -> usize {
        self.send_queue.iter().map(Vec::len).sum::<usize>() + self.response_queue.len()
    }
}

#[derive(Default)]
struct ServerInner {
    next_id: ClientId,
    clients: HashMap<ClientId, ClientState>,
    logins: HashMap<String, ClientId>,
}

/// The connection registry: accepts agents, routes action groups to them by
/// login, and correlates their responses.
///
/// Cloning is cheap; all clones share one registry. Single-threaded: it
/// must live on a [`LocalSet`](tokio::task::LocalSet).
#[derive(Clone, Default)]
pub struct Server {
    inner: Rc<RefCell<ServerInner>>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept connections forever. Returns only if the listener itself
    /// fails.
    pub async fn listen(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            self.accept(stream, addr.to_string());
        }
    }

    /// Register one freshly-accepted connection and start reading from it.
    pub fn accept(&self, stream: TcpStream, peer: String) {
        let (read_half, write_half) = stream.into_split();
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.clients.insert(
                id,
                ClientState {
                    peer: peer.clone(),
                    login: None,
                    send_queue: VecDeque::new(),
                    response_queue: VecDeque::new(),
                    writer: Some(FramedWrite::new(write_half, WireCodec::new())),
                    read_task: None,
                },
            );
            id
        };
        info!(%peer, "connected");
        let task = spawn_local(read_loop(
            self.clone(),
            id,
            FramedRead::new(read_half, WireCodec::new()),
        ));
        if let Some(client) = self.inner.borrow_mut().clients.get_mut(&id) {
            client.read_task = Some(task);
        }
    }

    /// Queue an action group for the agent with this login. If no such agent
    /// is connected, every action in the group fails immediately.
    pub fn enqueue_group(&self, login: &str, group: ActionGroup) {
        let entries = group.into_entries();
        if entries.is_empty() {
            return;
        }
        let id = self.inner.borrow().logins.get(login).copied();
        match id {
            None => {
                let error = OreflowError::NotConnected {
                    client: login.to_owned(),
                };
                warn!(%login, "dropping {} actions: not connected", entries.len());
                for entry in entries {
                    entry.fail(error.clone());
                }
            }
            Some(id) => {
                if let Some(client) = self.inner.borrow_mut().clients.get_mut(&id) {
                    client.send_queue.push_back(entries);
                }
                self.pump(id);
            }
        }
    }

    /// Queue a single action, returning the promise of its response.
    pub fn enqueue<A>(&self, login: &str, action: A) -> Promise<A::Output>
    where
        A: Action,
        A::Output: 'static,
    {
        let mut group = ActionGroup::new();
        let result = group.push(action);
        self.enqueue_group(login, group);
        result
    }

    /// How many actions are queued or awaiting responses for this login.
    /// Absent logins count as `usize::MAX`, so they lose every
    /// [`best_access`](Self::best_access) election.
    pub fn count_pending(&self, login: &str) -> usize {
        let inner = self.inner.borrow();
        inner
            .logins
            .get(login)
            .and_then(|id| inner.clients.get(id))
            .map_or(usize::MAX, ClientState::pending)
    }

    /// The access whose client currently has the fewest pending actions.
    ///
    /// # Panics
    ///
    /// Panics if `accesses` is empty; every machine is configured with at
    /// least one access.
    pub fn best_access<'a, A: Access>(&self, accesses: &'a [A]) -> &'a A {
        accesses
            .iter()
            .min_by_key(|access| self.count_pending(access.client()))
            .expect("a machine must have at least one access")
    }

    /// Flush the next group if the writer is free. Actions migrate to the
    /// response queue the moment their group starts writing.
    fn pump(&self, id: ClientId) {
        let (mut writer, payload, peer) = {
            let mut inner = self.inner.borrow_mut();
            let Some(client) = inner.clients.get_mut(&id) else {
                return;
            };
            if client.writer.is_none() || client.send_queue.is_empty() {
                return;
            }
            let group = client.send_queue.pop_front().expect("checked non-empty");
            let mut payload = Vec::with_capacity(group.len());
            for entry in group {
                payload.push(Value::Table(entry.payload));
                client.response_queue.push_back(entry.in_flight);
            }
            let writer = client.writer.take().expect("checked present");
            (writer, Value::Table(array_to_table(payload)), client.peer.clone())
        };
        trace!(%peer, "<=< {payload:?}");
        let server = self.clone();
        spawn_local(async move {
            match writer.send(&payload).await {
                Ok(()) => {
                    let mut inner = server.inner.borrow_mut();
                    if let Some(client) = inner.clients.get_mut(&id) {
                        client.writer = Some(writer);
                        drop(inner);
                        server.pump(id);
                    }
                }
                Err(error) => {
                    debug!(%peer, %error, "write failed");
                    server.drop_client(id, |peer| OreflowError::Disconnected {
                        peer: peer.to_owned(),
                    });
                }
            }
        });
    }

    /// Handle one inbound value. Returns false once the client is gone.
    fn handle_value(&self, id: ClientId, value: Value) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(client) = inner.clients.get_mut(&id) else {
            return false;
        };
        trace!(peer = %client.peer, ">=> {value:?}");

        if client.login.is_none() {
            let Value::Text(login) = value else {
                drop(inner);
                self.drop_client(id, |peer| OreflowError::Protocol {
                    peer: peer.to_owned(),
                    cause: "login is not a string".into(),
                });
                return false;
            };
            client.peer = format!("{}({})", client.peer, login);
            client.login = Some(login.clone());
            let peer = client.peer.clone();
            let evicted = inner.logins.insert(login, id);
            drop(inner);
            info!(%peer, "logged in");
            if let Some(evicted) = evicted {
                self.drop_client(evicted, |peer| OreflowError::Evicted {
                    peer: peer.to_owned(),
                });
            }
            return true;
        }

        match client.response_queue.pop_front() {
            Some(in_flight) => {
                drop(inner);
                (in_flight.respond)(Ok(value));
                true
            }
            None => {
                drop(inner);
                self.drop_client(id, |peer| OreflowError::Protocol {
                    peer: peer.to_owned(),
                    cause: "unexpected packet".into(),
                });
                false
            }
        }
    }

    /// Tear a client down: deregister it, stop its reader, and fail every
    /// queued and in-flight action. Completions go through promises, so
    /// continuations still run on the event loop.
    fn drop_client(&self, id: ClientId, error_for: impl FnOnce(&str) -> OreflowError) {
        let Some(mut client) = ({
            let mut inner = self.inner.borrow_mut();
            let client = inner.clients.remove(&id);
            if let Some(client) = &client {
                if let Some(login) = &client.login {
                    if inner.logins.get(login) == Some(&id) {
                        inner.logins.remove(login);
                    }
                }
            }
            client
        }) else {
            return;
        };
        let error = error_for(&client.peer);
        info!(peer = %client.peer, %error, "dropped");
        if let Some(task) = client.read_task.take() {
            task.abort();
        }
        for in_flight in client.response_queue.drain(..) {
            (in_flight.respond)(Err(error.clone()));
        }
        for group in client.send_queue.drain(..) {
            for entry in group {
                entry.fail(error.clone());
            }
        }
    }
}

async fn read_loop(server: Server, id: ClientId, mut reader: FramedRead<OwnedReadHalf, WireCodec>) {
    loop {
        match reader.next().await {
            Some(Ok(value)) => {
                if !server.handle_value(id, value) {
                    return;
                }
            }
            Some(Err(error)) => {
                server.drop_client(id, |peer| OreflowError::Protocol {
                    peer: peer.to_owned(),
                    cause: format!("error decoding packet: {error}"),
                });
                return;
            }
            None => {
                server.drop_client(id, |peer| OreflowError::Disconnected {
                    peer: peer.to_owned(),
                });
                return;
            }
        }
    }
}
