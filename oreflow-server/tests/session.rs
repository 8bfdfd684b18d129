//! Session-layer tests against real loopback sockets.

use futures_util::{SinkExt, StreamExt};
use oreflow_errors::OreflowError;
use oreflow_server::{Call, Server};
use oreflow_wire::{table_to_array, Key, Value, WireCodec};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::LocalSet;
use tokio_util::codec::Framed;

/// A hand-driven agent: a framed socket plus the login dance.
struct Agent {
    framed: Framed<TcpStream, WireCodec>,
}

impl Agent {
    async fn connect(addr: std::net::SocketAddr, login: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, WireCodec::new());
        framed.send(Value::from(login)).await.unwrap();
        Agent { framed }
    }

    /// Receive one action group, returning the per-action tables.
    async fn recv_group(&mut self) -> Vec<oreflow_wire::Table> {
        let value = self.framed.next().await.unwrap().unwrap();
        table_to_array(value.into_table().unwrap())
            .unwrap()
            .into_iter()
            .map(|v| v.into_table().unwrap())
            .collect()
    }

    async fn send(&mut self, value: Value) {
        self.framed.send(value).await.unwrap();
    }
}

/// Spin until the server has registered this login.
async fn wait_for_login(server: &Server, login: &str) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while server.count_pending(login) == usize::MAX {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("login never registered");
}

async fn server_on_loopback() -> (Server, std::net::SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new();
    let accept = server.clone();
    tokio::task::spawn_local(async move {
        let _ = accept.listen(listener).await;
    });
    (server, addr)
}

#[tokio::test]
async fn responses_resolve_actions_in_order() {
    LocalSet::new()
        .run_until(async {
            let (server, addr) = server_on_loopback().await;
            let mut agent = Agent::connect(addr, "north").await;
            wait_for_login(&server, "north").await;

            let first = server.enqueue("north", Call::new("reactor", "getEnergyStored"));
            let second = server.enqueue("north", Call::new("reactor", "getControlRodLevel"));

            let group = agent.recv_group().await;
            assert_eq!(group.len(), 1);
            assert_eq!(
                group[0].get(&Key::from("fn")),
                Some(&Value::from("getEnergyStored"))
            );
            agent.send(Value::from(42)).await;

            // The second group flushes only after the first completes.
            let group = agent.recv_group().await;
            assert_eq!(
                group[0].get(&Key::from("fn")),
                Some(&Value::from("getControlRodLevel"))
            );
            agent.send(Value::from(7)).await;

            assert_eq!(first.await.unwrap(), Value::from(42));
            assert_eq!(second.await.unwrap(), Value::from(7));
        })
        .await;
}

#[tokio::test]
async fn unknown_login_fails_immediately() {
    LocalSet::new()
        .run_until(async {
            let (server, _) = server_on_loopback().await;
            let result = server.enqueue("nowhere", Call::new("x", "y")).await;
            assert!(matches!(
                result,
                Err(OreflowError::NotConnected { client }) if client == "nowhere"
            ));
        })
        .await;
}

#[tokio::test]
async fn login_collision_evicts_the_prior_client() {
    LocalSet::new()
        .run_until(async {
            let (server, addr) = server_on_loopback().await;

            let mut first = Agent::connect(addr, "north").await;
            wait_for_login(&server, "north").await;
            let pending = server.enqueue("north", Call::new("a", "f"));
            // Make sure the group is in flight before the collision.
            let _ = first.recv_group().await;

            let mut second = Agent::connect(addr, "north").await;

            // The first client's outstanding action fails with the eviction.
            assert!(matches!(
                pending.await,
                Err(OreflowError::Evicted { .. })
            ));

            // New work for "north" routes to the second client.
            let routed = server.enqueue("north", Call::new("b", "g"));
            let group = second.recv_group().await;
            assert_eq!(group[0].get(&Key::from("inv")), Some(&Value::from("b")));
            second.send(Value::Null).await;
            assert_eq!(routed.await.unwrap(), Value::Null);
        })
        .await;
}

#[tokio::test]
async fn unexpected_packet_disconnects() {
    LocalSet::new()
        .run_until(async {
            let (server, addr) = server_on_loopback().await;
            let mut agent = Agent::connect(addr, "north").await;
            wait_for_login(&server, "north").await;
            agent.send(Value::from(1)).await;

            // The server should have dropped the session; a later enqueue
            // sees no client.
            let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
            loop {
                if server.count_pending("north") == usize::MAX {
                    break;
                }
                assert!(tokio::time::Instant::now() < deadline, "never dropped");
                tokio::task::yield_now().await;
            }
        })
        .await;
}
