//! A scripted agent speaking the real wire protocol over loopback, plus
//! assertion helpers over its transcript.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use oreflow_server::Server;
use oreflow_wire::{array_to_table, table_to_array, Key, Table, Value, WireCodec};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

/// Every action group the agent received, in arrival order.
pub type Transcript = Rc<RefCell<Vec<Vec<Table>>>>;

/// Bind a server on loopback and start accepting.
pub async fn server_on_loopback() -> (Server, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new();
    let accept = server.clone();
    tokio::task::spawn_local(async move {
        let _ = accept.listen(listener).await;
    });
    (server, addr)
}

/// Connect an agent that logs in and answers every action through
/// `respond`, recording each group.
pub fn spawn_agent(
    addr: SocketAddr,
    login: &'static str,
    transcript: Transcript,
    mut respond: impl FnMut(&Table) -> Value + 'static,
) {
    tokio::task::spawn_local(async move {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, WireCodec::new());
        framed.send(Value::from(login)).await.unwrap();
        while let Some(received) = framed.next().await {
            let Ok(value) = received else { break };
            let actions: Vec<Table> = table_to_array(value.into_table().expect("group is a table"))
                .unwrap()
                .into_iter()
                .map(|action| action.into_table().expect("action is a table"))
                .collect();
            let responses: Vec<Value> = actions.iter().map(&mut respond).collect();
            transcript.borrow_mut().push(actions);
            for response in responses {
                if framed.send(response).await.is_err() {
                    return;
                }
            }
        }
    });
}

/// Spin until the server has registered this login.
pub async fn wait_for_login(server: &Server, login: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.count_pending(login) == usize::MAX {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("login never registered");
}

pub fn text_field<'a>(action: &'a Table, key: &str) -> &'a str {
    action
        .get(&Key::from(key))
        .and_then(Value::as_text)
        .unwrap_or_default()
}

pub fn op(action: &Table) -> &str {
    text_field(action, "op")
}

/// The numeric arguments of a `call` action.
pub fn call_args(action: &Table) -> Vec<f64> {
    table_to_array(
        action
            .get(&Key::from("args"))
            .and_then(Value::as_table)
            .cloned()
            .unwrap_or_default(),
    )
    .unwrap()
    .iter()
    .filter_map(Value::as_number)
    .collect()
}

/// All `call` actions with this function name, flattened across groups.
pub fn calls_of<'a>(transcript: &'a [Vec<Table>], function: &str) -> Vec<&'a Table> {
    transcript
        .iter()
        .flatten()
        .filter(|action| op(action) == "call" && text_field(action, "fn") == function)
        .collect()
}

/// A wire item-stack table.
pub fn stack_value(label: &str, size: i32) -> Value {
    let mut table = Table::new();
    table.insert("size".into(), size.into());
    table.insert(
        "name".into(),
        format!("mod:{}", label.to_lowercase().replace(' ', "_")).into(),
    );
    table.insert("label".into(), label.into());
    table.insert("damage".into(), 0.into());
    table.insert("maxDamage".into(), 0.into());
    table.insert("maxSize".into(), 64.into());
    table.insert("hasTag".into(), false.into());
    Value::Table(table)
}

/// A `list` response: stacks where given, "empty slot" strings otherwise.
pub fn inventory_value(slots: Vec<Option<(&str, i32)>>) -> Value {
    Value::Table(array_to_table(
        slots
            .into_iter()
            .map(|slot| match slot {
                Some((label, size)) => stack_value(label, size),
                None => Value::from(""),
            })
            .collect(),
    ))
}

/// A `call` response carrying one return value, 1-indexed as agents report
/// multiple returns.
pub fn lua_return(value: impl Into<Value>) -> Value {
    let mut table = Table::new();
    table.insert(Key::Number(1.0), value.into());
    Value::Table(table)
}
