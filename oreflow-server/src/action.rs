use oreflow_data::{parse_inventory, Inventory, Side};
use oreflow_errors::{OreflowError, OreflowResult};
use oreflow_wire::{array_to_table, Table, Value};

use crate::promise::{promise, Promise};

/// A typed request to a remote agent.
///
/// `encode` produces the per-action wire table (always carrying at least
/// `op`); `parse` interprets the raw response value the agent sends back for
/// this action.
pub trait Action {
    type Output;

    const OP: &'static str;

    fn encode(self) -> Table;

    fn parse(response: Value) -> OreflowResult<Self::Output>;
}

fn op_table(op: &'static str) -> Table {
    let mut table = Table::new();
    table.insert("op".into(), op.into());
    table
}

/// Log a line on the remote console.
#[derive(Debug, Clone)]
pub struct Print {
    pub text: String,
    /// 24-bit RGB.
    pub color: u32,
    /// Beep pitch in Hz, if any.
    pub beep: Option<f64>,
}

impl Action for Print {
    type Output = ();

    const OP: &'static str = "print";

    fn encode(self) -> Table {
        let mut table = op_table(Self::OP);
        table.insert("text".into(), self.text.into());
        table.insert("color".into(), self.color.into());
        if let Some(beep) = self.beep {
            table.insert("beep".into(), beep.into());
        }
        table
    }

    fn parse(_: Value) -> OreflowResult<()> {
        Ok(())
    }
}

/// List one side of an inventory.
#[derive(Debug, Clone)]
pub struct List {
    pub inv: String,
    pub side: Side,
}

impl Action for List {
    type Output = Inventory;

    const OP: &'static str = "list";

    fn encode(self) -> Table {
        let mut table = op_table(Self::OP);
        table.insert("inv".into(), self.inv.into());
        table.insert("side".into(), self.side.into());
        table
    }

    fn parse(response: Value) -> OreflowResult<Inventory> {
        parse_response(Self::OP, response)
    }
}

/// List a block-network device addressed by coordinate.
#[derive(Debug, Clone)]
pub struct ListXn {
    pub inv: String,
    pub side: Side,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Action for ListXn {
    type Output = Inventory;

    const OP: &'static str = "listXN";

    fn encode(self) -> Table {
        let mut table = op_table(Self::OP);
        table.insert("inv".into(), self.inv.into());
        table.insert("side".into(), self.side.into());
        table.insert("x".into(), self.x.into());
        table.insert("y".into(), self.y.into());
        table.insert("z".into(), self.z.into());
        table
    }

    fn parse(response: Value) -> OreflowResult<Inventory> {
        parse_response(Self::OP, response)
    }
}

/// List the contents of an ME network.
#[derive(Debug, Clone)]
pub struct ListMe {
    pub inv: String,
}

impl Action for ListMe {
    type Output = Inventory;

    const OP: &'static str = "listME";

    fn encode(self) -> Table {
        let mut table = op_table(Self::OP);
        table.insert("inv".into(), self.inv.into());
        table
    }

    fn parse(response: Value) -> OreflowResult<Inventory> {
        parse_response(Self::OP, response)
    }
}

/// Transfer a filtered item out of an ME network.
#[derive(Debug, Clone)]
pub struct XferMe {
    pub inv: String,
    pub me: String,
    pub filter: Table,
    pub size: i32,
    pub args: Vec<Value>,
}

impl Action for XferMe {
    type Output = ();

    const OP: &'static str = "xferME";

    fn encode(self) -> Table {
        let mut table = op_table(Self::OP);
        table.insert("inv".into(), self.inv.into());
        table.insert("me".into(), self.me.into());
        table.insert("filter".into(), self.filter.into());
        table.insert("size".into(), self.size.into());
        table.insert("args".into(), array_to_table(self.args).into());
        table
    }

    fn parse(_: Value) -> OreflowResult<()> {
        Ok(())
    }
}

/// Invoke a method on a remote component.
///
/// The response wraps the method's return values in a 1-indexed table, the
/// way the agent's scripting runtime reports multiple returns.
#[derive(Debug, Clone)]
pub struct Call {
    pub inv: String,
    pub function: String,
    pub args: Vec<Value>,
}

impl Call {
    pub fn new(inv: impl Into<String>, function: impl Into<String>) -> Self {
        Call {
            inv: inv.into(),
            function: function.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl Action for Call {
    type Output = Value;

    const OP: &'static str = "call";

    fn encode(self) -> Table {
        let mut table = op_table(Self::OP);
        table.insert("inv".into(), self.inv.into());
        table.insert("fn".into(), self.function.into());
        table.insert("args".into(), array_to_table(self.args).into());
        table
    }

    fn parse(response: Value) -> OreflowResult<Value> {
        Ok(response)
    }
}

fn parse_response(op: &'static str, response: Value) -> OreflowResult<Inventory> {
    parse_inventory(response).map_err(|e| OreflowError::BadResponse {
        op,
        cause: e.to_string(),
    })
}

pub(crate) struct InFlight {
    pub(crate) op: &'static str,
    pub(crate) respond: Box<dyn FnOnce(OreflowResult<Value>)>,
}

pub(crate) struct QueuedAction {
    pub(crate) payload: Table,
    pub(crate) in_flight: InFlight,
}

impl QueuedAction {
    pub(crate) fn fail(self, error: OreflowError) {
        (self.in_flight.respond)(Err(error));
    }
}

/// An ordered batch of actions bound for one agent.
///
/// The whole group is written as a single wire value and the agent answers
/// each action in order; within one client, a group completes before the
/// next group is flushed.
#[derive(Default)]
pub struct ActionGroup {
    entries: Vec<QueuedAction>,
}

impl ActionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an action, returning the promise of its parsed response.
    pub fn push<A>(&mut self, action: A) -> Promise<A::Output>
    where
        A: Action,
        A::Output: 'static,
    {
        let (completer, result) = promise();
        self.entries.push(QueuedAction {
            payload: action.encode(),
            in_flight: InFlight {
                op: A::OP,
                respond: Box::new(move |response| {
                    completer.complete(response.and_then(A::parse));
                }),
            },
        });
        result
    }

    pub(crate) fn into_entries(self) -> Vec<QueuedAction> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use oreflow_wire::{encode_to_string, Key};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn call_encoding_matches_the_wire_shape() {
        let call = Call::new("f98", "transferItem")
            .arg(Side::EAST)
            .arg(Side::WEST)
            .arg(16)
            .arg(1)
            .arg(6);
        let table = call.encode();
        assert_eq!(
            encode_to_string(&Value::Table(table)),
            "=@args@~=#0@#5@#1@#4@#2@#16@#3@#1@#4@#6@!@fn@~@transferItem@~@inv@~@f98@~@op@~@call@~!"
        );
    }

    #[test]
    fn print_omits_absent_beep() {
        let table = Print {
            text: "hello".into(),
            color: 0xffffff,
            beep: None,
        }
        .encode();
        assert!(!table.contains_key(&Key::from("beep")));
        assert_eq!(table.get(&Key::from("op")), Some(&Value::from("print")));
    }

    #[test]
    fn group_preserves_order_and_parses_responses() {
        let mut group = ActionGroup::new();
        let first = group.push(Call::new("a", "f"));
        let second = group.push(Call::new("b", "g"));
        let entries = group.into_entries();
        assert_eq!(entries.len(), 2);
        for (i, entry) in entries.into_iter().enumerate() {
            assert_eq!(entry.in_flight.op, "call");
            (entry.in_flight.respond)(Ok(Value::from(i)));
        }
        let value = tokio_test::block_on(first).unwrap();
        assert_eq!(value, Value::from(0.0));
        let value = tokio_test::block_on(second).unwrap();
        assert_eq!(value, Value::from(1.0));
    }
}
