use std::rc::Rc;

use oreflow_errors::OreflowResult;
use oreflow_wire::{table_to_array, Value};

use crate::item::{parse_item_stack, Item, ItemStack};

/// A snapshot of an inventory: one entry per slot, 0-based.
///
/// `None` is an empty slot. Cloning a snapshot is cheap (items are shared),
/// which is what the insertion planner's retry callers rely on.
pub type Inventory = Vec<Option<ItemStack>>;

/// Parse a `list`-family response into an inventory snapshot.
///
/// Agents report an empty slot as a null or, for some devices, as a bare
/// string; both parse to `None`.
pub fn parse_inventory(value: Value) -> OreflowResult<Inventory> {
    let table = match value {
        Value::Table(table) => table,
        // An empty table encodes indistinguishably from null.
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(oreflow_errors::OreflowError::BadItemStack(format!(
                "inventory is {}",
                other.kind()
            )))
        }
    };
    table_to_array(table)
        .map_err(|e| oreflow_errors::OreflowError::BadItemStack(e.to_string()))?
        .into_iter()
        .map(|entry| match entry {
            Value::Null | Value::Text(_) => Ok(None),
            other => parse_item_stack(other).map(Some),
        })
        .collect()
}

/// The outcome of planning an insertion: how much fits, and the per-slot
/// transfer amounts that realize it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InsertPlan {
    pub total: i32,
    /// `(slot, amount)` in application order.
    pub actions: Vec<(usize, i32)>,
}

/// Plan inserting up to `size` of `item` (capped at one full stack) into the
/// snapshot.
///
/// Compatible non-full stacks are topped up in slot order; any remainder goes
/// to the first empty slot. The snapshot is updated in place so planning can
/// continue against it; callers that may retry clone first.
pub fn insert_into_inventory(
    inventory: &mut Inventory,
    item: &Rc<Item>,
    size: i32,
) -> InsertPlan {
    let mut remaining = size.min(item.max_size);
    let mut plan = InsertPlan::default();
    let mut first_empty_slot = None;
    for (slot, entry) in inventory.iter_mut().enumerate() {
        if remaining <= 0 {
            break;
        }
        match entry {
            None => {
                if first_empty_slot.is_none() {
                    first_empty_slot = Some(slot);
                }
            }
            Some(stack) if stack.item == *item => {
                let fits = remaining.min(item.max_size - stack.size);
                if fits > 0 {
                    stack.size += fits;
                    plan.total += fits;
                    plan.actions.push((slot, fits));
                    remaining -= fits;
                }
            }
            Some(_) => {}
        }
    }
    if remaining > 0 {
        if let Some(slot) = first_empty_slot {
            inventory[slot] = Some(ItemStack {
                item: item.clone(),
                size: remaining,
            });
            plan.total += remaining;
            plan.actions.push((slot, remaining));
        }
    }
    plan
}
