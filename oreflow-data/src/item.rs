use std::rc::Rc;

use oreflow_errors::{OreflowError, OreflowResult};
use oreflow_wire::{Key, Table, Value};

/// Canonical item identity.
///
/// Two items are the same iff all seven fields are equal, including the
/// arbitrary `others` tree an agent may report alongside the required keys.
/// The factory deduplicates equal items to one shared [`Rc`] per cycle, so
/// `Rc::ptr_eq` is a valid fast path once interned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Item {
    pub name: String,
    pub label: String,
    pub damage: i32,
    pub max_damage: i32,
    pub max_size: i32,
    pub has_tag: bool,
    /// Whatever other keys the agent reported; part of identity.
    pub others: Table,
}

impl Item {
    /// Encode this item as a wire filter table: `others` plus the seven
    /// required keys, as ME transfer filters expect.
    pub fn to_filter_table(&self) -> Table {
        let mut table = self.others.clone();
        table.insert("name".into(), self.name.as_str().into());
        table.insert("label".into(), self.label.as_str().into());
        table.insert("damage".into(), self.damage.into());
        table.insert("maxDamage".into(), self.max_damage.into());
        table.insert("maxSize".into(), self.max_size.into());
        table.insert("hasTag".into(), self.has_tag.into());
        table
    }
}

/// A counted stack of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStack {
    pub item: Rc<Item>,
    pub size: i32,
}

fn take_key(table: &mut Table, key: &'static str) -> OreflowResult<Value> {
    table
        .remove(&Key::from(key))
        .ok_or_else(|| OreflowError::BadItemStack(format!("key {key:?} not found")))
}

fn take_number(table: &mut Table, key: &'static str) -> OreflowResult<i32> {
    let value = take_key(table, key)?;
    value
        .as_number()
        .map(|x| x as i32)
        .ok_or_else(|| OreflowError::BadItemStack(format!("{key} is {}", value.kind())))
}

fn take_text(table: &mut Table, key: &'static str) -> OreflowResult<String> {
    let value = take_key(table, key)?;
    match value {
        Value::Text(x) => Ok(x),
        other => Err(OreflowError::BadItemStack(format!(
            "{key} is {}",
            other.kind()
        ))),
    }
}

fn take_bool(table: &mut Table, key: &'static str) -> OreflowResult<bool> {
    let value = take_key(table, key)?;
    value
        .as_bool()
        .ok_or_else(|| OreflowError::BadItemStack(format!("{key} is {}", value.kind())))
}

/// Parse a wire item-stack table.
///
/// The required keys are extracted; every remaining key is swept into
/// [`Item::others`] and so participates in identity.
pub fn parse_item_stack(value: Value) -> OreflowResult<ItemStack> {
    let mut table = value
        .into_table()
        .ok_or_else(|| OreflowError::BadItemStack("not a table".into()))?;
    let size = take_number(&mut table, "size")?;
    let item = Item {
        name: take_text(&mut table, "name")?,
        label: take_text(&mut table, "label")?,
        damage: take_number(&mut table, "damage")?,
        max_damage: take_number(&mut table, "maxDamage")?,
        max_size: take_number(&mut table, "maxSize")?,
        has_tag: take_bool(&mut table, "hasTag")?,
        others: table,
    };
    Ok(ItemStack {
        item: Rc::new(item),
        size,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn stack_table(label: &str, size: i32) -> Table {
        let mut table = Table::new();
        table.insert("size".into(), size.into());
        table.insert("name".into(), format!("mod:{}", label.to_lowercase()).into());
        table.insert("label".into(), label.into());
        table.insert("damage".into(), 0.into());
        table.insert("maxDamage".into(), 0.into());
        table.insert("maxSize".into(), 64.into());
        table.insert("hasTag".into(), false.into());
        table
    }

    #[test]
    fn parses_required_keys_and_sweeps_the_rest() {
        let mut table = stack_table("Iron Ingot", 7);
        table.insert("isCraftable".into(), true.into());
        let stack = parse_item_stack(Value::Table(table)).unwrap();
        assert_eq!(stack.size, 7);
        assert_eq!(stack.item.label, "Iron Ingot");
        assert_eq!(stack.item.max_size, 64);
        assert_eq!(
            stack.item.others.get(&Key::from("isCraftable")),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn missing_key_is_an_error() {
        let mut table = stack_table("Iron Ingot", 1);
        table.remove(&Key::from("maxDamage"));
        let err = parse_item_stack(Value::Table(table)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed item stack: key \"maxDamage\" not found"
        );
    }

    #[test]
    fn others_participate_in_identity() {
        let plain = parse_item_stack(Value::Table(stack_table("Stick", 1))).unwrap();
        let mut tagged_table = stack_table("Stick", 1);
        tagged_table.insert("enchant".into(), "sharpness".into());
        let tagged = parse_item_stack(Value::Table(tagged_table)).unwrap();
        assert_ne!(plain.item, tagged.item);
        assert_eq!(
            plain.item,
            parse_item_stack(Value::Table(stack_table("Stick", 30))).unwrap().item
        );
    }

    #[test]
    fn filter_table_round_trips_through_parse() {
        let stack = parse_item_stack(Value::Table(stack_table("Gold Ingot", 3))).unwrap();
        let mut filter = stack.item.to_filter_table();
        filter.insert("size".into(), 1.into());
        let reparsed = parse_item_stack(Value::Table(filter)).unwrap();
        assert_eq!(reparsed.item, stack.item);
    }
}
