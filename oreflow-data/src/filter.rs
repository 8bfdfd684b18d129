use std::fmt;
use std::rc::Rc;

use crate::item::Item;

/// A predicate over items, with an index hint.
///
/// The specialized variants can be answered from the factory's per-cycle
/// name and label indexes in O(matches); `Custom` requires a linear scan.
/// When several concrete items match, the factory resolves a filter to the
/// one with the highest current availability (backups included).
#[derive(Clone)]
pub enum ItemFilter {
    Name(String),
    Label(String),
    LabelAndName { label: String, name: String },
    Custom(Rc<dyn Fn(&Item) -> bool>),
}

impl ItemFilter {
    pub fn name(name: impl Into<String>) -> Self {
        ItemFilter::Name(name.into())
    }

    pub fn label(label: impl Into<String>) -> Self {
        ItemFilter::Label(label.into())
    }

    pub fn label_and_name(label: impl Into<String>, name: impl Into<String>) -> Self {
        ItemFilter::LabelAndName {
            label: label.into(),
            name: name.into(),
        }
    }

    pub fn custom(predicate: impl Fn(&Item) -> bool + 'static) -> Self {
        ItemFilter::Custom(Rc::new(predicate))
    }

    pub fn matches(&self, item: &Item) -> bool {
        match self {
            ItemFilter::Name(name) => item.name == *name,
            ItemFilter::Label(label) => item.label == *label,
            ItemFilter::LabelAndName { label, name } => {
                item.label == *label && item.name == *name
            }
            ItemFilter::Custom(predicate) => predicate(item),
        }
    }
}

impl fmt::Debug for ItemFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemFilter::Name(name) => f.debug_tuple("Name").field(name).finish(),
            ItemFilter::Label(label) => f.debug_tuple("Label").field(label).finish(),
            ItemFilter::LabelAndName { label, name } => f
                .debug_struct("LabelAndName")
                .field("label", label)
                .field("name", name)
                .finish(),
            ItemFilter::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use oreflow_wire::Table;

    use super::*;

    fn item(name: &str, label: &str) -> Item {
        Item {
            name: name.into(),
            label: label.into(),
            damage: 0,
            max_damage: 0,
            max_size: 64,
            has_tag: false,
            others: Table::new(),
        }
    }

    #[test]
    fn variants_match_their_fields() {
        let slime = item("tconstruct:edible", "Slime Ball");
        assert!(ItemFilter::name("tconstruct:edible").matches(&slime));
        assert!(ItemFilter::label("Slime Ball").matches(&slime));
        assert!(ItemFilter::label_and_name("Slime Ball", "tconstruct:edible").matches(&slime));
        assert!(!ItemFilter::label_and_name("Slime Ball", "minecraft:slime_ball").matches(&slime));
        assert!(ItemFilter::custom(|i: &Item| i.max_size == 64).matches(&slime));
    }
}
