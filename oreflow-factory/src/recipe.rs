//! Recipes, stock targets, and the cycle-local demand records derived from
//! them.

use std::rc::Rc;

use oreflow_data::{Item, ItemFilter};

/// One product of a recipe and how much of it the factory wants on hand.
#[derive(Debug, Clone)]
pub struct RecipeOut {
    pub filter: ItemFilter,
    pub size: i32,
}

/// One ingredient of a recipe.
///
/// `data` is a process-specific payload; the slotted family pins
/// ingredients to grid slots through it.
#[derive(Debug, Clone)]
pub struct RecipeIn<U = ()> {
    pub filter: ItemFilter,
    pub size: i32,
    pub allow_backup: bool,
    pub data: U,
}

impl RecipeIn {
    pub fn new(filter: ItemFilter, size: i32) -> Self {
        RecipeIn {
            filter,
            size,
            allow_backup: false,
            data: (),
        }
    }
}

impl<U> RecipeIn<U> {
    pub fn with_data(filter: ItemFilter, size: i32, data: U) -> Self {
        RecipeIn {
            filter,
            size,
            allow_backup: false,
            data,
        }
    }

    pub fn allow_backup(mut self) -> Self {
        self.allow_backup = true;
        self
    }
}

/// A recipe: what it makes, what it eats, and a process-specific payload
/// (`data`) such as an in-process cap or a non-consumable map.
///
/// A recipe with no outputs is unbounded demand: it runs whenever its
/// inputs are available.
#[derive(Debug, Clone)]
pub struct Recipe<T = (), U = ()> {
    pub outputs: Vec<RecipeOut>,
    pub inputs: Vec<RecipeIn<U>>,
    pub data: T,
}

/// Keep at least `to_stock` of `filter` in a buffer.
#[derive(Debug, Clone)]
pub struct StockEntry {
    pub filter: ItemFilter,
    pub to_stock: i32,
    pub allow_backup: bool,
}

impl StockEntry {
    pub fn new(filter: ItemFilter, to_stock: i32) -> Self {
        StockEntry {
            filter,
            to_stock,
            allow_backup: false,
        }
    }

    pub fn allow_backup(mut self) -> Self {
        self.allow_backup = true;
        self
    }
}

/// A cycle-local scheduling record derived from one recipe.
///
/// `fullness` is the worst output-to-target ratio (2.0 when the recipe has
/// no outputs); demand lists sort ascending by it, most-wanted first.
#[derive(Debug, Clone)]
pub struct Demand {
    /// Index of the recipe this demand was derived from.
    pub recipe: usize,
    /// The concrete item each input filter resolved to.
    pub inputs: Vec<Rc<Item>>,
    /// How many whole input sets are available right now.
    pub in_avail: i32,
    pub fullness: f64,
}
