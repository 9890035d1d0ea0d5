//! Test fixtures for the todo collection used across the test suite

use crate::core_sync::map_array::MapArray;
use serde::{Deserialize, Serialize};

/// A todo item, the value type of most test collections
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Todo {
    pub title: String,
    pub done: bool,
}

impl Todo {
    pub fn new(title: impl Into<String>) -> Self {
        Todo { title: title.into(), done: false }
    }

    pub fn completed(mut self) -> Self {
        self.done = true;
        self
    }
}

/// An open todo with the given title
pub fn todo(title: &str) -> Todo {
    Todo::new(title)
}

/// A todo collection from `(key, title)` pairs
pub fn todos(entries: &[(&str, &str)]) -> MapArray<String, Todo> {
    entries.iter().map(|(key, title)| (key.to_string(), todo(title))).collect()
}
