// src/sessions/index.rs
//! Field value index over active session ids.
//!
//! Layout is `field -> value -> {session ids}`. Blank values are stored under
//! `*empty` and missing ones under `n/a`.

use std::collections::{HashMap, HashSet};

use crate::utils::consts::RUN_ID;

#[derive(Debug, Default)]
pub struct SessionIndex {
    fields: Vec<String>,
    idx: HashMap<String, HashMap<String, HashSet<String>>>,
}

impl SessionIndex {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            idx: HashMap::new(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Records `session_id` under the value `value_of` yields for each field.
    pub fn index<F>(&mut self, session_id: &str, value_of: F)
    where
        F: Fn(&str) -> String,
    {
        for field in &self.fields {
            let value = value_of(field);
            self.idx
                .entry(field.clone())
                .or_default()
                .entry(value)
                .or_default()
                .insert(session_id.to_string());
        }
    }

    /// Drops every entry of `session_id`, pruning empty parents.
    pub fn unindex(&mut self, session_id: &str) {
        for values in self.idx.values_mut() {
            for ids in values.values_mut() {
                ids.remove(session_id);
            }
            values.retain(|_, ids| !ids.is_empty());
        }
        self.idx.retain(|_, values| !values.is_empty());
    }

    pub fn contains(&self, field: &str, value: &str, session_id: &str) -> bool {
        self.idx
            .get(field)
            .and_then(|values| values.get(value))
            .map(|ids| ids.contains(session_id))
            .unwrap_or(false)
    }

    /// Intersects the filters over indexed fields.
    ///
    /// Returns `None` when no filter hits an indexed field, plus the filter
    /// names that need no further checking. `RunID` is never reported as
    /// checked since several runs share one session id.
    pub fn matching(
        &self,
        filters: &HashMap<String, String>,
    ) -> (Option<HashSet<String>>, HashSet<String>) {
        let mut candidates: Option<HashSet<String>> = None;
        let mut checked = HashSet::new();
        for (field, value) in filters {
            if !self.fields.iter().any(|f| f == field) {
                continue;
            }
            let ids = self
                .idx
                .get(field)
                .and_then(|values| values.get(value))
                .cloned()
                .unwrap_or_default();
            candidates = Some(match candidates {
                None => ids,
                Some(prev) => prev.intersection(&ids).cloned().collect(),
            });
            if field != RUN_ID {
                checked.insert(field.clone());
            }
        }
        (candidates, checked)
    }

    pub fn is_empty(&self) -> bool {
        self.idx.is_empty()
    }
}
