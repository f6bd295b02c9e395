//! Descriptions of what configuration produced.
//!
//! An action may carry [`Introspectable`]s. They are handed to the
//! [`IntrospectionSink`] only once the action won conflict resolution and its
//! effect ran, so a sink never learns about overridden registrations.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::{ActionInfo, ArcStr};
use crate::discriminator::Discriminator;

/// Identifies an introspectable within a sink.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Relation {
    pub category: ArcStr,
    pub discriminator: Discriminator,
}

/// A description of one registration.
#[derive(Clone, Debug, Serialize)]
pub struct Introspectable {
    pub category: ArcStr,
    pub discriminator: Discriminator,
    pub title: String,
    pub type_name: ArcStr,
    pub attrs: Map<String, Value>,
    pub relations: Vec<Relation>,
}

impl Introspectable {
    pub fn new(
        category: impl Into<ArcStr>,
        discriminator: Discriminator,
        title: impl Into<String>,
        type_name: impl Into<ArcStr>,
    ) -> Self {
        Self {
            category: category.into(),
            discriminator,
            title: title.into(),
            type_name: type_name.into(),
            attrs: Map::new(),
            relations: Vec::new(),
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Relates this introspectable to another one. The relation holds in both
    /// directions once both are registered.
    pub fn relate(mut self, category: impl Into<ArcStr>, discriminator: Discriminator) -> Self {
        self.relations.push(Relation {
            category: category.into(),
            discriminator,
        });
        self
    }

    pub fn key(&self) -> Relation {
        Relation {
            category: self.category.clone(),
            discriminator: self.discriminator.clone(),
        }
    }
}

/// Receives the introspectables of every executed winner.
pub trait IntrospectionSink {
    fn register(&mut self, introspectable: Introspectable, info: &ActionInfo);
}

/// A registered introspectable together with where it came from.
#[derive(Clone, Debug, Serialize)]
pub struct Entry {
    /// Registration order across the whole introspector.
    pub order: u64,
    #[serde(flatten)]
    pub introspectable: Introspectable,
    pub info: ActionInfo,
}

/// The default in-memory sink.
#[derive(Debug, Default)]
pub struct Introspector {
    categories: BTreeMap<ArcStr, HashMap<Discriminator, Entry>>,
    relations: HashMap<Relation, BTreeSet<Relation>>,
    counter: u64,
}

impl Introspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: &str, discriminator: &Discriminator) -> Option<&Entry> {
        self.categories.get(category)?.get(discriminator)
    }

    /// Every entry of a category, in registration order.
    pub fn get_category(&self, category: &str) -> Vec<&Entry> {
        let mut entries: Vec<_> = self
            .categories
            .get(category)
            .map(|entries| entries.values().collect())
            .unwrap_or_default();

        entries.sort_by_key(|entry| entry.order);
        entries
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(AsRef::as_ref)
    }

    /// Removes an entry together with its relations.
    pub fn remove(&mut self, category: &str, discriminator: &Discriminator) -> Option<Entry> {
        let entry = self.categories.get_mut(category)?.remove(discriminator)?;
        let key = entry.introspectable.key();

        if let Some(related) = self.relations.remove(&key) {
            for other in related {
                if let Some(set) = self.relations.get_mut(&other) {
                    set.remove(&key);
                }
            }
        }

        Some(entry)
    }

    /// Entries related to the given one, in registration order. Relations
    /// pointing at something never registered are skipped.
    pub fn related(&self, category: &str, discriminator: &Discriminator) -> Vec<&Entry> {
        let key = Relation {
            category: category.into(),
            discriminator: discriminator.clone(),
        };

        let mut entries: Vec<_> = self
            .relations
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|other| self.get(&other.category, &other.discriminator))
            .collect();

        entries.sort_by_key(|entry| entry.order);
        entries
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dumps every category, entries in registration order.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        let mut out = Map::new();

        for category in self.categories.keys() {
            let entries = self.get_category(category);
            out.insert(category.to_string(), serde_json::to_value(entries)?);
        }

        Ok(Value::Object(out))
    }

    fn relate(&mut self, a: Relation, b: Relation) {
        self.relations.entry(a.clone()).or_default().insert(b.clone());
        self.relations.entry(b).or_default().insert(a);
    }
}

impl IntrospectionSink for Introspector {
    /// Registering the same category and discriminator again replaces the
    /// earlier entry.
    fn register(&mut self, introspectable: Introspectable, info: &ActionInfo) {
        let key = introspectable.key();
        for relation in &introspectable.relations {
            self.relate(key.clone(), relation.clone());
        }

        let order = self.counter;
        self.counter += 1;

        tracing::trace!(category = %key.category, discriminator = %key.discriminator, "introspectable registered");

        self.categories
            .entry(key.category)
            .or_default()
            .insert(
                key.discriminator,
                Entry {
                    order,
                    introspectable,
                    info: info.clone(),
                },
            );
    }
}
