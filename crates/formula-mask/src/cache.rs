use crate::dataset::Dataset;
use crate::index::{SlicingIndex, Variables};
use crate::mask::{MaskError, MaskResult};
use crate::scope::Scope;
use crate::value::Value;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubsetCacheStats {
    /// Column subsets gathered from the dataset.
    pub materialized: u64,
    /// Lookups answered from an entry cached for the current index.
    pub hits: u64,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    generation: u64,
    value: Value,
}

/// Per-group column subsets, materialized on first request and cached until the index changes.
///
/// Every entry is tagged with the index generation it was gathered for. `advance` starts a new
/// generation, so an entry can never be served for a group other than the one it was built from,
/// even if a `clear` were skipped.
#[derive(Debug)]
pub struct SubsetCache {
    dataset: Rc<dyn Dataset>,
    variables: Variables,
    entries: Vec<Option<CacheEntry>>,
    /// Per variable: whether `get` defined the subset into the target scope.
    defined: Vec<bool>,
    generation: u64,
    stats: SubsetCacheStats,
}

impl SubsetCache {
    pub fn new(dataset: Rc<dyn Dataset>, variables: Variables) -> Self {
        let n = variables.len();
        Self {
            dataset,
            variables,
            entries: vec![None; n],
            defined: vec![false; n],
            generation: 0,
            stats: SubsetCacheStats::default(),
        }
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn dataset(&self) -> &Rc<dyn Dataset> {
        &self.dataset
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self) -> SubsetCacheStats {
        self.stats
    }

    /// Number of entries valid for the current generation.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .flatten()
            .filter(|entry| entry.generation == self.generation)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the subset of `name` for the rows of `index`, gathering it on first request.
    ///
    /// A freshly gathered subset is also defined into `scope` so later lookups through that scope
    /// see the plain value instead of going back through the lazy binding, unless `scope` already
    /// holds a binding of `name` that the cache did not put there.
    pub fn get(&mut self, name: &str, index: &SlicingIndex, scope: &Scope) -> MaskResult<Value> {
        let pos = self
            .variables
            .position(name)
            .ok_or_else(|| MaskError::UndeclaredVariable(name.to_string()))?;

        if let Some(entry) = &self.entries[pos] {
            if entry.generation == self.generation {
                self.stats.hits += 1;
                return Ok(entry.value.clone());
            }
        }

        let column = self.variables.column_at(pos);
        let values = self.dataset.gather(column, &mut index.rows())?;
        let value = Value::from(values);
        log::trace!(
            "materialized `{name}` for group {} ({} rows, generation {})",
            index.group(),
            index.size(),
            self.generation
        );

        self.stats.materialized += 1;
        self.entries[pos] = Some(CacheEntry {
            generation: self.generation,
            value: value.clone(),
        });
        // Values the engine placed in `scope` under this name take precedence.
        if self.defined[pos] || !scope.contains_local(name) {
            scope.define(name, value.clone());
            self.defined[pos] = true;
        }
        Ok(value)
    }

    /// Drop every cached subset and remove the ones `get` defined into `scope`.
    ///
    /// Bindings in `scope` that the cache did not define are left alone.
    pub fn clear(&mut self, scope: &Scope) {
        for (pos, defined) in self.defined.iter_mut().enumerate() {
            if std::mem::take(defined) {
                scope.remove(&self.variables.names()[pos]);
            }
        }
        for entry in &mut self.entries {
            *entry = None;
        }
    }

    /// Start a new index generation.
    pub fn advance(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

/// Gather an entire dataset column.
pub(crate) fn whole_column(dataset: &dyn Dataset, column: usize) -> MaskResult<Value> {
    let values = dataset.gather(column, &mut (0..dataset.row_count()))?;
    Ok(Value::from(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryDataset;

    fn cache() -> SubsetCache {
        let dataset = InMemoryDataset::from_columns([
            ("x", (0..6).map(Value::from).collect::<Vec<_>>()),
            ("y", (10..16).map(Value::from).collect::<Vec<_>>()),
        ])
        .unwrap();
        let variables = Variables::all(&dataset);
        SubsetCache::new(Rc::new(dataset), variables)
    }

    #[test]
    fn entries_from_an_older_generation_are_misses() {
        let mut cache = cache();
        let scope = Scope::root();
        let idx = SlicingIndex::grouped(0, vec![1, 3]);

        cache.get("x", &idx, &scope).unwrap();
        cache.advance();
        assert!(cache.is_empty());
        cache.get("x", &idx, &scope).unwrap();
        assert_eq!(cache.stats().materialized, 2);
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn clear_only_removes_names_it_defined() {
        let mut cache = cache();
        let scope = Scope::root();
        scope.define("..group_size", Value::from(2));
        scope.define("y", Value::from("engine-defined"));
        let idx = SlicingIndex::grouped(0, vec![0, 5]);

        cache.get("x", &idx, &scope).unwrap();
        assert!(scope.contains_local("x"));

        cache.clear(&scope);
        assert!(!scope.contains_local("x"));
        assert!(scope.contains_local("..group_size"));
        assert_eq!(scope.get("y").unwrap(), Some(Value::from("engine-defined")));
    }

    #[test]
    fn engine_bindings_under_a_column_name_are_not_replaced() {
        let mut cache = cache();
        let scope = Scope::root();
        scope.define("x", Value::from("engine"));
        let idx = SlicingIndex::grouped(0, vec![2, 4]);

        assert_eq!(
            cache.get("x", &idx, &scope).unwrap(),
            Value::from(vec![Value::from(2), Value::from(4)])
        );
        assert_eq!(scope.get("x").unwrap(), Some(Value::from("engine")));

        cache.clear(&scope);
        cache.advance();
        assert_eq!(scope.get("x").unwrap(), Some(Value::from("engine")));

        // Once the engine binding is gone the cache defines its subsets again.
        scope.remove("x");
        cache.get("x", &idx, &scope).unwrap();
        cache.clear(&scope);
        assert!(!scope.contains_local("x"));
    }

    #[test]
    fn whole_column_reads_every_row() {
        let cache = cache();
        let value = whole_column(cache.dataset().as_ref(), 1).unwrap();
        assert_eq!(value.len(), 6);
        assert_eq!(value.as_vector().unwrap()[5], Value::from(15));
    }
}
