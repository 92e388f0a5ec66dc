//! Parent-chain walk that decides which layers a target is missing.
//!
//! Starting at a tip, [`Walk`] follows `parent` links through a
//! [`LayerStore`] and yields each layer the target lacks, tip first. It stops
//! at the first layer the presence predicate reports as already held, since
//! that layer and all of its ancestors are then present too.

use std::collections::HashSet;

use crate::{Error, LayerId, LayerMeta, LayerStore, Result};

/// A layer the target is missing.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Layer {
    /// The layer id.
    pub id: LayerId,
    /// The layer's metadata as stored.
    pub meta: LayerMeta,
}

/// Lazy, forward-only sequence of missing layers.
///
/// Yields `Err` at most once, after which it is exhausted:
/// - [`Error::RefNotFound`] if the tip itself is not stored,
/// - [`Error::CyclicLineage`] if a parent link revisits a walked layer,
/// - any error from the store or the presence predicate.
///
/// A missing layer below the tip ends the walk quietly.
#[derive(Debug)]
pub struct Walk<'a, F> {
    store: &'a LayerStore,
    has_locally: F,
    next: Option<LayerId>,
    visited: HashSet<LayerId>,
}

/// Starts a walk at `tip` over `store`.
///
/// `has_locally` answers whether the target already holds an id.
pub fn walk<F>(store: &LayerStore, tip: LayerId, has_locally: F) -> Walk<'_, F>
where
    F: FnMut(&LayerId) -> Result<bool>,
{
    Walk {
        store,
        has_locally,
        next: Some(tip),
        visited: HashSet::new(),
    }
}

impl<F> Walk<'_, F>
where
    F: FnMut(&LayerId) -> Result<bool>,
{
    fn step(&mut self, current: LayerId) -> Result<Option<Layer>> {
        let is_tip = self.visited.is_empty();
        if !self.visited.insert(current.clone()) {
            return Err(Error::CyclicLineage(current));
        }

        let Some(meta) = self.store.metadata(&current)? else {
            if is_tip {
                return Err(Error::RefNotFound(format!("layer {current}")));
            }
            tracing::warn!(id = %current, "lineage ends at missing layer");
            return Ok(None);
        };

        if (self.has_locally)(&current)? {
            tracing::debug!(id = %current, "target already has layer");
            return Ok(None);
        }

        self.next.clone_from(&meta.parent);
        Ok(Some(Layer { id: current, meta }))
    }
}

impl<F> Iterator for Walk<'_, F>
where
    F: FnMut(&LayerId) -> Result<bool>,
{
    type Item = Result<Layer>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.step(current).transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    /// Builds a store holding a linear chain; returns the ids tip first.
    fn chain(store: &LayerStore, len: usize) -> Vec<LayerId> {
        let ids: Vec<LayerId> = (0..len)
            .map(|i| LayerId::parse(&format!("{i:040x}")).unwrap())
            .collect();
        for (i, id) in ids.iter().enumerate() {
            let parent = ids.get(i + 1).cloned();
            write_meta(store, &LayerMeta::new(id.clone(), parent));
        }
        ids
    }

    fn write_meta(store: &LayerStore, meta: &LayerMeta) {
        fs::create_dir_all(store.payload_path(&meta.id)).unwrap();
        fs::write(
            store.metadata_path(&meta.id),
            serde_json::to_vec(meta).unwrap(),
        )
        .unwrap();
    }

    fn ids_of(walk: impl Iterator<Item = Result<Layer>>) -> Vec<LayerId> {
        walk.map(|l| l.unwrap().id).collect()
    }

    #[test]
    fn yields_whole_chain_when_target_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LayerStore::new(tmp.path());
        let ids = chain(&store, 5);

        let walked = ids_of(walk(&store, ids[0].clone(), |_| Ok(false)));
        assert_eq!(walked, ids);
    }

    #[test]
    fn stops_above_first_present_layer() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LayerStore::new(tmp.path());
        let ids = chain(&store, 6);

        for depth in 0..ids.len() {
            let present = ids[depth].clone();
            let walked = ids_of(walk(&store, ids[0].clone(), |id| Ok(*id == present)));
            assert_eq!(walked, ids[..depth], "present at depth {depth}");
        }
    }

    #[test]
    fn asks_nothing_below_the_boundary() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LayerStore::new(tmp.path());
        let ids = chain(&store, 4);
        let mut asked = Vec::new();

        let walked = ids_of(walk(&store, ids[0].clone(), |id| {
            asked.push(id.clone());
            Ok(*id == ids[1])
        }));

        assert_eq!(walked, ids[..1]);
        assert_eq!(asked, ids[..2]);
    }

    #[test]
    fn missing_tip_is_ref_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LayerStore::new(tmp.path());
        let tip = LayerId::parse(&"f".repeat(40)).unwrap();

        let mut w = walk(&store, tip, |_| Ok(false));
        assert!(matches!(w.next(), Some(Err(Error::RefNotFound(_)))));
        assert!(w.next().is_none());
    }

    #[test]
    fn missing_ancestor_ends_quietly() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LayerStore::new(tmp.path());
        let ids = chain(&store, 3);
        fs::remove_dir_all(store.payload_path(&ids[2])).unwrap();

        let walked = ids_of(walk(&store, ids[0].clone(), |_| Ok(false)));
        assert_eq!(walked, ids[..2]);
    }

    #[test]
    fn cycle_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LayerStore::new(tmp.path());
        let a = LayerId::parse(&"a".repeat(40)).unwrap();
        let b = LayerId::parse(&"b".repeat(40)).unwrap();
        write_meta(&store, &LayerMeta::new(a.clone(), Some(b.clone())));
        write_meta(&store, &LayerMeta::new(b.clone(), Some(a.clone())));

        let results: Vec<_> = walk(&store, a.clone(), |_| Ok(false)).collect();
        assert_eq!(results.len(), 3);
        assert!(matches!(&results[2], Err(Error::CyclicLineage(id)) if *id == a));
    }

    #[test]
    fn predicate_error_aborts() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LayerStore::new(tmp.path());
        let ids = chain(&store, 2);

        let mut w = walk(&store, ids[0].clone(), |_| {
            Err(Error::Engine {
                op: "inspect",
                message: "daemon down".into(),
            })
        });
        assert!(matches!(w.next(), Some(Err(Error::Engine { .. }))));
        assert!(w.next().is_none());
    }

    #[test]
    fn walks_are_independent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LayerStore::new(tmp.path());
        let ids = chain(&store, 3);

        let first = ids_of(walk(&store, ids[0].clone(), |_| Ok(false)));
        let second = ids_of(walk(&store, ids[0].clone(), |_| Ok(false)));
        assert_eq!(first, second);
    }
}
