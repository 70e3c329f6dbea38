use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// Produces an ordered, finite sequence of opaque profiles.
pub trait ProfileSource<P>: Send + Sync {
    fn profiles(&self) -> Vec<P>;
}

impl<P> ProfileSource<P> for Vec<P>
where
    P: Clone + Send + Sync,
{
    fn profiles(&self) -> Vec<P> {
        self.clone()
    }
}

impl<P> ProfileSource<P> for Arc<[P]>
where
    P: Clone + Send + Sync,
{
    fn profiles(&self) -> Vec<P> {
        self.to_vec()
    }
}

pub type SharedProfileSource<P> = Arc<dyn ProfileSource<P>>;

/// Source order first, then item order within each source.
pub fn flatten_profiles<P>(sources: &[SharedProfileSource<P>]) -> Vec<P> {
    sources.iter().flat_map(|source| source.profiles()).collect()
}

/// Ordered list of profile sources shared between a dispatcher and its owner.
///
/// Sources pushed after a session was created only reach sessions created
/// later; existing sessions keep the list they were given.
pub struct ProfileCatalog<P> {
    sources: Arc<RwLock<Vec<SharedProfileSource<P>>>>,
}

impl<P> ProfileCatalog<P>
where
    P: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            sources: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn from_sources<S, I>(sources: I) -> Self
    where
        S: ProfileSource<P> + 'static,
        I: IntoIterator<Item = S>,
    {
        let catalog = Self::new();
        for source in sources {
            catalog.push_source(source);
        }
        catalog
    }

    pub fn push_source<S>(&self, source: S)
    where
        S: ProfileSource<P> + 'static,
    {
        self.sources.write().push(Arc::new(source));
    }

    pub fn push_shared_source(&self, source: SharedProfileSource<P>) {
        self.sources.write().push(source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.read().len()
    }

    pub fn flatten(&self) -> Vec<P> {
        flatten_profiles(&self.sources.read())
    }
}

impl<P> Default for ProfileCatalog<P>
where
    P: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Clone for ProfileCatalog<P> {
    fn clone(&self) -> Self {
        Self {
            sources: Arc::clone(&self.sources),
        }
    }
}

impl<P> fmt::Debug for ProfileCatalog<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileCatalog")
            .field("source_count", &self.sources.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{flatten_profiles, ProfileCatalog, ProfileSource, SharedProfileSource};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        profiles: Vec<&'static str>,
    }

    impl ProfileSource<&'static str> for CountingSource {
        fn profiles(&self) -> Vec<&'static str> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.profiles.clone()
        }
    }

    #[test]
    fn flatten_keeps_source_order_then_item_order() {
        let sources: Vec<SharedProfileSource<&'static str>> = vec![
            Arc::new(vec!["p1", "p2"]),
            Arc::new(Vec::<&'static str>::new()),
            Arc::new(vec!["p3"]),
        ];
        assert_eq!(flatten_profiles(&sources), vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn empty_catalog_flattens_to_empty_list() {
        let catalog = ProfileCatalog::<u32>::new();
        assert!(catalog.flatten().is_empty());
        assert_eq!(catalog.source_count(), 0);
    }

    #[test]
    fn catalog_clones_share_sources() {
        let catalog = ProfileCatalog::from_sources([vec![1_u32, 2], vec![3]]);
        let owner_view = catalog.clone();
        owner_view.push_source(vec![4_u32]);
        assert_eq!(catalog.source_count(), 3);
        assert_eq!(catalog.flatten(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn each_flatten_queries_every_source_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let catalog = ProfileCatalog::new();
        catalog.push_source(CountingSource {
            calls: Arc::clone(&calls),
            profiles: vec!["a", "b"],
        });
        catalog.push_shared_source(Arc::new(vec!["c"]));

        assert_eq!(catalog.flatten(), vec!["a", "b", "c"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shared_slice_source_yields_items_in_order() {
        let source: Arc<[u8]> = Arc::from(vec![9_u8, 8, 7]);
        assert_eq!(source.profiles(), vec![9, 8, 7]);
    }
}
