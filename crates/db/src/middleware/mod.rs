//! Service middleware. Each wrapper implements [`Service`] and delegates to
//! the service it wraps.

pub mod cache;
pub mod instrument;
pub mod logging;
pub mod sourcing;

pub use cache::Cache;
pub use instrument::Instrument;
pub use logging::Logging;
pub use sourcing::Sourcing;

use std::sync::Arc;

use crate::cache::CountsCache;
use crate::entities::Entity;
use crate::service::Service;
use crate::source::Source;

/// Wrap `store` as logging, instrumentation, caching, sourcing, store.
///
/// Cache and sourcing layers are skipped when not given.
pub fn stack<E: Entity>(
    store: Arc<dyn Service<E>>,
    counts: Option<Arc<dyn CountsCache>>,
    source: Option<Arc<dyn Source<E>>>,
) -> Arc<dyn Service<E>> {
    let mut svc = store;
    if let Some(source) = source {
        svc = Arc::new(Sourcing::new(svc, source));
    }
    if let Some(counts) = counts {
        svc = Arc::new(Cache::new(svc, counts));
    }
    Arc::new(Logging::new(Arc::new(Instrument::new(svc))))
}
