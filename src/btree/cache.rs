//! A single-flight node cache over a [Persister].
//!
//! The first caller to ask for a node that is not cached performs the load
//! itself. Anyone else asking for the same node while that load is running
//! waits on it, rather than issuing a second load. Waiting is bounded: a
//! waiter that runs out of time gets [Error::Timeout], while the load it was
//! waiting on carries on and still populates the cache for later callers.
//! A load that fails is evicted so that the next request retries it.

use foldhash::HashMap;
use parking_lot::{Condvar, Mutex};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

use super::codec::decode_node;
use super::context::Context;
use super::node::{Node, NodeId};
use crate::error::{Error, Result};
use crate::persist::Persister;

type LoadResult<V> = Result<Arc<Node<V>>>;

struct Flight<V> {
    result: Mutex<Option<LoadResult<V>>>,
    ready: Condvar,
}

impl<V> Flight<V> {
    fn new() -> Self {
        Flight {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, r: LoadResult<V>) {
        let mut guard = self.result.lock();
        *guard = Some(r);
        self.ready.notify_all();
    }

    fn wait(&self, id: &NodeId, timeout: Duration) -> LoadResult<V> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.result.lock();
        loop {
            if let Some(r) = guard.as_ref() {
                return r.clone();
            }
            if self.ready.wait_until(&mut guard, deadline).timed_out() {
                return match guard.as_ref() {
                    Some(r) => r.clone(),
                    None => Err(Error::Timeout(*id)),
                };
            }
        }
    }
}

pub(crate) struct Cacher<V> {
    persister: Arc<dyn Persister>,
    cache: Mutex<HashMap<NodeId, Arc<Flight<V>>>>,
    timeout: Duration,
}

impl<V> Debug for Cacher<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cacher")
            .field("cached", &self.cache.lock().len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<V> Cacher<V>
where
    V: DeserializeOwned + Clone + Debug,
{
    pub(crate) fn new(persister: Arc<dyn Persister>, timeout: Duration) -> Self {
        Cacher {
            persister,
            cache: Mutex::new(HashMap::default()),
            timeout,
        }
    }

    /// Fetch a node, preferring the session's own copy in `ctx`.
    pub(crate) fn get_node(&self, ctx: &Context<V>, id: &NodeId) -> LoadResult<V> {
        if let Some(n) = ctx.get(id) {
            return Ok(n.clone());
        }

        let (flight, owner) = {
            let mut cache = self.cache.lock();
            match cache.get(id) {
                Some(f) => (f.clone(), false),
                None => {
                    let f = Arc::new(Flight::new());
                    cache.insert(*id, f.clone());
                    (f, true)
                }
            }
        };

        if !owner {
            return flight.wait(id, self.timeout);
        }

        trace!(?id, "cache miss");
        let r = self.load(id);
        if r.is_err() {
            let mut cache = self.cache.lock();
            if cache.get(id).is_some_and(|f| Arc::ptr_eq(f, &flight)) {
                cache.remove(id);
            }
        }
        flight.complete(r.clone());
        r
    }

    fn load(&self, id: &NodeId) -> LoadResult<V> {
        let keys = [id.as_bytes().to_vec()];
        let mut items = self.persister.load(&keys).map_err(Error::persistence)?;
        match items.pop().flatten() {
            Some(bytes) => Ok(Arc::new(decode_node(&bytes)?)),
            None => Err(Error::NodeNotFound(*id)),
        }
    }

    pub(crate) fn clear(&self) {
        self.cache.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::Cacher;
    use crate::btree::codec::encode_node;
    use crate::btree::context::Context;
    use crate::btree::node::{Key, Node};
    use crate::btree::OrdComparator;
    use crate::error::{Error, PersistError};
    use crate::persist::{MemoryPersister, Payload, Persister};
    use crossbeam_utils::thread::scope;
    use parking_lot::{Condvar, Mutex};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    // Counts loads, and can hold them until released.
    struct GatedPersister {
        inner: MemoryPersister,
        loads: AtomicUsize,
        fail: bool,
        open: Mutex<bool>,
        gate: Condvar,
    }

    impl GatedPersister {
        fn new(open: bool, fail: bool) -> Self {
            GatedPersister {
                inner: MemoryPersister::new(),
                loads: AtomicUsize::new(0),
                fail,
                open: Mutex::new(open),
                gate: Condvar::new(),
            }
        }

        fn release(&self) {
            *self.open.lock() = true;
            self.gate.notify_all();
        }
    }

    impl Persister for GatedPersister {
        fn save(&self, items: Vec<Payload>) -> Result<(), PersistError> {
            self.inner.save(items)
        }

        fn load(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, PersistError> {
            self.loads.fetch_add(1, Ordering::AcqRel);
            let mut open = self.open.lock();
            while !*open {
                self.gate.wait(&mut open);
            }
            if self.fail {
                return Err("disk on fire".into());
            }
            self.inner.load(keys)
        }
    }

    fn stored_leaf(p: &dyn Persister) -> Node<usize> {
        let mut n = Node::new_leaf();
        n.insert_keys(vec![(0, Key::new(7usize, vec![7]))], &OrdComparator);
        p.save(vec![Payload::new(
            n.id.as_bytes().to_vec(),
            encode_node(&n).unwrap(),
        )])
        .unwrap();
        n
    }

    #[test]
    fn test_btree_cache_hit_after_load() {
        let p = Arc::new(GatedPersister::new(true, false));
        let n = stored_leaf(p.as_ref());
        let c: Cacher<usize> = Cacher::new(p.clone(), Duration::from_secs(5));
        let ctx = Context::default();

        assert_eq!(*c.get_node(&ctx, &n.id).unwrap(), n);
        assert_eq!(*c.get_node(&ctx, &n.id).unwrap(), n);
        assert_eq!(p.loads.load(Ordering::Acquire), 1);
        assert_eq!(c.len(), 1);

        c.clear();
        assert_eq!(c.len(), 0);
        assert_eq!(*c.get_node(&ctx, &n.id).unwrap(), n);
        assert_eq!(p.loads.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_btree_cache_context_first() {
        let p = Arc::new(GatedPersister::new(true, false));
        let c: Cacher<usize> = Cacher::new(p.clone(), Duration::from_secs(5));
        let mut ctx = Context::default();
        let n: Node<usize> = Node::new_leaf();
        let id = n.id;
        ctx.insert(n);
        assert!(c.get_node(&ctx, &id).is_ok());
        assert_eq!(p.loads.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_btree_cache_not_found_evicted() {
        let p = Arc::new(GatedPersister::new(true, false));
        let c: Cacher<usize> = Cacher::new(p.clone(), Duration::from_secs(5));
        let id = uuid::Uuid::new_v4();
        let ctx = Context::default();
        assert!(matches!(c.get_node(&ctx, &id), Err(Error::NodeNotFound(x)) if x == id));
        assert_eq!(c.len(), 0);
        assert!(c.get_node(&ctx, &id).is_err());
        assert_eq!(p.loads.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_btree_cache_single_flight() {
        let p = Arc::new(GatedPersister::new(false, false));
        let n = stored_leaf(p.as_ref());
        let c: Cacher<usize> = Cacher::new(p.clone(), Duration::from_secs(30));
        let ctx = Context::default();

        scope(|s| {
            let c_ref = &c;
            let ctx_ref = &ctx;
            let id = n.id;
            let waiters: Vec<_> = (0..4)
                .map(|_| s.spawn(move |_| c_ref.get_node(ctx_ref, &id)))
                .collect();
            // Let every caller queue up behind the first load.
            while p.loads.load(Ordering::Acquire) == 0 {
                std::thread::yield_now();
            }
            std::thread::sleep(Duration::from_millis(50));
            p.release();
            for w in waiters {
                assert_eq!(*w.join().unwrap().unwrap(), n);
            }
        })
        .unwrap();

        assert_eq!(p.loads.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_btree_cache_error_shared_and_evicted() {
        let p = Arc::new(GatedPersister::new(false, true));
        let n = stored_leaf(p.as_ref());
        let c: Cacher<usize> = Cacher::new(p.clone(), Duration::from_secs(30));
        let ctx = Context::default();

        scope(|s| {
            let c_ref = &c;
            let ctx_ref = &ctx;
            let id = n.id;
            let waiters: Vec<_> = (0..3)
                .map(|_| s.spawn(move |_| c_ref.get_node(ctx_ref, &id)))
                .collect();
            while p.loads.load(Ordering::Acquire) == 0 {
                std::thread::yield_now();
            }
            std::thread::sleep(Duration::from_millis(50));
            p.release();
            for w in waiters {
                assert!(matches!(w.join().unwrap(), Err(Error::Persistence(_))));
            }
        })
        .unwrap();

        assert_eq!(c.len(), 0);
    }

    #[test]
    fn test_btree_cache_waiter_timeout() {
        let p = Arc::new(GatedPersister::new(false, false));
        let n = stored_leaf(p.as_ref());
        let c: Cacher<usize> = Cacher::new(p.clone(), Duration::from_millis(20));
        let ctx = Context::default();

        scope(|s| {
            let c_ref = &c;
            let ctx_ref = &ctx;
            let id = n.id;
            let owner = s.spawn(move |_| c_ref.get_node(ctx_ref, &id));
            while p.loads.load(Ordering::Acquire) == 0 {
                std::thread::yield_now();
            }
            // The owner is stuck in the persister, so this waiter gives up.
            assert!(matches!(c.get_node(&ctx, &id), Err(Error::Timeout(x)) if x == id));
            p.release();
            // The owner's load still lands and is reused.
            assert_eq!(*owner.join().unwrap().unwrap(), n);
            assert_eq!(*c.get_node(&ctx, &id).unwrap(), n);
        })
        .unwrap();

        assert_eq!(p.loads.load(Ordering::Acquire), 1);
    }
}
