//! Process-wide cache of compiled programs, keyed by `TypeId`
//!
//! Published programs are immutable and never evicted. Lookups only take the
//! read side of the published map, so concurrent readers never block each
//! other. A miss takes a gate private to that type: two threads racing on the
//! same new type compile it once, while compiles of different types proceed
//! in parallel.

use std::any::TypeId;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};

pub struct ProgramCache<P> {
    published: RwLock<AHashMap<TypeId, Arc<P>>>,
    in_flight: Mutex<AHashMap<TypeId, Arc<Mutex<()>>>>,
}

/// Drops the per-type gate entry on every exit path of a compile
struct GateEntry<'a> {
    in_flight: &'a Mutex<AHashMap<TypeId, Arc<Mutex<()>>>>,
    key: TypeId,
}

impl Drop for GateEntry<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}

impl<P> ProgramCache<P> {
    pub fn new() -> Self {
        Self {
            published: RwLock::new(AHashMap::new()),
            in_flight: Mutex::new(AHashMap::new()),
        }
    }

    #[inline]
    pub fn get(&self, key: TypeId) -> Option<Arc<P>> {
        self.published.read().get(&key).cloned()
    }

    /// Return the published program for `key`, compiling it with `compile`
    /// on a miss. A failed compile publishes nothing.
    pub fn get_or_compile<E>(
        &self,
        key: TypeId,
        compile: impl FnOnce() -> Result<P, E>,
    ) -> Result<Arc<P>, E> {
        if let Some(program) = self.get(key) {
            return Ok(program);
        }

        let gate = Arc::clone(self.in_flight.lock().entry(key).or_default());
        let _held = gate.lock();
        let _entry = GateEntry {
            in_flight: &self.in_flight,
            key,
        };

        // another caller may have published while we waited on the gate
        if let Some(program) = self.get(key) {
            return Ok(program);
        }

        let program = Arc::new(compile()?);
        self.published.write().insert(key, Arc::clone(&program));
        Ok(program)
    }

    pub fn len(&self) -> usize {
        self.published.read().len()
    }
}

impl<P> Default for ProgramCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_hit_skips_compile() {
        let cache: ProgramCache<u32> = ProgramCache::new();
        let key = TypeId::of::<u8>();

        let first = cache.get_or_compile(key, || Ok::<_, ()>(7)).unwrap();
        let second = cache
            .get_or_compile(key, || -> Result<u32, ()> { panic!("compiled twice") })
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache: ProgramCache<u32> = ProgramCache::new();
        let key = TypeId::of::<u16>();

        assert_eq!(cache.get_or_compile(key, || Err("boom")), Err("boom"));
        assert_eq!(cache.len(), 0);
        assert!(cache.in_flight.lock().is_empty());

        let program = cache.get_or_compile(key, || Ok::<_, &str>(3)).unwrap();
        assert_eq!(*program, 3);
    }

    #[test]
    fn test_concurrent_misses_compile_once() {
        let cache: Arc<ProgramCache<usize>> = Arc::new(ProgramCache::new());
        let compiles = Arc::new(AtomicUsize::new(0));
        let key = TypeId::of::<String>();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let compiles = Arc::clone(&compiles);
                thread::spawn(move || {
                    cache
                        .get_or_compile(key, || {
                            compiles.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(10));
                            Ok::<_, ()>(42)
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(*handle.join().unwrap(), 42);
        }
        assert_eq!(compiles.load(Ordering::SeqCst), 1);
    }
}
