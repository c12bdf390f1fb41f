use std::{
    any::{type_name, Any, TypeId},
    fmt,
    sync::OnceLock,
};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use static_assertions::assert_impl_all;
use tracing::debug;

/// A lazily created value that is initialised at most once, on first access.
///
/// `Singleton` can be placed in a `static`:
///
/// ```
/// use relay_rc::Singleton;
///
/// static GREETING: Singleton<String> = Singleton::new(|| "hello".to_string());
///
/// assert!(!GREETING.is_initialized());
/// assert_eq!(GREETING.get(), "hello");
/// assert!(std::ptr::eq(GREETING.get(), GREETING.get()));
/// ```
pub struct Singleton<T> {
    cell: OnceLock<T>,
    init: fn() -> T,
}

assert_impl_all!(Singleton<String>: Send, Sync);

impl<T> Singleton<T> {
    pub const fn new(init: fn() -> T) -> Self {
        Self {
            cell: OnceLock::new(),
            init,
        }
    }

    /// Returns the value, creating it first if this is the first access.
    ///
    /// When several threads race on the first access, exactly one runs the initialiser and the
    /// others block until it is done.
    pub fn get(&self) -> &T {
        self.cell.get_or_init(|| {
            debug!(ty = type_name::<T>(), "creating singleton");
            (self.init)()
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T: fmt::Debug> fmt::Debug for Singleton<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Singleton").field(&self.cell.get()).finish()
    }
}

type Registry = FxHashMap<TypeId, &'static (dyn Any + Send + Sync)>;

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(Default::default)
}

/// Returns the process-wide instance of `T`, creating it with `T::default()` on first use.
///
/// Every call for the same `T` returns the same object, which lives until the process exits.
///
/// Lookups of existing instances take a shared lock only. Creation takes the exclusive lock and
/// checks again, so concurrent first calls still create a single object.
///
/// `T::default()` runs under the exclusive lock and must not call `instance` itself.
pub fn instance<T>() -> &'static T
where
    T: Default + Send + Sync + 'static,
{
    let key = TypeId::of::<T>();
    if let Some(obj) = registry().read().get(&key).copied() {
        return downcast(obj);
    }

    let mut objects = registry().write();
    let obj = *objects.entry(key).or_insert_with(|| {
        debug!(ty = type_name::<T>(), "creating singleton instance");
        let obj: &'static (dyn Any + Send + Sync) = Box::leak(Box::new(T::default()));
        obj
    });
    downcast(obj)
}

fn downcast<T: Any>(obj: &'static (dyn Any + Send + Sync)) -> &'static T {
    match obj.downcast_ref::<T>() {
        Some(obj) => obj,
        None => unreachable!(
            "singleton registry entry for {} has another type",
            type_name::<T>()
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{instance, Singleton};

    #[test]
    fn singleton_runs_init_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        static VALUE: Singleton<u64> = Singleton::new(|| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert!(!VALUE.is_initialized());
        assert_eq!(*VALUE.get(), 42);
        assert_eq!(*VALUE.get(), 42);
        assert!(VALUE.is_initialized());
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(format!("{VALUE:?}"), "Singleton(Some(42))");
    }

    #[derive(Default)]
    struct Settings {
        name: String,
    }

    #[derive(Default)]
    struct Other(u8);

    #[test]
    fn instance_per_type() {
        let a = instance::<Settings>();
        let b = instance::<Settings>();
        assert!(std::ptr::eq(a, b));
        assert!(a.name.is_empty());

        let o = instance::<Other>();
        assert_eq!(o.0, 0);
        assert_ne!(a as *const Settings as usize, o as *const Other as usize);
    }
}
