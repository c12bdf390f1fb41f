use std::{fmt, mem, sync::Arc};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use static_assertions::assert_impl_all;

use crate::{Error, Result};

/// A reference-counted pointer granting shared ownership of a heap value.
///
/// Every clone of a `SharedPtr` refers to the same object, so a mutation made through one
/// handle is observed through all of them. The object is dropped exactly once, when the last
/// handle referencing it is dropped or reassigned away.
///
/// A `SharedPtr` may also be null, in which case it owns nothing, reports a
/// [`use_count`](SharedPtr::use_count) of zero and refuses to be dereferenced.
///
/// The count is updated atomically, so handles can be cloned and dropped from any thread.
/// Access to the value goes through a reader-writer lock.
///
/// Reference cycles are never collected. A `SharedPtr` graph must be acyclic or it leaks.
///
/// # Examples
///
/// ```
/// use relay_rc::SharedPtr;
///
/// let p1 = SharedPtr::new(2);
/// let p2 = p1.clone();
/// assert_eq!(p1.use_count(), 2);
///
/// *p2.write().unwrap() = 3;
/// assert_eq!(*p1.read().unwrap(), 3);
/// ```
pub struct SharedPtr<T> {
    inner: Option<Arc<RwLock<T>>>,
}

assert_impl_all!(SharedPtr<usize>: Send, Sync);

impl<T> SharedPtr<T> {
    /// Constructs a new `SharedPtr` by allocating a new reference-counted object.
    #[inline]
    pub fn new(obj: T) -> Self {
        Self {
            inner: Some(Arc::new(RwLock::new(obj))),
        }
    }

    /// Constructs a null `SharedPtr` which owns nothing.
    #[inline]
    pub const fn null() -> Self {
        Self { inner: None }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    /// Returns the number of live handles sharing this object, or zero for a null pointer.
    #[inline]
    pub fn use_count(&self) -> usize {
        self.inner.as_ref().map_or(0, Arc::strong_count)
    }

    /// Returns `true` if both pointers refer to the same object. Two null pointers are equal.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        match (&this.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Makes `self` share the object referenced by `other`.
    ///
    /// Assigning a pointer to the object it already references does nothing. Otherwise the
    /// reference to `other`'s object is taken before the old one is released, so the old
    /// object is destroyed only if no other handle keeps it alive.
    pub fn assign(&mut self, other: &Self) {
        if Self::ptr_eq(self, other) {
            return;
        }
        let old = mem::replace(&mut self.inner, other.inner.clone());
        drop(old);
    }

    /// Locks the object for shared access, blocking while a writer holds it.
    ///
    /// The lock is shared by every clone and is not reentrant: calling `write` (or `read`
    /// while a writer is queued) through any clone while this guard is alive on the same thread
    /// blocks forever. Use [`try_read`](SharedPtr::try_read) for nested access across aliases.
    ///
    /// Returns [`Error::NullDereference`] if the pointer is null.
    #[inline]
    pub fn read(&self) -> Result<RwLockReadGuard<'_, T>> {
        match &self.inner {
            Some(inner) => Ok(inner.read()),
            None => Err(Error::NullDereference),
        }
    }

    /// Locks the object for exclusive access, blocking while any other guard holds it.
    ///
    /// Not reentrant across clones: accessing the object through another handle while this
    /// guard is alive on the same thread blocks forever.
    ///
    /// Returns [`Error::NullDereference`] if the pointer is null.
    #[inline]
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, T>> {
        match &self.inner {
            Some(inner) => Ok(inner.write()),
            None => Err(Error::NullDereference),
        }
    }

    /// Like [`read`](SharedPtr::read), but returns [`Error::Busy`] instead of blocking when
    /// the object is locked for writing.
    #[inline]
    pub fn try_read(&self) -> Result<RwLockReadGuard<'_, T>> {
        let inner = self.inner.as_ref().ok_or(Error::NullDereference)?;
        inner.try_read().ok_or(Error::Busy)
    }

    /// Like [`write`](SharedPtr::write), but returns [`Error::Busy`] instead of blocking when
    /// any guard on the object is alive.
    #[inline]
    pub fn try_write(&self) -> Result<RwLockWriteGuard<'_, T>> {
        let inner = self.inner.as_ref().ok_or(Error::NullDereference)?;
        inner.try_write().ok_or(Error::Busy)
    }

    /// Runs `f` on the object under [`read`](SharedPtr::read). Blocks, and is not reentrant
    /// across clones.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let guard = self.read()?;
        Ok(f(&guard))
    }

    /// Runs `f` on the object under [`write`](SharedPtr::write). Blocks, and `f` must not
    /// access the object through another clone except via the `try_` accessors.
    #[inline]
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut guard = self.write()?;
        Ok(f(&mut guard))
    }

    /// Consumes the pointer, returning the object if this was the last handle to it.
    ///
    /// If other handles remain, this handle is released and `None` is returned.
    #[inline]
    pub fn into_inner(self) -> Option<T> {
        let inner = self.inner?;
        Arc::into_inner(inner).map(|lock| lock.into_inner())
    }
}

impl<T> Clone for SharedPtr<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }

    #[inline]
    fn clone_from(&mut self, source: &Self) {
        self.assign(source);
    }
}

impl<T> Default for SharedPtr<T> {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<T> for SharedPtr<T> {
    #[inline]
    fn from(obj: T) -> Self {
        Self::new(obj)
    }
}

impl<T> From<Option<T>> for SharedPtr<T> {
    #[inline]
    fn from(obj: Option<T>) -> Self {
        obj.map_or_else(Self::null, Self::new)
    }
}

impl<T> PartialEq for SharedPtr<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T> Eq for SharedPtr<T> {}

impl<T> fmt::Debug for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPtr")
            .field("null", &self.is_null())
            .field("use_count", &self.use_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::SharedPtr;
    use crate::Error;

    #[test]
    fn null_owns_nothing() {
        let p = SharedPtr::<i32>::null();
        assert!(p.is_null());
        assert_eq!(p.use_count(), 0);
        assert_eq!(p.read().err(), Some(Error::NullDereference));
        assert_eq!(p.with_mut(|v| *v += 1), Err(Error::NullDereference));

        let q = p.clone();
        assert_eq!(q.use_count(), 0);
        assert_eq!(p, q);
    }

    #[test]
    fn from_option() {
        assert!(SharedPtr::<u8>::from(None).is_null());
        let p = SharedPtr::from(Some(5u8));
        assert_eq!(p.use_count(), 1);
        assert_eq!(p.with(|v| *v), Ok(5));
    }

    #[test]
    fn into_inner_last_handle() {
        let p = SharedPtr::new(String::from("last"));
        let q = p.clone();
        assert_eq!(q.into_inner(), None);
        assert_eq!(p.use_count(), 1);
        assert_eq!(p.into_inner().as_deref(), Some("last"));
        assert_eq!(SharedPtr::<String>::null().into_inner(), None);
    }

    #[test]
    fn try_access_while_alias_is_locked() {
        let p = SharedPtr::new(1);
        let q = p.clone();
        {
            let _held = p.write().unwrap();
            assert_eq!(q.try_read().err(), Some(Error::Busy));
            assert_eq!(q.try_write().err(), Some(Error::Busy));
        }
        {
            let _shared = p.read().unwrap();
            assert_eq!(*q.try_read().unwrap(), 1);
            assert_eq!(q.try_write().err(), Some(Error::Busy));
        }
        assert_eq!(SharedPtr::<i32>::null().try_read().err(), Some(Error::NullDereference));

        // Adding a value to itself through two aliases fails fast instead of hanging.
        let res = p.with_mut(|v| q.try_read().map(|other| *v += *other));
        assert_eq!(res, Ok(Err(Error::Busy)));

        let doubled = *q.try_read().unwrap() * 2;
        *p.try_write().unwrap() = doubled;
        assert_eq!(*q.read().unwrap(), 2);
    }

    #[test]
    fn clone_from_assigns() {
        let p = SharedPtr::new(1);
        let mut q = SharedPtr::new(2);
        q.clone_from(&p);
        assert!(SharedPtr::ptr_eq(&p, &q));
        assert_eq!(p.use_count(), 2);
    }

    #[test]
    fn debug_hides_payload() {
        let p = SharedPtr::new(7);
        let _q = p.clone();
        assert_eq!(format!("{p:?}"), "SharedPtr { null: false, use_count: 2 }");
    }
}
