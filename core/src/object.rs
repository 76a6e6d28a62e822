//! Ownership and safe reading of [`RawObject`] trees.
//!
//! - [`WireObject`] owns a tree allocated by this crate and frees it exactly
//!   once, on drop. Ownership can be moved out with [`WireObject::into_raw`]
//!   and back with [`WireObject::from_raw`]; there is no other way to free it.
//! - [`ObjectRef`] is a borrowed, bounds-checked view over any well-formed
//!   tree, whoever allocated it. Children are read through a slice whose length
//!   comes from the object's own `nb_entries`, never through pointer arithmetic.
//!
//! Allocation is fallible (`try_reserve_exact`). A failed reservation becomes
//! an [`AllocError`]; children built before the failure are dropped, and so
//! freed, on the way out.

use std::ffi::c_char;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;

use crate::sys::{ObjectType, RawObject, RawValue};

/// A buffer of the requested size could not be reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    /// Number of elements that were requested.
    pub requested: usize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not allocate {} elements", self.requested)
    }
}

impl std::error::Error for AllocError {}

// ═══════════════════════════════════════════════════════════════════════════════
// WireObject
// ═══════════════════════════════════════════════════════════════════════════════

/// An owned, binding-allocated object tree.
///
/// Never pass a `WireObject`'s memory to the engine's `object_free`: the engine
/// only ever borrows it through [`as_ptr`](Self::as_ptr) /
/// [`as_mut_ptr`](Self::as_mut_ptr).
pub struct WireObject {
    raw: RawObject,
}

// SAFETY: the tree is exclusively owned by this value and has no interior
// mutability; moving or sharing it across threads is no different from a Box.
unsafe impl Send for WireObject {}
unsafe impl Sync for WireObject {}

impl WireObject {
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            raw: RawObject::invalid(),
        }
    }

    #[must_use]
    pub fn null() -> Self {
        Self::scalar(ObjectType::NULL, RawValue { uint_value: 0 })
    }

    #[must_use]
    pub fn bool(b: bool) -> Self {
        Self::scalar(ObjectType::BOOL, RawValue { boolean: b })
    }

    #[must_use]
    pub fn signed(i: i64) -> Self {
        Self::scalar(ObjectType::SIGNED, RawValue { int_value: i })
    }

    #[must_use]
    pub fn unsigned(u: u64) -> Self {
        Self::scalar(ObjectType::UNSIGNED, RawValue { uint_value: u })
    }

    #[must_use]
    pub fn float(f: f64) -> Self {
        Self::scalar(ObjectType::FLOAT, RawValue { f64: f })
    }

    /// A string leaf holding a copy of `bytes`.
    ///
    /// # Errors
    ///
    /// [`AllocError`] if the copy cannot be allocated.
    pub fn string(bytes: &[u8]) -> Result<Self, AllocError> {
        let ptr = alloc_c_bytes(bytes)?;
        Ok(Self {
            raw: RawObject {
                value: RawValue { string_value: ptr },
                nb_entries: bytes.len() as u64,
                type_: ObjectType::STRING,
                ..RawObject::invalid()
            },
        })
    }

    /// An array taking ownership of `items`, in order.
    ///
    /// # Errors
    ///
    /// [`AllocError`] if the child buffer cannot be allocated; `items` are freed.
    pub fn array(items: Vec<WireObject>) -> Result<Self, AllocError> {
        let (ptr, len) = alloc_children(items)?;
        Ok(Self {
            raw: RawObject {
                value: RawValue { array: ptr },
                nb_entries: len,
                type_: ObjectType::ARRAY,
                ..RawObject::invalid()
            },
        })
    }

    /// A map taking ownership of `entries`, in order. Duplicate keys are kept.
    ///
    /// # Errors
    ///
    /// [`AllocError`] if a key or the child buffer cannot be allocated; every
    /// entry is freed.
    pub fn map(entries: Vec<(Vec<u8>, WireObject)>) -> Result<Self, AllocError> {
        let mut children = Vec::new();
        children
            .try_reserve_exact(entries.len())
            .map_err(|_| AllocError {
                requested: entries.len(),
            })?;
        for (key, value) in entries {
            children.push(value.with_key(&key)?);
        }
        let (ptr, len) = alloc_children(children)?;
        Ok(Self {
            raw: RawObject {
                value: RawValue { array: ptr },
                nb_entries: len,
                type_: ObjectType::MAP,
                ..RawObject::invalid()
            },
        })
    }

    /// Attach (or replace) the key this object is stored under in a map.
    ///
    /// # Errors
    ///
    /// [`AllocError`] if the key cannot be allocated; `self` is freed.
    pub fn with_key(mut self, key: &[u8]) -> Result<Self, AllocError> {
        let ptr = alloc_c_bytes(key)?;
        // SAFETY: any previous key was allocated by `alloc_c_bytes` with this length.
        unsafe { free_c_bytes(self.raw.parameter_name, self.raw.parameter_name_length) };
        self.raw.parameter_name = ptr;
        self.raw.parameter_name_length = key.len() as u64;
        Ok(self)
    }

    /// Borrowed view of the tree.
    #[must_use]
    pub fn as_ref(&self) -> ObjectRef<'_> {
        // SAFETY: trees built by this type are well-formed by construction.
        unsafe { ObjectRef::from_raw(&self.raw) }
    }

    #[must_use]
    pub fn object_type(&self) -> ObjectType {
        self.raw.type_
    }

    /// Pointer lent to the engine for the duration of one call.
    #[must_use]
    pub fn as_ptr(&self) -> *const RawObject {
        &self.raw
    }

    /// Mutable pointer lent to the engine for the duration of one call.
    ///
    /// The engine ABI takes run inputs as `ddwaf_object*`; with no free
    /// callback configured it does not write through it.
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut RawObject {
        &mut self.raw
    }

    /// Give up ownership. The caller becomes responsible for the tree, usually
    /// by handing it to [`from_raw`](Self::from_raw) later.
    #[must_use]
    pub fn into_raw(self) -> RawObject {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the tree has exactly one owner: the copy.
        unsafe { ptr::read(&this.raw) }
    }

    /// Take back ownership of a tree produced by [`into_raw`](Self::into_raw).
    ///
    /// # Safety
    ///
    /// `raw` must come from `into_raw` (on any `WireObject`) and must not be
    /// owned by anything else.
    #[must_use]
    pub unsafe fn from_raw(raw: RawObject) -> Self {
        Self { raw }
    }

    fn scalar(type_: ObjectType, value: RawValue) -> Self {
        Self {
            raw: RawObject {
                value,
                type_,
                ..RawObject::invalid()
            },
        }
    }
}

impl Drop for WireObject {
    fn drop(&mut self) {
        // SAFETY: `self.raw` is a tree built by this module and owned only by us.
        unsafe { free_tree(&mut self.raw) };
    }
}

impl fmt::Debug for WireObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WireObject").field(&self.as_ref()).finish()
    }
}

/// Copy `bytes` into a fresh NUL-terminated buffer. Empty input still allocates
/// the terminator so C readers always see a valid string.
fn alloc_c_bytes(bytes: &[u8]) -> Result<*const c_char, AllocError> {
    let mut buf: Vec<u8> = Vec::new();
    buf.try_reserve_exact(bytes.len() + 1)
        .map_err(|_| AllocError {
            requested: bytes.len() + 1,
        })?;
    buf.extend_from_slice(bytes);
    buf.push(0);
    Ok(Box::into_raw(buf.into_boxed_slice()).cast::<c_char>())
}

/// # Safety
///
/// `ptr` must be null or come from [`alloc_c_bytes`] with a payload of `len` bytes.
unsafe fn free_c_bytes(ptr: *const c_char, len: u64) {
    if ptr.is_null() {
        return;
    }
    let total = len as usize + 1;
    // SAFETY: reconstructs exactly the boxed slice leaked by `alloc_c_bytes`.
    drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(ptr.cast_mut().cast::<u8>(), total)) });
}

fn alloc_children(children: Vec<WireObject>) -> Result<(*mut RawObject, u64), AllocError> {
    if children.is_empty() {
        return Ok((ptr::null_mut(), 0));
    }
    let mut raws: Vec<RawObject> = Vec::new();
    raws.try_reserve_exact(children.len())
        .map_err(|_| AllocError {
            requested: children.len(),
        })?;
    raws.extend(children.into_iter().map(WireObject::into_raw));
    let len = raws.len() as u64;
    Ok((Box::into_raw(raws.into_boxed_slice()).cast::<RawObject>(), len))
}

/// # Safety
///
/// `raw` must be a tree built by this module and owned by the caller.
unsafe fn free_tree(raw: &mut RawObject) {
    unsafe {
        free_c_bytes(raw.parameter_name, raw.parameter_name_length);
        match raw.type_ {
            ObjectType::STRING => free_c_bytes(raw.value.string_value, raw.nb_entries),
            ObjectType::ARRAY | ObjectType::MAP => {
                let children = raw.value.array;
                if !children.is_null() {
                    let len = raw.nb_entries as usize;
                    let mut boxed: Box<[RawObject]> =
                        Box::from_raw(ptr::slice_from_raw_parts_mut(children, len));
                    for child in boxed.iter_mut() {
                        free_tree(child);
                    }
                }
            }
            _ => {}
        }
    }
    *raw = RawObject::invalid();
}

// ═══════════════════════════════════════════════════════════════════════════════
// ObjectRef
// ═══════════════════════════════════════════════════════════════════════════════

/// A read-only view over a well-formed object tree.
#[derive(Clone, Copy)]
pub struct ObjectRef<'a> {
    raw: &'a RawObject,
}

impl<'a> ObjectRef<'a> {
    /// Wrap a raw object.
    ///
    /// # Safety
    ///
    /// `raw` must be well-formed for `'a`: string pointers valid for
    /// `nb_entries` bytes, container pointers valid for `nb_entries` children
    /// (or null), key pointers valid for `parameter_name_length` bytes (or null),
    /// recursively.
    #[must_use]
    pub unsafe fn from_raw(raw: &'a RawObject) -> Self {
        Self { raw }
    }

    #[must_use]
    pub fn object_type(&self) -> ObjectType {
        self.raw.type_
    }

    /// Key bytes when this object is a map value.
    #[must_use]
    pub fn key(&self) -> Option<&'a [u8]> {
        // SAFETY: upheld by `from_raw`'s contract.
        unsafe { bytes_at(self.raw.parameter_name, self.raw.parameter_name_length) }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        // SAFETY: the tag says which union field is live.
        (self.raw.type_ == ObjectType::BOOL).then(|| unsafe { self.raw.value.boolean })
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        (self.raw.type_ == ObjectType::SIGNED).then(|| unsafe { self.raw.value.int_value })
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        (self.raw.type_ == ObjectType::UNSIGNED).then(|| unsafe { self.raw.value.uint_value })
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        (self.raw.type_ == ObjectType::FLOAT).then(|| unsafe { self.raw.value.f64 })
    }

    /// String payload. An empty string with a null pointer reads as `b""`.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        if self.raw.type_ != ObjectType::STRING {
            return None;
        }
        // SAFETY: tag is STRING, so `string_value` is live; length per contract.
        let bytes = unsafe { bytes_at(self.raw.value.string_value, self.raw.nb_entries) };
        Some(bytes.unwrap_or_default())
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&'a str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Children of an array or map; empty for anything else.
    #[must_use]
    pub fn entries(&self) -> &'a [RawObject] {
        if !self.raw.type_.is_container() {
            return &[];
        }
        // SAFETY: tag is a container, so `array` is live.
        let ptr = unsafe { self.raw.value.array };
        let Ok(len) = usize::try_from(self.raw.nb_entries) else {
            return &[];
        };
        if ptr.is_null() || len == 0 {
            return &[];
        }
        // SAFETY: per `from_raw`'s contract the buffer holds `len` children.
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }

    /// Number of children (containers) or bytes (strings).
    #[must_use]
    pub fn len(&self) -> usize {
        match self.raw.type_ {
            ObjectType::STRING => self.as_bytes().map_or(0, <[u8]>::len),
            _ => self.entries().len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over children in wire order.
    pub fn iter(&self) -> impl Iterator<Item = ObjectRef<'a>> + 'a {
        // SAFETY: children of a well-formed tree are well-formed.
        self.entries().iter().map(|raw| unsafe { ObjectRef::from_raw(raw) })
    }

    /// First map value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ObjectRef<'a>> {
        if self.raw.type_ != ObjectType::MAP {
            return None;
        }
        self.iter().find(|child| child.key() == Some(key.as_bytes()))
    }
}

impl fmt::Debug for ObjectRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::converter::decode(*self))
    }
}

/// # Safety
///
/// `ptr` must be null or valid for `len` bytes for `'a`.
unsafe fn bytes_at<'a>(ptr: *const c_char, len: u64) -> Option<&'a [u8]> {
    if ptr.is_null() {
        return None;
    }
    let len = usize::try_from(len).ok()?;
    // SAFETY: delegated to the caller.
    Some(unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) })
}
