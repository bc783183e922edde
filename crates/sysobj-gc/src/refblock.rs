//! Reference-counted raw blocks.
//!
//! A block starts life with a count of one. [`block_ref`] bumps the count,
//! [`block_unref`] drops it and releases the memory when it reaches zero.
//! [`free`] releases unconditionally and is what the ref-count strategy
//! table hands out as its `free` entry.

use std::alloc::{self, Layout};
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::defaults::{BLOCK_ALIGN, MAX_REF_COUNT, REF_BLOCK_MAGIC};

/// Header prepended to every ref-counted block
#[repr(C, align(16))]
pub struct RefBlockHeader {
    magic: u32,
    ref_count: AtomicI32,
    size: usize,
}

const HEADER_SIZE: usize = mem::size_of::<RefBlockHeader>();

fn layout_for(size: usize) -> Option<Layout> {
    Layout::from_size_align(HEADER_SIZE.checked_add(size)?, BLOCK_ALIGN).ok()
}

/// # Safety
/// `ptr` must be a payload pointer returned by [`malloc`] or [`realloc`].
unsafe fn header_ptr(ptr: NonNull<u8>) -> *mut RefBlockHeader {
    ptr.as_ptr().sub(HEADER_SIZE).cast::<RefBlockHeader>()
}

/// Check that a block is live and its count is within range.
///
/// # Safety
/// `ptr` must be a payload pointer returned by [`malloc`] or [`realloc`].
unsafe fn check<'a>(ptr: NonNull<u8>) -> Option<&'a RefBlockHeader> {
    let header = &*header_ptr(ptr);
    let count = header.ref_count.load(Ordering::Acquire);
    if header.magic != REF_BLOCK_MAGIC || count <= 0 || count >= MAX_REF_COUNT {
        tracing::warn!(
            target: "sysobj::gc",
            ptr = ?ptr.as_ptr(),
            count,
            "block ref check failed"
        );
        return None;
    }
    Some(header)
}

/// Allocate a zeroed block with a reference count of one.
pub fn malloc(size: usize) -> Option<NonNull<u8>> {
    let layout = layout_for(size)?;
    // SAFETY: the layout always includes the non-empty header.
    let base = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })?;
    unsafe {
        base.as_ptr().cast::<RefBlockHeader>().write(RefBlockHeader {
            magic: REF_BLOCK_MAGIC,
            ref_count: AtomicI32::new(1),
            size,
        });
        tracing::trace!(target: "sysobj::gc", size, "ref block allocated");
        Some(NonNull::new_unchecked(base.as_ptr().add(HEADER_SIZE)))
    }
}

/// Release a block regardless of its reference count.
///
/// # Safety
/// `ptr` must come from [`malloc`] or [`realloc`] and must not be used
/// afterwards.
pub unsafe fn free(ptr: NonNull<u8>) {
    let header = header_ptr(ptr);
    if (*header).magic != REF_BLOCK_MAGIC {
        tracing::warn!(target: "sysobj::gc", ptr = ?ptr.as_ptr(), "free of invalid ref block");
        return;
    }
    let size = (*header).size;
    (*header).magic = 0;
    alloc::dealloc(
        header.cast(),
        Layout::from_size_align_unchecked(HEADER_SIZE + size, BLOCK_ALIGN),
    );
    tracing::trace!(target: "sysobj::gc", size, "ref block freed");
}

/// Resize a block, keeping its reference count. On failure the original
/// block is left untouched and `None` is returned.
///
/// # Safety
/// `ptr` must come from [`malloc`] or [`realloc`]. On success the old
/// pointer must no longer be used.
pub unsafe fn realloc(ptr: NonNull<u8>, size: usize) -> Option<NonNull<u8>> {
    let header = header_ptr(ptr);
    if (*header).magic != REF_BLOCK_MAGIC {
        tracing::warn!(target: "sysobj::gc", ptr = ?ptr.as_ptr(), "realloc of invalid ref block");
        return None;
    }
    let old = layout_for((*header).size)?;
    let new = layout_for(size)?;
    let base = NonNull::new(alloc::realloc(header.cast(), old, new.size()))?;
    (*base.as_ptr().cast::<RefBlockHeader>()).size = size;
    Some(NonNull::new_unchecked(base.as_ptr().add(HEADER_SIZE)))
}

/// Take another reference. Returns `None` if the block is not live.
///
/// # Safety
/// `ptr` must come from [`malloc`] or [`realloc`].
pub unsafe fn block_ref(ptr: NonNull<u8>) -> Option<NonNull<u8>> {
    let header = check(ptr)?;
    header.ref_count.fetch_add(1, Ordering::AcqRel);
    Some(ptr)
}

/// Drop a reference, releasing the block when the count reaches zero.
/// Returns `true` if this call freed the block.
///
/// # Safety
/// `ptr` must come from [`malloc`] or [`realloc`].
pub unsafe fn block_unref(ptr: NonNull<u8>) -> bool {
    let Some(header) = check(ptr) else {
        return false;
    };
    if header.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
        free(ptr);
        return true;
    }
    false
}

/// Current reference count of a block.
///
/// # Safety
/// `ptr` must come from [`malloc`] or [`realloc`] and still be allocated.
pub unsafe fn ref_count(ptr: NonNull<u8>) -> i32 {
    (*header_ptr(ptr)).ref_count.load(Ordering::Acquire)
}

/// Whether the block is live with an in-range count.
///
/// # Safety
/// `ptr` must come from [`malloc`] or [`realloc`] and still be allocated.
pub unsafe fn is_valid(ptr: NonNull<u8>) -> bool {
    let header = &*header_ptr(ptr);
    let count = header.ref_count.load(Ordering::Acquire);
    header.magic == REF_BLOCK_MAGIC && count > 0 && count < MAX_REF_COUNT
}

/// Payload size recorded for a block.
///
/// # Safety
/// `ptr` must come from [`malloc`] or [`realloc`] and still be allocated.
pub unsafe fn size(ptr: NonNull<u8>) -> usize {
    (*header_ptr(ptr)).size
}
