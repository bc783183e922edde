//! Mark-sweep block header and the intrusive block list.

use std::alloc::{self, Layout};
use std::mem;
use std::ptr::{self, NonNull};

use crate::defaults::{BLOCK_ALIGN, MS_BLOCK_MAGIC};

/// Whether the collector may free a block on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackMode {
    /// Never swept, must be freed explicitly
    #[default]
    Manual,
    /// Swept when unreachable from the roots
    Auto,
}

/// Liveness of a block, meaningful only between collection passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockStatus {
    #[default]
    Malloced,
    Marked,
}

/// Hook run on a block's memory just before the sweep releases it.
///
/// `func` receives the payload address advanced by `offset` bytes.
#[derive(Debug, Clone, Copy)]
pub struct BlockFinalizer {
    pub func: unsafe fn(NonNull<u8>),
    pub offset: usize,
}

#[repr(C, align(16))]
pub(crate) struct MsBlock {
    pub(crate) prev: *mut MsBlock,
    pub(crate) next: *mut MsBlock,
    pub(crate) owner: u64,
    pub(crate) size: usize,
    pub(crate) finalizer: Option<BlockFinalizer>,
    pub(crate) magic: u32,
    pub(crate) track: TrackMode,
    pub(crate) status: BlockStatus,
    /// Set while a sweep owns the block; explicit frees are deferred to it.
    pub(crate) dying: bool,
}

pub(crate) const HEADER_SIZE: usize = mem::size_of::<MsBlock>();

impl MsBlock {
    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(HEADER_SIZE.checked_add(size)?, BLOCK_ALIGN).ok()
    }

    /// Allocate a zeroed, unlinked, manually tracked block.
    pub(crate) fn allocate(size: usize, owner: u64) -> Option<NonNull<MsBlock>> {
        let layout = Self::layout(size)?;
        // SAFETY: the layout always includes the non-empty header.
        let block = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })?.cast::<MsBlock>();
        unsafe {
            block.as_ptr().write(MsBlock {
                prev: ptr::null_mut(),
                next: ptr::null_mut(),
                owner,
                size,
                finalizer: None,
                magic: MS_BLOCK_MAGIC,
                track: TrackMode::Manual,
                status: BlockStatus::Malloced,
                dying: false,
            });
        }
        Some(block)
    }

    /// Resize an unlinked block in place or by moving it.
    ///
    /// # Safety
    /// `block` must be allocated by [`MsBlock::allocate`] and not linked
    /// into any list.
    pub(crate) unsafe fn resize(block: NonNull<MsBlock>, size: usize) -> Option<NonNull<MsBlock>> {
        let old = Self::layout((*block.as_ptr()).size)?;
        let new = Self::layout(size)?;
        let moved = NonNull::new(alloc::realloc(block.as_ptr().cast(), old, new.size()))?
            .cast::<MsBlock>();
        (*moved.as_ptr()).size = size;
        Some(moved)
    }

    /// Return a block's memory to the system allocator.
    ///
    /// # Safety
    /// `block` must be unlinked and must not be used afterwards.
    pub(crate) unsafe fn release(block: NonNull<MsBlock>) {
        let size = (*block.as_ptr()).size;
        (*block.as_ptr()).magic = 0;
        alloc::dealloc(
            block.as_ptr().cast(),
            Layout::from_size_align_unchecked(HEADER_SIZE + size, BLOCK_ALIGN),
        );
    }

    pub(crate) fn payload(block: NonNull<MsBlock>) -> NonNull<u8> {
        // SAFETY: the payload directly follows the header inside the same allocation.
        unsafe { NonNull::new_unchecked(block.as_ptr().cast::<u8>().add(HEADER_SIZE)) }
    }

    /// # Safety
    /// `ptr` must point at least `HEADER_SIZE` bytes into readable memory.
    pub(crate) unsafe fn from_payload(ptr: NonNull<u8>) -> NonNull<MsBlock> {
        NonNull::new_unchecked(ptr.as_ptr().sub(HEADER_SIZE).cast::<MsBlock>())
    }
}

/// Doubly linked list of every block owned by one collector.
///
/// New blocks enter at the head; marking moves blocks to the head.
pub(crate) struct BlockList {
    head: *mut MsBlock,
    len: usize,
    bytes: usize,
}

// SAFETY: the list is only reached through its collector's mutex, and the
// blocks it links are plain heap memory.
unsafe impl Send for BlockList {}

impl BlockList {
    pub(crate) const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            len: 0,
            bytes: 0,
        }
    }

    pub(crate) fn head(&self) -> Option<NonNull<MsBlock>> {
        NonNull::new(self.head)
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    unsafe fn link_front(&mut self, block: NonNull<MsBlock>) {
        let raw = block.as_ptr();
        (*raw).prev = ptr::null_mut();
        (*raw).next = self.head;
        if let Some(head) = NonNull::new(self.head) {
            (*head.as_ptr()).prev = raw;
        }
        self.head = raw;
    }

    unsafe fn unlink_raw(&mut self, block: NonNull<MsBlock>) {
        let raw = block.as_ptr();
        let (prev, next) = ((*raw).prev, (*raw).next);
        match NonNull::new(prev) {
            Some(prev) => (*prev.as_ptr()).next = next,
            None => self.head = next,
        }
        if let Some(next) = NonNull::new(next) {
            (*next.as_ptr()).prev = prev;
        }
        (*raw).prev = ptr::null_mut();
        (*raw).next = ptr::null_mut();
    }

    /// # Safety
    /// `block` must be a live block not linked into any list.
    pub(crate) unsafe fn insert(&mut self, block: NonNull<MsBlock>) {
        self.link_front(block);
        self.len += 1;
        self.bytes += (*block.as_ptr()).size;
    }

    /// # Safety
    /// `block` must be linked into this list.
    pub(crate) unsafe fn remove(&mut self, block: NonNull<MsBlock>) {
        self.unlink_raw(block);
        self.len -= 1;
        self.bytes -= (*block.as_ptr()).size;
    }

    /// # Safety
    /// `block` must be linked into this list.
    pub(crate) unsafe fn move_to_front(&mut self, block: NonNull<MsBlock>) {
        if self.head != block.as_ptr() {
            self.unlink_raw(block);
            self.link_front(block);
        }
    }

    pub(crate) fn iter(&self) -> BlockIter<'_> {
        BlockIter {
            next: self.head,
            _list: self,
        }
    }
}

pub(crate) struct BlockIter<'a> {
    next: *mut MsBlock,
    _list: &'a BlockList,
}

impl Iterator for BlockIter<'_> {
    type Item = NonNull<MsBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = NonNull::new(self.next)?;
        // SAFETY: blocks stay linked while the list is borrowed.
        self.next = unsafe { (*block.as_ptr()).next };
        Some(block)
    }
}
