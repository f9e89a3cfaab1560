//! Fixed-size, watermarked arena allocator.
//!
//! Two arenas are carved out of this crate's [`Arena`]: the native code cache
//! (executable pages) and the per-block intermediate representation buffer
//! (read/write pages). Both need the same contract: a single mmap'd region,
//! a monotonically bumped pointer, and a guard slack so a single allocation
//! request can never silently walk past the end of the mapping.
//!
//! Unlike a general-purpose bump allocator this one never grows: once the
//! watermark is crossed, [`Arena::grab`] fails and the caller is expected to
//! invalidate whatever it was building and reset.

use std::marker::PhantomData;
use std::ptr::NonNull;

#[cfg(target_family = "unix")]
use rustix::mm::{self as mman, MapFlags, MprotectFlags, ProtFlags};
#[cfg(target_family = "windows")]
use windows::Win32::System::{
    Diagnostics::Debug::FlushInstructionCache, Memory, Threading::GetCurrentProcess,
};

/// Errors a caller of [`Arena`] may observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, easyerr::Error)]
pub enum ArenaError {
    /// The requested size or guard makes no sense (e.g. guard larger than size).
    #[error("invalid arena configuration")]
    InvalidConfig,
    /// The host failed to map or protect memory, or the watermark was crossed.
    #[error("arena out of memory")]
    OutOfMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadExec,
    ReadWrite,
}

/// The kind of memory an [`Arena`] hands out: executable code or plain data.
pub trait AllocKind {
    const PROTECTION: Protection;
}

/// Marker for arenas backing the native code cache.
pub struct Exec;
impl AllocKind for Exec {
    const PROTECTION: Protection = Protection::ReadExec;
}

/// Marker for arenas backing the intermediate representation buffer.
pub struct ReadWrite;
impl AllocKind for ReadWrite {
    const PROTECTION: Protection = Protection::ReadWrite;
}

/// A single mmap'd mapping, protection changes applied in place.
struct Region {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the mapping is only ever touched through `Arena`, which enforces
// exclusive access by requiring `&mut self` for every mutating operation.
unsafe impl Send for Region {}

impl Region {
    fn new(len: usize) -> Result<Self, ArenaError> {
        #[cfg(target_family = "unix")]
        let ptr = unsafe {
            mman::mmap_anonymous(None, len, ProtFlags::empty(), MapFlags::PRIVATE)
        }
        .map_err(|_| ArenaError::OutOfMemory)?;

        #[cfg(target_family = "windows")]
        let ptr = unsafe {
            let result = Memory::VirtualAlloc(
                None,
                len,
                Memory::MEM_RESERVE | Memory::MEM_COMMIT,
                Memory::PAGE_NOACCESS,
            );
            if result.is_null() {
                return Err(ArenaError::OutOfMemory);
            }
            result
        };

        Ok(Self {
            ptr: ptr.cast(),
            len,
        })
    }

    /// # Safety
    /// `length` must be `<= self.len`.
    unsafe fn protect(&self, length: usize, protection: Protection) {
        #[cfg(target_family = "unix")]
        unsafe {
            let flags = match protection {
                Protection::ReadExec => MprotectFlags::READ | MprotectFlags::EXEC,
                Protection::ReadWrite => MprotectFlags::READ | MprotectFlags::WRITE,
            };
            mman::mprotect(self.ptr.cast(), length, flags).expect("mprotect failed");
        }

        #[cfg(target_family = "windows")]
        unsafe {
            let mut previous = Memory::PAGE_PROTECTION_FLAGS(0);
            let new_protect = match protection {
                Protection::ReadExec => Memory::PAGE_EXECUTE_READ,
                Protection::ReadWrite => Memory::PAGE_READWRITE,
            };
            Memory::VirtualProtect(self.ptr.cast(), length, new_protect, &raw mut previous)
                .expect("VirtualProtect failed");
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        #[cfg(target_family = "unix")]
        unsafe {
            let _ = mman::munmap(self.ptr.cast(), self.len);
        }

        #[cfg(target_family = "windows")]
        unsafe {
            let _ = Memory::VirtualFree(self.ptr.cast(), 0, Memory::MEM_RELEASE);
        }
    }
}

/// A leased byte range inside an [`Arena`].
///
/// # Safety considerations
/// The arena this allocation came from must not be reset while the
/// allocation is read through; the caller is responsible for respecting the
/// single-threaded, single-owner contract documented on [`Arena`].
pub struct Allocation<K> {
    ptr: NonNull<u8>,
    len: usize,
    _phantom: PhantomData<K>,
}

impl<K> Allocation<K> {
    /// Returns a pointer to the start of this allocation.
    ///
    /// # Safety
    /// Accesses must be synchronized with the owning arena, as noted above.
    #[inline(always)]
    pub unsafe fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// SAFETY: safe to send as long as accesses are synchronized with the owning
// arena, which is the caller's responsibility (see type docs).
unsafe impl<K> Send for Allocation<K> {}

/// A fixed-size, watermarked bump arena.
///
/// `ptr <= watermark <= end` is maintained at all times; [`Arena::grab`]
/// never returns a range that would push `ptr` past `watermark`.
pub struct Arena<K: AllocKind> {
    region: Region,
    ptr: usize,
    watermark: usize,
    _phantom: PhantomData<K>,
}

impl<K: AllocKind> Arena<K> {
    /// Maps `size` bytes of memory for this arena and reserves the last
    /// `guard` bytes as slack: [`Arena::grab`] fails before ever writing
    /// into that slack.
    pub fn new(size: usize, guard: usize) -> Result<Self, ArenaError> {
        if guard > size {
            return Err(ArenaError::InvalidConfig);
        }

        let region = Region::new(size)?;
        let watermark = size - guard;

        // Arenas start out fully protected for their target kind; `grab_with`
        // temporarily flips to read/write to populate the bytes.
        unsafe { region.protect(size, K::PROTECTION) };

        Ok(Self {
            region,
            ptr: 0,
            watermark,
            _phantom: PhantomData,
        })
    }

    /// Total size of the mapping, including the guard slack.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.region.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.region.len == 0
    }

    /// The byte offset past which [`Arena::grab`] refuses to allocate.
    #[inline(always)]
    pub fn watermark(&self) -> usize {
        self.watermark
    }

    /// Current bump offset.
    #[inline(always)]
    pub fn cursor(&self) -> usize {
        self.ptr
    }

    /// Returns the arena's bump pointer to its base. Previously returned
    /// [`Allocation`]s must not be dereferenced afterwards.
    pub fn reset(&mut self) {
        self.ptr = 0;
    }

    /// Reserves `length` bytes aligned to `alignment`, without initializing
    /// them. Fails with [`ArenaError::OutOfMemory`] if doing so would cross
    /// the watermark.
    pub fn grab(&mut self, alignment: usize, length: usize) -> Result<Allocation<K>, ArenaError> {
        let alignment = alignment.max(1).next_power_of_two();
        let start = self.ptr.next_multiple_of(alignment);
        let end = start.checked_add(length).ok_or(ArenaError::OutOfMemory)?;

        if end > self.watermark {
            return Err(ArenaError::OutOfMemory);
        }

        self.ptr = end;

        // SAFETY: `start + length <= watermark <= region.len`.
        let ptr = unsafe { self.region.ptr.add(start) };
        Ok(Allocation {
            ptr: NonNull::new(ptr).expect("mmap never returns a null base pointer"),
            len: length,
            _phantom: PhantomData,
        })
    }

    /// Reserves space for `data` and copies it in, temporarily relaxing the
    /// arena's protection to read/write if its target kind isn't already.
    pub fn grab_with(&mut self, alignment: usize, data: &[u8]) -> Result<Allocation<K>, ArenaError> {
        let alloc = self.grab(alignment, data.len())?;

        unsafe {
            if K::PROTECTION != Protection::ReadWrite {
                self.region.protect(self.ptr, Protection::ReadWrite);
            }

            std::ptr::copy_nonoverlapping(data.as_ptr(), alloc.ptr.as_ptr(), data.len());

            if K::PROTECTION != Protection::ReadWrite {
                self.region.protect(self.ptr, K::PROTECTION);
            }

            #[cfg(target_family = "windows")]
            {
                let process = GetCurrentProcess();
                FlushInstructionCache(process, Some(alloc.ptr.as_ptr().cast()), data.len())
                    .expect("FlushInstructionCache failed");
            }
        }

        Ok(alloc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grab_respects_watermark() {
        let mut arena = Arena::<ReadWrite>::new(4096, 64).unwrap();
        assert_eq!(arena.watermark(), 4032);

        let first = arena.grab(1, 4000).unwrap();
        assert_eq!(unsafe { first.as_ptr() }.as_ptr() as usize - 0, unsafe {
            first.as_ptr()
        }
        .as_ptr() as usize);

        // only 32 bytes left before the watermark; this must fail, not
        // silently write into the guard.
        assert_eq!(arena.grab(1, 64), Err(ArenaError::OutOfMemory));
    }

    #[test]
    fn reset_rewinds_cursor() {
        let mut arena = Arena::<ReadWrite>::new(4096, 0).unwrap();
        arena.grab(1, 100).unwrap();
        assert_eq!(arena.cursor(), 100);
        arena.reset();
        assert_eq!(arena.cursor(), 0);
    }

    #[test]
    fn invalid_guard_is_rejected() {
        assert_eq!(Arena::<ReadWrite>::new(100, 200).unwrap_err(), ArenaError::InvalidConfig);
    }

    #[test]
    fn grab_with_copies_data() {
        let mut arena = Arena::<ReadWrite>::new(4096, 0).unwrap();
        let data = [1u8, 2, 3, 4];
        let alloc = arena.grab_with(1, &data).unwrap();
        let read = unsafe { std::slice::from_raw_parts(alloc.as_ptr().as_ptr(), alloc.len()) };
        assert_eq!(read, &data);
    }
}
