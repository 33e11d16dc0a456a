use std::alloc::{self, Layout};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

/// Memory placement requirement for a transfer buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// Ordinary heap memory
    None,
    /// Memory the storage transport can DMA into, aligned to the given boundary
    DmaCapable(usize),
}

/// Buffer reservation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// Zero-sized buffers are never valid for a transfer
    InvalidSize,
    /// Memory could not be reserved
    OutOfMemory { size: usize },
    /// Memory may exist, but not at an address satisfying the DMA constraint
    Alignment { size: usize, alignment: usize },
}

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationError::InvalidSize => write!(f, "buffer size must be greater than 0"),
            AllocationError::OutOfMemory { size } => {
                write!(f, "failed to allocate {} byte buffer", size)
            }
            AllocationError::Alignment { size, alignment } => write!(
                f,
                "cannot place {} byte buffer on a {} byte DMA boundary",
                size, alignment
            ),
        }
    }
}

impl std::error::Error for AllocationError {}

enum Storage {
    Heap(Vec<u8>),
    Aligned { ptr: NonNull<u8>, layout: Layout },
}

/// Fixed-size transfer buffer, released when dropped
pub struct TransferBuffer {
    storage: Storage,
    alignment: Alignment,
}

impl TransferBuffer {
    /// Reserve `size` zeroed bytes with the requested placement
    pub fn allocate(size: usize, alignment: Alignment) -> Result<Self, AllocationError> {
        if size == 0 {
            return Err(AllocationError::InvalidSize);
        }

        let storage = match alignment {
            Alignment::None => {
                let mut buffer = Vec::new();
                buffer
                    .try_reserve_exact(size)
                    .map_err(|_| AllocationError::OutOfMemory { size })?;
                buffer.resize(size, 0);
                Storage::Heap(buffer)
            }
            Alignment::DmaCapable(align) => {
                let layout = Layout::from_size_align(size, align)
                    .map_err(|_| AllocationError::Alignment { size, alignment: align })?;
                // SAFETY: layout has a non-zero size, checked above.
                let raw = unsafe { alloc::alloc_zeroed(layout) };
                let ptr = NonNull::new(raw).ok_or(AllocationError::OutOfMemory { size })?;
                if (ptr.as_ptr() as usize) % align != 0 {
                    // SAFETY: ptr was returned by alloc_zeroed with this layout.
                    unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
                    return Err(AllocationError::Alignment { size, alignment: align });
                }
                Storage::Aligned { ptr, layout }
            }
        };

        Ok(Self { storage, alignment })
    }

    /// Set every byte to its index modulo 256
    pub fn fill_pattern(&mut self) {
        fill_pattern(self);
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// True if the start address satisfies the requested alignment
    pub fn is_aligned(&self) -> bool {
        match self.alignment {
            Alignment::None => true,
            Alignment::DmaCapable(align) => (self.as_ptr() as usize) % align == 0,
        }
    }
}

impl Deref for TransferBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.storage {
            Storage::Heap(buffer) => buffer,
            // SAFETY: ptr owns layout.size() initialised bytes for the life of self.
            Storage::Aligned { ptr, layout } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), layout.size())
            },
        }
    }
}

impl DerefMut for TransferBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Storage::Heap(buffer) => buffer,
            // SAFETY: as above, and &mut self guarantees exclusive access.
            Storage::Aligned { ptr, layout } => unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr(), layout.size())
            },
        }
    }
}

impl Drop for TransferBuffer {
    fn drop(&mut self) {
        if let Storage::Aligned { ptr, layout } = &self.storage {
            // SAFETY: allocated in `allocate` with exactly this layout.
            unsafe { alloc::dealloc(ptr.as_ptr(), *layout) };
        }
    }
}

impl fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBuffer")
            .field("len", &self.len())
            .field("alignment", &self.alignment)
            .finish()
    }
}

/// Deterministic write-test pattern: `byte[i] = i mod 256`
pub fn fill_pattern(buffer: &mut [u8]) {
    for (i, byte) in buffer.iter_mut().enumerate() {
        *byte = (i % 256) as u8;
    }
}
