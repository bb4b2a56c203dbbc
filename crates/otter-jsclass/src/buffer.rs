//! Pointer-aligned byte buffers handed to the engine

use std::ffi::c_void;
use std::fmt;
use std::mem::size_of;

/// Width of a pointer-sized slot
pub const WORD: usize = size_of::<usize>();

/// A zero-initialized, pointer-aligned byte buffer.
///
/// Backed by `usize` words so that every pointer slot the engine reads is
/// naturally aligned. The heap allocation never moves, so raw pointers
/// into it stay valid for as long as the buffer lives.
#[derive(Clone, PartialEq, Eq)]
pub struct RawBuffer {
    words: Box<[usize]>,
    len: usize,
}

impl RawBuffer {
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0usize; len.div_ceil(WORD)].into_boxed_slice(),
            len,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buffer = Self::zeroed(bytes.len());
        buffer.bytes_mut().copy_from_slice(bytes);
        buffer
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<usize, u8>(&self.words)[..self.len]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<usize, u8>(&mut self.words)[..self.len]
    }

    pub fn put_u32(&mut self, offset: usize, value: u32) {
        self.bytes_mut()[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
    }

    pub fn get_u32(&self, offset: usize) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes()[offset..offset + 4]);
        u32::from_ne_bytes(raw)
    }

    pub fn put_word(&mut self, offset: usize, value: usize) {
        self.bytes_mut()[offset..offset + WORD].copy_from_slice(&value.to_ne_bytes());
    }

    pub fn get_word(&self, offset: usize) -> usize {
        read_word(self.bytes(), offset)
    }

    /// Start of the buffer, as the engine sees it
    pub fn as_ptr(&self) -> *const c_void {
        self.words.as_ptr().cast()
    }
}

impl fmt::Debug for RawBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBuffer")
            .field("len", &self.len)
            .field("ptr", &self.as_ptr())
            .finish()
    }
}

/// Read a native-endian word from an arbitrary byte slice
pub(crate) fn read_word(bytes: &[u8], offset: usize) -> usize {
    let mut raw = [0u8; WORD];
    raw.copy_from_slice(&bytes[offset..offset + WORD]);
    usize::from_ne_bytes(raw)
}
