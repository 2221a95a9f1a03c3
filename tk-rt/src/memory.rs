//! Executable and scratch memory blocks.
//!
//! A [`CodeBlock`] is mapped read+write+execute so the host can fill it byte
//! by byte and then run it. A [`DataBlock`] is ordinary heap memory from
//! `malloc`. Both free themselves on drop; `into_buffer` hands ownership to
//! the host, which must later give it back through `free_raw`.

use tracing::debug;

use crate::fatal::{Fatal, RtResult};
use crate::host::ExternalBuffer;
use crate::logging::category_block;

pub struct CodeBlock {
    ptr: *mut u8,
    len: usize,
}

impl CodeBlock {
    pub fn allocate(len: usize) -> RtResult<Self> {
        if len == 0 {
            return Err(Fatal::range(
                "allocMachineCodeBlock",
                "cannot map an empty machine code block",
            ));
        }
        let ptr = alloc_executable_region(len)?;
        debug!("{} mapped code block {ptr:p} len={len}", category_block());
        Ok(Self { ptr, len })
    }

    /// Copies `code` into a fresh block of exactly its length.
    pub fn from_code(code: &[u8]) -> RtResult<Self> {
        let block = Self::allocate(code.len())?;
        block.write(0, code)?;
        Ok(block)
    }

    /// # Safety
    ///
    /// `ptr` and `len` must come from a block released with
    /// [`CodeBlock::into_buffer`] that has not been freed since.
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn write(&self, offset: usize, bytes: &[u8]) -> RtResult<()> {
        check_span("writeToMachineCodeBlock", offset, bytes.len(), self.len)?;
        write_machine_code(unsafe { self.ptr.add(offset) }, bytes);
        Ok(())
    }

    pub fn address_of(&self, index: usize) -> RtResult<usize> {
        address_of("getBlockAddr", self.ptr, self.len, index)
    }

    pub fn into_buffer(self) -> ExternalBuffer {
        let this = std::mem::ManuallyDrop::new(self);
        unsafe { ExternalBuffer::from_raw_parts(this.ptr, this.len) }
    }

    pub fn free(self) -> RtResult<()> {
        let this = std::mem::ManuallyDrop::new(self);
        unsafe { Self::free_raw(this.ptr, this.len) }
    }

    /// Unmaps a region previously handed out by [`CodeBlock::into_buffer`].
    ///
    /// # Safety
    ///
    /// `len` must equal the length the block was allocated with, and the
    /// block must not be used or freed again.
    pub unsafe fn free_raw(ptr: *mut u8, len: usize) -> RtResult<()> {
        debug!("{} unmapping code block {ptr:p} len={len}", category_block());
        free_executable_region(ptr, len)
    }
}

impl Drop for CodeBlock {
    fn drop(&mut self) {
        let _ = free_executable_region(self.ptr, self.len);
    }
}

pub struct DataBlock {
    ptr: *mut u8,
    len: usize,
}

impl DataBlock {
    pub fn allocate(len: usize) -> RtResult<Self> {
        if len == 0 {
            return Err(Fatal::range(
                "allocMemoryBlock",
                "cannot allocate an empty memory block",
            ));
        }
        let ptr = unsafe { libc::malloc(len) } as *mut u8;
        if ptr.is_null() {
            return Err(Fatal::os(
                "allocMemoryBlock",
                format!("malloc of {len} bytes failed"),
            ));
        }
        debug!("{} allocated data block {ptr:p} len={len}", category_block());
        Ok(Self { ptr, len })
    }

    /// # Safety
    ///
    /// `ptr` and `len` must come from a block released with
    /// [`DataBlock::into_buffer`] that has not been freed since.
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn write(&self, offset: usize, bytes: &[u8]) -> RtResult<()> {
        check_span("memoryBlock", offset, bytes.len(), self.len)?;
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), bytes.len()) };
        Ok(())
    }

    pub fn address_of(&self, index: usize) -> RtResult<usize> {
        address_of("getBlockAddr", self.ptr, self.len, index)
    }

    pub fn into_buffer(self) -> ExternalBuffer {
        let this = std::mem::ManuallyDrop::new(self);
        unsafe { ExternalBuffer::from_raw_parts(this.ptr, this.len) }
    }

    pub fn free(self) {
        let this = std::mem::ManuallyDrop::new(self);
        unsafe { Self::free_raw(this.ptr) }
    }

    /// # Safety
    ///
    /// `ptr` must come from [`DataBlock::allocate`] and must not be used or
    /// freed again. The allocator tracks the size.
    pub unsafe fn free_raw(ptr: *mut u8) {
        debug!("{} freeing data block {ptr:p}", category_block());
        unsafe { libc::free(ptr as *mut libc::c_void) }
    }
}

impl Drop for DataBlock {
    fn drop(&mut self) {
        unsafe { libc::free(self.ptr as *mut libc::c_void) }
    }
}

/// Address of byte `index` inside the region `[base, base + len)`.
pub fn address_of(op: &'static str, base: *mut u8, len: usize, index: usize) -> RtResult<usize> {
    if index >= len {
        return Err(Fatal::range(
            op,
            format!("index {index} is past end of block (len {len})"),
        ));
    }
    Ok(base as usize + index)
}

fn check_span(op: &'static str, offset: usize, count: usize, len: usize) -> RtResult<()> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(Fatal::range(
            op,
            format!("write of {count} bytes at {offset} overflows block of {len} bytes"),
        )),
    }
}

pub(crate) fn write_machine_code(ptr: *mut u8, code: &[u8]) {
    #[cfg(target_os = "macos")]
    set_jit_write_protect(false);
    unsafe { std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len()) };
    #[cfg(target_os = "macos")]
    set_jit_write_protect(true);
}

/// Makes freshly written code visible to instruction fetch.
pub(crate) fn flush_instruction_cache(ptr: *mut u8, len: usize) -> RtResult<()> {
    #[cfg(target_os = "windows")]
    {
        use windows_sys::Win32::{
            Foundation::HANDLE, System::Diagnostics::Debug::FlushInstructionCache,
            System::Threading::GetCurrentProcess,
        };

        let process: HANDLE = unsafe { GetCurrentProcess() };
        let ok = unsafe { FlushInstructionCache(process, ptr as *const _, len) };
        if ok == 0 {
            return Err(Fatal::os(
                "execMachineCodeBlock",
                format!(
                    "FlushInstructionCache failed: {}",
                    std::io::Error::last_os_error()
                ),
            ));
        }
    }

    #[cfg(not(target_os = "windows"))]
    let _ = (ptr, len);

    Ok(())
}

/// Switches JIT pages to executable for the current thread.
pub(crate) fn enter_execution() {
    #[cfg(target_os = "macos")]
    set_jit_write_protect(true);
}

/// Restores host writes after a block returns.
pub(crate) fn finish_execution() {
    #[cfg(target_os = "macos")]
    set_jit_write_protect(false);
}

#[cfg(target_os = "macos")]
fn set_jit_write_protect(enabled: bool) {
    unsafe {
        if pthread_jit_write_protect_supported_np() != 0 {
            pthread_jit_write_protect_np(enabled as libc::c_int);
        }
    }
}

#[cfg(target_os = "macos")]
unsafe extern "C" {
    fn pthread_jit_write_protect_supported_np() -> libc::c_int;
    fn pthread_jit_write_protect_np(enabled: libc::c_int);
}

#[cfg(target_os = "windows")]
fn alloc_executable_region(len: usize) -> RtResult<*mut u8> {
    use windows_sys::Win32::System::Memory::{
        MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READWRITE, VirtualAlloc,
    };

    let ptr = unsafe {
        VirtualAlloc(
            std::ptr::null_mut(),
            len,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_EXECUTE_READWRITE,
        ) as *mut u8
    };
    if ptr.is_null() {
        return Err(Fatal::os(
            "allocMachineCodeBlock",
            format!("VirtualAlloc failed: {}", std::io::Error::last_os_error()),
        ));
    }
    Ok(ptr)
}

#[cfg(target_os = "windows")]
fn free_executable_region(ptr: *mut u8, _len: usize) -> RtResult<()> {
    use windows_sys::Win32::System::Memory::{MEM_RELEASE, VirtualFree};

    if ptr.is_null() {
        return Ok(());
    }
    let ok = unsafe { VirtualFree(ptr as *mut _, 0, MEM_RELEASE) };
    if ok == 0 {
        return Err(Fatal::os(
            "freeMachineCodeBlock",
            format!("VirtualFree failed: {}", std::io::Error::last_os_error()),
        ));
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "macos")))]
fn alloc_executable_region(len: usize) -> RtResult<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(Fatal::os(
            "allocMachineCodeBlock",
            format!("mmap failed: {}", std::io::Error::last_os_error()),
        ));
    }
    Ok(ptr as *mut u8)
}

#[cfg(target_os = "macos")]
fn alloc_executable_region(len: usize) -> RtResult<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_JIT,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(Fatal::os(
            "allocMachineCodeBlock",
            format!("mmap(MAP_JIT) failed: {}", std::io::Error::last_os_error()),
        ));
    }
    Ok(ptr as *mut u8)
}

#[cfg(unix)]
fn free_executable_region(ptr: *mut u8, len: usize) -> RtResult<()> {
    if ptr.is_null() {
        return Ok(());
    }
    let rc = unsafe { libc::munmap(ptr as *mut _, len) };
    if rc != 0 {
        return Err(Fatal::os(
            "freeMachineCodeBlock",
            format!("munmap failed: {}", std::io::Error::last_os_error()),
        ));
    }
    Ok(())
}

#[cfg(not(any(unix, target_os = "windows")))]
fn alloc_executable_region(_len: usize) -> RtResult<*mut u8> {
    Err(Fatal::unsupported(
        "allocMachineCodeBlock",
        "executable memory allocation not implemented for this platform",
    ))
}

#[cfg(not(any(unix, target_os = "windows")))]
fn free_executable_region(_ptr: *mut u8, _len: usize) -> RtResult<()> {
    Ok(())
}
