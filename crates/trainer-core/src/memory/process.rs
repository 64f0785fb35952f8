//! Windows process access.
//!
//! `ProcessHandle` implements [`ProcessMemory`] on top of the Win32 memory and
//! thread APIs; `SystemProvider` discovers and opens target processes.

#[cfg(target_os = "windows")]
pub use windows_impl::ProcessHandle;

use crate::error::{Error, Result};
use crate::window;

use super::{OpenedProcess, ProcessProvider, WindowHandle};

/// OS-backed process and window discovery.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider;

impl ProcessProvider for SystemProvider {
    fn find_process_id(&self, name: &str) -> Option<u32> {
        window::find_process_id(name)
    }

    #[cfg(target_os = "windows")]
    fn open(&self, pid: u32) -> Result<OpenedProcess> {
        let handle = ProcessHandle::open(pid)?;
        let base_address = handle.base_address;
        let module_size = handle.module_size;
        Ok(OpenedProcess {
            process: std::sync::Arc::new(handle),
            base_address,
            module_size,
        })
    }

    #[cfg(not(target_os = "windows"))]
    fn open(&self, pid: u32) -> Result<OpenedProcess> {
        Err(Error::ProcessOpenFailed(format!(
            "pid {}: process access is only supported on Windows",
            pid
        )))
    }

    fn find_window(&self, pid: u32) -> Option<WindowHandle> {
        window::find_window_by_pid(pid).ok()
    }

    fn bring_to_front(&self, window: WindowHandle) -> Result<()> {
        window::ensure_foreground(window)
            .map_err(|e| Error::ProcessOpenFailed(format!("bring to front: {}", e)))
    }

    fn is_foreground(&self, window: WindowHandle) -> bool {
        window::is_foreground(window)
    }
}

#[cfg(target_os = "windows")]
mod windows_impl {
    use std::ffi::c_void;
    use std::time::Duration;

    use tracing::debug;
    use windows::Win32::Foundation::{
        CloseHandle, HANDLE, STILL_ACTIVE, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT,
    };
    use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, MODULEENTRY32W, Module32FirstW, TH32CS_SNAPMODULE,
        TH32CS_SNAPMODULE32,
    };
    use windows::Win32::System::Memory::{
        MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE, VirtualAllocEx,
        VirtualFreeEx,
    };
    use windows::Win32::System::Threading::{
        CreateRemoteThread, GetExitCodeProcess, GetExitCodeThread, OpenProcess,
        PROCESS_CREATE_THREAD, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION,
        PROCESS_VM_READ, PROCESS_VM_WRITE, WaitForSingleObject,
    };

    use crate::error::{Error, Result};
    use crate::memory::{ProcessMemory, ThreadOutcome, ThreadWait, classify_thread_wait};

    /// Open handle to a target process.
    pub struct ProcessHandle {
        handle: HANDLE,
        pub pid: u32,
        pub base_address: u64,
        pub module_size: u64,
    }

    // SAFETY: a process HANDLE is a kernel object reference; the Win32 calls made
    // through it are safe to issue from any thread.
    unsafe impl Send for ProcessHandle {}
    unsafe impl Sync for ProcessHandle {}

    impl ProcessHandle {
        pub fn open(pid: u32) -> Result<Self> {
            let access = PROCESS_VM_READ
                | PROCESS_VM_WRITE
                | PROCESS_VM_OPERATION
                | PROCESS_QUERY_INFORMATION
                | PROCESS_CREATE_THREAD;

            // SAFETY: OpenProcess has no memory-safety preconditions.
            let handle = unsafe { OpenProcess(access, false, pid) }
                .map_err(|e| Error::ProcessOpenFailed(format!("pid {}: {}", pid, e)))?;

            let (base_address, module_size) = match main_module(pid) {
                Ok(module) => module,
                Err(e) => {
                    // SAFETY: handle was returned by OpenProcess above.
                    let _ = unsafe { CloseHandle(handle) };
                    return Err(e);
                }
            };

            debug!(
                "Opened pid {} (base {:#x}, size {:#x})",
                pid, base_address, module_size
            );

            Ok(Self {
                handle,
                pid,
                base_address,
                module_size,
            })
        }

        /// Find a process by executable name and open it.
        pub fn find_and_open(name: &str) -> Result<Self> {
            let pid = crate::window::find_process_id(name)
                .ok_or_else(|| Error::ProcessNotFound(name.to_string()))?;
            Self::open(pid)
        }
    }

    /// Base address and image size of the first module (the executable).
    fn main_module(pid: u32) -> Result<(u64, u64)> {
        // SAFETY: snapshot handle is closed below on every path.
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid)
                .map_err(|e| Error::ProcessOpenFailed(format!("module snapshot: {}", e)))?;

            let mut entry = MODULEENTRY32W {
                dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
                ..Default::default()
            };
            let result = Module32FirstW(snapshot, &mut entry);
            let _ = CloseHandle(snapshot);

            result.map_err(|e| Error::ProcessOpenFailed(format!("main module: {}", e)))?;
            Ok((entry.modBaseAddr as u64, entry.modBaseSize as u64))
        }
    }

    impl ProcessMemory for ProcessHandle {
        fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
            let mut buffer = vec![0u8; size];
            let mut read = 0usize;
            // SAFETY: buffer is valid for `size` bytes; the remote address is
            // validated by the kernel.
            unsafe {
                ReadProcessMemory(
                    self.handle,
                    address as *const c_void,
                    buffer.as_mut_ptr().cast(),
                    size,
                    Some(&mut read),
                )
            }
            .map_err(|e| Error::MemoryReadFailed {
                address,
                message: e.to_string(),
            })?;
            buffer.truncate(read);
            Ok(buffer)
        }

        fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()> {
            let mut written = 0usize;
            // SAFETY: data is valid for `data.len()` bytes.
            unsafe {
                WriteProcessMemory(
                    self.handle,
                    address as *const c_void,
                    data.as_ptr().cast(),
                    data.len(),
                    Some(&mut written),
                )
            }
            .map_err(|e| Error::MemoryWriteFailed {
                address,
                message: e.to_string(),
            })?;

            if written != data.len() {
                return Err(Error::MemoryWriteFailed {
                    address,
                    message: format!("short write ({} of {} bytes)", written, data.len()),
                });
            }
            Ok(())
        }

        fn allocate(&self, size: usize) -> Result<u64> {
            // SAFETY: VirtualAllocEx only touches the target's address space.
            let address = unsafe {
                VirtualAllocEx(
                    self.handle,
                    None,
                    size,
                    MEM_COMMIT | MEM_RESERVE,
                    PAGE_EXECUTE_READWRITE,
                )
            };
            if address.is_null() {
                return Err(Error::AllocationFailed {
                    size,
                    message: windows::core::Error::from_win32().to_string(),
                });
            }
            Ok(address as u64)
        }

        fn free(&self, address: u64) -> Result<()> {
            // SAFETY: MEM_RELEASE with size 0 frees the whole reservation.
            unsafe { VirtualFreeEx(self.handle, address as *mut c_void, 0, MEM_RELEASE) }.map_err(
                |e| Error::MemoryWriteFailed {
                    address,
                    message: format!("VirtualFreeEx: {}", e),
                },
            )
        }

        fn execute(&self, entry: u64, timeout: Duration) -> Result<ThreadOutcome> {
            // SAFETY: entry points at code written into the target by the caller;
            // the thread runs in the target, never in this process.
            let thread = unsafe {
                let start = std::mem::transmute::<
                    usize,
                    unsafe extern "system" fn(*mut c_void) -> u32,
                >(entry as usize);
                CreateRemoteThread(self.handle, None, 0, Some(start), None, 0, None)
            }
            .map_err(|e| Error::ThreadSpawnFailed {
                address: entry,
                message: e.to_string(),
            })?;

            let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
            // SAFETY: thread is a valid handle until closed below.
            let wait = unsafe { WaitForSingleObject(thread, millis) };

            let wait = if wait == WAIT_OBJECT_0 {
                ThreadWait::Signaled
            } else if wait == WAIT_TIMEOUT {
                ThreadWait::TimedOut
            } else if wait == WAIT_FAILED {
                ThreadWait::Failed(windows::core::Error::from_win32().to_string())
            } else {
                ThreadWait::Failed(format!("wait returned {:#x}", wait.0))
            };

            let outcome = classify_thread_wait(entry, wait, self.is_alive(), || {
                let mut exit_code = 0u32;
                // SAFETY: thread has finished; exit_code is a valid out-pointer.
                unsafe { GetExitCodeThread(thread, &mut exit_code) }
                    .map(|()| exit_code)
                    .map_err(|e| Error::WaitFailed {
                        address: entry,
                        message: format!("GetExitCodeThread: {}", e),
                    })
            });

            // SAFETY: closing our reference does not stop the remote thread.
            let _ = unsafe { CloseHandle(thread) };
            outcome
        }

        fn is_alive(&self) -> bool {
            let mut code = 0u32;
            // SAFETY: code is a valid out-pointer.
            match unsafe { GetExitCodeProcess(self.handle, &mut code) } {
                Ok(()) => code == STILL_ACTIVE.0 as u32,
                Err(_) => false,
            }
        }
    }

    impl Drop for ProcessHandle {
        fn drop(&mut self) {
            if !self.handle.is_invalid() {
                // SAFETY: handle came from OpenProcess and is closed exactly once.
                let _ = unsafe { CloseHandle(self.handle) };
            }
        }
    }
}
