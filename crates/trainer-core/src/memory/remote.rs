//! Typed access to the target's address space over offset chains.

use std::sync::{Arc, OnceLock};

use bytemuck::Pod;
use tracing::{debug, trace};

use crate::error::{Error, Result};

use super::{AddressCache, OffsetChain, ProcessMemory, WindowHandle};

/// Reads never cross a page boundary, so a failed read only loses its own page.
const PAGE_SIZE: usize = 0x1000;
/// Longest string returned by [`RemoteMemory::read_string`].
const STRING_MAX_READ: usize = 0x1000;

/// One incarnation of an attached target: the handle and every address derived
/// from it. Replaced wholesale when the target restarts.
pub struct Attachment {
    pub process: Arc<dyn ProcessMemory>,
    pub pid: u32,
    pub base_address: u64,
    pub end_of_module: u64,
    pub(crate) window: OnceLock<WindowHandle>,
}

impl Attachment {
    pub fn new(
        process: Arc<dyn ProcessMemory>,
        pid: u32,
        base_address: u64,
        module_size: u64,
    ) -> Self {
        Self {
            process,
            pid,
            base_address,
            end_of_module: base_address.saturating_add(module_size),
            window: OnceLock::new(),
        }
    }

    pub fn window(&self) -> Option<WindowHandle> {
        self.window.get().copied()
    }

    pub fn module_size(&self) -> u64 {
        self.end_of_module - self.base_address
    }
}

/// A consistent view of the session (handle + base address) paired with the
/// address cache.
///
/// Built cheaply per operation. With no attachment every read yields zeros and
/// every write is dropped, since callers poll continuously and gaps heal by
/// themselves.
#[derive(Clone)]
pub struct RemoteMemory<'a> {
    attachment: Option<Arc<Attachment>>,
    cache: &'a AddressCache,
}

impl<'a> RemoteMemory<'a> {
    pub fn new(attachment: Option<Arc<Attachment>>, cache: &'a AddressCache) -> Self {
        Self { attachment, cache }
    }

    pub fn attachment(&self) -> Option<&Arc<Attachment>> {
        self.attachment.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    pub fn base_address(&self) -> u64 {
        self.attachment.as_ref().map_or(0, |a| a.base_address)
    }

    pub fn end_of_module(&self) -> u64 {
        self.attachment.as_ref().map_or(0, |a| a.end_of_module)
    }

    fn process(&self) -> Result<&Arc<dyn ProcessMemory>> {
        self.attachment
            .as_ref()
            .map(|a| &a.process)
            .ok_or(Error::NotAttached)
    }

    pub fn try_read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        self.process()?.read_bytes(address, size)
    }

    /// Raw read; zero-filled when there is no session or the read fails.
    pub fn read_bytes(&self, address: u64, size: usize) -> Vec<u8> {
        self.try_read_bytes(address, size).unwrap_or_else(|e| {
            trace!("read_bytes({:#x}, {}) failed: {}", address, size, e);
            vec![0; size]
        })
    }

    /// Raw write; silently dropped when there is no session.
    pub fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()> {
        match self.process() {
            Ok(process) => process.write_bytes(address, data),
            Err(_) => Ok(()),
        }
    }

    pub fn allocate(&self, size: usize) -> Result<u64> {
        self.process()?.allocate(size)
    }

    pub fn free(&self, address: u64) -> Result<()> {
        self.process()?.free(address)
    }

    /// Final address of `chain`, served from the cache when possible.
    ///
    /// Only the end-to-end result is cached, never the intermediate pointers.
    pub fn compute_address(&self, chain: &OffsetChain) -> Option<u64> {
        let attachment = self.attachment.as_ref()?;
        if let Some(address) = self.cache.resolve(chain) {
            return Some(address);
        }

        let generation = self.cache.generation();
        let process = &attachment.process;
        let address = chain.walk(attachment.base_address, |addr| process.read_u64(addr).ok());

        match address {
            Some(address) => {
                self.cache.store(chain, address, generation);
                Some(address)
            }
            None => {
                debug!("Offset chain [{}] could not be resolved", chain);
                None
            }
        }
    }

    /// Read `count` values at the end of `chain`.
    pub fn try_read<T: Pod>(&self, chain: &OffsetChain, count: usize) -> Result<Vec<T>> {
        let process = self.process()?;
        let address = self
            .compute_address(chain)
            .ok_or_else(|| Error::MemoryReadFailed {
                address: 0,
                message: format!("unresolved offset chain [{}]", chain),
            })?;

        let mut data = vec![T::zeroed(); count];
        let size = std::mem::size_of_val(data.as_slice());
        let bytes = process.read_bytes(address, size)?;
        if bytes.len() != size {
            return Err(Error::MemoryReadFailed {
                address,
                message: format!("short read ({} of {} bytes)", bytes.len(), size),
            });
        }
        bytemuck::cast_slice_mut::<T, u8>(data.as_mut_slice()).copy_from_slice(&bytes);
        Ok(data)
    }

    /// Read `count` values; zero-valued elements on any failure.
    pub fn read<T: Pod>(&self, chain: &OffsetChain, count: usize) -> Vec<T> {
        self.try_read(chain, count)
            .unwrap_or_else(|_| vec![T::zeroed(); count])
    }

    /// Read a single value; zero on failure.
    pub fn read_value<T: Pod>(&self, chain: &OffsetChain) -> T {
        self.read::<T>(chain, 1)
            .first()
            .copied()
            .unwrap_or_else(T::zeroed)
    }

    /// Write `data` at the end of `chain`.
    ///
    /// Dropped when there is no session or the chain does not resolve.
    pub fn write<T: Pod>(&self, chain: &OffsetChain, data: &[T]) -> Result<()> {
        if data.is_empty() || !self.is_attached() {
            return Ok(());
        }
        let Some(address) = self.compute_address(chain) else {
            return Ok(());
        };
        self.write_bytes(address, bytemuck::cast_slice(data))
    }

    /// Read the NUL-terminated string a `char*` at the end of `chain` points to.
    ///
    /// Reads up to the next page boundary first, then a page at a time. When a
    /// read fails the request is halved, so a string ending just before
    /// unmapped memory is still found. Bytes already read are kept.
    pub fn read_string(&self, chain: &OffsetChain) -> String {
        let Ok(process) = self.process() else {
            return String::new();
        };
        let text = match self.compute_address(chain) {
            Some(pointer) => process.read_u64(pointer).unwrap_or(0),
            None => 0,
        };
        if text == 0 {
            return String::new();
        }

        let mut bytes = Vec::new();
        let mut address = text;
        let mut request = PAGE_SIZE - (address as usize & (PAGE_SIZE - 1));
        while bytes.len() < STRING_MAX_READ {
            let size = request.min(STRING_MAX_READ - bytes.len());
            match process.read_bytes(address, size) {
                Ok(chunk) if !chunk.is_empty() => {
                    if let Some(end) = memchr::memchr(0, &chunk) {
                        bytes.extend_from_slice(&chunk[..end]);
                        break;
                    }
                    bytes.extend_from_slice(&chunk);
                    address += chunk.len() as u64;
                    if address as usize & (PAGE_SIZE - 1) == 0 {
                        request = PAGE_SIZE;
                    }
                }
                _ if size > 1 => request = size / 2,
                _ => {
                    trace!("String at {:#x} unterminated before {:#x}", text, address);
                    break;
                }
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Overwrite the string a `char*` at the end of `chain` points to, NUL
    /// included. The pointer itself is left alone.
    ///
    /// Dropped when there is no session or the chain does not resolve. A null
    /// pointer is an error since there is nothing to write into.
    pub fn write_string(&self, chain: &OffsetChain, text: &str) -> Result<()> {
        let Ok(process) = self.process() else {
            return Ok(());
        };
        let Some(pointer) = self.compute_address(chain) else {
            return Ok(());
        };
        let target = process.read_u64(pointer)?;
        if target == 0 {
            return Err(Error::MemoryWriteFailed {
                address: pointer,
                message: "null string pointer".to_string(),
            });
        }

        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);
        process.write_bytes(target, &bytes)
    }
}
