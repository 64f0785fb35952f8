//! Process and window discovery.
//!
//! Thin wrappers over the OS: find the target's process id by executable name,
//! locate its visible top-level window, and manage foreground focus.

use crate::memory::WindowHandle;

#[cfg(target_os = "windows")]
use windows::Win32::Foundation::HWND;

#[cfg(target_os = "windows")]
fn to_hwnd(window: WindowHandle) -> HWND {
    HWND(window.0 as *mut std::ffi::c_void)
}

/// Find the id of the first running process whose executable name matches `name`.
#[cfg(target_os = "windows")]
pub fn find_process_id(name: &str) -> Option<u32> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
        TH32CS_SNAPPROCESS,
    };

    // SAFETY: the snapshot handle is closed on every path; entry is a valid,
    // size-initialised out-parameter.
    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0).ok()?;
        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };

        let mut found = None;
        if Process32FirstW(snapshot, &mut entry).is_ok() {
            loop {
                let len = entry
                    .szExeFile
                    .iter()
                    .position(|&c| c == 0)
                    .unwrap_or(entry.szExeFile.len());
                let exe_name = String::from_utf16_lossy(&entry.szExeFile[..len]);

                if exe_name.eq_ignore_ascii_case(name) {
                    found = Some(entry.th32ProcessID);
                    break;
                }
                if Process32NextW(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }

        let _ = CloseHandle(snapshot);
        found
    }
}

/// Find the main window belonging to the given process ID.
///
/// Enumerates all top-level windows and returns the first visible one whose
/// owning process matches `target_pid`.
#[cfg(target_os = "windows")]
pub fn find_window_by_pid(target_pid: u32) -> anyhow::Result<WindowHandle> {
    use windows::Win32::Foundation::LPARAM;
    use windows::Win32::UI::WindowsAndMessaging::EnumWindows;

    FOUND_HWND.with(|cell| cell.set(None));
    let pid = target_pid;

    // SAFETY: EnumWindows calls the callback synchronously on this thread; the
    // LPARAM points at `pid`, which outlives the call.
    unsafe {
        let _ = EnumWindows(Some(enum_callback), LPARAM(&pid as *const u32 as isize));
    }

    FOUND_HWND
        .with(|cell| cell.take())
        .map(|hwnd| WindowHandle(hwnd.0 as isize))
        .ok_or_else(|| anyhow::anyhow!("No visible window found for PID {}", target_pid))
}

#[cfg(target_os = "windows")]
thread_local! {
    static FOUND_HWND: std::cell::Cell<Option<HWND>> = const { std::cell::Cell::new(None) };
}

#[cfg(target_os = "windows")]
unsafe extern "system" fn enum_callback(
    hwnd: HWND,
    lparam: windows::Win32::Foundation::LPARAM,
) -> windows::Win32::Foundation::BOOL {
    use windows::Win32::Foundation::BOOL;
    use windows::Win32::UI::WindowsAndMessaging::{GetWindowThreadProcessId, IsWindowVisible};

    let target_pid = unsafe { *(lparam.0 as *const u32) };
    let mut window_pid: u32 = 0;
    unsafe { GetWindowThreadProcessId(hwnd, Some(&mut window_pid)) };

    if window_pid == target_pid && unsafe { IsWindowVisible(hwnd) }.as_bool() {
        FOUND_HWND.with(|cell| cell.set(Some(hwnd)));
        return BOOL(0); // Stop enumeration
    }
    BOOL(1)
}

/// Bring the given window to the foreground.
#[cfg(target_os = "windows")]
pub fn ensure_foreground(window: WindowHandle) -> anyhow::Result<()> {
    use windows::Win32::UI::WindowsAndMessaging::{
        IsIconic, SW_RESTORE, SetForegroundWindow, ShowWindow,
    };

    let hwnd = to_hwnd(window);
    // SAFETY: both calls accept any HWND; a stale handle simply fails.
    unsafe {
        if IsIconic(hwnd).as_bool() {
            let _ = ShowWindow(hwnd, SW_RESTORE);
        }
        if !SetForegroundWindow(hwnd).as_bool() {
            anyhow::bail!("SetForegroundWindow refused for {:?}", window);
        }
    }
    Ok(())
}

/// Check whether the given window currently has foreground focus.
#[cfg(target_os = "windows")]
pub fn is_foreground(window: WindowHandle) -> bool {
    use windows::Win32::UI::WindowsAndMessaging::GetForegroundWindow;

    // SAFETY: GetForegroundWindow is always safe to call.
    let fg = unsafe { GetForegroundWindow() };
    fg == to_hwnd(window)
}

// --- Non-Windows stubs ---

#[cfg(not(target_os = "windows"))]
pub fn find_process_id(_name: &str) -> Option<u32> {
    None
}

#[cfg(not(target_os = "windows"))]
pub fn find_window_by_pid(target_pid: u32) -> anyhow::Result<WindowHandle> {
    anyhow::bail!(
        "Window lookup for PID {} is only supported on Windows",
        target_pid
    )
}

#[cfg(not(target_os = "windows"))]
pub fn ensure_foreground(_window: WindowHandle) -> anyhow::Result<()> {
    anyhow::bail!("Window management is only supported on Windows")
}

#[cfg(not(target_os = "windows"))]
pub fn is_foreground(_window: WindowHandle) -> bool {
    false
}
