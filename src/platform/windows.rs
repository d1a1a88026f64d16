//! Win32 backend: raw input listening and layout switching.
//!
//! Raw input is the only Windows input API that reports which device a
//! keystroke came from, so the listener registers a message-only window
//! with `RIDEV_INPUTSINK` and forwards the source device handle of every
//! `WM_INPUT` to the core loop. Layout queries and switches use the same
//! user32 surface the stock language bar does: `GetKeyboardLayoutList`,
//! a `WM_INPUTLANGCHANGEREQUEST` broadcast, `SPI_SETDEFAULTINPUTLANG`.

use std::ffi::c_void;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, warn};
use windows::core::{w, PCWSTR};
use windows::Win32::Foundation::{ERROR_SUCCESS, HANDLE, HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Registry::{RegGetValueW, HKEY_LOCAL_MACHINE, RRF_RT_REG_SZ};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    ActivateKeyboardLayout, GetKeyboardLayout, GetKeyboardLayoutList, GetKeyboardLayoutNameW,
    ACTIVATE_KEYBOARD_LAYOUT_FLAGS, HKL,
};
use windows::Win32::UI::Input::{
    GetRawInputData, GetRawInputDeviceInfoW, GetRawInputDeviceList, RegisterRawInputDevices,
    HRAWINPUT, RAWINPUTDEVICE, RAWINPUTDEVICELIST, RAWINPUTHEADER, RIDEV_INPUTSINK,
    RIDI_DEVICENAME, RID_HEADER, RIM_TYPEKEYBOARD,
};
use windows::Win32::UI::WindowsAndMessaging::{
    BroadcastSystemMessageW, CreateWindowExW, DefWindowProcW, DispatchMessageW,
    GetForegroundWindow, GetMessageW, GetWindowThreadProcessId, RegisterClassW,
    SystemParametersInfoW, BSF_POSTMESSAGE, BSM_APPLICATIONS, HWND_MESSAGE, MSG,
    SPIF_SENDCHANGE, SPI_SETDEFAULTINPUTLANG, WINDOW_EX_STYLE, WINDOW_STYLE, WM_INPUT,
    WM_INPUTLANGCHANGEREQUEST, WNDCLASSW,
};

use super::{
    AttachedKeyboard, DeviceHandle, DeviceQueryError, KeyboardOs, LayoutError, LayoutHandle,
};

fn from_hkl(hkl: HKL) -> LayoutHandle {
    hkl.0 as u64
}

fn to_hkl(handle: LayoutHandle) -> HKL {
    HKL(handle as _)
}

/// Win32 implementation of the keyboard capability trait.
pub struct WindowsOs;

impl KeyboardOs for WindowsOs {
    fn list_keyboards(&self) -> Result<Vec<AttachedKeyboard>, DeviceQueryError> {
        let entry_size = std::mem::size_of::<RAWINPUTDEVICELIST>() as u32;
        let mut count = 0u32;
        let rc = unsafe { GetRawInputDeviceList(None, &mut count, entry_size) };
        if rc == u32::MAX {
            return Err(DeviceQueryError("failed to count input devices".into()));
        }

        let mut list = vec![RAWINPUTDEVICELIST::default(); count as usize];
        let filled = unsafe { GetRawInputDeviceList(Some(list.as_mut_ptr()), &mut count, entry_size) };
        if filled == u32::MAX {
            return Err(DeviceQueryError("failed to list input devices".into()));
        }
        list.truncate(filled as usize);

        let mut keyboards = Vec::new();
        for entry in &list {
            if entry.dwType != RIM_TYPEKEYBOARD {
                continue;
            }
            let handle = entry.hDevice.0 as u64;
            match self.keyboard_name(handle) {
                Ok(name) => keyboards.push(AttachedKeyboard { handle, name }),
                // A device can vanish between the list and the info call.
                Err(e) => warn!("Skipping input device {:#x}: {}", handle, e),
            }
        }
        Ok(keyboards)
    }

    fn keyboard_name(&self, device: DeviceHandle) -> Result<String, DeviceQueryError> {
        let handle = HANDLE(device as _);
        let mut size = 0u32;
        let rc = unsafe { GetRawInputDeviceInfoW(handle, RIDI_DEVICENAME, None, &mut size) };
        if rc != 0 || size == 0 {
            return Err(DeviceQueryError(format!(
                "no device name size for {:#x}",
                device
            )));
        }

        let mut buf = vec![0u16; size as usize];
        let copied = unsafe {
            GetRawInputDeviceInfoW(
                handle,
                RIDI_DEVICENAME,
                Some(buf.as_mut_ptr() as *mut c_void),
                &mut size,
            )
        };
        if copied == u32::MAX || copied == 0 {
            return Err(DeviceQueryError(format!(
                "failed to read device name for {:#x}",
                device
            )));
        }
        Ok(utf16_until_nul(&buf))
    }

    fn list_layouts(&self) -> Result<Vec<LayoutHandle>, LayoutError> {
        let count = unsafe { GetKeyboardLayoutList(None) };
        if count <= 0 {
            return Err(LayoutError("failed to count keyboard layouts".into()));
        }

        let mut layouts = vec![HKL::default(); count as usize];
        let filled = unsafe { GetKeyboardLayoutList(Some(&mut layouts)) };
        if filled <= 0 {
            return Err(LayoutError("failed to list keyboard layouts".into()));
        }
        layouts.truncate(filled as usize);
        Ok(layouts.into_iter().map(from_hkl).collect())
    }

    fn layout_display_name(&self, layout: LayoutHandle) -> Option<String> {
        let hkl = to_hkl(layout);
        let klid = unsafe {
            // GetKeyboardLayoutNameW only reports the active layout, so
            // briefly activate this one and restore afterwards.
            let current = GetKeyboardLayout(0);
            if current != hkl {
                ActivateKeyboardLayout(hkl, ACTIVATE_KEYBOARD_LAYOUT_FLAGS(0));
            }
            let mut buf = [0u16; 9]; // KL_NAMELENGTH
            let result = GetKeyboardLayoutNameW(&mut buf);
            if current != hkl {
                ActivateKeyboardLayout(current, ACTIVATE_KEYBOARD_LAYOUT_FLAGS(0));
            }
            result.ok()?;
            utf16_until_nul(&buf).to_lowercase()
        };
        layout_text_from_registry(&klid)
    }

    fn active_layout(&self) -> Result<LayoutHandle, LayoutError> {
        let hkl = unsafe {
            let thread = GetWindowThreadProcessId(GetForegroundWindow(), None);
            GetKeyboardLayout(thread)
        };
        if hkl.is_invalid() {
            return Err(LayoutError("no layout for foreground thread".into()));
        }
        Ok(from_hkl(hkl))
    }

    fn broadcast_layout(&self, layout: LayoutHandle) -> Result<(), LayoutError> {
        let mut recipients = BSM_APPLICATIONS;
        let rc = unsafe {
            BroadcastSystemMessageW(
                BSF_POSTMESSAGE,
                Some(&mut recipients),
                WM_INPUTLANGCHANGEREQUEST,
                WPARAM(0),
                LPARAM(layout as isize),
            )
        };
        if rc < 0 {
            return Err(LayoutError("input language change broadcast failed".into()));
        }
        Ok(())
    }

    fn set_default_layout(&self, layout: LayoutHandle) -> Result<(), LayoutError> {
        let mut hkl = to_hkl(layout);
        unsafe {
            SystemParametersInfoW(
                SPI_SETDEFAULTINPUTLANG,
                0,
                Some(&mut hkl as *mut HKL as *mut c_void),
                SPIF_SENDCHANGE,
            )
        }
        .map_err(|e| LayoutError(format!("failed to set default layout: {}", e)))
    }
}

/// Look up the layout's "Layout Text" under the Keyboard Layouts registry
/// key, which maps a KLID like "00000c09" to "English (Australia)".
fn layout_text_from_registry(klid: &str) -> Option<String> {
    let subkey_buf: Vec<u16> = format!("SYSTEM\\ControlSet001\\Control\\Keyboard Layouts\\{}", klid)
        .encode_utf16()
        .chain(Some(0))
        .collect();
    let subkey = PCWSTR::from_raw(subkey_buf.as_ptr());
    let value = w!("Layout Text");

    unsafe {
        let mut size = 0u32;
        let rc = RegGetValueW(
            HKEY_LOCAL_MACHINE,
            subkey,
            value,
            RRF_RT_REG_SZ,
            None,
            None,
            Some(&mut size),
        );
        if rc != ERROR_SUCCESS || size == 0 {
            return None;
        }

        let mut buf = vec![0u16; size.div_ceil(2) as usize];
        let rc = RegGetValueW(
            HKEY_LOCAL_MACHINE,
            subkey,
            value,
            RRF_RT_REG_SZ,
            None,
            Some(buf.as_mut_ptr() as *mut c_void),
            Some(&mut size),
        );
        if rc != ERROR_SUCCESS {
            return None;
        }
        Some(utf16_until_nul(&buf))
    }
}

fn utf16_until_nul(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

/// Spawn the raw input listener thread. Returns the channel delivering
/// the source device handle of every keystroke, or an error if raw input
/// registration failed. Registration failure is fatal to startup, since
/// without it the core has no event source.
pub fn spawn_input_listener() -> anyhow::Result<mpsc::UnboundedReceiver<DeviceHandle>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();

    std::thread::Builder::new()
        .name("raw-input".into())
        .spawn(move || run_message_loop(tx, ready_tx))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(rx),
        Ok(Err(e)) => Err(e.context("raw input registration failed")),
        Err(_) => anyhow::bail!("raw input thread died during startup"),
    }
}

/// Window procedure for the input sink window. `WM_INPUT` is picked off
/// the queue by the message pump; everything else takes the default path.
extern "system" fn input_wndproc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
}

fn run_message_loop(
    tx: mpsc::UnboundedSender<DeviceHandle>,
    ready_tx: std::sync::mpsc::Sender<anyhow::Result<()>>,
) {
    if let Err(e) = unsafe { create_input_window() } {
        let _ = ready_tx.send(Err(e));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    let mut msg = MSG::default();
    unsafe {
        while GetMessageW(&mut msg, None, 0, 0).as_bool() {
            if msg.message == WM_INPUT {
                if let Some(device) = input_event_device(HRAWINPUT(msg.lParam.0 as _)) {
                    if tx.send(device).is_err() {
                        break; // Core loop is gone.
                    }
                }
            }
            DispatchMessageW(&msg);
        }
    }
    error!("Raw input message loop exited");
}

/// Create a message-only window and register it as a keyboard raw input
/// sink. `RIDEV_INPUTSINK` delivers events even while the process is in
/// the background, which is the whole point of the program.
unsafe fn create_input_window() -> anyhow::Result<HWND> {
    let module = GetModuleHandleW(None).context("GetModuleHandleW failed")?;
    let instance: HINSTANCE = module.into();
    let class_name = w!("keyswitch-raw-input");
    let class = WNDCLASSW {
        lpfnWndProc: Some(input_wndproc),
        hInstance: instance,
        lpszClassName: class_name,
        ..Default::default()
    };
    if RegisterClassW(&class) == 0 {
        anyhow::bail!("failed to register raw input window class");
    }

    let hwnd = CreateWindowExW(
        WINDOW_EX_STYLE(0),
        class_name,
        w!("keyswitch input sink"),
        WINDOW_STYLE(0),
        0,
        0,
        0,
        0,
        HWND_MESSAGE,
        None,
        instance,
        None,
    )
    .context("failed to create raw input window")?;

    // Usage page 0x01, usage 0x06: generic desktop / keyboard. Mice and
    // other HID classes never reach us.
    let device = RAWINPUTDEVICE {
        usUsagePage: 0x01,
        usUsage: 0x06,
        dwFlags: RIDEV_INPUTSINK,
        hwndTarget: hwnd,
    };
    RegisterRawInputDevices(&[device], std::mem::size_of::<RAWINPUTDEVICE>() as u32)
        .context("RegisterRawInputDevices failed")?;
    Ok(hwnd)
}

/// Read just the raw input header and return the source device handle.
/// The full input payload is never needed: which device typed matters,
/// what it typed does not.
fn input_event_device(input: HRAWINPUT) -> Option<DeviceHandle> {
    let mut header = RAWINPUTHEADER::default();
    let header_size = std::mem::size_of::<RAWINPUTHEADER>() as u32;
    let mut size = header_size;
    let copied = unsafe {
        GetRawInputData(
            input,
            RID_HEADER,
            Some(&mut header as *mut RAWINPUTHEADER as *mut c_void),
            &mut size,
            header_size,
        )
    };
    if copied == u32::MAX {
        warn!("Failed to read raw input header");
        return None;
    }
    // Synthetic input (SendInput, on-screen keyboard) carries no device.
    if header.dwType != RIM_TYPEKEYBOARD.0 || header.hDevice.is_invalid() {
        return None;
    }
    Some(header.hDevice.0 as u64)
}
