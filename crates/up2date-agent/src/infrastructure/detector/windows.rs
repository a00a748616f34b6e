//! Windows uninstall-registry detector.
//!
//! Every installed product has a subkey under
//! `HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall` (or its
//! `WOW6432Node` twin for 32-bit products on 64-bit Windows).  For MSI
//! products the subkey name is the product code.

use tracing::debug;
use up2date_core::InstalledProduct;
use windows::core::{HSTRING, PWSTR};
use windows::Win32::Foundation::{ERROR_MORE_DATA, ERROR_NO_MORE_ITEMS, ERROR_SUCCESS};
use windows::Win32::System::Registry::{
    RegCloseKey, RegEnumKeyExW, RegOpenKeyExW, RegQueryValueExW, HKEY, HKEY_LOCAL_MACHINE,
    KEY_READ, REG_DWORD, REG_EXPAND_SZ, REG_SZ, REG_VALUE_TYPE,
};

use crate::application::setup_manager::{DetectionError, InstallationDetector};

const UNINSTALL_KEYS: [&str; 2] = [
    r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall",
    r"SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall",
];

/// Reads installed products from the uninstall registry.
#[derive(Default)]
pub struct RegistryDetector;

impl RegistryDetector {
    pub fn new() -> Self {
        Self
    }
}

impl InstallationDetector for RegistryDetector {
    fn installed_products(&self) -> Result<Vec<InstalledProduct>, DetectionError> {
        let mut products = Vec::new();
        let mut opened_any = false;

        for root in UNINSTALL_KEYS {
            let Some(uninstall) = RegKey::open(HKEY_LOCAL_MACHINE, root) else {
                debug!("registry key {root} not present");
                continue;
            };
            opened_any = true;
            for code in uninstall.subkey_names() {
                if let Some(entry) = RegKey::open(uninstall.0, &code) {
                    products.push(entry.product(code));
                }
            }
        }

        if !opened_any {
            return Err(DetectionError::Unavailable(
                "uninstall registry keys cannot be opened".to_string(),
            ));
        }
        Ok(products)
    }
}

/// An open registry key, closed on drop.
struct RegKey(HKEY);

impl RegKey {
    fn open(parent: HKEY, path: &str) -> Option<Self> {
        let mut handle = HKEY::default();
        // SAFETY: `handle` is a valid out-pointer for the duration of the call.
        let status = unsafe { RegOpenKeyExW(parent, &HSTRING::from(path), 0, KEY_READ, &mut handle) };
        (status == ERROR_SUCCESS).then_some(Self(handle))
    }

    fn subkey_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut index = 0;
        loop {
            let mut buffer = [0u16; 256];
            let mut len = buffer.len() as u32;
            // SAFETY: `buffer` holds `len` UTF-16 units; the optional
            // pointers are not requested.
            let status = unsafe {
                RegEnumKeyExW(
                    self.0,
                    index,
                    PWSTR(buffer.as_mut_ptr()),
                    &mut len,
                    None,
                    PWSTR::null(),
                    None,
                    None,
                )
            };
            if status == ERROR_SUCCESS {
                names.push(String::from_utf16_lossy(&buffer[..len as usize]));
            } else if status != ERROR_MORE_DATA {
                if status != ERROR_NO_MORE_ITEMS {
                    debug!("registry enumeration stopped: {status:?}");
                }
                break;
            }
            index += 1;
        }
        names
    }

    fn string(&self, name: &str) -> Option<String> {
        let name = HSTRING::from(name);
        let mut kind = REG_VALUE_TYPE::default();
        let mut size = 0u32;
        // SAFETY: size query only; no data buffer is passed.
        unsafe { RegQueryValueExW(self.0, &name, None, Some(&mut kind), None, Some(&mut size)) }
            .ok()
            .ok()?;
        if kind != REG_SZ && kind != REG_EXPAND_SZ {
            return None;
        }

        let mut buffer = vec![0u16; (size as usize).div_ceil(2)];
        // SAFETY: `buffer` is at least `size` bytes long.
        unsafe {
            RegQueryValueExW(
                self.0,
                &name,
                None,
                None,
                Some(buffer.as_mut_ptr().cast()),
                Some(&mut size),
            )
        }
        .ok()
        .ok()?;

        let len = (size as usize / 2).min(buffer.len());
        let text = String::from_utf16_lossy(&buffer[..len]);
        let text = text.trim_end_matches('\0').trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    fn dword(&self, name: &str) -> Option<u32> {
        let name = HSTRING::from(name);
        let mut kind = REG_VALUE_TYPE::default();
        let mut value = 0u32;
        let mut size = std::mem::size_of::<u32>() as u32;
        // SAFETY: `value` is a 4-byte buffer and `size` says so.
        unsafe {
            RegQueryValueExW(
                self.0,
                &name,
                None,
                Some(&mut kind),
                Some((&mut value as *mut u32).cast()),
                Some(&mut size),
            )
        }
        .ok()
        .ok()?;
        (kind == REG_DWORD).then_some(value)
    }

    fn product(&self, product_code: String) -> InstalledProduct {
        InstalledProduct {
            product_code,
            display_name: self.string("DisplayName"),
            publisher: self.string("Publisher"),
            display_version: self.string("DisplayVersion"),
            version: self.dword("Version"),
            install_date: self.string("InstallDate"),
            estimated_size: self.dword("EstimatedSize"),
            url_info_about: self.string("URLInfoAbout"),
        }
    }
}

impl Drop for RegKey {
    fn drop(&mut self) {
        // SAFETY: the handle was opened by `RegOpenKeyExW` and is closed once.
        unsafe {
            let _ = RegCloseKey(self.0);
        }
    }
}
