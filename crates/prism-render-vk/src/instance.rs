// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
#[cfg(debug_assertions)]
use ash::ext::debug_utils as ext_debug;
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_char, CStr};

const APP_NAME: &CStr = c"prism";

#[cfg(debug_assertions)]
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[cfg(debug_assertions)]
type DebugState = (ext_debug::Instance, vk::DebugUtilsMessengerEXT);
#[cfg(not(debug_assertions))]
type DebugState = ();

/// Instance-scoped objects: entry, instance, window surface and (in debug
/// builds) the validation messenger. Must outlive the logical device.
pub struct InstanceContext {
    pub entry: Entry,
    pub instance: Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    #[allow(dead_code)]
    debug: DebugState,
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback-data pointer for the
    // duration of the call; p_message is a NUL-terminated string.
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!("validation: {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!("validation: {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::info!("validation: {msg}");
    } else {
        tracing::debug!("validation: {msg}");
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> Result<DebugState> {
    let loader = ext_debug::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .context("create_debug_utils_messenger")?;
    Ok((loader, messenger))
}

#[cfg(not(debug_assertions))]
unsafe fn create_debug_messenger(_entry: &Entry, _instance: &Instance) -> Result<DebugState> {
    Ok(())
}

#[cfg(debug_assertions)]
fn validation_available(entry: &Entry) -> bool {
    // SAFETY: plain global query on a loaded entry.
    unsafe { entry.enumerate_instance_layer_properties() }
        .unwrap_or_default()
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER))
}

unsafe fn create_instance(entry: &Entry, display_raw: RawDisplayHandle) -> Result<Instance> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let wsi_exts = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?;
    #[allow(unused_mut)]
    let mut ext_vec: Vec<*const c_char> = wsi_exts.to_vec();
    #[allow(unused_mut)]
    let mut layers: Vec<*const c_char> = Vec::new();

    #[cfg(debug_assertions)]
    {
        if validation_available(entry) {
            layers.push(VALIDATION_LAYER.as_ptr());
            ext_vec.push(ext_debug::NAME.as_ptr());
        } else {
            tracing::warn!("validation layer requested but not installed; continuing without it");
        }
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    Ok(unsafe { entry.create_instance(&create_info, None) }.context("create_instance")?)
}

impl InstanceContext {
    // STRICT ORDER:
    // 1) Instance (WSI extensions + validation in debug builds)
    // 2) Surface from THIS instance
    // 3) Debug messenger
    // Device selection later queries present support against this surface.
    pub fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window.window_handle().map_err(|e| anyhow!("{e}"))?.as_raw();

        let entry = Entry::linked();
        // SAFETY: handles come from a live window; objects are destroyed in Drop.
        unsafe {
            let instance = create_instance(&entry, dh)?;
            let surface_loader = surface::Instance::new(&entry, &instance);
            let surface = match ash_window::create_surface(&entry, &instance, dh, wh, None) {
                Ok(s) => s,
                Err(e) => {
                    instance.destroy_instance(None);
                    return Err(anyhow!("ash_window::create_surface: {e:?}"));
                }
            };
            let debug = match create_debug_messenger(&entry, &instance) {
                Ok(d) => d,
                Err(e) => {
                    surface_loader.destroy_surface(surface, None);
                    instance.destroy_instance(None);
                    return Err(e);
                }
            };

            Ok(Self {
                entry,
                instance,
                surface_loader,
                surface,
                debug,
            })
        }
    }
}

// Destroy surface and messenger BEFORE the instance; the logical device must
// already be gone.
impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            #[cfg(debug_assertions)]
            {
                let (loader, messenger) = &self.debug;
                loader.destroy_debug_utils_messenger(*messenger, None);
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}
