// GPU context - the long-lived Vulkan session
//
// Responsibilities:
// - Instance creation with optional validation layer + feature chain
// - Debug messenger routed into a DiagnosticSink
// - Presentation surface (delegated to the window collaborator)
// - Adapter selection and one queue per unique queue family
// - Logical device with dynamic rendering enabled
//
// Everything created later holds an Arc<GpuContext>, so the device and instance
// are always the last things destroyed.

use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use std::ffi::{c_char, CString};
use std::sync::Arc;

use super::capability::{required_device_extensions, AdapterCapability, SurfaceSupport};
use super::command::QueueRole;
use super::diagnostics::{DiagnosticSink, DiagnosticsDesc};
use super::error::{GpuError, GpuResult};
use super::surface::PresentationTarget;

const VALIDATION_LAYER: &std::ffi::CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &std::ffi::CStr = c"gpu-sandbox";
const QUEUE_PRIORITY: f32 = 1.0;

/// Parameters for context creation
#[derive(Debug, Clone)]
pub struct ContextDesc {
    pub app_name: String,
    pub diagnostics: DiagnosticsDesc,
}

/// Instance-level objects; destroyed on drop unless handed over to the context
struct InstanceParts {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,
}

impl InstanceParts {
    unsafe fn destroy(&mut self) {
        if self.surface != vk::SurfaceKHR::null() {
            self.surface_loader.destroy_surface(self.surface, None);
            self.surface = vk::SurfaceKHR::null();
        }
        if let Some((debug_utils, messenger)) = self.debug_utils.take() {
            debug_utils.destroy_debug_utils_messenger(messenger, None);
        }
        self.instance.destroy_instance(None);
    }
}

/// Vulkan needs a C string; interior NULs are dropped rather than losing the name
fn application_name(name: &str) -> CString {
    CString::new(name).unwrap_or_else(|e| {
        log::warn!("Application name {:?} contains NUL bytes; they are stripped", name);
        let mut bytes = e.into_vec();
        bytes.retain(|&b| b != 0);
        CString::new(bytes).unwrap_or_default()
    })
}

pub struct GpuContext {
    pub device: ash::Device,
    pub swapchain_loader: khr::Swapchain,
    pub adapter: AdapterCapability,
    queues: [vk::Queue; 4],
    surface: vk::SurfaceKHR,
    surface_loader: khr::Surface,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    diagnostics: Arc<DiagnosticSink>,
    pub instance: ash::Instance,
    _entry: Entry,
}

impl GpuContext {
    /// Create the context and every instance/device level object
    pub fn new(desc: &ContextDesc, target: &dyn PresentationTarget) -> GpuResult<Arc<Self>> {
        log::info!("Creating GPU context: {}", desc.app_name);

        let entry = unsafe { Entry::load() }?;
        let diagnostics = Arc::new(DiagnosticSink::default());

        let instance = Self::create_instance(&entry, desc, target, &diagnostics)?;
        log::info!("Vulkan instance created");

        let debug_utils = if desc.diagnostics.enabled {
            match Self::create_debug_messenger(&entry, &instance, desc, &diagnostics) {
                Ok(debug_utils) => Some(debug_utils),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let mut parts = InstanceParts {
            surface_loader: khr::Surface::new(&entry, &instance),
            entry,
            instance,
            debug_utils,
            surface: vk::SurfaceKHR::null(),
        };

        match Self::create_device(&mut parts, target) {
            Ok((adapter, device)) => {
                let queues = QueueRole::ALL.map(|role| unsafe {
                    device.get_device_queue(adapter.families.index(role), 0)
                });
                let swapchain_loader = khr::Swapchain::new(&parts.instance, &device);

                let InstanceParts {
                    entry,
                    instance,
                    debug_utils,
                    surface_loader,
                    surface,
                } = parts;

                Ok(Arc::new(Self {
                    device,
                    swapchain_loader,
                    adapter,
                    queues,
                    surface,
                    surface_loader,
                    debug_utils,
                    diagnostics,
                    instance,
                    _entry: entry,
                }))
            }
            Err(e) => {
                unsafe { parts.destroy() };
                Err(e)
            }
        }
    }

    fn create_instance(
        entry: &Entry,
        desc: &ContextDesc,
        target: &dyn PresentationTarget,
        diagnostics: &DiagnosticSink,
    ) -> GpuResult<ash::Instance> {
        let app_name = application_name(&desc.app_name);

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = target.required_extensions()?;
        let mut layers: Vec<*const c_char> = Vec::new();
        if desc.diagnostics.enabled {
            extensions.push(DebugUtils::name().as_ptr());
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        // Chained so instance creation and destruction are validated too
        let enabled_features = desc.diagnostics.validation_features();
        let mut validation_features = vk::ValidationFeaturesEXT::builder()
            .enabled_validation_features(&enabled_features)
            .build();
        let mut messenger_info = desc.diagnostics.messenger_info(diagnostics);

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        if desc.diagnostics.enabled {
            create_info = create_info
                .push_next(&mut validation_features)
                .push_next(&mut messenger_info);
        }

        unsafe { entry.create_instance(&create_info, None) }.map_err(GpuError::context("vkCreateInstance"))
    }

    fn create_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
        desc: &ContextDesc,
        diagnostics: &DiagnosticSink,
    ) -> GpuResult<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);
        let create_info = desc.diagnostics.messenger_info(diagnostics);

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(GpuError::context("vkCreateDebugUtilsMessengerEXT"))?;

        log::info!(
            "Debug messenger created (min severity {:?}, instrumentation {:?})",
            desc.diagnostics.min_severity,
            desc.diagnostics.instrumentation
        );
        Ok((debug_utils, messenger))
    }

    fn create_device(
        parts: &mut InstanceParts,
        target: &dyn PresentationTarget,
    ) -> GpuResult<(AdapterCapability, ash::Device)> {
        parts.surface = target.create_surface(&parts.entry, &parts.instance)?;
        log::info!("Presentation surface created");

        let adapter = AdapterCapability::query(&parts.instance, &parts.surface_loader, parts.surface)?;
        log::info!("Selected GPU: {}", adapter.name);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(adapter.api_version),
            vk::api_version_minor(adapter.api_version),
            vk::api_version_patch(adapter.api_version)
        );
        log::info!("Queue families: {:?}", adapter.families);

        let priorities = [QUEUE_PRIORITY];
        let queue_infos: Vec<_> = adapter
            .families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<_> = required_device_extensions().iter().map(|name| name.as_ptr()).collect();
        let mut dynamic_rendering = vk::PhysicalDeviceDynamicRenderingFeatures::builder()
            .dynamic_rendering(true)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut dynamic_rendering);

        let device = unsafe { parts.instance.create_device(adapter.physical_device, &create_info, None) }
            .map_err(GpuError::context("vkCreateDevice"))?;
        log::info!("Logical device created ({} queue(s))", queue_infos.len());

        Ok((adapter, device))
    }

    pub fn queue(&self, role: QueueRole) -> vk::Queue {
        self.queues[role.slot()]
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Fresh surface capabilities, formats and present modes
    pub fn surface_support(&self) -> GpuResult<SurfaceSupport> {
        SurfaceSupport::query(&self.surface_loader, self.adapter.physical_device, self.surface)
            .map_err(GpuError::swapchain("query surface support"))
    }

    /// Counters fed by the debug messenger (all zero when diagnostics are off)
    pub fn diagnostics(&self) -> Arc<DiagnosticSink> {
        Arc::clone(&self.diagnostics)
    }

    /// Wait for the device to be idle (e.g., before cleanup or swapchain recreation)
    pub fn wait_idle(&self) -> GpuResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(GpuError::sync("vkDeviceWaitIdle"))
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        log::info!("Destroying GPU context...");

        if let Err(e) = self.wait_idle() {
            log::error!("{}", e);
        }

        // Reverse creation order; the messenger goes after the surface so its
        // destruction is still reported
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }

        log::info!("GPU context destroyed");
    }
}
