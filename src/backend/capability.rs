// Capability query - adapter and queue family selection
//
// Picks the first enumerated GPU (no scoring yet) and resolves one queue family
// per role. Every scan is first-match-wins over the family list.

use ash::extensions::khr;
use ash::{prelude::VkResult, vk};
use std::collections::BTreeSet;
use std::ffi::CStr;

use super::command::QueueRole;
use super::error::{GpuError, GpuResult};

/// Device extensions the adapter must expose
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [khr::Swapchain::name()]
}

/// Queue family index for each role. Roles frequently share a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn index(&self, role: QueueRole) -> u32 {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Compute => self.compute,
            QueueRole::Transfer => self.transfer,
            QueueRole::Present => self.present,
        }
    }

    /// Deduplicated, ascending family indices (one queue is requested per entry)
    pub fn unique(&self) -> BTreeSet<u32> {
        QueueRole::ALL.iter().map(|&role| self.index(role)).collect()
    }
}

/// What the surface offers on the selected adapter
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(
        surface_loader: &khr::Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)?,
                formats: surface_loader.get_physical_device_surface_formats(physical_device, surface)?,
                present_modes: surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            })
        }
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// The selected GPU plus everything we learned about it
#[derive(Debug, Clone)]
pub struct AdapterCapability {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub api_version: u32,
    pub families: QueueFamilies,
    pub surface: SurfaceSupport,
}

impl AdapterCapability {
    /// Select an adapter able to render and present to `surface`
    pub fn query(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> GpuResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(|e| GpuError::capability("enumerate adapters", e.to_string()))?;

        // TODO: score adapters (discrete first, feature checks) instead of taking the first
        let physical_device = *devices
            .first()
            .ok_or_else(|| GpuError::capability("enumerate adapters", "no Vulkan-capable GPU found"))?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
            .map_err(|e| GpuError::capability("enumerate device extensions", e.to_string()))?;
        let missing = missing_extensions(&extensions, &required_device_extensions());
        if !missing.is_empty() {
            return Err(GpuError::capability(
                "check device extensions",
                format!("{} lacks {:?}", name, missing),
            ));
        }

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let family = |flags: vk::QueueFlags, role: QueueRole| {
            find_queue_family(&queue_families, flags).ok_or_else(|| {
                GpuError::capability("find queue family", format!("no {:?} queue family on {}", role, name))
            })
        };
        let graphics = family(vk::QueueFlags::GRAPHICS, QueueRole::Graphics)?;
        let compute = family(vk::QueueFlags::COMPUTE, QueueRole::Compute)?;
        let transfer = family(vk::QueueFlags::TRANSFER, QueueRole::Transfer)?;

        let present = find_present_family(queue_families.len() as u32, |index| unsafe {
            surface_loader.get_physical_device_surface_support(physical_device, index, surface)
        })
        .map_err(|e| GpuError::capability("query present support", e.to_string()))?
        .ok_or_else(|| GpuError::capability("find queue family", format!("{} cannot present to the surface", name)))?;

        let surface = SurfaceSupport::query(surface_loader, physical_device, surface)
            .map_err(|e| GpuError::capability("query surface support", e.to_string()))?;
        if !surface.is_adequate() {
            return Err(GpuError::capability(
                "query surface support",
                "surface reports no formats or no present modes",
            ));
        }

        Ok(Self {
            physical_device,
            name,
            api_version: properties.api_version,
            families: QueueFamilies {
                graphics,
                compute,
                transfer,
                present,
            },
            surface,
        })
    }
}

/// Lowest-indexed family whose flags contain `flags`
pub fn find_queue_family(families: &[vk::QueueFamilyProperties], flags: vk::QueueFlags) -> Option<u32> {
    families
        .iter()
        .position(|family| family.queue_flags.contains(flags))
        .map(|index| index as u32)
}

/// Lowest-indexed family for which `supports_present` answers yes.
/// Families are asked one at a time; the first query error aborts the scan.
pub fn find_present_family(
    family_count: u32,
    mut supports_present: impl FnMut(u32) -> VkResult<bool>,
) -> VkResult<Option<u32>> {
    for index in 0..family_count {
        if supports_present(index)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Entries of `required` that do not appear in `available`
pub fn missing_extensions<'a>(
    available: &[vk::ExtensionProperties],
    required: &[&'a CStr],
) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|name| {
            !available
                .iter()
                .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == *name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, &src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = src as std::os::raw::c_char;
        }
        props
    }

    #[test]
    fn first_matching_family_wins() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
        ];

        assert_eq!(find_queue_family(&families, vk::QueueFlags::TRANSFER), Some(0));
        assert_eq!(find_queue_family(&families, vk::QueueFlags::COMPUTE), Some(1));
        assert_eq!(find_queue_family(&families, vk::QueueFlags::GRAPHICS), Some(2));
    }

    #[test]
    fn missing_capability_yields_none() {
        let families = [family(vk::QueueFlags::TRANSFER), family(vk::QueueFlags::COMPUTE)];
        assert_eq!(find_queue_family(&families, vk::QueueFlags::GRAPHICS), None);
        assert_eq!(find_queue_family(&[], vk::QueueFlags::TRANSFER), None);
    }

    #[test]
    fn present_scan_stops_at_first_supporting_family() {
        let mut asked = Vec::new();
        let found = find_present_family(4, |index| {
            asked.push(index);
            Ok(index >= 1)
        });

        assert_eq!(found, Ok(Some(1)));
        assert_eq!(asked, vec![0, 1]);
    }

    #[test]
    fn present_scan_reports_none_and_errors() {
        assert_eq!(find_present_family(3, |_| Ok(false)), Ok(None));
        assert_eq!(
            find_present_family(3, |_| Err(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Err(vk::Result::ERROR_SURFACE_LOST_KHR)
        );
    }

    #[test]
    fn reports_missing_device_extensions() {
        let swapchain = khr::Swapchain::name();
        let available = [extension(c"VK_KHR_maintenance4")];
        assert_eq!(missing_extensions(&available, &[swapchain]), vec![swapchain]);

        let available = [extension(c"VK_KHR_maintenance4"), extension(swapchain)];
        assert!(missing_extensions(&available, &required_device_extensions()).is_empty());
    }

    #[test]
    fn shared_families_are_deduplicated() {
        let families = QueueFamilies {
            graphics: 0,
            compute: 2,
            transfer: 2,
            present: 0,
        };
        assert_eq!(families.unique().into_iter().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(families.index(QueueRole::Transfer), 2);
        assert_eq!(families.index(QueueRole::Present), 0);
    }
}
