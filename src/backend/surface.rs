// Presentation targets - where swapchain images end up
//
// The context only needs three things from a window: the instance extensions
// its platform surface requires, a way to create that surface, and the current
// drawable size.

use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;
use winit::window::Window;

use super::error::{GpuError, GpuResult};

pub trait PresentationTarget {
    /// Instance extensions needed to create the surface
    fn required_extensions(&self) -> GpuResult<Vec<*const c_char>>;

    /// Create the native surface; the caller owns and destroys it
    fn create_surface(&self, entry: &Entry, instance: &ash::Instance) -> GpuResult<vk::SurfaceKHR>;

    /// Drawable size in pixels, used as the desired swapchain extent
    fn framebuffer_size(&self) -> vk::Extent2D;
}

/// A winit window
pub struct WindowTarget {
    window: Arc<Window>,
}

impl WindowTarget {
    pub fn new(window: Arc<Window>) -> Self {
        Self { window }
    }
}

impl PresentationTarget for WindowTarget {
    fn required_extensions(&self) -> GpuResult<Vec<*const c_char>> {
        let extensions = ash_window::enumerate_required_extensions(self.window.raw_display_handle())
            .map_err(GpuError::context("enumerate surface extensions"))?;
        Ok(extensions.to_vec())
    }

    fn create_surface(&self, entry: &Entry, instance: &ash::Instance) -> GpuResult<vk::SurfaceKHR> {
        unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.window.raw_display_handle(),
                self.window.raw_window_handle(),
                None,
            )
        }
        .map_err(GpuError::context("create window surface"))
    }

    fn framebuffer_size(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

/// Offscreen surface from VK_EXT_headless_surface, for tests and CI
pub struct HeadlessTarget {
    extent: vk::Extent2D,
}

impl HeadlessTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: vk::Extent2D { width, height },
        }
    }
}

impl PresentationTarget for HeadlessTarget {
    fn required_extensions(&self) -> GpuResult<Vec<*const c_char>> {
        Ok(vec![khr::Surface::name().as_ptr(), ext::HeadlessSurface::name().as_ptr()])
    }

    fn create_surface(&self, entry: &Entry, instance: &ash::Instance) -> GpuResult<vk::SurfaceKHR> {
        let loader = ext::HeadlessSurface::new(entry, instance);
        let create_info = vk::HeadlessSurfaceCreateInfoEXT::builder();
        unsafe { loader.create_headless_surface(&create_info, None) }
            .map_err(GpuError::context("create headless surface"))
    }

    fn framebuffer_size(&self) -> vk::Extent2D {
        self.extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn headless_target_requests_surface_extensions() {
        let target = HeadlessTarget::new(1, 1);
        let names: Vec<_> = target
            .required_extensions()
            .unwrap()
            .into_iter()
            .map(|ptr| unsafe { CStr::from_ptr(ptr) })
            .collect();

        assert_eq!(names, vec![c"VK_KHR_surface", c"VK_EXT_headless_surface"]);
        assert_eq!(target.framebuffer_size(), vk::Extent2D { width: 1, height: 1 });
    }
}
