// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Recreation builds the replacement first (chaining the old handle) and only
// then destroys the old views and swapchain.

use ash::vk;
use std::sync::Arc;

use super::capability::SurfaceSupport;
use super::error::{GpuError, GpuResult};
use super::GpuContext;

/// Preferred surface format; anything else is a fallback
pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Outcome of a negotiation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiated<T> {
    Preferred(T),
    Fallback(T),
}

impl<T: Copy> Negotiated<T> {
    pub fn value(&self) -> T {
        match *self {
            Negotiated::Preferred(value) | Negotiated::Fallback(value) => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Negotiated::Fallback(_))
    }
}

/// Preferred sRGB format, else the first pair the surface reports
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<Negotiated<vk::SurfaceFormatKHR>> {
    if formats.contains(&PREFERRED_FORMAT) {
        return Some(Negotiated::Preferred(PREFERRED_FORMAT));
    }
    formats.first().copied().map(Negotiated::Fallback)
}

/// MAILBOX when offered, else FIFO (always supported)
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> Negotiated<vk::PresentModeKHR> {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        Negotiated::Preferred(vk::PresentModeKHR::MAILBOX)
    } else {
        Negotiated::Fallback(vk::PresentModeKHR::FIFO)
    }
}

/// The surface's current extent, unless it leaves the choice to us
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    let (min, max) = (caps.min_image_extent, caps.max_image_extent);
    vk::Extent2D {
        width: desired.width.max(min.width).min(max.width),
        height: desired.height.max(min.height).min(max.height),
    }
}

/// One more than the minimum, capped by the maximum (0 = unbounded)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count != 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Result of a successful acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// Still presentable, but the swapchain should be recreated soon
    pub suboptimal: bool,
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    context: Arc<GpuContext>,
}

impl Swapchain {
    pub fn new(context: Arc<GpuContext>, desired: vk::Extent2D) -> GpuResult<Self> {
        Self::build(context, desired, vk::SwapchainKHR::null())
    }

    /// Replace this swapchain with one sized for `desired`.
    /// The caller must make sure no GPU work still references our images.
    pub fn recreate(self, desired: vk::Extent2D) -> GpuResult<Self> {
        log::info!(
            "Recreating swapchain: {}x{} -> {}x{}",
            self.extent.width,
            self.extent.height,
            desired.width,
            desired.height
        );
        let replacement = Self::build(Arc::clone(&self.context), desired, self.swapchain)?;
        drop(self);
        Ok(replacement)
    }

    fn build(context: Arc<GpuContext>, desired: vk::Extent2D, old_swapchain: vk::SwapchainKHR) -> GpuResult<Self> {
        let SurfaceSupport {
            capabilities,
            formats,
            present_modes,
        } = context.surface_support()?;

        let format = choose_surface_format(&formats).ok_or(GpuError::Swapchain {
            operation: "choose surface format",
            result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        })?;
        if format.is_fallback() {
            log::warn!(
                "Preferred surface format {:?} unavailable, falling back to {:?}",
                PREFERRED_FORMAT,
                format.value()
            );
        }

        let present_mode = choose_present_mode(&present_modes);
        if present_mode.is_fallback() {
            log::warn!("MAILBOX present mode unavailable, falling back to FIFO");
        }

        let format = format.value();
        let present_mode = present_mode.value();
        let extent = choose_extent(&capabilities, desired);
        let image_count = choose_image_count(&capabilities);

        let families = context.adapter.families;
        let family_indices = [families.graphics, families.present];
        let (sharing_mode, shared_families): (_, &[u32]) = if families.graphics == families.present {
            (vk::SharingMode::EXCLUSIVE, &[])
        } else {
            (vk::SharingMode::CONCURRENT, &family_indices)
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { context.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(GpuError::swapchain("vkCreateSwapchainKHR"))?;

        // Build the struct now so Drop cleans up if a view fails below
        let mut this = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format,
            present_mode,
            extent,
            context,
        };

        this.images = unsafe { this.context.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(GpuError::swapchain("vkGetSwapchainImagesKHR"))?;

        for &image in &this.images {
            let view = create_color_view(&this.context.device, image, format.format)?;
            this.image_views.push(view);
        }

        log::info!(
            "Created swapchain: {}x{}, {} images, {:?}/{:?}, {:?}",
            extent.width,
            extent.height,
            this.images.len(),
            format.format,
            format.color_space,
            present_mode
        );

        Ok(this)
    }

    /// Acquire next image for rendering, signalling `semaphore` when it is ready
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> GpuResult<AcquiredImage> {
        let result = unsafe {
            self.context
                .swapchain_loader
                .acquire_next_image(self.swapchain, timeout, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquiredImage { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::OutOfDate {
                operation: "vkAcquireNextImageKHR",
            }),
            Err(e) => Err(GpuError::sync("vkAcquireNextImageKHR")(e)),
        }
    }

    /// Present rendered image to screen; Ok(true) means suboptimal
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphores: &[vk::Semaphore]) -> GpuResult<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.context.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::OutOfDate {
                operation: "vkQueuePresentKHR",
            }),
            Err(e) => Err(GpuError::sync("vkQueuePresentKHR")(e)),
        }
    }
}

fn create_color_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> GpuResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }.map_err(GpuError::swapchain("vkCreateImageView"))
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Images belong to the swapchain; only the views are ours
        unsafe {
            for &view in &self.image_views {
                self.context.device.destroy_image_view(view, None);
            }
            self.context.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
