// Frame loop against a real driver.
//
// These need a Vulkan 1.3 implementation with VK_EXT_headless_surface and the
// Khronos validation layer installed, so they are ignored by default:
//
//     cargo test -- --ignored

use ash::vk;
use gpu_sandbox::backend::{
    ContextDesc, DiagnosticsDesc, FrameSync, GpuContext, GpuError, HeadlessTarget, MessageSeverity,
    PresentationTarget, ShaderInstrumentation, Swapchain,
};
use gpu_sandbox::{FrameOutcome, Renderer, RendererParams};
use std::path::PathBuf;
use std::sync::Arc;

fn validation() -> DiagnosticsDesc {
    DiagnosticsDesc {
        enabled: true,
        min_severity: MessageSeverity::Warning,
        instrumentation: ShaderInstrumentation::None,
    }
}

fn params() -> RendererParams {
    RendererParams {
        app_name: "frame-loop-test".to_string(),
        diagnostics: validation(),
        vertex_shader: PathBuf::from("shaders/triangle.vert.spv"),
        fragment_shader: PathBuf::from("shaders/triangle.frag.spv"),
        clear_color: [0.0, 0.0, 0.0, 1.0],
    }
}

fn context(target: &dyn PresentationTarget) -> Arc<GpuContext> {
    let desc = ContextDesc {
        app_name: "frame-loop-test".to_string(),
        diagnostics: validation(),
    };
    GpuContext::new(&desc, target).expect("context creation")
}

#[test]
#[ignore = "needs a Vulkan 1.3 driver with headless surface support"]
fn headless_frame_is_presented_without_validation_errors() {
    let target = HeadlessTarget::new(1, 1);
    let mut renderer = Renderer::new(&params(), &target).expect("renderer init");
    let diagnostics = renderer.diagnostics();

    let frame = renderer.begin_frame().expect("acquire");
    renderer.record_frame(&frame, |_, _| {}).expect("record");
    let outcome = renderer.end_frame(frame).expect("submit + present");
    assert!(matches!(outcome, FrameOutcome::Presented | FrameOutcome::NeedsRecreate));

    renderer.shutdown().expect("shutdown");

    assert_eq!(diagnostics.errors(), 0);
    assert!(!diagnostics.is_broken());
}

#[test]
#[ignore = "needs a Vulkan 1.3 driver with headless surface support"]
fn swapchain_can_be_rebuilt_on_the_same_surface() {
    let target = HeadlessTarget::new(64, 64);
    let context = context(&target);
    let diagnostics = context.diagnostics();

    let first = Swapchain::new(Arc::clone(&context), target.framebuffer_size()).expect("first swapchain");
    assert!(!first.images.is_empty());
    assert_eq!(first.images.len(), first.image_views.len());
    drop(first);

    let second = Swapchain::new(Arc::clone(&context), target.framebuffer_size()).expect("second swapchain");
    let third = second.recreate(vk::Extent2D { width: 32, height: 32 }).expect("recreated swapchain");
    assert!(!third.images.is_empty());
    drop(third);

    drop(context);
    assert_eq!(diagnostics.errors(), 0);
}

#[test]
#[ignore = "needs a Vulkan 1.3 driver with headless surface support"]
fn second_begin_frame_waits_on_the_fence() {
    let target = HeadlessTarget::new(16, 16);
    let context = context(&target);
    let swapchain = Swapchain::new(Arc::clone(&context), target.framebuffer_size()).expect("swapchain");
    let mut sync = FrameSync::new(Arc::clone(&context)).expect("frame sync");

    sync.begin_frame(&swapchain, u64::MAX).expect("first acquire");

    // Nothing was submitted, so the fence stays unsignaled
    match sync.begin_frame(&swapchain, 1_000_000) {
        Err(GpuError::Sync { result, .. }) => assert_eq!(result, vk::Result::TIMEOUT),
        other => panic!("expected a fence timeout, got {:?}", other),
    }
}
