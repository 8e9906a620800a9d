// =============================================================================
// GPU SANDBOX - windowed driver for the renderer
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (App)                                         │
// │    └── Renderer                                                 │
// │          ├── Swapchain, Pipeline, Command pools, Frame sync     │
// │          └── GpuContext (instance, surface, device, queues)     │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (one frame in flight):
// 1. Wait for the previous frame's fence
// 2. Acquire swapchain image
// 3. Record: clear + full-screen triangle
// 4. Submit to the graphics queue
// 5. Present on the present queue
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use gpu_sandbox::backend::WindowTarget;
use gpu_sandbox::config::Config;
use gpu_sandbox::{FrameOutcome, Renderer};
use std::path::Path;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = startup(Path::new("config.toml"), init_logging);
    log::info!("Starting GPU sandbox");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        config.window.title
    );
    log::info!(
        "Validation: {} (severity >= {:?}, instrumentation {:?})",
        config.debug.validation,
        config.debug.message_severity,
        config.debug.shader_instrumentation
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop terminated abnormally")?;

    if let Some(e) = app.fatal.take() {
        return Err(e);
    }
    Ok(())
}

/// Install the logger, then load configuration so its fallbacks are reported
fn startup(config_path: &Path, install_logger: impl FnOnce()) -> Config {
    install_logger();
    Config::load_or_default(config_path)
}

/// Info by default, overridable through RUST_LOG
fn init_logging() {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: the renderer is declared before the window so it is dropped first;
/// the surface must not outlive the window it was created from.
struct App {
    config: Config,
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE FLAGS
    // ─────────────────────────────────────────────────────────────────────────
    needs_resize: bool,
    is_minimized: bool,

    /// First unrecoverable error; reported by main after the loop exits
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            needs_resize: false,
            is_minimized: false,
            fatal: None,
        }
    }

    fn init_renderer(&mut self, window: Arc<Window>) -> Result<()> {
        let target = WindowTarget::new(Arc::clone(&window));
        let renderer =
            Renderer::new(&self.config.renderer_params(), &target).context("Failed to initialize renderer")?;

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        // Skip rendering if minimized
        if self.is_minimized {
            return Ok(());
        }

        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return Ok(());
        };

        if self.needs_resize {
            let size = window.inner_size();
            renderer
                .recreate_swapchain(vk::Extent2D {
                    width: size.width,
                    height: size.height,
                })
                .context("Failed to recreate swapchain")?;
            self.needs_resize = false;
        }

        match renderer.render_frame(|_, _| {}).context("Frame failed")? {
            FrameOutcome::Presented => {}
            FrameOutcome::NeedsRecreate => self.needs_resize = true,
        }
        Ok(())
    }

    /// Renderer goes first, then the window
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.take() {
            let diagnostics = renderer.diagnostics();
            if let Err(e) = renderer.shutdown() {
                log::error!("Shutdown error: {}", e);
            }
            if diagnostics.errors() > 0 {
                log::warn!("{} validation error(s) reported this run", diagnostics.errors());
            }
        }
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.fatal.get_or_insert(error);
        self.shutdown(event_loop);
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        if let Err(e) = self.init_renderer(window) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    self.fail(event_loop, e);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static RECORDS: Mutex<Vec<(log::Level, String)>> = Mutex::new(Vec::new());

    struct Recorder;

    impl log::Log for Recorder {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            RECORDS.lock().unwrap().push((record.level(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    static RECORDER: Recorder = Recorder;

    #[test]
    fn broken_config_warning_reaches_the_logger() {
        let path = std::env::temp_dir().join(format!("gpu-sandbox-{}-broken.toml", std::process::id()));
        std::fs::write(&path, "[window\nwidth = ").unwrap();

        let config = startup(&path, || {
            log::set_logger(&RECORDER).unwrap();
            log::set_max_level(log::LevelFilter::Trace);
        });
        std::fs::remove_file(&path).ok();

        assert_eq!(config.window.width, 1280);
        let records = RECORDS.lock().unwrap();
        assert!(records
            .iter()
            .any(|(level, message)| *level == log::Level::Warn && message.contains("Using defaults")));
    }
}
