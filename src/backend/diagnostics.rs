// Diagnostic channel - validation layer message routing
//
// The driver calls `vulkan_debug_callback` with one severity bit and one
// category bit. Both are mapped through closed tables; anything outside them
// means the callback is out of sync with the API and the sink is flagged broken.

use ash::vk;
use serde::Deserialize;
use std::ffi::{c_void, CStr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSeverity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl MessageSeverity {
    pub const ALL: [MessageSeverity; 4] = [
        MessageSeverity::Verbose,
        MessageSeverity::Info,
        MessageSeverity::Warning,
        MessageSeverity::Error,
    ];

    pub fn from_flags(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Option<Self> {
        match flags {
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => Some(MessageSeverity::Verbose),
            vk::DebugUtilsMessageSeverityFlagsEXT::INFO => Some(MessageSeverity::Info),
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => Some(MessageSeverity::Warning),
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => Some(MessageSeverity::Error),
            _ => None,
        }
    }

    pub fn flags(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        match self {
            MessageSeverity::Verbose => vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
            MessageSeverity::Info => vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            MessageSeverity::Warning => vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            MessageSeverity::Error => vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        }
    }

    pub fn level(self) -> log::Level {
        match self {
            MessageSeverity::Verbose => log::Level::Trace,
            MessageSeverity::Info => log::Level::Info,
            MessageSeverity::Warning => log::Level::Warn,
            MessageSeverity::Error => log::Level::Error,
        }
    }

    /// Messenger mask covering `self` and every more severe level
    pub fn at_least(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        MessageSeverity::ALL
            .iter()
            .filter(|&&severity| severity >= self)
            .fold(vk::DebugUtilsMessageSeverityFlagsEXT::empty(), |mask, severity| {
                mask | severity.flags()
            })
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// VK_EXT_device_address_binding_report message type bit
pub const DEVICE_ADDRESS_BINDING: vk::DebugUtilsMessageTypeFlagsEXT =
    vk::DebugUtilsMessageTypeFlagsEXT::from_raw(0x0000_0008);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCategory {
    General,
    Validation,
    Performance,
    DeviceAddressBinding,
}

impl MessageCategory {
    pub fn from_flags(flags: vk::DebugUtilsMessageTypeFlagsEXT) -> Option<Self> {
        match flags {
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => Some(MessageCategory::General),
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => Some(MessageCategory::Validation),
            vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => Some(MessageCategory::Performance),
            DEVICE_ADDRESS_BINDING => Some(MessageCategory::DeviceAddressBinding),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            MessageCategory::General => "[vk_general]",
            MessageCategory::Validation => "[vk_validation]",
            MessageCategory::Performance => "[vk_performance]",
            MessageCategory::DeviceAddressBinding => "[vk_device_address_binding]",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Which shader instrumentation the validation layer injects.
/// GPU-assisted validation and debug printf cannot be enabled together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderInstrumentation {
    #[default]
    None,
    GpuAssisted,
    DebugPrintf,
}

/// Diagnostics requested at context creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsDesc {
    pub enabled: bool,
    pub min_severity: MessageSeverity,
    pub instrumentation: ShaderInstrumentation,
}

impl Default for DiagnosticsDesc {
    fn default() -> Self {
        Self {
            enabled: false,
            min_severity: MessageSeverity::Verbose,
            instrumentation: ShaderInstrumentation::None,
        }
    }
}

impl DiagnosticsDesc {
    /// Validation features chained into instance creation
    pub fn validation_features(&self) -> Vec<vk::ValidationFeatureEnableEXT> {
        let mut features = vec![
            vk::ValidationFeatureEnableEXT::BEST_PRACTICES,
            vk::ValidationFeatureEnableEXT::SYNCHRONIZATION_VALIDATION,
        ];
        match self.instrumentation {
            ShaderInstrumentation::None => {}
            ShaderInstrumentation::GpuAssisted => features.push(vk::ValidationFeatureEnableEXT::GPU_ASSISTED),
            ShaderInstrumentation::DebugPrintf => features.push(vk::ValidationFeatureEnableEXT::DEBUG_PRINTF),
        }
        features
    }

    pub fn messenger_info(&self, sink: &DiagnosticSink) -> vk::DebugUtilsMessengerCreateInfoEXT {
        vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(self.min_severity.at_least())
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback))
            .user_data(sink as *const DiagnosticSink as *mut c_void)
            .build()
    }
}

/// Counts every routed message by severity and category
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    counts: [[AtomicU32; 4]; 4],
    /// Messages whose severity mapped but whose category did not
    uncategorized: [AtomicU32; 4],
    broken: AtomicBool,
}

impl DiagnosticSink {
    pub fn record(&self, severity: MessageSeverity, category: MessageCategory) {
        self.counts[severity.slot()][category.slot()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, severity: MessageSeverity, category: MessageCategory) -> u32 {
        self.counts[severity.slot()][category.slot()].load(Ordering::Relaxed)
    }

    pub fn uncategorized(&self, severity: MessageSeverity) -> u32 {
        self.uncategorized[severity.slot()].load(Ordering::Relaxed)
    }

    /// Error-severity messages across all categories, uncategorized ones included
    pub fn errors(&self) -> u32 {
        let slot = MessageSeverity::Error.slot();
        self.counts[slot]
            .iter()
            .chain(std::iter::once(&self.uncategorized[slot]))
            .map(|count| count.load(Ordering::Relaxed))
            .sum()
    }

    pub fn mark_broken(&self) {
        self.broken.store(true, Ordering::Relaxed);
    }

    /// Set once the callback received a severity or category it cannot map
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Relaxed)
    }

    /// Route one message; returns false when it could not be classified
    pub fn dispatch(
        &self,
        severity: vk::DebugUtilsMessageSeverityFlagsEXT,
        category: vk::DebugUtilsMessageTypeFlagsEXT,
        message: &str,
    ) -> bool {
        match (MessageSeverity::from_flags(severity), MessageCategory::from_flags(category)) {
            (Some(severity), Some(category)) => {
                log::log!(target: "vulkan", severity.level(), "{} {}", category.tag(), message);
                self.record(severity, category);
                true
            }
            (severity_kind, category_kind) => {
                log::error!(
                    target: "vulkan",
                    "CRITICAL: unmapped debug message (severity {:?} -> {:?}, type {:?} -> {:?}): {}",
                    severity,
                    severity_kind,
                    category,
                    category_kind,
                    message
                );
                self.mark_broken();

                // A known severity still gets its own line and its count
                if let Some(severity) = severity_kind {
                    log::log!(target: "vulkan", severity.level(), "{}", message);
                    self.uncategorized[severity.slot()].fetch_add(1, Ordering::Relaxed);
                }
                false
            }
        }
    }
}

/// Messenger callback; `p_user_data` points at the context's `DiagnosticSink`
pub unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
    };

    match (p_user_data as *const DiagnosticSink).as_ref() {
        Some(sink) => {
            sink.dispatch(message_severity, message_type, &message);
        }
        None => {
            DiagnosticSink::default().dispatch(message_severity, message_type, &message);
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_mask_includes_everything_above_threshold() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Flags;

        assert_eq!(
            MessageSeverity::Verbose.at_least(),
            Flags::VERBOSE | Flags::INFO | Flags::WARNING | Flags::ERROR
        );
        assert_eq!(
            MessageSeverity::Warning.at_least(),
            Flags::WARNING | Flags::ERROR
        );
        assert_eq!(MessageSeverity::Error.at_least(), Flags::ERROR);
    }

    #[test]
    fn every_severity_round_trips_through_its_flag() {
        for severity in MessageSeverity::ALL {
            assert_eq!(MessageSeverity::from_flags(severity.flags()), Some(severity));
        }
        assert_eq!(
            MessageSeverity::from_flags(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
            ),
            None
        );
    }

    #[test]
    fn log_levels_follow_severity() {
        assert_eq!(MessageSeverity::Verbose.level(), log::Level::Trace);
        assert_eq!(MessageSeverity::Info.level(), log::Level::Info);
        assert_eq!(MessageSeverity::Warning.level(), log::Level::Warn);
        assert_eq!(MessageSeverity::Error.level(), log::Level::Error);
    }

    #[test]
    fn classifies_all_four_categories() {
        use vk::DebugUtilsMessageTypeFlagsEXT as Flags;

        assert_eq!(MessageCategory::from_flags(Flags::GENERAL), Some(MessageCategory::General));
        assert_eq!(MessageCategory::from_flags(Flags::VALIDATION), Some(MessageCategory::Validation));
        assert_eq!(MessageCategory::from_flags(Flags::PERFORMANCE), Some(MessageCategory::Performance));
        assert_eq!(
            MessageCategory::from_flags(DEVICE_ADDRESS_BINDING),
            Some(MessageCategory::DeviceAddressBinding)
        );
        assert_eq!(MessageCategory::from_flags(Flags::from_raw(0x10)), None);
    }

    #[test]
    fn sink_counts_classified_messages() {
        let sink = DiagnosticSink::default();

        assert!(sink.dispatch(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            "VUID-test"
        ));
        assert!(sink.dispatch(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            "slow path"
        ));

        assert_eq!(sink.count(MessageSeverity::Error, MessageCategory::Validation), 1);
        assert_eq!(sink.count(MessageSeverity::Warning, MessageCategory::Performance), 1);
        assert_eq!(sink.errors(), 1);
        assert!(!sink.is_broken());
    }

    #[test]
    fn unmapped_message_flags_the_sink_broken() {
        let sink = DiagnosticSink::default();

        assert!(!sink.dispatch(
            vk::DebugUtilsMessageSeverityFlagsEXT::from_raw(0x2000),
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
            "mystery"
        ));
        assert!(sink.is_broken());
        assert_eq!(sink.errors(), 0);
    }

    #[test]
    fn error_with_unknown_category_still_counts_as_error() {
        let sink = DiagnosticSink::default();

        assert!(!sink.dispatch(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            vk::DebugUtilsMessageTypeFlagsEXT::from_raw(0x10),
            "VUID-new-category"
        ));
        assert!(sink.is_broken());
        assert_eq!(sink.uncategorized(MessageSeverity::Error), 1);
        assert_eq!(sink.errors(), 1);
    }

    #[test]
    fn instrumentation_is_exclusive() {
        let features = |instrumentation| {
            DiagnosticsDesc {
                enabled: true,
                min_severity: MessageSeverity::Info,
                instrumentation,
            }
            .validation_features()
        };

        let gpu = features(ShaderInstrumentation::GpuAssisted);
        assert!(gpu.contains(&vk::ValidationFeatureEnableEXT::GPU_ASSISTED));
        assert!(!gpu.contains(&vk::ValidationFeatureEnableEXT::DEBUG_PRINTF));

        let printf = features(ShaderInstrumentation::DebugPrintf);
        assert!(printf.contains(&vk::ValidationFeatureEnableEXT::DEBUG_PRINTF));
        assert!(!printf.contains(&vk::ValidationFeatureEnableEXT::GPU_ASSISTED));

        let none = features(ShaderInstrumentation::None);
        assert_eq!(
            none,
            vec![
                vk::ValidationFeatureEnableEXT::BEST_PRACTICES,
                vk::ValidationFeatureEnableEXT::SYNCHRONIZATION_VALIDATION,
            ]
        );
    }
}
