//! Device configuration.

/// Configuration for initializing the graphics device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Application name reported to the driver
    pub app_name: String,
    /// Instance extensions requested on top of what the surface provider needs
    pub instance_extensions: Vec<String>,
    /// Instance layers to enable (missing layers are skipped with a warning)
    pub instance_layers: Vec<String>,
    /// Device extensions requested on top of swapchain and push descriptors
    pub device_extensions: Vec<String>,
    /// Enable the Khronos validation layer and route its output to `log`
    pub validation: bool,
    /// Initial swapchain width
    pub initial_width: u32,
    /// Initial swapchain height
    pub initial_height: u32,
    /// Force FIFO presentation instead of preferring MAILBOX
    pub vsync: bool,
    /// Accept an integrated GPU when no discrete GPU is present
    pub allow_integrated: bool,
    /// Accept a software (CPU) adapter such as lavapipe when no GPU is present
    pub allow_software: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "Canvas".to_string(),
            instance_extensions: Vec::new(),
            instance_layers: Vec::new(),
            device_extensions: Vec::new(),
            validation: cfg!(debug_assertions),
            initial_width: 800,
            initial_height: 600,
            vsync: false,
            allow_integrated: false,
            allow_software: false,
        }
    }
}

impl DeviceConfig {
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn with_extent(mut self, width: u32, height: u32) -> Self {
        self.initial_width = width;
        self.initial_height = height;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_integrated_fallback(mut self, allow: bool) -> Self {
        self.allow_integrated = allow;
        self
    }

    pub fn with_software_fallback(mut self, allow: bool) -> Self {
        self.allow_software = allow;
        self
    }

    pub fn with_instance_layer(mut self, layer: impl Into<String>) -> Self {
        self.instance_layers.push(layer.into());
        self
    }

    pub fn with_instance_extension(mut self, extension: impl Into<String>) -> Self {
        self.instance_extensions.push(extension.into());
        self
    }

    pub fn with_device_extension(mut self, extension: impl Into<String>) -> Self {
        self.device_extensions.push(extension.into());
        self
    }
}
