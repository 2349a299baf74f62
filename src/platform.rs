//! Host platform detection.

/// What the engine needs to know about the host operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub is_mac: bool,
    pub is_windows: bool,
    pub is_linux: bool,
}

impl Platform {
    /// Detect the platform this binary was compiled for.
    pub fn detect() -> Self {
        Self {
            is_mac: cfg!(target_os = "macos"),
            is_windows: cfg!(target_os = "windows"),
            is_linux: cfg!(target_os = "linux"),
        }
    }

    /// Whether child processes can be placed in their own process group and
    /// signalled as a unit.
    pub fn supports_process_groups(&self) -> bool {
        cfg!(unix) && !self.is_windows
    }

    /// Label of the modifier key used for keyboard shortcuts.
    pub fn accelerator_label(&self) -> &'static str {
        if self.is_mac { "Command" } else { "Ctrl" }
    }
}
