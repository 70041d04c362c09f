//! Runtime environment snapshot and derived device profile.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Identifying strings and capability flags of the runtime that selected
/// the file. Read-only; captured once per pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EnvironmentSnapshot {
    /// User agent string
    pub user_agent: String,
    /// Platform identifier (e.g. "MacIntel", "Linux armv8l")
    #[serde(default)]
    pub platform: Option<String>,
    /// Number of simultaneous touch points the device reports
    #[serde(default)]
    pub max_touch_points: u32,
    /// Approximate device memory in gigabytes, when exposed
    #[serde(default)]
    pub device_memory_gb: Option<f32>,
    /// Shared-memory primitive required by the threaded engine
    #[serde(default = "default_true")]
    pub shared_memory_available: bool,
    /// Engine runtime (WebAssembly or native engine binary) available
    #[serde(default = "default_true")]
    pub engine_runtime_available: bool,
}

fn default_true() -> bool {
    true
}

impl EnvironmentSnapshot {
    /// Snapshot with only a user agent; capabilities assumed present.
    pub fn from_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            shared_memory_available: true,
            engine_runtime_available: true,
            ..Default::default()
        }
    }

    /// Set the platform identifier.
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Set the reported touch points.
    pub fn with_touch_points(mut self, points: u32) -> Self {
        self.max_touch_points = points;
        self
    }

    /// Set the reported device memory.
    pub fn with_device_memory(mut self, gb: f32) -> Self {
        self.device_memory_gb = Some(gb);
        self
    }

    /// Override capability flags.
    pub fn with_capabilities(mut self, shared_memory: bool, engine_runtime: bool) -> Self {
        self.shared_memory_available = shared_memory;
        self.engine_runtime_available = engine_runtime;
        self
    }
}

/// Coarse platform family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlatformFamily {
    IosPhone,
    IosTablet,
    Android,
    OtherMobile,
    Desktop,
}

impl PlatformFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformFamily::IosPhone => "ios_phone",
            PlatformFamily::IosTablet => "ios_tablet",
            PlatformFamily::Android => "android",
            PlatformFamily::OtherMobile => "other_mobile",
            PlatformFamily::Desktop => "desktop",
        }
    }

    /// Whether this is an iOS family.
    pub fn is_ios(&self) -> bool {
        matches!(self, PlatformFamily::IosPhone | PlatformFamily::IosTablet)
    }

    /// Whether this is any mobile family.
    pub fn is_mobile(&self) -> bool {
        !matches!(self, PlatformFamily::Desktop)
    }
}

impl fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Browser family guessed from the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BrowserFamily {
    Safari,
    Chrome,
    Firefox,
    Edge,
    SamsungInternet,
    Other,
}

/// Approximate memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Device does not expose its memory
    Unknown,
    /// Less than 1 GB
    VeryLow,
    /// Less than 4 GB
    Low,
    /// 4 GB or more
    Standard,
}

impl MemoryTier {
    /// Classify a reported memory amount in gigabytes.
    pub fn from_gb(gb: Option<f32>) -> Self {
        match gb {
            None => MemoryTier::Unknown,
            Some(gb) if !gb.is_finite() || gb <= 0.0 => MemoryTier::Unknown,
            Some(gb) if gb < 1.0 => MemoryTier::VeryLow,
            Some(gb) if gb < 4.0 => MemoryTier::Low,
            Some(_) => MemoryTier::Standard,
        }
    }
}

/// Major/minor OS version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct OsVersion {
    pub major: u32,
    pub minor: u32,
}

impl OsVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Device class used for network timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Mobile,
    Desktop,
}

/// Derived, per-run description of what the device can do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceProfile {
    pub platform: PlatformFamily,
    pub os_version: Option<OsVersion>,
    pub browser: BrowserFamily,
    /// Major version of the embedded browser engine (Chrome/CriOS)
    pub browser_engine_version: Option<u32>,
    pub memory: MemoryTier,
    /// Old OS or browser engine with historically degraded transcoding
    pub legacy: bool,
    pub wasm_transcode_supported: bool,
}

impl DeviceProfile {
    /// Profile for a capable desktop machine.
    pub fn desktop() -> Self {
        Self {
            platform: PlatformFamily::Desktop,
            os_version: None,
            browser: BrowserFamily::Other,
            browser_engine_version: None,
            memory: MemoryTier::Standard,
            legacy: false,
            wasm_transcode_supported: true,
        }
    }

    pub fn is_mobile(&self) -> bool {
        self.platform.is_mobile()
    }

    /// Mobile device that should get the conservative encoding tier.
    pub fn is_constrained(&self) -> bool {
        self.is_mobile()
            && (self.legacy || matches!(self.memory, MemoryTier::VeryLow | MemoryTier::Low))
    }

    pub fn device_class(&self) -> DeviceClass {
        if self.is_mobile() {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }
}
