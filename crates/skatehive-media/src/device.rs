//! Device capability detection.
//!
//! Derives a [`DeviceProfile`] from identifying strings. Pure and
//! synchronous; the same snapshot always yields the same profile.

use std::sync::OnceLock;

use regex::Regex;
use skatehive_models::{
    BrowserFamily, DeviceProfile, EnvironmentSnapshot, MemoryTier, OsVersion, PlatformFamily,
};
use tracing::debug;

/// iOS releases below this cannot run the primary engine.
const MIN_IOS_ENGINE_MAJOR: u32 = 15;
/// iOS releases below this are treated as legacy.
const MIN_IOS_MODERN_MAJOR: u32 = 16;
/// Android releases below this are legacy when paired with an old engine.
const MIN_ANDROID_MODERN_MAJOR: u32 = 10;
/// Chrome engine releases below this are legacy on old Android.
const MIN_CHROME_MODERN_MAJOR: u32 = 90;

const OTHER_MOBILE_TOKENS: &[&str] = &[
    "Mobile",
    "Opera Mini",
    "IEMobile",
    "BlackBerry",
    "webOS",
    "Windows Phone",
];

fn ios_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"OS (\d+)[_.](\d+)").expect("valid iOS version pattern"))
}

fn safari_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Version/(\d+)\.(\d+)").expect("valid Safari version pattern"))
}

fn android_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Android (\d+)(?:\.(\d+))?").expect("valid Android version pattern")
    })
}

fn chrome_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:Chrome|CriOS)/(\d+)").expect("valid Chrome version pattern"))
}

/// Build the device profile for a runtime snapshot.
pub fn detect(env: &EnvironmentSnapshot) -> DeviceProfile {
    let ua = env.user_agent.as_str();

    let platform = detect_platform(env);
    let os_version = match platform {
        PlatformFamily::IosPhone | PlatformFamily::IosTablet => ios_version(ua),
        PlatformFamily::Android => capture_version(android_version_re(), ua),
        _ => None,
    };
    let browser = detect_browser(ua);
    let browser_engine_version = chrome_version_re()
        .captures(ua)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    let memory = MemoryTier::from_gb(env.device_memory_gb);

    let android_legacy = platform == PlatformFamily::Android
        && matches!(
            (os_version, browser_engine_version),
            (Some(os), Some(engine)) if os.major < MIN_ANDROID_MODERN_MAJOR && engine < MIN_CHROME_MODERN_MAJOR
        );
    let ios_major = os_version
        .filter(|_| platform.is_ios())
        .map(|v| v.major);

    let legacy = android_legacy || ios_major.is_some_and(|m| m < MIN_IOS_MODERN_MAJOR);

    let wasm_transcode_supported = env.shared_memory_available
        && env.engine_runtime_available
        && !ios_major.is_some_and(|m| m < MIN_IOS_ENGINE_MAJOR)
        && !android_legacy
        && memory != MemoryTier::VeryLow;

    let profile = DeviceProfile {
        platform,
        os_version,
        browser,
        browser_engine_version,
        memory,
        legacy,
        wasm_transcode_supported,
    };

    debug!(
        platform = %profile.platform,
        os_version = ?profile.os_version.map(|v| v.to_string()),
        browser = ?profile.browser,
        memory = ?profile.memory,
        legacy = profile.legacy,
        wasm = profile.wasm_transcode_supported,
        "Detected device profile"
    );

    profile
}

fn detect_platform(env: &EnvironmentSnapshot) -> PlatformFamily {
    let ua = env.user_agent.as_str();

    // iPadOS reports a desktop Mac identity but exposes touch points
    let desktop_mode_ipad =
        env.platform.as_deref() == Some("MacIntel") && env.max_touch_points > 1;

    if ua.contains("iPad") || desktop_mode_ipad {
        PlatformFamily::IosTablet
    } else if ua.contains("iPhone") || ua.contains("iPod") {
        PlatformFamily::IosPhone
    } else if ua.contains("Android") {
        PlatformFamily::Android
    } else if OTHER_MOBILE_TOKENS.iter().any(|t| ua.contains(t)) {
        PlatformFamily::OtherMobile
    } else {
        PlatformFamily::Desktop
    }
}

fn ios_version(ua: &str) -> Option<OsVersion> {
    capture_version(ios_version_re(), ua).or_else(|| capture_version(safari_version_re(), ua))
}

fn capture_version(re: &Regex, ua: &str) -> Option<OsVersion> {
    let caps = re.captures(ua)?;
    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    Some(OsVersion::new(major, minor))
}

fn detect_browser(ua: &str) -> BrowserFamily {
    if ua.contains("SamsungBrowser") {
        BrowserFamily::SamsungInternet
    } else if ua.contains("Edg/") || ua.contains("EdgA/") || ua.contains("EdgiOS/") {
        BrowserFamily::Edge
    } else if ua.contains("Firefox/") || ua.contains("FxiOS/") {
        BrowserFamily::Firefox
    } else if ua.contains("Chrome/") || ua.contains("CriOS/") {
        BrowserFamily::Chrome
    } else if ua.contains("Safari/") {
        BrowserFamily::Safari
    } else {
        BrowserFamily::Other
    }
}
