//! Environment snapshot of the machine running the pipeline.

use std::path::Path;

use skatehive_models::EnvironmentSnapshot;
use sysinfo::System;
use tracing::debug;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// User agent used when the pipeline runs on its own host rather than on
/// behalf of a browser.
pub fn host_user_agent() -> String {
    format!(
        "skatehive-ingest/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Describe the local machine: its memory and whether an engine binary is
/// available. `ffmpeg` is the configured binary; `None` looks it up in PATH.
pub fn host_snapshot(ffmpeg: Option<&Path>) -> EnvironmentSnapshot {
    let mut system = System::new();
    system.refresh_memory();
    let total = system.total_memory();
    let memory_gb = (total > 0).then(|| (total as f64 / GB) as f32);

    let engine_available = match ffmpeg {
        Some(binary) => which::which(binary).is_ok(),
        None => which::which("ffmpeg").is_ok(),
    };
    debug!(
        memory_gb = ?memory_gb,
        engine_available,
        "Captured host snapshot"
    );

    let mut snapshot = EnvironmentSnapshot::from_user_agent(host_user_agent())
        .with_platform(format!("{} {}", std::env::consts::OS, std::env::consts::ARCH))
        .with_capabilities(true, engine_available);
    snapshot.device_memory_gb = memory_gb;
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use skatehive_models::PlatformFamily;

    #[test]
    fn test_host_is_desktop() {
        let snapshot = host_snapshot(None);
        assert!(snapshot.user_agent.starts_with("skatehive-ingest/"));
        let profile = skatehive_media::detect(&snapshot);
        assert_eq!(profile.platform, PlatformFamily::Desktop);
    }

    #[test]
    fn test_missing_configured_binary() {
        let snapshot = host_snapshot(Some(Path::new("/nonexistent/bin/ffmpeg")));
        assert!(!snapshot.engine_runtime_available);
    }

    #[cfg(unix)]
    #[test]
    fn test_configured_binary_outside_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("ffmpeg-custom");
        std::fs::write(&binary, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let snapshot = host_snapshot(Some(&binary));
        assert!(snapshot.engine_runtime_available);
    }
}
