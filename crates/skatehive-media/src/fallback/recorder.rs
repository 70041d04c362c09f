//! Recording format negotiation and the recorder command.

use std::collections::HashSet;
use std::path::Path;

use crate::command::FfmpegCommand;

/// A container/codec pair the recorder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderFormat {
    /// MIME type, with codec parameter where it matters
    pub mime_type: &'static str,
    /// Output file extension
    pub extension: &'static str,
    /// FFmpeg encoder name
    pub encoder: &'static str,
    /// FFmpeg muxer name
    pub muxer: &'static str,
}

impl RecorderFormat {
    /// MIME type without codec parameters.
    pub fn container_mime(&self) -> &'static str {
        self.mime_type
            .split_once(';')
            .map(|(base, _)| base)
            .unwrap_or(self.mime_type)
    }
}

/// Formats in order of preference.
pub const RECORDER_FORMATS: [RecorderFormat; 4] = [
    RecorderFormat {
        mime_type: "video/mp4;codecs=avc1",
        extension: "mp4",
        encoder: "libx264",
        muxer: "mp4",
    },
    RecorderFormat {
        mime_type: "video/mp4",
        extension: "mp4",
        encoder: "mpeg4",
        muxer: "mp4",
    },
    RecorderFormat {
        mime_type: "video/webm;codecs=vp9",
        extension: "webm",
        encoder: "libvpx-vp9",
        muxer: "webm",
    },
    RecorderFormat {
        mime_type: "video/webm;codecs=vp8",
        extension: "webm",
        encoder: "libvpx",
        muxer: "webm",
    },
];

/// First preferred format whose encoder is available.
pub fn negotiate_format(available: &HashSet<String>) -> Option<&'static RecorderFormat> {
    RECORDER_FORMATS
        .iter()
        .find(|f| available.contains(f.encoder))
}

/// Command that encodes raw RGBA canvas frames read from stdin.
pub fn build_recorder_command(
    format: &RecorderFormat,
    width: u32,
    height: u32,
    fps: u32,
    bitrate_kbps: u32,
    output: &Path,
) -> FfmpegCommand {
    let bitrate = format!("{}k", bitrate_kbps);
    let cmd = FfmpegCommand::new("pipe:0", output)
        .input_args(["-f", "rawvideo", "-pix_fmt", "rgba"])
        .input_arg("-s")
        .input_arg(format!("{}x{}", width, height))
        .input_arg("-r")
        .input_arg(fps.to_string())
        .video_codec(format.encoder)
        .output_args(["-b:v", bitrate.as_str(), "-maxrate", bitrate.as_str()])
        .output_arg("-bufsize")
        .output_arg(format!("{}k", bitrate_kbps * 2))
        .output_args(["-pix_fmt", "yuv420p"])
        .without_progress();

    let cmd = match format.encoder {
        "libx264" => cmd.preset("veryfast"),
        "libvpx-vp9" | "libvpx" => cmd.output_args(["-deadline", "realtime", "-cpu-used", "8"]),
        _ => cmd,
    };

    let cmd = cmd.format(format.muxer);
    if format.muxer == "mp4" {
        cmd.faststart()
    } else {
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoders(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_negotiation_order() {
        let all = encoders(&["libx264", "mpeg4", "libvpx-vp9", "libvpx"]);
        assert_eq!(negotiate_format(&all).unwrap().encoder, "libx264");

        let no_h264 = encoders(&["mpeg4", "libvpx"]);
        assert_eq!(negotiate_format(&no_h264).unwrap().mime_type, "video/mp4");

        let webm_only = encoders(&["libvpx"]);
        let format = negotiate_format(&webm_only).unwrap();
        assert_eq!(format.extension, "webm");
        assert_eq!(format.container_mime(), "video/webm");
    }

    #[test]
    fn test_no_encoder() {
        assert!(negotiate_format(&encoders(&["aac", "png"])).is_none());
    }

    #[test]
    fn test_recorder_command() {
        let args = build_recorder_command(
            &RECORDER_FORMATS[0],
            854,
            480,
            30,
            1_000,
            Path::new("/tmp/out_processed.mp4"),
        )
        .build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgba -s 854x480 -r 30 -i pipe:0"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-b:v 1000k"));
        assert!(joined.contains("-f mp4"));
        assert!(joined.ends_with("/tmp/out_processed.mp4"));
    }
}
