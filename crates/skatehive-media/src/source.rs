//! Opening source files and sniffing their container.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use skatehive_models::SourceFile;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Bytes read from the head of a file for sniffing.
const SNIFF_LEN: u64 = 64;

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Brands of the ISO base media family that deliver as plain MP4.
const MP4_BRANDS: &[&[u8; 4]] = &[
    b"isom", b"iso2", b"iso3", b"iso4", b"iso5", b"iso6", b"mp41", b"mp42", b"avc1", b"M4V ",
    b"M4A ", b"dash", b"MSNV", b"mmp4",
];

/// Top-level atoms that open QuickTime files written without `ftyp`.
const QUICKTIME_ATOMS: &[&[u8; 4]] = &[b"moov", b"mdat", b"wide", b"free", b"skip", b"pnot"];

/// Container family found in the file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerBrand {
    /// ISO-BMFF with an MP4 major brand
    Mp4,
    /// Apple QuickTime
    QuickTime,
    /// Anything else recognizable (brand or family name)
    Other(String),
}

impl fmt::Display for ContainerBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerBrand::Mp4 => write!(f, "mp4"),
            ContainerBrand::QuickTime => write!(f, "quicktime"),
            ContainerBrand::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Build a [`SourceFile`] for a file on disk.
///
/// The MIME type is guessed from the extension; an unknown extension gives
/// an empty MIME type.
pub async fn open_source(path: impl AsRef<Path>) -> MediaResult<SourceFile> {
    let path = path.as_ref();
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MediaError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    if !metadata.is_file() {
        return Err(MediaError::invalid_video(format!(
            "{} is not a regular file",
            path.display()
        )));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mime_type = mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_default();
    let last_modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    Ok(SourceFile::new(
        path,
        name,
        mime_type,
        metadata.len(),
        last_modified,
    ))
}

/// Identify the container from the first bytes of a file.
///
/// Returns `None` when the file cannot be read or the magic is unknown.
pub async fn sniff_container(path: impl AsRef<Path>) -> Option<ContainerBrand> {
    let path = path.as_ref();
    let header = match read_header(path).await {
        Ok(h) => h,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Container sniff failed");
            return None;
        }
    };
    brand_from_header(&header)
}

async fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut header = Vec::with_capacity(SNIFF_LEN as usize);
    file.take(SNIFF_LEN).read_to_end(&mut header).await?;
    Ok(header)
}

/// Identify the container from header bytes.
pub fn brand_from_header(header: &[u8]) -> Option<ContainerBrand> {
    if header.len() >= 4 && header[..4] == EBML_MAGIC {
        return Some(ContainerBrand::Other("matroska".to_string()));
    }
    if header.len() >= 12 && &header[..4] == b"RIFF" && &header[8..12] == b"AVI " {
        return Some(ContainerBrand::Other("avi".to_string()));
    }
    if header.len() < 12 {
        return None;
    }

    let box_type: &[u8] = &header[4..8];
    if box_type == b"ftyp" {
        let major = &header[8..12];
        if major == b"qt  " {
            return Some(ContainerBrand::QuickTime);
        }
        if MP4_BRANDS.iter().any(|b| b.as_slice() == major) {
            return Some(ContainerBrand::Mp4);
        }
        return Some(ContainerBrand::Other(
            String::from_utf8_lossy(major).trim().to_string(),
        ));
    }

    if QUICKTIME_ATOMS.iter().any(|a| a.as_slice() == box_type) {
        return Some(ContainerBrand::QuickTime);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ftyp(brand: &[u8; 4]) -> Vec<u8> {
        let mut header = vec![0x00, 0x00, 0x00, 0x20];
        header.extend_from_slice(b"ftyp");
        header.extend_from_slice(brand);
        header.extend_from_slice(&[0, 0, 0, 0]);
        header.extend_from_slice(b"isommp41");
        header
    }

    #[test]
    fn test_iso_brands() {
        assert_eq!(brand_from_header(&ftyp(b"isom")), Some(ContainerBrand::Mp4));
        assert_eq!(brand_from_header(&ftyp(b"mp42")), Some(ContainerBrand::Mp4));
        assert_eq!(
            brand_from_header(&ftyp(b"qt  ")),
            Some(ContainerBrand::QuickTime)
        );
        assert_eq!(
            brand_from_header(&ftyp(b"3gp4")),
            Some(ContainerBrand::Other("3gp4".to_string()))
        );
    }

    #[test]
    fn test_other_families() {
        let webm = [0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x86, 0x81];
        assert_eq!(
            brand_from_header(&webm),
            Some(ContainerBrand::Other("matroska".to_string()))
        );

        let mut avi = b"RIFF".to_vec();
        avi.extend_from_slice(&[0, 0, 0, 0]);
        avi.extend_from_slice(b"AVI LIST");
        assert_eq!(
            brand_from_header(&avi),
            Some(ContainerBrand::Other("avi".to_string()))
        );

        let mut legacy_mov = vec![0, 0, 0, 8];
        legacy_mov.extend_from_slice(b"wide");
        legacy_mov.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(
            brand_from_header(&legacy_mov),
            Some(ContainerBrand::QuickTime)
        );
    }

    #[test]
    fn test_unknown_or_short() {
        assert_eq!(brand_from_header(b""), None);
        assert_eq!(brand_from_header(b"ftyp"), None);
        assert_eq!(brand_from_header(b"this is not a video file"), None);
    }

    #[tokio::test]
    async fn test_sniff_and_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mov");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&ftyp(b"qt  ")).unwrap();
        file.write_all(&[0u8; 256]).unwrap();
        drop(file);

        assert_eq!(sniff_container(&path).await, Some(ContainerBrand::QuickTime));

        let source = open_source(&path).await.unwrap();
        assert_eq!(source.name, "clip.mov");
        assert_eq!(source.mime_type, "video/quicktime");
        assert_eq!(source.size, 288);
        assert!(source.is_declared_quicktime());
    }

    #[tokio::test]
    async fn test_missing_file() {
        assert_eq!(sniff_container("/nonexistent/clip.mp4").await, None);
        assert!(matches!(
            open_source("/nonexistent/clip.mp4").await,
            Err(MediaError::FileNotFound(_))
        ));
    }
}
