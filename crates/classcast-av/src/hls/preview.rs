//! Low-latency single-rendition preview of a live ingest.
//!
//! Previews trade quality for delay: half-second segments, a two-entry
//! sliding playlist and old segments deleted as new ones land.

use std::path::Path;

use crate::accel::AccelerationMode;

/// Build the preview command for `url`.
///
/// Segments go to `segments_dir/%03d.ts` and are referenced from the
/// playlist as `{preview_id}/NNN.ts`, so `manifest` must sit next to
/// `segments_dir`.
pub fn build_preview(
    ffmpeg: &Path,
    url: &str,
    preview_id: &str,
    manifest: &Path,
    segments_dir: &Path,
    accel: AccelerationMode,
    vaapi_device: &Path,
) -> Vec<String> {
    let mut argv = vec![
        ffmpeg.to_string_lossy().into_owned(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-y".to_string(),
    ];

    if accel == AccelerationMode::Vaapi {
        argv.extend([
            "-vaapi_device".to_string(),
            vaapi_device.to_string_lossy().into_owned(),
        ]);
    }

    argv.extend([
        "-fflags".to_string(),
        "nobuffer".to_string(),
        "-re".to_string(),
        "-i".to_string(),
        url.to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "0:a:0?".to_string(),
    ]);

    let video: &[&str] = match accel {
        AccelerationMode::Vaapi => &["-vf", "format=nv12,hwupload", "-c:v", "h264_vaapi", "-qp", "24"],
        AccelerationMode::Nvidia => &["-c:v", "h264_nvenc", "-preset", "p1", "-tune", "ll"],
        AccelerationMode::None => &["-c:v", "libx264", "-preset", "ultrafast", "-tune", "zerolatency"],
    };
    argv.extend(video.iter().map(|s| s.to_string()));

    argv.extend([
        "-g".to_string(),
        "10".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "64k".to_string(),
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        "0.5".to_string(),
        "-hls_list_size".to_string(),
        "2".to_string(),
        "-hls_flags".to_string(),
        "delete_segments+independent_segments+program_date_time".to_string(),
        "-hls_segment_type".to_string(),
        "mpegts".to_string(),
        "-hls_segment_filename".to_string(),
        segments_dir.join("%03d.ts").to_string_lossy().into_owned(),
        "-hls_base_url".to_string(),
        format!("{preview_id}/"),
        manifest.to_string_lossy().into_owned(),
    ]);

    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_preview() {
        let argv = build_preview(
            Path::new("ffmpeg"),
            "rtmp://ingest/live/55_abc",
            "55_abc",
            Path::new("/media/previews/55_abc.m3u8"),
            Path::new("/media/previews/55_abc"),
            AccelerationMode::None,
            Path::new("/dev/dri/renderD128"),
        );
        assert!(argv.contains(&"zerolatency".to_string()));
        assert!(!argv.contains(&"-vaapi_device".to_string()));
        assert!(argv.contains(&"/media/previews/55_abc/%03d.ts".to_string()));
        assert!(argv.contains(&"55_abc/".to_string()));
        assert_eq!(argv.last().unwrap(), "/media/previews/55_abc.m3u8");
    }

    #[test]
    fn vaapi_preview_uploads_frames() {
        let argv = build_preview(
            Path::new("ffmpeg"),
            "rtmp://ingest/live/55_abc",
            "55_abc",
            Path::new("/m/previews/55_abc.m3u8"),
            Path::new("/m/previews/55_abc"),
            AccelerationMode::Vaapi,
            Path::new("/dev/dri/renderD129"),
        );
        let dev = argv.iter().position(|a| a == "-vaapi_device").unwrap();
        assert_eq!(argv[dev + 1], "/dev/dri/renderD129");
        assert!(argv.contains(&"h264_vaapi".to_string()));
    }
}
