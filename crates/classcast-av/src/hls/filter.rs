//! Filter-graph strategies, one per acceleration backend.
//!
//! Each strategy splits `[0:v]` into one branch per rung, scales each branch
//! with its backend's scaler and supplies the encoder arguments for it.

use crate::accel::AccelerationMode;
use crate::ladder::ResolutionProfile;

/// A rendered `-filter_complex` graph plus encoder arguments per rung.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGraph {
    pub filter: String,
    /// `encoder_args[i]` belongs to the stream labelled `[v{i}out]`.
    pub encoder_args: Vec<Vec<String>>,
}

/// Output label of rung `index` in the rendered graph.
pub fn output_label(index: usize) -> String {
    format!("[v{index}out]")
}

pub trait FilterGraphStrategy: Send + Sync {
    /// Scale filter name (`scale`, `scale_vaapi`, `scale_cuda`).
    fn scaler(&self) -> &'static str;

    /// Video encoder name.
    fn encoder(&self) -> &'static str;

    /// Backend-specific encoder options for rung `index`.
    fn tuning_args(&self, index: usize, rung: &ResolutionProfile, preset: &str) -> Vec<String>;

    /// Map a table profile name onto one this encoder accepts.
    fn profile_name(&self, profile: &'static str) -> &'static str {
        profile
    }

    fn render(&self, ladder: &[ResolutionProfile], preset: &str) -> FilterGraph {
        let mut filter = format!("[0:v]split={}", ladder.len());
        for i in 0..ladder.len() {
            filter.push_str(&format!("[v{i}]"));
        }
        for (i, rung) in ladder.iter().enumerate() {
            filter.push_str(&format!(
                ";[v{i}]{}=w={}:h={}{}",
                self.scaler(),
                rung.width,
                rung.height,
                output_label(i)
            ));
        }

        let encoder_args = ladder
            .iter()
            .enumerate()
            .map(|(i, rung)| {
                let mut args = vec![
                    format!("-c:v:{i}"),
                    self.encoder().to_string(),
                    format!("-profile:v:{i}"),
                    self.profile_name(rung.profile).to_string(),
                    format!("-level:v:{i}"),
                    rung.level.to_string(),
                    format!("-b:v:{i}"),
                    rung.bitrate.to_string(),
                    format!("-maxrate:v:{i}"),
                    rung.maxrate.to_string(),
                    format!("-bufsize:v:{i}"),
                    rung.bufsize.to_string(),
                    format!("-r:v:{i}"),
                    rung.fps.to_string(),
                    format!("-g:v:{i}"),
                    rung.fps.to_string(),
                    format!("-keyint_min:v:{i}"),
                    rung.fps.to_string(),
                ];
                args.extend(self.tuning_args(i, rung, preset));
                args
            })
            .collect();

        FilterGraph {
            filter,
            encoder_args,
        }
    }
}

/// Software scaling and libx264.
#[derive(Debug, Default)]
pub struct CpuFilterGraph;

impl FilterGraphStrategy for CpuFilterGraph {
    fn scaler(&self) -> &'static str {
        "scale"
    }

    fn encoder(&self) -> &'static str {
        AccelerationMode::None.video_encoder()
    }

    fn tuning_args(&self, index: usize, _rung: &ResolutionProfile, preset: &str) -> Vec<String> {
        vec![
            format!("-preset:v:{index}"),
            preset.to_string(),
            format!("-sc_threshold:v:{index}"),
            "0".to_string(),
        ]
    }

    fn profile_name(&self, profile: &'static str) -> &'static str {
        match profile {
            "constrained_baseline" => "baseline",
            other => other,
        }
    }
}

/// VAAPI surfaces end to end: `scale_vaapi` into `h264_vaapi`.
#[derive(Debug, Default)]
pub struct VaapiFilterGraph;

impl FilterGraphStrategy for VaapiFilterGraph {
    fn scaler(&self) -> &'static str {
        "scale_vaapi"
    }

    fn encoder(&self) -> &'static str {
        AccelerationMode::Vaapi.video_encoder()
    }

    fn tuning_args(&self, index: usize, _rung: &ResolutionProfile, _preset: &str) -> Vec<String> {
        vec![format!("-rc_mode:v:{index}"), "VBR".to_string()]
    }
}

/// CUDA frames: `scale_cuda` into `h264_nvenc`.
#[derive(Debug, Default)]
pub struct NvidiaFilterGraph;

impl FilterGraphStrategy for NvidiaFilterGraph {
    fn scaler(&self) -> &'static str {
        "scale_cuda"
    }

    fn encoder(&self) -> &'static str {
        AccelerationMode::Nvidia.video_encoder()
    }

    // nvenc only knows its own p1..p7 presets.
    fn tuning_args(&self, index: usize, _rung: &ResolutionProfile, preset: &str) -> Vec<String> {
        let nv_preset = match preset {
            "ultrafast" | "superfast" => "p1",
            "veryfast" | "faster" => "p2",
            "fast" => "p4",
            "medium" => "p5",
            _ => "p6",
        };
        vec![
            format!("-preset:v:{index}"),
            nv_preset.to_string(),
            format!("-rc:v:{index}"),
            "vbr".to_string(),
        ]
    }

    fn profile_name(&self, profile: &'static str) -> &'static str {
        match profile {
            "constrained_baseline" => "baseline",
            other => other,
        }
    }
}

static CPU: CpuFilterGraph = CpuFilterGraph;
static VAAPI: VaapiFilterGraph = VaapiFilterGraph;
static NVIDIA: NvidiaFilterGraph = NvidiaFilterGraph;

/// Pick the strategy for an acceleration mode.
pub fn strategy_for(mode: AccelerationMode) -> &'static dyn FilterGraphStrategy {
    match mode {
        AccelerationMode::None => &CPU,
        AccelerationMode::Vaapi => &VAAPI,
        AccelerationMode::Nvidia => &NVIDIA,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ladder::plan;

    #[test]
    fn cpu_graph_splits_and_scales() {
        let ladder = plan(1280 * 720, 30);
        let graph = strategy_for(AccelerationMode::None).render(&ladder, "fast");
        assert_eq!(
            graph.filter,
            "[0:v]split=4[v0][v1][v2][v3];\
             [v0]scale=w=1280:h=720[v0out];\
             [v1]scale=w=854:h=480[v1out];\
             [v2]scale=w=640:h=360[v2out];\
             [v3]scale=w=480:h=320[v3out]"
        );
        assert_eq!(graph.encoder_args.len(), 4);
        assert_eq!(graph.encoder_args[0][..2], ["-c:v:0".to_string(), "libx264".to_string()]);
        assert!(graph.encoder_args[3].contains(&"baseline".to_string()));
    }

    #[test]
    fn hardware_graphs_use_their_scalers() {
        let ladder = plan(1920 * 1080, 30);
        let vaapi = strategy_for(AccelerationMode::Vaapi).render(&ladder, "fast");
        assert!(vaapi.filter.contains("scale_vaapi=w=1920:h=1080"));
        assert!(vaapi.encoder_args.iter().all(|a| a.contains(&"h264_vaapi".to_string())));

        let cuda = strategy_for(AccelerationMode::Nvidia).render(&ladder, "veryfast");
        assert!(cuda.filter.contains("scale_cuda=w=640:h=360"));
        assert!(cuda.encoder_args[0].contains(&"p2".to_string()));
    }

    #[test]
    fn gop_matches_rung_rate() {
        let ladder = plan(1920 * 1080, 60);
        let graph = strategy_for(AccelerationMode::None).render(&ladder, "fast");
        let args = &graph.encoder_args[1];
        let g = args.iter().position(|a| a == "-g:v:1").unwrap();
        assert_eq!(args[g + 1], "60");
    }
}
