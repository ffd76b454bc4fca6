//! ABR ladder planning over a fixed table of H.264 renditions.

use serde::Serialize;

/// One rendition ("rung") of the ABR ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ResolutionProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: &'static str,
    pub maxrate: &'static str,
    pub bufsize: &'static str,
    pub audio_bitrate: &'static str,
    pub profile: &'static str,
    pub level: &'static str,
}

/// Frame rate every source may be encoded at, regardless of its own rate.
pub const BASELINE_FPS: u32 = 30;

impl ResolutionProfile {
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Symbolic name, also used as the rendition's directory: `1280x720@30`.
    pub fn name(&self) -> String {
        format!("{}x{}@{}", self.width, self.height, self.fps)
    }

    /// Whether this rung may be produced from a source of the given size/rate.
    pub fn fits(&self, total_pixels: u64, input_fps: u32) -> bool {
        self.pixel_count() <= total_pixels && (self.fps == BASELINE_FPS || self.fps <= input_fps)
    }
}

impl std::fmt::Display for ResolutionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (br={}, mr={}, buf={}, audio={}, prof={}, lvl={})",
            self.name(),
            self.bitrate,
            self.maxrate,
            self.bufsize,
            self.audio_bitrate,
            self.profile,
            self.level
        )
    }
}

macro_rules! rung {
    ($w:expr, $h:expr, $fps:expr, $br:expr, $mr:expr, $buf:expr, $audio:expr, $prof:expr, $lvl:expr) => {
        ResolutionProfile {
            width: $w,
            height: $h,
            fps: $fps,
            bitrate: $br,
            maxrate: $mr,
            bufsize: $buf,
            audio_bitrate: $audio,
            profile: $prof,
            level: $lvl,
        }
    };
}

/// Every rendition the engine knows how to produce.
///
/// Rungs above 4K30/4K60 exceed H.264 level limits for most hardware
/// encoders; they are kept for sources that actually carry them.
pub static PROFILES: &[ResolutionProfile] = &[
    // 8K
    rung!(7680, 4320, 30, "65000k", "75000k", "150000k", "192k", "high", "5.1"),
    rung!(7680, 4320, 60, "85000k", "95000k", "190000k", "192k", "high", "5.1"),
    rung!(7680, 4320, 90, "105000k", "125000k", "240000k", "192k", "high", "5.2"),
    rung!(7680, 4320, 120, "115000k", "135000k", "260000k", "192k", "high", "5.2"),
    rung!(7680, 4320, 144, "125000k", "145000k", "280000k", "192k", "high", "5.2"),
    // 4K UHD
    rung!(3840, 2160, 30, "35000k", "40000k", "80000k", "160k", "high", "5.1"),
    rung!(3840, 2160, 60, "45000k", "50000k", "95000k", "160k", "high", "5.1"),
    rung!(3840, 2160, 90, "55000k", "65000k", "120000k", "160k", "high", "5.2"),
    rung!(3840, 2160, 120, "60000k", "70000k", "130000k", "160k", "high", "5.2"),
    rung!(3840, 2160, 144, "65000k", "75000k", "140000k", "160k", "high", "5.2"),
    // 1440p
    rung!(2560, 1440, 30, "18000k", "20000k", "40000k", "128k", "high", "4.1"),
    rung!(2560, 1440, 60, "24000k", "26000k", "52000k", "128k", "high", "4.1"),
    rung!(2560, 1440, 90, "28000k", "30000k", "60000k", "128k", "high", "4.2"),
    rung!(2560, 1440, 120, "30000k", "32000k", "64000k", "128k", "high", "4.2"),
    rung!(2560, 1440, 144, "32000k", "34000k", "68000k", "128k", "high", "5.0"),
    // 1080p
    rung!(1920, 1080, 30, "10000k", "11000k", "22000k", "96k", "high", "4.1"),
    rung!(1920, 1080, 60, "15000k", "17000k", "34000k", "96k", "high", "4.1"),
    rung!(1920, 1080, 90, "18000k", "20000k", "40000k", "96k", "high", "4.1"),
    rung!(1920, 1080, 120, "20000k", "22000k", "44000k", "96k", "high", "4.2"),
    rung!(1920, 1080, 144, "22000k", "24000k", "48000k", "96k", "high", "4.2"),
    // 720p
    rung!(1280, 720, 30, "6000k", "7000k", "14000k", "64k", "high", "3.1"),
    rung!(1280, 720, 60, "9000k", "10000k", "20000k", "64k", "high", "4.1"),
    rung!(1280, 720, 90, "11000k", "12000k", "24000k", "64k", "high", "4.1"),
    rung!(1280, 720, 120, "13000k", "14000k", "28000k", "64k", "high", "4.1"),
    rung!(1280, 720, 144, "15000k", "16000k", "32000k", "64k", "high", "4.2"),
    // 480p
    rung!(854, 480, 30, "3000k", "3500k", "7000k", "48k", "main", "3.1"),
    rung!(854, 480, 60, "4500k", "5000k", "10000k", "48k", "main", "3.1"),
    rung!(854, 480, 90, "5500k", "6000k", "12000k", "48k", "main", "3.1"),
    rung!(854, 480, 120, "6500k", "7000k", "14000k", "48k", "main", "3.1"),
    rung!(854, 480, 144, "7500k", "8000k", "16000k", "48k", "main", "4.0"),
    // 360p
    rung!(640, 360, 30, "1500k", "1800k", "3600k", "48k", "main", "3.1"),
    rung!(640, 360, 60, "2250k", "2600k", "5200k", "48k", "main", "3.1"),
    rung!(640, 360, 90, "2750k", "3200k", "6400k", "48k", "main", "3.1"),
    rung!(640, 360, 120, "3250k", "3800k", "7600k", "48k", "main", "3.1"),
    rung!(640, 360, 144, "3750k", "4400k", "8800k", "48k", "main", "4.0"),
    // 320p
    rung!(480, 320, 30, "1200k", "1440k", "2880k", "48k", "constrained_baseline", "3.0"),
    rung!(480, 320, 60, "1800k", "2160k", "4320k", "48k", "constrained_baseline", "3.0"),
    rung!(480, 320, 90, "2200k", "2600k", "5200k", "48k", "constrained_baseline", "3.1"),
    rung!(480, 320, 120, "2600k", "3120k", "6240k", "48k", "constrained_baseline", "3.1"),
    rung!(480, 320, 144, "3000k", "3600k", "7200k", "48k", "constrained_baseline", "4.0"),
];

/// Compute the ladder for a source of `total_pixels` at `input_fps`.
///
/// Rungs larger than the source are dropped, as are rungs whose rate exceeds
/// the source rate (30 fps always stays eligible). One rung is kept per
/// resolution, the one with the highest eligible rate, and the result is
/// ordered from largest to smallest.
pub fn plan(total_pixels: u64, input_fps: u32) -> Vec<ResolutionProfile> {
    let mut rungs: Vec<ResolutionProfile> = PROFILES
        .iter()
        .filter(|p| p.fits(total_pixels, input_fps))
        .copied()
        .collect();

    rungs.sort_by(|a, b| {
        b.pixel_count()
            .cmp(&a.pixel_count())
            .then_with(|| b.fps.cmp(&a.fps))
    });
    rungs.dedup_by_key(|p| p.pixel_count());
    rungs
}
