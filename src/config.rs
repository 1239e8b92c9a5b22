use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CAPTURE_WIDTH: u32 = 3840;
const DEFAULT_CAPTURE_HEIGHT: u32 = 2160;
const DEFAULT_WORKING_WIDTH: u32 = 1920;
const DEFAULT_WORKING_HEIGHT: u32 = 1080;
const DEFAULT_WORKER_COUNT: usize = 2;
const DEFAULT_QUEUE_CAPACITY: usize = 8;
const DEFAULT_CLAMP_X: i32 = 40;
const DEFAULT_CLAMP_Y: i32 = 210;
const DEFAULT_MAX_FEATURES: usize = 16;
const DEFAULT_REDETECT_FLOOR: usize = 12;
const DEFAULT_MIN_FEATURE_DISTANCE: u32 = 15;
const DEFAULT_MIN_CORNER_SCORE: f32 = 100.0;
const DEFAULT_LK_WINDOW_HALF: usize = 7;
const DEFAULT_LK_MAX_ITERATIONS: usize = 20;
const DEFAULT_LK_EPSILON: f32 = 0.03;
const DEFAULT_PYRAMID_LEVELS: usize = 3;
const DEFAULT_LPF_ALPHA: f32 = 0.5;
// px of image motion per unit of filtered rotation, per axis. The vertical
// axis is wider in the rotated-portrait output, hence the asymmetry.
const DEFAULT_GYRO_SCALE_X: f32 = 3.2e-3 / 1.6e-6;
const DEFAULT_GYRO_SCALE_Y: f32 = 2.4e-3 / 1.6e-6;
const DEFAULT_GYRO_SATURATION_PX: f32 = 100.0;
const DEFAULT_SENSOR_INTERVAL_MS: u64 = 15;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    capture: Option<SizeFile>,
    working: Option<SizeFile>,
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    stabilizer: Option<StabilizerFile>,
    sensor_interval_ms: Option<u64>,
    color_profile: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SizeFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StabilizerFile {
    clamp_x: Option<i32>,
    clamp_y: Option<i32>,
    max_features: Option<usize>,
    redetect_floor: Option<usize>,
    min_feature_distance: Option<u32>,
    min_corner_score: Option<f32>,
    lk_window_half: Option<usize>,
    lk_max_iterations: Option<usize>,
    lk_epsilon: Option<f32>,
    pyramid_levels: Option<usize>,
    lpf_alpha: Option<f32>,
    gyro_scale_x: Option<f32>,
    gyro_scale_y: Option<f32>,
    gyro_saturation_px: Option<f32>,
}

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width and height swapped, as produced by the 90-degree rotation.
    pub fn transposed(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

/// Output pixel color matrix profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorProfile {
    /// BT.601 full-range (legacy capture paths).
    Bt601,
    /// BT.709 limited-range (default for HD capture).
    Bt709,
}

/// Tuning for the motion estimator.
#[derive(Debug, Clone)]
pub struct StabilizerConfig {
    /// Symmetric clamp for the horizontal offset, in capture pixels. Even.
    pub clamp_x: i32,
    /// Symmetric clamp for the vertical offset, in capture pixels. Even.
    /// Wider than `clamp_x`: this axis becomes lateral after rotation.
    pub clamp_y: i32,
    pub max_features: usize,
    /// Re-detect when the tracked count falls below this.
    pub redetect_floor: usize,
    /// Minimum spacing between detected corners, in analysis pixels.
    pub min_feature_distance: u32,
    pub min_corner_score: f32,
    /// Optical-flow patch half-size; the patch is (2n+1) square.
    pub lk_window_half: usize,
    pub lk_max_iterations: usize,
    /// Convergence threshold in pixels.
    pub lk_epsilon: f32,
    pub pyramid_levels: usize,
    /// Single-pole low-pass coefficient for gyro smoothing.
    pub lpf_alpha: f32,
    pub gyro_scale_x: f32,
    pub gyro_scale_y: f32,
    /// Per-axis fused-rate magnitude (in pixels) beyond which the
    /// estimator treats the sensor as saturated.
    pub gyro_saturation_px: f32,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            clamp_x: DEFAULT_CLAMP_X,
            clamp_y: DEFAULT_CLAMP_Y,
            max_features: DEFAULT_MAX_FEATURES,
            redetect_floor: DEFAULT_REDETECT_FLOOR,
            min_feature_distance: DEFAULT_MIN_FEATURE_DISTANCE,
            min_corner_score: DEFAULT_MIN_CORNER_SCORE,
            lk_window_half: DEFAULT_LK_WINDOW_HALF,
            lk_max_iterations: DEFAULT_LK_MAX_ITERATIONS,
            lk_epsilon: DEFAULT_LK_EPSILON,
            pyramid_levels: DEFAULT_PYRAMID_LEVELS,
            lpf_alpha: DEFAULT_LPF_ALPHA,
            gyro_scale_x: DEFAULT_GYRO_SCALE_X,
            gyro_scale_y: DEFAULT_GYRO_SCALE_Y,
            gyro_saturation_px: DEFAULT_GYRO_SATURATION_PX,
        }
    }
}

/// Pipeline configuration, fixed at initialization.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub capture: Resolution,
    /// Intermediate resolution the transform chain scales down to.
    pub working: Resolution,
    /// Output resolution; always `working` transposed by the rotation.
    pub display: Resolution,
    pub workers: usize,
    pub queue_capacity: usize,
    pub stabilizer: StabilizerConfig,
    pub sensor_interval: Duration,
    pub color_profile: ColorProfile,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let working = Resolution::new(DEFAULT_WORKING_WIDTH, DEFAULT_WORKING_HEIGHT);
        Self {
            capture: Resolution::new(DEFAULT_CAPTURE_WIDTH, DEFAULT_CAPTURE_HEIGHT),
            working,
            display: working.transposed(),
            workers: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stabilizer: StabilizerConfig::default(),
            sensor_interval: Duration::from_millis(DEFAULT_SENSOR_INTERVAL_MS),
            color_profile: ColorProfile::Bt709,
        }
    }
}

impl PipelineConfig {
    /// Load configuration: defaults, then the JSON file named by
    /// `STEADYCAM_CONFIG` (if set), then env-var overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("STEADYCAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let mut cfg = Self::default();
        if let Some(size) = file.capture {
            cfg.capture = Resolution::new(
                size.width.unwrap_or(cfg.capture.width),
                size.height.unwrap_or(cfg.capture.height),
            );
        }
        if let Some(size) = file.working {
            cfg.working = Resolution::new(
                size.width.unwrap_or(cfg.working.width),
                size.height.unwrap_or(cfg.working.height),
            );
        }
        cfg.display = cfg.working.transposed();
        if let Some(workers) = file.workers {
            cfg.workers = workers;
        }
        if let Some(capacity) = file.queue_capacity {
            cfg.queue_capacity = capacity;
        }
        if let Some(ms) = file.sensor_interval_ms {
            cfg.sensor_interval = Duration::from_millis(ms);
        }
        if let Some(profile) = file.color_profile.as_deref() {
            if let Ok(parsed) = parse_color_profile(profile) {
                cfg.color_profile = parsed;
            }
        }
        if let Some(stab) = file.stabilizer {
            let s = &mut cfg.stabilizer;
            s.clamp_x = stab.clamp_x.unwrap_or(s.clamp_x);
            s.clamp_y = stab.clamp_y.unwrap_or(s.clamp_y);
            s.max_features = stab.max_features.unwrap_or(s.max_features);
            s.redetect_floor = stab.redetect_floor.unwrap_or(s.redetect_floor);
            s.min_feature_distance = stab.min_feature_distance.unwrap_or(s.min_feature_distance);
            s.min_corner_score = stab.min_corner_score.unwrap_or(s.min_corner_score);
            s.lk_window_half = stab.lk_window_half.unwrap_or(s.lk_window_half);
            s.lk_max_iterations = stab.lk_max_iterations.unwrap_or(s.lk_max_iterations);
            s.lk_epsilon = stab.lk_epsilon.unwrap_or(s.lk_epsilon);
            s.pyramid_levels = stab.pyramid_levels.unwrap_or(s.pyramid_levels);
            s.lpf_alpha = stab.lpf_alpha.unwrap_or(s.lpf_alpha);
            s.gyro_scale_x = stab.gyro_scale_x.unwrap_or(s.gyro_scale_x);
            s.gyro_scale_y = stab.gyro_scale_y.unwrap_or(s.gyro_scale_y);
            s.gyro_saturation_px = stab.gyro_saturation_px.unwrap_or(s.gyro_saturation_px);
        }
        cfg
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(workers) = std::env::var("STEADYCAM_WORKERS") {
            self.workers = workers
                .parse()
                .map_err(|_| anyhow!("STEADYCAM_WORKERS must be an integer"))?;
        }
        if let Ok(capacity) = std::env::var("STEADYCAM_QUEUE_CAPACITY") {
            self.queue_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("STEADYCAM_QUEUE_CAPACITY must be an integer"))?;
        }
        if let Ok(profile) = std::env::var("STEADYCAM_COLOR_PROFILE") {
            if !profile.trim().is_empty() {
                self.color_profile = parse_color_profile(&profile)?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("worker count must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow!("queue capacity must be at least 1"));
        }
        for (name, r) in [("capture", self.capture), ("working", self.working)] {
            if r.width == 0 || r.height == 0 {
                return Err(anyhow!("{} resolution must be non-zero", name));
            }
            if r.width % 2 != 0 || r.height % 2 != 0 {
                return Err(anyhow!(
                    "{} resolution must be even for chroma subsampling",
                    name
                ));
            }
        }
        if self.capture.width % self.working.width != 0
            || self.capture.height % self.working.height != 0
        {
            return Err(anyhow!(
                "capture resolution must be an integer multiple of working resolution"
            ));
        }
        if self.display != self.working.transposed() {
            return Err(anyhow!(
                "display resolution must equal the working resolution transposed"
            ));
        }
        let s = &self.stabilizer;
        if s.clamp_x <= 0 || s.clamp_y <= 0 {
            return Err(anyhow!("stabilizer clamp ranges must be positive"));
        }
        if s.clamp_x % 2 != 0 || s.clamp_y % 2 != 0 {
            return Err(anyhow!("stabilizer clamp ranges must be even"));
        }
        if s.max_features == 0 {
            return Err(anyhow!("max_features must be at least 1"));
        }
        if s.redetect_floor > s.max_features {
            return Err(anyhow!("redetect_floor cannot exceed max_features"));
        }
        if s.pyramid_levels == 0 {
            return Err(anyhow!("pyramid_levels must be at least 1"));
        }
        if !(0.0..1.0).contains(&s.lpf_alpha) {
            return Err(anyhow!("lpf_alpha must be in [0, 1)"));
        }
        if s.gyro_saturation_px <= 0.0 {
            return Err(anyhow!("gyro_saturation_px must be positive"));
        }
        Ok(())
    }
}

fn parse_color_profile(value: &str) -> Result<ColorProfile> {
    match value.trim().to_ascii_lowercase().as_str() {
        "bt601" | "601" => Ok(ColorProfile::Bt601),
        "bt709" | "709" => Ok(ColorProfile::Bt709),
        other => Err(anyhow!("unknown color profile '{}'", other)),
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() -> Result<()> {
        PipelineConfig::default().validate()
    }

    #[test]
    fn display_is_transposed_working() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.display.width, cfg.working.height);
        assert_eq!(cfg.display.height, cfg.working.width);
    }

    #[test]
    fn rejects_zero_workers() {
        let mut cfg = PipelineConfig::default();
        cfg.workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_odd_clamp() {
        let mut cfg = PipelineConfig::default();
        cfg.stabilizer.clamp_x = 41;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_divisible_working_resolution() {
        let mut cfg = PipelineConfig::default();
        // 2160 is not a multiple of 960.
        cfg.working = Resolution::new(1280, 960);
        cfg.display = cfg.working.transposed();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let file: PipelineConfigFile = serde_json::from_str(
            r#"{
                "capture": {"width": 1920, "height": 1080},
                "working": {"width": 960, "height": 540},
                "workers": 3,
                "stabilizer": {"clamp_x": 20, "lpf_alpha": 0.7}
            }"#,
        )
        .unwrap();
        let cfg = PipelineConfig::from_file(file);
        assert_eq!(cfg.capture, Resolution::new(1920, 1080));
        assert_eq!(cfg.working, Resolution::new(960, 540));
        assert_eq!(cfg.display, Resolution::new(540, 960));
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.stabilizer.clamp_x, 20);
        assert!((cfg.stabilizer.lpf_alpha - 0.7).abs() < 1e-6);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.stabilizer.clamp_y, DEFAULT_CLAMP_Y);
    }

    #[test]
    fn parses_color_profiles() {
        assert_eq!(parse_color_profile("bt601").unwrap(), ColorProfile::Bt601);
        assert_eq!(parse_color_profile(" BT709 ").unwrap(), ColorProfile::Bt709);
        assert!(parse_color_profile("bt2020").is_err());
    }
}
