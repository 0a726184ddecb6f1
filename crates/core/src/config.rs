//! Generation and parallelism configuration.
//!
//! Defaults mirror the released 540p text+image-to-video checkpoint; the
//! worker CLI overrides individual fields.

use serde::{Deserialize, Serialize};

/// Default positive style suffix appended to every user prompt.
pub const DEFAULT_POS_MAGIC: &str = "画面中的主体动作表现生动自然、画面流畅、生动细节、光线统一柔和、超真实动态捕捉、大师级运镜、整体不变形、超高清、画面稳定、逼真的细节、专业级构图、超细节、清晰。";

/// Default negative prompt for classifier-free guidance.
pub const DEFAULT_NEG_MAGIC: &str = "动画、模糊、变形、毁容、低质量、拼贴、粒状、标志、抽象、插图、计算机生成、扭曲、动作不流畅、面部有褶皱、表情僵硬、畸形手指";

/// Sampling parameters for one generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub num_frames: usize,
    pub height: usize,
    pub width: usize,
    pub infer_steps: usize,
    /// Classifier-free guidance scale.
    pub cfg_scale: f64,
    /// Shift factor for the flow-matching schedule.
    pub time_shift: f64,
    /// Controls the motion level of the generated video.
    pub motion_score: f64,
    pub pos_magic: String,
    pub neg_magic: String,
    /// Fixed caption token budget per prompt.
    pub max_caption_tokens: usize,
    pub seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            num_frames: 102,
            height: 544,
            width: 992,
            infer_steps: 50,
            cfg_scale: 9.0,
            time_shift: 7.0,
            motion_score: 5.0,
            pos_magic: DEFAULT_POS_MAGIC.to_string(),
            neg_magic: DEFAULT_NEG_MAGIC.to_string(),
            max_caption_tokens: 320,
            seed: 1234,
        }
    }
}

/// Configured parallel degrees, before validation against the world size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParallelArgs {
    pub ring_degree: usize,
    pub ulysses_degree: usize,
    pub tensor_parallel_degree: usize,
}

impl Default for ParallelArgs {
    fn default() -> Self {
        Self {
            ring_degree: 1,
            ulysses_degree: 8,
            tensor_parallel_degree: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_defaults_match_checkpoint() {
        let cfg = GenerationConfig::default();
        assert_eq!(cfg.num_frames, 102);
        assert_eq!(cfg.height, 544);
        assert_eq!(cfg.width, 992);
        assert_eq!(cfg.infer_steps, 50);
        assert_eq!(cfg.cfg_scale, 9.0);
        assert_eq!(cfg.max_caption_tokens, 320);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = GenerationConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: GenerationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pos_magic, cfg.pos_magic);
        assert_eq!(back.seed, cfg.seed);
    }

    #[test]
    fn default_parallel_args() {
        let p = ParallelArgs::default();
        assert_eq!(p.ring_degree, 1);
        assert_eq!(p.ulysses_degree, 8);
        assert_eq!(p.tensor_parallel_degree, 1);
    }
}
