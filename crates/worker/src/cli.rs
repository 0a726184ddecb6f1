//! Command-line argument surface for the worker binary.
//!
//! Extra-model endpoints, denoise schedule, inference settings, and
//! parallel degrees. Rank identity comes
//! from the environment (`RANK`/`WORLD_SIZE`/`LOCAL_RANK`), not the CLI,
//! so every worker process parses identical arguments.

use std::path::PathBuf;

use clap::Parser;
use stepvideo_core::config::{
    GenerationConfig, ParallelArgs, DEFAULT_NEG_MAGIC, DEFAULT_POS_MAGIC,
};
use stepvideo_core::remote::RemoteEndpoints;

#[derive(Parser, Debug)]
#[command(
    name = "stepvideo-worker",
    about = "Per-rank worker for distributed text+image-to-video inference"
)]
pub struct Args {
    // ── Extra models (VAE, text encoder) ────────────────────────────────
    /// Variational-decoder service address.
    #[arg(long, default_value = "127.0.0.1")]
    pub vae_url: String,

    /// Caption/text-encoding service address.
    #[arg(long, default_value = "127.0.0.1")]
    pub caption_url: String,

    // ── Denoise schedule ────────────────────────────────────────────────
    /// Shift factor for the flow-matching schedule.
    #[arg(long, default_value_t = 7.0)]
    pub time_shift: f64,

    // ── Inference ───────────────────────────────────────────────────────
    /// Root path of the model checkpoints.
    #[arg(long, default_value = "./ckpts")]
    pub model_dir: PathBuf,

    /// Tokenizer file override; defaults to `<model_dir>/tokenizer.json`.
    #[arg(long)]
    pub tokenizer: Option<PathBuf>,

    /// Number of denoising steps.
    #[arg(long, default_value_t = 50)]
    pub infer_steps: usize,

    /// Directory for generated samples.
    #[arg(long, default_value = "./results")]
    pub save_path: PathBuf,

    /// Base name for generated samples.
    #[arg(long, default_value = "out")]
    pub output_file_name: String,

    /// How many frames to sample.
    #[arg(long, default_value_t = 102)]
    pub num_frames: usize,

    /// Height of the video sample.
    #[arg(long, default_value_t = 544)]
    pub height: usize,

    /// Width of the video sample.
    #[arg(long, default_value_t = 992)]
    pub width: usize,

    /// Text prompt for sampling.
    #[arg(long)]
    pub prompt: String,

    /// Reference image for the image-to-video task.
    #[arg(long, default_value = "./assets/demo.png")]
    pub first_image_path: PathBuf,

    /// Seed for sampling.
    #[arg(long, default_value_t = 1234)]
    pub seed: u64,

    /// Classifier-free guidance scale.
    #[arg(long, default_value_t = 9.0)]
    pub cfg_scale: f64,

    /// Score controlling the motion level of the video.
    #[arg(long, default_value_t = 5.0)]
    pub motion_score: f64,

    /// Positive style suffix appended to the prompt.
    #[arg(long, default_value = DEFAULT_POS_MAGIC)]
    pub pos_magic: String,

    /// Negative prompt for guidance.
    #[arg(long, default_value = DEFAULT_NEG_MAGIC)]
    pub neg_magic: String,

    // ── Parallelism ─────────────────────────────────────────────────────
    /// Ulysses sequence-parallel degree.
    #[arg(long, default_value_t = 8)]
    pub ulysses_degree: usize,

    /// Ring-attention degree.
    #[arg(long, default_value_t = 1)]
    pub ring_degree: usize,

    /// Tensor-parallel degree (orthogonal to the primary mesh).
    #[arg(long, default_value_t = 1)]
    pub tensor_parallel_degree: usize,

    /// Bounded wait for all peers to join the communication groups.
    #[arg(long, default_value_t = 600)]
    pub group_timeout_secs: u64,

    /// Spawn ring*ulysses - 1 local worker processes from this one instead
    /// of relying on an external launcher.
    #[arg(long)]
    pub spawn_local_workers: bool,
}

impl Args {
    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            num_frames: self.num_frames,
            height: self.height,
            width: self.width,
            infer_steps: self.infer_steps,
            cfg_scale: self.cfg_scale,
            time_shift: self.time_shift,
            motion_score: self.motion_score,
            pos_magic: self.pos_magic.clone(),
            neg_magic: self.neg_magic.clone(),
            max_caption_tokens: GenerationConfig::default().max_caption_tokens,
            seed: self.seed,
        }
    }

    pub fn parallel_args(&self) -> ParallelArgs {
        ParallelArgs {
            ring_degree: self.ring_degree,
            ulysses_degree: self.ulysses_degree,
            tensor_parallel_degree: self.tensor_parallel_degree,
        }
    }

    pub fn endpoints(&self) -> RemoteEndpoints {
        RemoteEndpoints {
            vae_url: self.vae_url.clone(),
            caption_url: self.caption_url.clone(),
        }
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.tokenizer
            .clone()
            .unwrap_or_else(|| self.model_dir.join("tokenizer.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_released_checkpoint() {
        let args = Args::try_parse_from(["stepvideo-worker", "--prompt", "a cat"]).unwrap();
        assert_eq!(args.ulysses_degree, 8);
        assert_eq!(args.ring_degree, 1);
        assert_eq!(args.tensor_parallel_degree, 1);
        assert_eq!(args.num_frames, 102);
        assert_eq!(args.height, 544);
        assert_eq!(args.width, 992);
        assert_eq!(args.infer_steps, 50);
        assert_eq!(args.cfg_scale, 9.0);
        assert_eq!(args.time_shift, 7.0);
        assert_eq!(args.motion_score, 5.0);
        assert_eq!(args.seed, 1234);
        assert_eq!(args.vae_url, "127.0.0.1");
        assert_eq!(args.caption_url, "127.0.0.1");
        assert!(!args.spawn_local_workers);
    }

    #[test]
    fn prompt_is_required() {
        assert!(Args::try_parse_from(["stepvideo-worker"]).is_err());
    }

    #[test]
    fn tokenizer_path_defaults_under_model_dir() {
        let args = Args::try_parse_from([
            "stepvideo-worker",
            "--prompt",
            "p",
            "--model-dir",
            "/models/stepvideo",
        ])
        .unwrap();
        assert_eq!(
            args.tokenizer_path(),
            PathBuf::from("/models/stepvideo/tokenizer.json")
        );
    }

    #[test]
    fn parallel_args_carry_degrees() {
        let args = Args::try_parse_from([
            "stepvideo-worker",
            "--prompt",
            "p",
            "--ring-degree",
            "2",
            "--ulysses-degree",
            "4",
        ])
        .unwrap();
        let p = args.parallel_args();
        assert_eq!(p.ring_degree, 2);
        assert_eq!(p.ulysses_degree, 4);
    }
}
