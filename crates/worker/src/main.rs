//! Per-rank worker binary.
//!
//! Startup sequence, in order: parse CLI → discover rank identity from the
//! environment → validate the parallel topology (fatal, non-zero exit,
//! before any collective) → derive and join communication groups → bind
//! the local device → load the tokenizer → encode and pack the guidance
//! prompt pair → hand the packed batch and group handles to the
//! transformer execution layer.

mod cli;
mod launcher;
mod logging;
mod remote;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use stepvideo_core::distributed::{
    CommGroupRegistry, DeviceBinder, DeviceCommunicator, LocalProcessGroup, MockCommunicator,
    ParallelTopology, WorkerEnv,
};
use stepvideo_core::pipeline::PipelineInputs;
use stepvideo_core::tokenizer::PromptTokenizer;

use crate::cli::Args;
use crate::remote::{HttpCaptionEncoder, HttpVaeDecoder};

fn main() {
    let args = Args::parse();
    logging::init();

    if let Err(err) = run(args) {
        tracing::error!(error = %err, "worker failed");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let env = WorkerEnv::from_env()?;
    let parallel = args.parallel_args();

    // A run launched without an orchestrator covers the whole mesh itself.
    let self_launched = args.spawn_local_workers && !env.is_distributed() && env.rank == 0;
    let world_size = if self_launched {
        parallel.ring_degree * parallel.ulysses_degree
    } else {
        env.world_size
    };

    // Fails fast on a degree mismatch, before any process is spawned or
    // any collective issued.
    let topology = ParallelTopology::with_tensor_parallel(
        world_size,
        parallel.ring_degree,
        parallel.ulysses_degree,
        parallel.tensor_parallel_degree,
    )?;

    let siblings = if self_launched && world_size > 1 {
        launcher::spawn_local_workers(world_size, env.master_port)?
    } else {
        Vec::new()
    };

    let coordinate = topology.coordinate(env.rank, env.local_rank)?;
    tracing::info!(
        rank = coordinate.global_rank,
        world_size,
        ring_rank = coordinate.ring_rank,
        ulysses_rank = coordinate.ulysses_rank,
        local_rank = coordinate.local_rank,
        "worker topology resolved"
    );

    // Group membership is pure arithmetic; the join is the collective
    // rendezvous that every rank must reach.
    let registry = CommGroupRegistry::build(&topology);
    let comm: Arc<dyn DeviceCommunicator> = Arc::new(MockCommunicator::new(
        LocalProcessGroup::with_rank(coordinate.global_rank, world_size),
    ));
    registry.join(
        Arc::clone(&comm),
        Duration::from_secs(args.group_timeout_secs),
    )?;

    let mut binder = DeviceBinder::new();
    let device = binder.bind(coordinate.local_rank)?;

    let tokenizer = PromptTokenizer::from_file(&args.tokenizer_path())?;
    let generation = args.generation_config();

    // Classifier-free guidance: positive-conditioned prompt first, negative
    // second, packed as an ordinary batch of two.
    let positive = format!("{}{}", args.prompt, generation.pos_magic);
    let encoded = tokenizer.encode_guidance_pair(
        &positive,
        &generation.neg_magic,
        generation.max_caption_tokens,
    )?;

    let inputs = PipelineInputs::assemble(&registry, coordinate, encoded.packed.clone())?;
    tracing::info!(
        packed_tokens = inputs.packed.packed_ids.len(),
        max_seq_len = inputs.packed.max_seq_len,
        ring_group = ?inputs.ring_group.ranks(),
        ulysses_group = ?inputs.ulysses_group.ranks(),
        device = device.ordinal(),
        "packed prompt batch ready for distributed forward"
    );

    let endpoints = args.endpoints();
    let caption = HttpCaptionEncoder::new(&endpoints.caption_url)?;
    let vae = HttpVaeDecoder::new(&endpoints.vae_url)?;
    tracing::info!(
        caption_url = caption.url(),
        vae_url = vae.url(),
        first_image = %args.first_image_path.display(),
        num_frames = generation.num_frames,
        infer_steps = generation.infer_steps,
        "collaborator services configured; handing off to execution layer"
    );

    // The transformer forward passes, denoise loop, and VAE round-trip
    // consume `inputs`, `caption`, and `vae` from here on.

    if !siblings.is_empty() {
        launcher::wait_for_workers(siblings);
    }
    Ok(())
}
