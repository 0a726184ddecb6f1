//! Distributed execution substrate for text+image-to-video inference.
//!
//! The diffusion transformer is too large and too slow for one device, so
//! inference runs across a ring × Ulysses mesh of worker processes. This
//! crate provides the pieces that make that correct: rank topology and
//! communication-group formation, device binding, packed variable-length
//! batching, and the prompt tokenizer with its special-token registry.
//! The transformer forward pass, VAE decoding, and caption encoding are
//! external collaborators behind the interfaces in [`remote`] and
//! [`pipeline`].

pub mod config;
pub mod distributed;
pub mod packing;
pub mod pipeline;
pub mod remote;
pub mod tokenizer;
