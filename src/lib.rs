//! Client for the Stability gRPC API.
//!
//! - [`StabilityClient`] owns the authenticated channel and hands out the
//!   dashboard, engines, generation and project service stubs, each created
//!   on first use.
//! - [`RequestBuilder`] assembles a generation [`proto::Request`] with
//!   sensible defaults and validates it on `build`.
//! - [`AnswerStreamExt`] drains the answer stream of a generation and saves
//!   the returned images to disk.
//!
//! ```no_run
//! use stability_client::{AnswerStreamExt, RequestBuilder, StabilityClient};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> stability_client::Result<()> {
//! let client = StabilityClient::from_env()?;
//! let request = RequestBuilder::new()
//!     .with_text_prompt("a red fox in fresh snow")
//!     .with_image_samples(2)
//!     .build()?;
//!
//! let mut answers = client.generate(request).await?;
//! let saved = answers
//!     .save_all_images("./output", &CancellationToken::new())
//!     .await?;
//! for result in saved {
//!     println!("{}", result.full_path().display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod proto {
    tonic::include_proto!("gooseai");
}

pub mod client;
pub mod config;
pub mod error;
pub mod generation;
pub mod logger;
pub mod models;

pub use client::{AuthChannel, BearerAuth, StabilityClient};
pub use config::ClientConfig;
pub use error::{Result, StabilityError};
pub use generation::{AnswerStreamExt, RequestBuilder};
pub use models::SaveResult;
pub use proto::{ArtifactType, DiffusionSampler};
