use stability_client::{
    logger::{self, LoggerConfig, LogLevel},
    AnswerStreamExt, DiffusionSampler, RequestBuilder, StabilityClient,
};
use std::env;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_loaded = dotenv::dotenv().is_ok();
    logger::init_with_config(LoggerConfig::development().with_level(LogLevel::Debug))?;
    if !env_loaded {
        log::warn!("No .env file found, using system environment variables");
    }

    let prompt = env::args()
        .nth(1)
        .unwrap_or_else(|| "a lighthouse on a cliff at dusk, oil painting".to_string());
    let output_dir = env::var("OUTPUT_DIR").unwrap_or_else(|_| ".".to_string());

    let client = StabilityClient::from_env()?;

    match client.list_engines().await {
        Ok(engines) => {
            log::info!("Available engines:");
            for engine in engines {
                log::info!("  {} - {} (ready: {})", engine.id, engine.name, engine.ready);
            }
        }
        Err(e) => log::warn!("Could not list engines: {}", e),
    }

    let request = RequestBuilder::new()
        .with_text_prompt(prompt)
        .with_image_samples(2)
        .with_sampler(DiffusionSampler::SamplerKEulerAncestral)
        .with_cfg_scale(7.0)
        .build()?;

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut answers = client.generate(request).await?;
    let saved = answers.save_all_images(&output_dir, &token).await?;

    if saved.is_empty() {
        log::warn!("The service returned no images");
    }
    for result in saved {
        println!("{}", result.full_path().display());
    }

    Ok(())
}
