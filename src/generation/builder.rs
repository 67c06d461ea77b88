use crate::{
    error::{Result, StabilityError},
    proto::{
        artifact, prompt, request, transform_type, Artifact, ArtifactType, DiffusionSampler,
        ImageParameters, Prompt, PromptParameters, Request, StepParameter, TransformType,
    },
};
use std::path::Path;

/// Inference engine used when none is set.
pub const DEFAULT_ENGINE_ID: &str = "stable-diffusion-v1-5";
pub const DEFAULT_IMAGE_HEIGHT: u64 = 512;
pub const DEFAULT_IMAGE_WIDTH: u64 = 512;
/// Diffusion steps performed per generation.
pub const DEFAULT_IMAGE_STEPS: u64 = 30;
/// Number of images generated per request.
pub const DEFAULT_NUMBER_OF_SAMPLES: u64 = 1;

const DEFAULT_WEIGHT: f32 = 1.0;

/// Fluent builder for generation requests.
///
/// Setters take the builder by value and hand it back, so a request is
/// assembled in one chain. Validation happens in [`RequestBuilder::build`],
/// which means parameters can be set in any order.
///
/// ```no_run
/// use stability_client::RequestBuilder;
///
/// let request = RequestBuilder::new()
///     .with_text_prompt("a lighthouse at dusk, oil painting")
///     .with_image_height(768)
///     .with_cfg_scale(7.0)
///     .build()?;
/// # Ok::<(), stability_client::StabilityError>(())
/// ```
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self {
            request: Request {
                engine_id: DEFAULT_ENGINE_ID.to_string(),
                params: Some(request::Params::Image(ImageParameters {
                    height: Some(DEFAULT_IMAGE_HEIGHT),
                    width: Some(DEFAULT_IMAGE_WIDTH),
                    steps: Some(DEFAULT_IMAGE_STEPS),
                    samples: Some(DEFAULT_NUMBER_OF_SAMPLES),
                    ..Default::default()
                })),
                ..Default::default()
            },
        }
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the accumulated parameters and returns the request.
    ///
    /// Fails when no prompt was added, or when a mask was added without an
    /// init image to apply it to.
    pub fn build(&self) -> Result<Request> {
        let prompts = &self.request.prompt;

        if prompts.is_empty() {
            return Err(StabilityError::invalid_argument(
                "Prompt cannot be empty; use with_text_prompt to add a text prompt or with_init_image to add an init image",
            ));
        }

        let has_mask = prompts
            .iter()
            .any(|p| artifact_type(p) == Some(ArtifactType::ArtifactMask));
        let has_init_image = prompts
            .iter()
            .any(|p| artifact_type(p) == Some(ArtifactType::ArtifactImage));

        if has_mask && !has_init_image {
            return Err(StabilityError::invalid_argument(
                "A mask image requires an init image; use with_init_image",
            ));
        }

        log::debug!(
            "Built request for engine {} with {} prompt(s)",
            self.request.engine_id,
            prompts.len()
        );

        Ok(self.request.clone())
    }

    pub fn with_text_prompt(self, text: impl Into<String>) -> Self {
        self.with_weighted_text_prompt(text, DEFAULT_WEIGHT)
    }

    /// A negative weight steers the generation away from the prompt.
    pub fn with_weighted_text_prompt(mut self, text: impl Into<String>, weight: f32) -> Self {
        self.request.prompt.push(Prompt {
            parameters: Some(init_parameters(weight)),
            prompt: Some(prompt::Prompt::Text(text.into())),
        });
        self
    }

    pub fn with_init_image(self, path: impl AsRef<Path>) -> Result<Self> {
        self.with_weighted_init_image(path, DEFAULT_WEIGHT)
    }

    /// Reads the whole file at `path` and adds it as the init image.
    pub fn with_weighted_init_image(mut self, path: impl AsRef<Path>, weight: f32) -> Result<Self> {
        let binary = read_image(path.as_ref())?;
        self.request.prompt.push(Prompt {
            parameters: Some(init_parameters(weight)),
            prompt: Some(prompt::Prompt::Artifact(binary_artifact(
                ArtifactType::ArtifactImage,
                binary,
            ))),
        });
        Ok(self)
    }

    /// Grayscale mask excluding some pixels from diffusion.
    pub fn with_mask_image(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let binary = read_image(path.as_ref())?;
        self.request.prompt.push(Prompt {
            parameters: None,
            prompt: Some(prompt::Prompt::Artifact(binary_artifact(
                ArtifactType::ArtifactMask,
                binary,
            ))),
        });
        Ok(self)
    }

    /// The service expects a multiple of 64.
    pub fn with_image_height(mut self, height: u64) -> Self {
        self.image_mut().height = Some(height);
        self
    }

    /// The service expects a multiple of 64.
    pub fn with_image_width(mut self, width: u64) -> Self {
        self.image_mut().width = Some(width);
        self
    }

    pub fn with_image_steps(mut self, steps: u64) -> Self {
        self.image_mut().steps = Some(steps);
        self
    }

    pub fn with_image_samples(mut self, samples: u64) -> Self {
        self.image_mut().samples = Some(samples);
        self
    }

    pub fn with_engine_id(mut self, engine_id: impl Into<String>) -> Self {
        self.request.engine_id = engine_id.into();
        self
    }

    /// Appends a seed; earlier seeds are kept.
    pub fn with_image_seed(mut self, seed: u32) -> Self {
        self.image_mut().seed.push(seed);
        self
    }

    /// Skips a proportion of the first diffusion steps. Lower values give the
    /// init image more influence.
    pub fn with_start_schedule(mut self, start: f32) -> Self {
        self.step_parameter_mut()
            .schedule
            .get_or_insert_with(Default::default)
            .start = Some(start);
        self
    }

    /// Skips a proportion of the last diffusion steps.
    pub fn with_end_schedule(mut self, end: f32) -> Self {
        self.step_parameter_mut()
            .schedule
            .get_or_insert_with(Default::default)
            .end = Some(end);
        self
    }

    pub fn with_sampler(mut self, sampler: DiffusionSampler) -> Self {
        self.image_mut().transform = Some(TransformType {
            r#type: Some(transform_type::Type::Diffusion(sampler as i32)),
        });
        self
    }

    /// Higher values keep the image closer to the prompt.
    pub fn with_cfg_scale(mut self, cfg_scale: f32) -> Self {
        self.step_parameter_mut()
            .sampler
            .get_or_insert_with(Default::default)
            .cfg_scale = Some(cfg_scale);
        self
    }

    fn image_mut(&mut self) -> &mut ImageParameters {
        match self
            .request
            .params
            .get_or_insert_with(|| request::Params::Image(ImageParameters::default()))
        {
            request::Params::Image(image) => image,
        }
    }

    // Schedule and sampler setters share the first step parameter.
    fn step_parameter_mut(&mut self) -> &mut StepParameter {
        let parameters = &mut self.image_mut().parameters;
        if parameters.is_empty() {
            parameters.push(StepParameter::default());
        }
        &mut parameters[0]
    }
}

fn init_parameters(weight: f32) -> PromptParameters {
    PromptParameters {
        init: Some(true),
        weight: Some(weight),
    }
}

fn binary_artifact(kind: ArtifactType, binary: Vec<u8>) -> Artifact {
    Artifact {
        r#type: kind as i32,
        data: Some(artifact::Data::Binary(binary)),
        ..Default::default()
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str().is_empty() {
        return Err(StabilityError::invalid_argument(
            "Path to image cannot be empty",
        ));
    }
    Ok(std::fs::read(path)?)
}

fn artifact_type(entry: &Prompt) -> Option<ArtifactType> {
    match &entry.prompt {
        Some(prompt::Prompt::Artifact(artifact)) => ArtifactType::try_from(artifact.r#type).ok(),
        _ => None,
    }
}
