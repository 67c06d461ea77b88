pub mod builder;
pub mod persist;

pub use builder::{
    RequestBuilder, DEFAULT_ENGINE_ID, DEFAULT_IMAGE_HEIGHT, DEFAULT_IMAGE_STEPS,
    DEFAULT_IMAGE_WIDTH, DEFAULT_NUMBER_OF_SAMPLES,
};
pub use persist::AnswerStreamExt;
