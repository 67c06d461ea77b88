use crate::error::{Result, StabilityError};
use std::fmt;
use tonic::{
    metadata::AsciiMetadataValue,
    service::Interceptor,
    Request, Status,
};

const AUTHORIZATION_HEADER: &str = "authorization";

/// Attaches `authorization: Bearer {api_key}` to every outgoing call.
#[derive(Clone)]
pub struct BearerAuth {
    header: AsciiMetadataValue,
}

impl BearerAuth {
    pub fn new(api_key: &str) -> Result<Self> {
        if api_key.is_empty() {
            return Err(StabilityError::invalid_argument("API key cannot be empty"));
        }

        let header = format!("Bearer {api_key}").parse().map_err(|_| {
            StabilityError::invalid_argument("API key contains characters not allowed in metadata")
        })?;

        Ok(Self { header })
    }
}

impl Interceptor for BearerAuth {
    fn call(&mut self, mut request: Request<()>) -> std::result::Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert(AUTHORIZATION_HEADER, self.header.clone());
        Ok(request)
    }
}

// Keeps the key out of debug output.
impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth").finish_non_exhaustive()
    }
}
