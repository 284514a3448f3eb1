pub type StagelinkResult<T> = Result<T, StagelinkError>;

#[derive(thiserror::Error, Debug)]
pub enum StagelinkError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("asset error: {0}")]
    Asset(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StagelinkError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn asset(msg: impl Into<String>) -> Self {
        Self::Asset(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            StagelinkError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            StagelinkError::channel("x")
                .to_string()
                .contains("channel error:")
        );
        assert!(
            StagelinkError::resource("x")
                .to_string()
                .contains("resource error:")
        );
        assert!(
            StagelinkError::asset("x")
                .to_string()
                .contains("asset error:")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = StagelinkError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
