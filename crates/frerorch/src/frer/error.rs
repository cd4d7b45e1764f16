//! FRER error codes.

/// Errors returned by the FRER engine.
///
/// Every variant maps to one operator-facing message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrerOrchError {
    #[error("Invalid parameter")]
    InvalidParameter,
    #[error("FRER (802.1CB) is not supported on this platform")]
    NotSupported,
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("No such FRER instance")]
    NoSuchInstance,
    #[error("Out of hardware resources")]
    HwResources,

    // Structural validation
    #[error("Invalid mode")]
    InvalidMode,
    #[error("At least one of the stream IDs is invalid")]
    InvalidStreamIdList,
    #[error("A stream ID list and a stream collection ID cannot be specified simultaneously")]
    StreamIdAndCollectionSimultaneously,
    #[error("Invalid stream collection ID")]
    InvalidStreamCollectionId,
    #[error("Invalid FRER VLAN")]
    InvalidVlan,
    #[error("The maximum supported number of egress ports is exceeded")]
    EgressPortCntExceeded,
    #[error("Invalid recovery algorithm")]
    InvalidAlgorithm,
    #[error("Invalid history length")]
    InvalidHistoryLen,
    #[error("Invalid recovery reset timeout")]
    InvalidResetTimeout,
    #[error("Invalid latent error difference")]
    InvalidLatentErrorDiff,
    #[error("Invalid latent error period")]
    InvalidLatentErrorPeriod,
    #[error("Invalid number of latent error detection paths")]
    InvalidLatentErrorPaths,
    #[error("Invalid latent error reset period")]
    InvalidLatentResetPeriod,

    // Activation-only validation
    #[error("When administratively enabled, at least one ingress stream ID or a stream collection must be specified")]
    NoStreamsWhenEnabled,
    #[error("In generation mode, the number of streams must be exactly one. Use a stream collection if more than one stream is needed")]
    GenerationStreamCountMustBeOne,
    #[error("The maximum supported number of streams is exceeded")]
    StreamCntExceeded,
    #[error("Stream collections cannot be used when individual recovery is enabled. Use the stream ID list instead")]
    IndividualRecoveryWithCollection,
    #[error("When administratively enabled, at least one egress port must be specified")]
    EgressPortCntZero,

    // Capacity and cross-instance validation
    #[error("The maximum number of FRER instances is reached")]
    LimitReached,
    #[error("Another active FRER instance is using at least one of the same stream IDs")]
    AnotherInstanceUsingSameStreamId,
    #[error("Another active FRER instance is using the same stream collection")]
    AnotherInstanceUsingSameCollection,

    // Statistics key validation
    #[error("The port must not be specified in generation mode")]
    PortMustBeNoneInGeneration,
    #[error("The stream ID must not be specified in generation mode")]
    StreamIdMustBeNoneInGeneration,
    #[error("A port must be specified in recovery mode")]
    PortMustNotBeNoneInRecovery,
    #[error("Invalid port. The port must be within the switch's port range")]
    InvalidPort,
    #[error("The specified port is not one of the configured egress ports")]
    NotPartOfEgressPorts,
    #[error("Ingress stream ID is invalid")]
    InvalidStreamId,
    #[error("A stream ID can only be specified in individual recovery mode")]
    StreamIdOnlyInIndividualRecovery,
    #[error("Stream ID is not found")]
    StreamIdNotFound,
}

impl FrerOrchError {
    pub fn internal(message: impl Into<String>) -> Self {
        FrerOrchError::Internal(message.into())
    }
}

pub type FrerResult<T> = Result<T, FrerOrchError>;

/// Folds the outcome of a cleanup step into the first error seen.
///
/// Cleanup paths run every step regardless of failures and report the
/// first failure at the end.
#[derive(Debug, Default)]
pub(crate) struct FirstError(Option<FrerOrchError>);

impl FirstError {
    pub(crate) fn new() -> Self {
        Self(None)
    }

    pub(crate) fn record(&mut self, result: FrerResult<()>) {
        if let Err(e) = result {
            self.0.get_or_insert(e);
        }
    }

    pub(crate) fn into_result(self) -> FrerResult<()> {
        match self.0 {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
