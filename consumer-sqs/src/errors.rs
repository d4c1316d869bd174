use std::fmt;

use queue_consumer::TransportError;

/// Flattens an AWS SDK `SdkError` into the engine's transport-level error
/// type. The engine never needs to distinguish construction failures from
/// dispatch failures from service-reported failures: any of them means
/// this call didn't happen, and the receive loop or batcher backs off and
/// retries.
pub(crate) fn to_transport_error<E, R>(context: &'static str, err: aws_sdk_sqs::error::SdkError<E, R>) -> TransportError
where
    E: std::error::Error,
    R: fmt::Debug,
{
    TransportError::new(format!("{context}: {}", SdkErrorDisplay(&err)))
}

struct SdkErrorDisplay<'a, E, R>(&'a aws_sdk_sqs::error::SdkError<E, R>);

impl<E, R> fmt::Display for SdkErrorDisplay<'_, E, R>
where
    E: std::error::Error,
    R: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use aws_sdk_sqs::error::SdkError;
        match self.0 {
            SdkError::ConstructionFailure(_) => write!(f, "request construction failed"),
            SdkError::TimeoutError(_) => write!(f, "request timed out"),
            SdkError::DispatchFailure(failure) => write!(f, "dispatch failure: {failure:?}"),
            SdkError::ResponseError(_) => write!(f, "malformed service response"),
            SdkError::ServiceError(service_err) => write!(f, "{}", service_err.err()),
            other => write!(f, "{other:?}"),
        }
    }
}
