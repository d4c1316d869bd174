use tokio::sync::OnceCell;
use tracing::debug;

use crate::errors::{ConfigError, ConsumerError};
use crate::transport::{GetQueueUrlRequest, Transport};

/// Resolves the queue URL a consumer should operate against, either from
/// an explicit URL or, lazily and once, from a (name, account) pair.
pub(crate) struct QueueResolver {
    explicit_url: Option<String>,
    queue_name: Option<String>,
    account_number: Option<String>,
    correct_queue_url: bool,
    cache: OnceCell<String>,
}

impl QueueResolver {
    pub fn new(
        explicit_url: Option<String>,
        queue_name: Option<String>,
        account_number: Option<String>,
        correct_queue_url: bool,
    ) -> Self {
        QueueResolver {
            explicit_url,
            queue_name,
            account_number,
            correct_queue_url,
            cache: OnceCell::new(),
        }
    }

    /// Returns the queue URL, calling `get_queue_url` at most once across
    /// the lifetime of this resolver.
    pub async fn resolve(
        &self,
        transport: &dyn Transport,
    ) -> Result<String, ConsumerError> {
        if let Some(url) = &self.explicit_url {
            return Ok(url.clone());
        }

        let url = self
            .cache
            .get_or_try_init(|| async {
                let queue_name = self
                    .queue_name
                    .clone()
                    .ok_or(ConfigError::MissingQueueIdentity)?;
                let response = transport
                    .get_queue_url(GetQueueUrlRequest {
                        queue_name,
                        queue_owner_aws_account_id: self.account_number.clone(),
                    })
                    .await?;

                let resolved = if self.correct_queue_url {
                    match transport.endpoint_authority() {
                        Some(authority) => rewrite_authority(&response.queue_url, &authority)?,
                        None => response.queue_url,
                    }
                } else {
                    response.queue_url
                };

                debug!(queue_url = %resolved, "resolved queue url");
                Ok::<String, ConsumerError>(resolved)
            })
            .await?;

        Ok(url.clone())
    }
}

/// Rewrites `url`'s scheme+host+port to match `authority` (itself a full
/// `scheme://host:port` or bare `host:port`), preserving the original
/// path. Used when a service reports a queue URL whose host doesn't match
/// the endpoint the transport actually dialled (VPC endpoints, local
/// emulators).
fn rewrite_authority(url: &str, authority: &str) -> Result<String, ConsumerError> {
    let parsed: http::Uri = url
        .parse()
        .map_err(|_| ConsumerError::InvalidArgument(format!("not a valid queue url: {url}")))?;
    let authority_uri: http::Uri = authority.parse().map_err(|_| {
        ConsumerError::InvalidArgument(format!("not a valid endpoint authority: {authority}"))
    })?;

    let scheme = authority_uri
        .scheme_str()
        .or_else(|| parsed.scheme_str())
        .unwrap_or("https");
    let authority_part = authority_uri
        .authority()
        .or_else(|| parsed.authority())
        .ok_or_else(|| ConsumerError::InvalidArgument(format!("queue url has no host: {url}")))?;
    let path_and_query = parsed
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Ok(format!("{scheme}://{authority_part}{path_and_query}"))
}
