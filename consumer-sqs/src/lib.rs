//! An AWS SQS binding for the [`queue_consumer`] engine's
//! [`queue_consumer::transport::Transport`] trait, plus a small helper for
//! building an [`aws_sdk_sqs::Client`] the way the rest of this workspace
//! builds its AWS clients.

mod errors;
mod transport;

pub use transport::SqsTransport;

use aws_config::meta::region::ProvideRegion;
use aws_config::BehaviorVersion;
use queue_consumer_aws_helpers::{
    aws_regions::RegionProvider, clients::sqs_client, credentials::default_credentials_provider,
};

/// Builds an SQS client for `aws_region`, using the environment's default
/// credentials chain, optionally pointed at a custom endpoint (a VPC
/// endpoint or an emulator such as LocalStack).
pub async fn default_sqs_client(aws_region: String, endpoint_url: Option<String>) -> aws_sdk_sqs::Client {
    let region_provider = RegionProvider::new(aws_region);
    let region = region_provider.region().await;
    let credentials = default_credentials_provider(region).await;
    let conf = aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .credentials_provider(credentials)
        .load()
        .await;
    sqs_client(&conf, endpoint_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use queue_consumer::transport::Transport;

    #[test_log::test(tokio::test)]
    async fn default_sqs_client_honours_an_endpoint_override() {
        let client = default_sqs_client("us-east-1".to_string(), Some("http://localhost:4566".to_string())).await;
        let transport = SqsTransport::new(client).with_endpoint_authority("http://localhost:4566");
        assert_eq!(transport.endpoint_authority(), Some("http://localhost:4566".to_string()));
    }
}
