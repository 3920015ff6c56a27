//! AWS SDK facades for logship.
//!
//! One facade per destination, each wrapping the corresponding `aws-sdk-*` client and mapping
//! its errors onto the library's taxonomy.  Client construction honors the `ClientOptions`
//! carried in the writer configuration: region, endpoint override, and an optional assumed
//! role.  Proxy settings ride the SDK HTTP client's standard environment handling.

use aws_config::{BehaviorVersion, Region};

use logship::config::ClientOptions;

mod cloudwatch;
mod errors;
mod kinesis;
mod sns;

pub use cloudwatch::AwsCloudWatchFacade;
pub use kinesis::AwsKinesisFacade;
pub use sns::AwsSnsFacade;

/// Build an SDK configuration from client options.  Unset fields fall back to the SDK's
/// environment-driven defaults.
pub async fn sdk_config(options: &ClientOptions) -> aws_config::SdkConfig {
    let loader = defaults(options);
    let config = loader.load().await;
    let Some(role) = &options.assumed_role else {
        return config;
    };
    let provider = aws_config::sts::AssumeRoleProvider::builder(role.clone())
        .session_name("logship")
        .configure(&config)
        .build()
        .await;
    defaults(options).credentials_provider(provider).load().await
}

fn defaults(options: &ClientOptions) -> aws_config::ConfigLoader {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &options.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(endpoint) = &options.endpoint {
        loader = loader.endpoint_url(endpoint.clone());
    }
    loader
}
