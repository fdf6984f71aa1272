use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_types::region::Region;
use aws_types::SdkConfig;
use tracing::debug;

/// Shared SDK configuration for one profile/region pair. Without a region the
/// default provider chain decides.
pub async fn load_config(profile: Option<&str>, region: Option<&str>) -> SdkConfig {
    let region_provider =
        RegionProviderChain::first_try(region.map(|r| Region::new(r.to_string())))
            .or_default_provider();

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }

    let sdk_config = loader.load().await;
    debug!(
        profile = profile.unwrap_or("default"),
        region = ?sdk_config.region(),
        "loaded AWS configuration"
    );

    return sdk_config;
}

/// Renders an SDK error with its full source chain.
pub fn describe_error<E: std::error::Error>(error: &E) -> String {
    DisplayErrorContext(error).to_string()
}
