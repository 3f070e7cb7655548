//! Bucket lifecycle rules

use serde::Serialize;

use crate::error::{Error, Result};
use crate::traits::BucketAdminService;

/// An expiration rule applied to objects under `prefix`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleRule {
    pub id: String,
    /// Empty applies the rule to the whole bucket
    pub prefix: String,
    pub enabled: bool,
    pub expiration_days: u32,
}

impl LifecycleRule {
    /// Delete every object `days` after its creation
    pub fn expire_after_days(days: u32) -> Result<Self> {
        if days == 0 {
            return Err(Error::General(
                "Expiration must be at least one day".to_string(),
            ));
        }
        Ok(Self {
            id: format!("expire-after-{days}-days"),
            prefix: String::new(),
            enabled: true,
            expiration_days: days,
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Replace the lifecycle configuration of `bucket` with a single expiration rule
pub async fn apply_expiration(
    admin: &dyn BucketAdminService,
    bucket: &str,
    days: u32,
    prefix: Option<&str>,
) -> Result<LifecycleRule> {
    let mut rule = LifecycleRule::expire_after_days(days)?;
    if let Some(prefix) = prefix {
        rule = rule.with_prefix(prefix);
    }

    admin
        .put_lifecycle_configuration(bucket, std::slice::from_ref(&rule))
        .await?;
    tracing::info!(bucket, days, prefix = %rule.prefix, "Lifecycle expiration configured");
    Ok(rule)
}
