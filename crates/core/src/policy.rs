//! Bucket policy helpers

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::traits::BucketAdminService;

const POLICY_VERSION: &str = "2012-10-17";

/// A bucket policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: String,
    pub principal: serde_json::Value,
    pub action: serde_json::Value,
    pub resource: serde_json::Value,
}

impl PolicyDocument {
    /// Allow anonymous `s3:GetObject` on every object in `bucket`
    pub fn public_read(bucket: &str) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement {
                sid: Some("PublicRead".to_string()),
                effect: "Allow".to_string(),
                principal: serde_json::Value::String("*".to_string()),
                action: serde_json::Value::String("s3:GetObject".to_string()),
                resource: serde_json::Value::String(format!("arn:aws:s3:::{bucket}/*")),
            }],
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// JSON text of the public-read policy for `bucket`
pub fn public_read_policy(bucket: &str) -> Result<String> {
    PolicyDocument::public_read(bucket).to_json()
}

/// Check that `policy` is a JSON policy document before sending it
pub fn validate_policy(policy: &str) -> Result<PolicyDocument> {
    let doc: PolicyDocument = serde_json::from_str(policy)
        .map_err(|e| Error::General(format!("Invalid policy document: {e}")))?;
    if doc.statement.is_empty() {
        return Err(Error::General(
            "Policy document has no statements".to_string(),
        ));
    }
    Ok(doc)
}

/// Attach the public-read policy to `bucket`
pub async fn apply_public_read_policy(
    admin: &dyn BucketAdminService,
    bucket: &str,
) -> Result<String> {
    let policy = public_read_policy(bucket)?;
    admin.put_bucket_policy(bucket, &policy).await?;
    tracing::info!(bucket, "Public read policy attached");
    Ok(policy)
}
