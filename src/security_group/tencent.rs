use crate::error::{Error, Result};
use crate::security_group::tc3::{self, Credential, SigningRequest};
use crate::security_group::{BackendFuture, NewPolicy, RawPolicy, SecurityGroupBackend};
use serde_json::{json, Value};

pub use crate::security_group::tc3::Credential as TencentCredential;

const HOST: &str = "vpc.tencentcloudapi.com";
const SERVICE: &str = "vpc";
const API_VERSION: &str = "2017-03-12";

/// Security group backend talking to the Tencent Cloud VPC API.
pub struct TencentVpcClient {
    http: reqwest::Client,
    credential: Credential,
    region: String,
}

impl TencentVpcClient {
    pub fn new(credential: TencentCredential, region: String) -> Result<Self> {
        log::debug!("Using Tencent Cloud VPC API in region {}", region);

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Transport {
                endpoint: HOST.to_string(),
                message: format!("failed to initialize HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            credential,
            region,
        })
    }

    /// Calls an API action and returns the `Response` object of a successful reply.
    async fn call(&self, action: &str, payload: Value) -> Result<Value> {
        let payload = payload.to_string();
        let timestamp = chrono::Utc::now().timestamp();
        let authorization = tc3::authorization(
            &self.credential,
            &SigningRequest {
                service: SERVICE,
                host: HOST,
                action,
                payload: &payload,
                timestamp,
            },
        );

        log::debug!("{} {}", action, payload);

        let transport_error = |e: reqwest::Error| Error::Transport {
            endpoint: HOST.to_string(),
            message: format!("{action}: {e}"),
        };

        let response = self
            .http
            .post(format!("https://{HOST}/"))
            .header("Authorization", authorization)
            .header("Content-Type", tc3::CONTENT_TYPE)
            .header("X-TC-Action", action)
            .header("X-TC-Timestamp", timestamp.to_string())
            .header("X-TC-Version", API_VERSION)
            .header("X-TC-Region", &self.region)
            .body(payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        let (response, request_id) = parse_envelope(status.as_u16(), &body)?;
        log::debug!("{} succeeded (RequestId={})", action, request_id);
        Ok(response)
    }
}

impl SecurityGroupBackend for TencentVpcClient {
    fn describe_ingress<'a>(
        &'a self,
        security_group_id: &'a str,
    ) -> BackendFuture<'a, Vec<RawPolicy>> {
        Box::pin(async move {
            let response = self
                .call(
                    "DescribeSecurityGroupPolicies",
                    json!({ "SecurityGroupId": security_group_id }),
                )
                .await?;

            Ok(ingress_policies(&response))
        })
    }

    fn create_ingress<'a>(
        &'a self,
        security_group_id: &'a str,
        policy: &'a NewPolicy,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            log::info!(
                "Creating {} rule {} {} from {} ({})",
                policy.action,
                policy.protocol,
                policy.port,
                policy.cidr_block,
                policy.description
            );

            self.call(
                "CreateSecurityGroupPolicies",
                json!({
                    "SecurityGroupId": security_group_id,
                    "SecurityGroupPolicySet": { "Ingress": [policy_to_wire(policy)] },
                }),
            )
            .await?;

            Ok(())
        })
    }

    fn delete_ingress<'a>(
        &'a self,
        security_group_id: &'a str,
        policy_index: i64,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            log::info!("Deleting ingress rule at index {}", policy_index);

            self.call(
                "DeleteSecurityGroupPolicies",
                json!({
                    "SecurityGroupId": security_group_id,
                    "SecurityGroupPolicySet": { "Ingress": [{ "PolicyIndex": policy_index }] },
                }),
            )
            .await?;

            Ok(())
        })
    }
}

/// Splits an API reply into its `Response` object and request id, turning error replies into
/// [`Error::RemoteApi`].
fn parse_envelope(http_status: u16, body: &str) -> Result<(Value, String)> {
    let envelope: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) if (200..300).contains(&http_status) => {
            return Err(Error::MalformedRemoteData(format!(
                "response is not JSON: {e}"
            )));
        }
        Err(_) => {
            return Err(Error::RemoteApi {
                code: format!("HTTP{http_status}"),
                message: body.chars().take(200).collect(),
                request_id: String::new(),
            });
        }
    };

    let Some(response) = envelope.get("Response").filter(|v| v.is_object()) else {
        return Err(Error::MalformedRemoteData(
            "reply has no 'Response' object".to_string(),
        ));
    };

    let request_id = response
        .get("RequestId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if let Some(error) = response.get("Error") {
        let field = |key: &str| {
            error
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        return Err(Error::RemoteApi {
            code: field("Code"),
            message: field("Message"),
            request_id,
        });
    }

    Ok((response.clone(), request_id))
}

fn ingress_policies(response: &Value) -> Vec<RawPolicy> {
    let Some(policy_set) = response.get("SecurityGroupPolicySet").filter(|v| !v.is_null()) else {
        log::warn!("Reply contains no security group policy set");
        return Vec::new();
    };

    match policy_set.get("Ingress") {
        Some(Value::Array(policies)) => policies.iter().map(policy_from_wire).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            log::warn!("Ignoring ingress policies of unexpected shape: {}", other);
            Vec::new()
        }
    }
}

/// Fields of the wrong type or empty strings are treated as absent.
fn policy_from_wire(policy: &Value) -> RawPolicy {
    let text = |key: &str| {
        policy
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    RawPolicy {
        description: text("PolicyDescription"),
        protocol: text("Protocol"),
        port: text("Port"),
        cidr_block: text("CidrBlock").or_else(|| text("Ipv6CidrBlock")),
        action: text("Action"),
        policy_index: policy.get("PolicyIndex").and_then(Value::as_i64),
        modify_time: text("ModifyTime"),
    }
}

fn policy_to_wire(policy: &NewPolicy) -> Value {
    let cidr_key = if policy.cidr_block.contains(':') {
        "Ipv6CidrBlock"
    } else {
        "CidrBlock"
    };

    json!({
        "Protocol": policy.protocol,
        "Port": policy.port,
        cidr_key: policy.cidr_block,
        "Action": policy.action.as_str(),
        "PolicyDescription": policy.description,
    })
}
