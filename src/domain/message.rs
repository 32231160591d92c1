//! Work message and certificate subject template wire types.
//!
//! All types use `#[serde(rename_all = "camelCase")]`, matching the JSON the
//! bulk issuance API accepts and the work channel carries.

use serde::{Deserialize, Serialize};

/// How the common name of each certificate in a task is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameGenerator {
    /// Every certificate gets `prefix + commonName`.
    #[default]
    Static,
    /// `prefix + UPPERCASE_HEX(commonNameStart + index)`.
    Increment,
    /// `prefix + commonNameList[index]`.
    List,
}

/// Subject template applied uniformly to every certificate of a task.
///
/// # Examples
///
/// ```
/// use bulkcert::domain::{CertInfo, NameGenerator};
///
/// let info: CertInfo = serde_json::from_value(serde_json::json!({
///     "commonNamePrefix": "dev-",
///     "commonNameGenerator": "increment",
///     "commonNameStart": "A",
///     "organization": "Example Corp"
/// }))
/// .unwrap();
/// assert_eq!(info.common_name_generator, NameGenerator::Increment);
/// assert_eq!(info.common_name_start.as_deref(), Some("A"));
/// assert!(!info.include_ca);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertInfo {
    /// Subject `C`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    /// Subject `ST`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Subject `L`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,

    /// Subject `O`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,

    /// Subject `OU`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizational_unit: Option<String>,

    /// Static common name (used by [`NameGenerator::Static`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,

    /// Literal prefix prepended to every generated common name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name_prefix: Option<String>,

    /// Common-name generation mode.
    #[serde(default)]
    pub common_name_generator: NameGenerator,

    /// Hex start value for [`NameGenerator::Increment`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name_start: Option<String>,

    /// Explicit names for [`NameGenerator::List`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name_list: Option<Vec<String>>,

    /// Certificate validity in days. Falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_days: Option<u32>,

    /// Append the CA certificate to each leaf PEM (customer CAs only).
    #[serde(default)]
    pub include_ca: bool,
}

/// "Process this chunk" request carried by the work channel.
///
/// Delivery is at-least-once: the same message may reach a worker more than
/// once, and processing it again must be safe.
///
/// # Examples
///
/// ```
/// use bulkcert::domain::{CertInfo, WorkMessage};
///
/// let message = WorkMessage {
///     task_id: "task-1".to_string(),
///     chunk_id: 1,
///     quantity: 50,
///     offset: 0,
///     cert_info: CertInfo::default(),
///     ca_alias: "default".to_string(),
/// };
/// let json = serde_json::to_value(&message).unwrap();
/// assert_eq!(json["taskId"], "task-1");
/// assert_eq!(json["caAlias"], "default");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkMessage {
    /// Owning task.
    pub task_id: String,
    /// Chunk within the task.
    pub chunk_id: u32,
    /// Certificates to issue.
    pub quantity: u32,
    /// Task-wide index of the first certificate (drives name generation).
    #[serde(default)]
    pub offset: u64,
    /// Subject template.
    pub cert_info: CertInfo,
    /// CA alias to issue against.
    pub ca_alias: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn generator_defaults_to_static() {
        let info: CertInfo = serde_json::from_value(json!({})).unwrap();
        assert_eq!(info.common_name_generator, NameGenerator::Static);
        assert_eq!(info, CertInfo::default());
    }

    #[test]
    fn cert_info_skips_unset_fields() {
        let info = CertInfo {
            common_name: Some("device".to_string()),
            ..CertInfo::default()
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(
            value,
            json!({
                "commonName": "device",
                "commonNameGenerator": "static",
                "includeCa": false
            })
        );
    }

    #[test]
    fn message_without_offset_defaults_to_zero() {
        let message: WorkMessage = serde_json::from_value(json!({
            "taskId": "t",
            "chunkId": 4,
            "quantity": 15,
            "certInfo": {"commonNameGenerator": "list", "commonNameList": ["a"]},
            "caAlias": "acme"
        }))
        .unwrap();
        assert_eq!(message.offset, 0);
        assert_eq!(message.cert_info.common_name_generator, NameGenerator::List);
    }
}
