use serde::Deserialize;

/// Serialized batch of upstream ids stored in a broker row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrokerPayload {
    #[serde(rename = "Source")]
    pub source: i64,
    #[serde(rename = "Data")]
    pub data: Vec<PayloadItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PayloadItem {
    #[serde(rename = "Id")]
    pub id: i64,
}

impl BrokerPayload {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
