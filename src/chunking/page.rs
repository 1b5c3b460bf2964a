//! Page wire format
//!
//! [`ChunkPage`] is the owned form handed back to callers. The writer serializes
//! [`PageView`] instead, which borrows monitors from the aggregate so candidate
//! pages can be re-measured without cloning. Both produce the same bytes.

use serde::{Deserialize, Serialize};

use crate::domain::aggregate::MonitorRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPage {
    pub result_id: String,
    pub hosts: Vec<PageHost>,
    pub next_result: Option<usize>,
    pub has_more: bool,
    /// Only present on pages synthesized for a missing chunk.
    #[serde(
        rename = "errorMessage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageHost {
    pub hostname: String,
    pub telemetry: PageTelemetry,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageTelemetry {
    pub total: u64,
    pub monitors: Vec<MonitorRecord>,
}

impl ChunkPage {
    pub fn not_found(result_id: &str, result_number: i64) -> Self {
        Self {
            result_id: result_id.to_string(),
            hosts: Vec::new(),
            next_result: None,
            has_more: false,
            error_message: Some(format!(
                "Chunk not found for resultId={result_id} and resultNumber={result_number}"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct PageView<'a> {
    pub result_id: &'a str,
    pub hosts: &'a [HostView<'a>],
    pub next_result: Option<usize>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct HostView<'a> {
    pub hostname: &'a str,
    pub telemetry: TelemetryView<'a>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct TelemetryView<'a> {
    pub total: u64,
    pub monitors: &'a [MonitorRecord],
}

impl<'a> PageView<'a> {
    /// A page that still has a successor at `index + 1`.
    pub fn continued(result_id: &'a str, hosts: &'a [HostView<'a>], index: usize) -> Self {
        Self {
            result_id,
            hosts,
            next_result: Some(index + 1),
            has_more: true,
        }
    }

    pub fn last(result_id: &'a str, hosts: &'a [HostView<'a>]) -> Self {
        Self {
            result_id,
            hosts,
            next_result: None,
            has_more: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn view_and_owned_page_serialize_identically() {
        let monitors = vec![MonitorRecord(json!({"id": "disk-1", "state": "ok"}))];
        let hosts = [HostView {
            hostname: "db-01",
            telemetry: TelemetryView {
                total: 3,
                monitors: &monitors,
            },
            error_message: None,
        }];
        let view_bytes =
            serde_json::to_vec(&PageView::continued("rid", &hosts, 4)).expect("serialize view");

        let owned = ChunkPage {
            result_id: "rid".to_string(),
            hosts: vec![PageHost {
                hostname: "db-01".to_string(),
                telemetry: PageTelemetry {
                    total: 3,
                    monitors: monitors.clone(),
                },
                error_message: None,
            }],
            next_result: Some(5),
            has_more: true,
            error_message: None,
        };
        let owned_bytes = serde_json::to_vec(&owned).expect("serialize owned");

        assert_eq!(view_bytes, owned_bytes);
        assert_eq!(
            String::from_utf8(view_bytes).expect("utf8"),
            r#"{"result_id":"rid","hosts":[{"hostname":"db-01","telemetry":{"total":3,"monitors":[{"id":"disk-1","state":"ok"}]},"errorMessage":null}],"next_result":5,"has_more":true}"#
        );
    }

    #[test]
    fn not_found_page_keeps_page_shape() {
        let value = serde_json::to_value(ChunkPage::not_found("unknown-id", 0)).expect("serialize");

        assert_eq!(value["result_id"], "unknown-id");
        assert_eq!(value["hosts"], json!([]));
        assert_eq!(value["next_result"], json!(null));
        assert_eq!(value["has_more"], json!(false));
        assert_eq!(
            value["errorMessage"],
            "Chunk not found for resultId=unknown-id and resultNumber=0"
        );
    }
}
