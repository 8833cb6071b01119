use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque provider task identifier. Correlates every status query to the
/// job it was issued for; immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed projection of the provider's state vocabulary. Only `success`
/// and `fail` are terminal; every other tag, including ones this code has
/// never seen, means the job is still running. Never defaults to success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    InProgress,
    Success,
    Fail,
}

impl TaskState {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "success" => Self::Success,
            "fail" => Self::Fail,
            _ => Self::InProgress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }
}

/// One status-query response as reported by the provider. On success the
/// result URLs arrive in `resultJson`, a JSON document serialized *inside*
/// the outer JSON envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskSnapshot {
    #[serde(default)]
    pub state: String,
    #[serde(rename = "resultJson", default)]
    pub result_json: Option<String>,
    #[serde(rename = "failMsg", default)]
    pub fail_msg: Option<String>,
}

impl TaskSnapshot {
    pub fn task_state(&self) -> TaskState {
        TaskState::from_tag(&self.state)
    }

    /// Extracts the first artifact URL from the nested `resultJson` payload.
    ///
    /// The provider has historically spelled the key both `resultUrls` and
    /// `resulturls`; both are accepted. A missing document, an unparseable
    /// document, or an empty list all yield `None` rather than an error.
    /// Pure; calling twice gives the same answer.
    pub fn first_result_url(&self) -> Option<String> {
        let raw = self.result_json.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        let parsed: Value = serde_json::from_str(raw).ok()?;
        let urls = parsed
            .get("resultUrls")
            .or_else(|| parsed.get("resulturls"))
            .and_then(Value::as_array)?;
        urls.iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|url| !url.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::{TaskSnapshot, TaskState};

    fn snapshot(state: &str, result_json: Option<&str>) -> TaskSnapshot {
        TaskSnapshot {
            state: state.to_string(),
            result_json: result_json.map(str::to_string),
            fail_msg: None,
        }
    }

    #[test]
    fn only_success_and_fail_are_terminal() {
        assert_eq!(TaskState::from_tag("success"), TaskState::Success);
        assert_eq!(TaskState::from_tag("fail"), TaskState::Fail);
        assert_eq!(TaskState::from_tag("waiting"), TaskState::InProgress);
        assert_eq!(TaskState::from_tag("queuing"), TaskState::InProgress);
        assert_eq!(TaskState::from_tag(""), TaskState::InProgress);
        // Unknown future vocabulary must read as still-in-progress.
        assert_eq!(TaskState::from_tag("SUCCESS"), TaskState::InProgress);
        assert_eq!(TaskState::from_tag("done"), TaskState::InProgress);
    }

    #[test]
    fn extracts_first_url_from_nested_document() {
        let snap = snapshot("success", Some(r#"{"resultUrls":["X","Y"]}"#));
        assert_eq!(snap.first_result_url().as_deref(), Some("X"));
    }

    #[test]
    fn accepts_lowercase_key_spelling() {
        let snap = snapshot("success", Some(r#"{"resulturls":["Y"]}"#));
        assert_eq!(snap.first_result_url().as_deref(), Some("Y"));
    }

    #[test]
    fn empty_or_missing_results_are_none_not_errors() {
        assert_eq!(snapshot("success", None).first_result_url(), None);
        assert_eq!(snapshot("success", Some("")).first_result_url(), None);
        assert_eq!(
            snapshot("success", Some(r#"{"resultUrls":[]}"#)).first_result_url(),
            None
        );
        assert_eq!(
            snapshot("success", Some("not json")).first_result_url(),
            None
        );
    }

    #[test]
    fn extraction_is_idempotent() {
        let snap = snapshot("success", Some(r#"{"resultUrls":["X"]}"#));
        let first = snap.first_result_url();
        let second = snap.first_result_url();
        assert_eq!(first, second);
        assert_eq!(first.as_deref(), Some("X"));
    }
}
