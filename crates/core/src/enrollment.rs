use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Launch-context key naming the gradebook cell a score is written to.
pub const RESULT_SOURCEDID: &str = "lis_result_sourcedid";

/// Launch-context key naming the outcome service endpoint.
pub const OUTCOME_SERVICE_URL: &str = "lis_outcome_service_url";

/// Opaque launch metadata recorded when the learner opened the assignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaunchContext(Map<String, Value>);

impl LaunchContext {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Parse a JSON object. Anything other than an object is rejected.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// String-valued field, `None` when absent, empty, or not a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn result_sourcedid(&self) -> Option<&str> {
        self.get_str(RESULT_SOURCEDID)
    }

    pub fn outcome_service_url(&self) -> Option<&str> {
        self.get_str(OUTCOME_SERVICE_URL)
    }
}

/// One learner to grade, as read from the enrollment source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentEntry {
    pub identity: String,
    pub context: LaunchContext,
}

impl EnrollmentEntry {
    pub fn new(identity: impl Into<String>, context: LaunchContext) -> Self {
        Self {
            identity: identity.into(),
            context,
        }
    }
}
