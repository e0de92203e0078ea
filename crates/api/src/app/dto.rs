use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use feedpost_infra::driver::ErroredRun;

/// Body of `POST /cycles`. `now` defaults to the wall clock; pinning it lets
/// operators replay a cycle as of a past instant.
#[derive(Debug, Default, Deserialize)]
pub struct CycleRequest {
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ErroredRunsResponse {
    pub as_of: Option<DateTime<Utc>>,
    pub runs: Vec<ErroredRun>,
}
