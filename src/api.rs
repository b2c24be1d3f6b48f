//! Wire shapes shared by the HTTP client and the event-store service.

use serde::{Deserialize, Serialize};

use crate::event::{MetadataFields, PatchKind, PlayEvent};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AppendResponse {
    pub accepted: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsResponse {
    pub events: Vec<PlayEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRequest {
    pub target_kind: PatchKind,
    pub target_id: String,
    pub fields: MetadataFields,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PatchResponse {
    pub patched: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
