use std::collections::HashMap;

use web_time::Instant;

use crate::error::{PendingRequestError, PendingRequestResult};
use crate::types::{ProgressSample, RequestContent, RequestInfo};

/// Table of in-flight segment requests, introspected by the network analyzer
/// to judge current conditions.
///
/// Entries live from `request_begin` until `request_end`/cancellation; misuse
/// of that contract is a programmer error and reported as such.
#[derive(Clone, Debug, Default)]
pub struct PendingRequestsStore {
    requests: HashMap<u64, RequestInfo>,
}

impl PendingRequestsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        id: u64,
        request_timestamp: Instant,
        content: RequestContent,
    ) -> PendingRequestResult<()> {
        if self.requests.contains_key(&id) {
            return Err(PendingRequestError::DuplicateRequest(id));
        }
        self.requests.insert(
            id,
            RequestInfo {
                request_timestamp,
                content,
                progress: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn add_progress(&mut self, id: u64, progress: ProgressSample) -> PendingRequestResult<()> {
        match self.requests.get_mut(&id) {
            Some(request) => {
                request.progress.push(progress);
                Ok(())
            }
            None => Err(PendingRequestError::UnknownProgress(id)),
        }
    }

    pub fn remove(&mut self, id: u64) -> PendingRequestResult<()> {
        match self.requests.remove(&id) {
            Some(_) => Ok(()),
            None => Err(PendingRequestError::UnknownRemoval(id)),
        }
    }

    /// All current entries, sorted ascending by segment start time.
    ///
    /// Chronological order is what the network analyzer's concerned-request
    /// lookup relies on.
    pub fn get_requests(&self) -> Vec<&RequestInfo> {
        let mut requests: Vec<&RequestInfo> = self.requests.values().collect();
        requests.sort_by(|a, b| {
            a.content
                .segment
                .time
                .partial_cmp(&b.content.segment.time)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        requests
    }
}
