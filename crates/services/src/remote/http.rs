use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use lms_core::model::{CourseId, LessonCompletionUpdate, LessonId, ProgressSnapshot, StudentId};

use super::{NotificationApi, ProgressApi};
use crate::error::RemoteError;

/// JSON-over-HTTP client for the LMS API.
#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpApi {
    #[must_use]
    pub fn new(base_url: Url, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            token,
        }
    }

    /// Append percent-encoded path segments to the base URL.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
        if !response.status().is_success() {
            return Err(RemoteError::HttpStatus(response.status()));
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| RemoteError::Decode(err.to_string()))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionRequest<'a> {
    completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    child_id: Option<&'a StudentId>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UnreadCountBody {
    Wrapped { count: u64 },
    Bare(u64),
}

#[async_trait]
impl ProgressApi for HttpApi {
    async fn get_course_progress(
        &self,
        course_id: &CourseId,
        student_id: &StudentId,
    ) -> Result<ProgressSnapshot, RemoteError> {
        let url = self.url(&[
            "progress",
            "courses",
            course_id.as_str(),
            "students",
            student_id.as_str(),
        ]);
        let response = self.authorize(self.client.get(url)).send().await?;
        Self::decode(response).await
    }

    async fn update_lesson_completion(
        &self,
        lesson_id: &LessonId,
        completed: bool,
        child_id: Option<&StudentId>,
    ) -> Result<LessonCompletionUpdate, RemoteError> {
        let url = self.url(&["progress", "lessons", lesson_id.as_str(), "completion"]);
        let payload = CompletionRequest {
            completed,
            child_id,
        };
        let response = self
            .authorize(self.client.post(url))
            .json(&payload)
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl NotificationApi for HttpApi {
    async fn unread_count(&self) -> Result<u64, RemoteError> {
        let url = self.url(&["notifications", "unread-count"]);
        let response = self.authorize(self.client.get(url)).send().await?;
        let body: UnreadCountBody = Self::decode(response).await?;
        Ok(match body {
            UnreadCountBody::Wrapped { count } | UnreadCountBody::Bare(count) => count,
        })
    }
}
