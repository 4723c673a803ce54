//! REST client for the live chat endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use shared::{
    domain::{ChatId, ChatSummary, UserId},
    error::ApiError,
    protocol::{
        chat_mark_read_path, chat_messages_path, chat_send_path, ChatListResponse,
        CreateChatRequest, CreateChatResponse, MessagePage, SendMessageRequest, WireMessage,
    },
};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ClientError;

const LIVE_CHATS_PATH: &str = "/live-chats/";

#[async_trait]
pub trait LiveChatApi: Send + Sync {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ClientError>;
    async fn create_chat(&self, request: &CreateChatRequest) -> Result<ChatSummary, ClientError>;
    /// One page of history, 1-based.
    async fn fetch_messages_page(
        &self,
        chat_id: ChatId,
        page: u32,
    ) -> Result<MessagePage, ClientError>;
    async fn send_message(
        &self,
        chat_id: ChatId,
        request: &SendMessageRequest,
    ) -> Result<WireMessage, ClientError>;
    async fn mark_read(&self, chat_id: ChatId) -> Result<(), ClientError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SentMessageResponse {
    Wrapped { message: WireMessage },
    Bare(WireMessage),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CreatedChatResponse {
    Wrapped(CreateChatResponse),
    Bare(ChatSummary),
}

#[derive(Debug, Clone)]
pub struct HttpLiveChatApi {
    http: Client,
    base: String,
    token: Option<String>,
}

impl HttpLiveChatApi {
    pub fn new(base: &Url, token: Option<String>) -> Self {
        Self::with_client(Client::new(), base, token)
    }

    pub fn with_client(http: Client, base: &Url, token: Option<String>) -> Self {
        Self {
            http,
            base: base.as_str().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{path}", self.base));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn checked(builder: RequestBuilder) -> Result<Response, ClientError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_body(status.as_u16(), &body).into())
    }

    async fn json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ClientError> {
        Ok(Self::checked(builder).await?.json().await?)
    }
}

#[async_trait]
impl LiveChatApi for HttpLiveChatApi {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ClientError> {
        let response: ChatListResponse =
            Self::json(self.request(Method::GET, LIVE_CHATS_PATH)).await?;
        Ok(response.into_chats())
    }

    async fn create_chat(&self, request: &CreateChatRequest) -> Result<ChatSummary, ClientError> {
        let response: CreatedChatResponse =
            Self::json(self.request(Method::POST, LIVE_CHATS_PATH).json(request)).await?;
        Ok(match response {
            CreatedChatResponse::Wrapped(wrapped) => wrapped.chat,
            CreatedChatResponse::Bare(chat) => chat,
        })
    }

    async fn fetch_messages_page(
        &self,
        chat_id: ChatId,
        page: u32,
    ) -> Result<MessagePage, ClientError> {
        Self::json(
            self.request(Method::GET, &chat_messages_path(chat_id))
                .query(&[("page", page)]),
        )
        .await
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        request: &SendMessageRequest,
    ) -> Result<WireMessage, ClientError> {
        let response: SentMessageResponse =
            Self::json(self.request(Method::POST, &chat_send_path(chat_id)).json(request)).await?;
        Ok(match response {
            SentMessageResponse::Wrapped { message } => message,
            SentMessageResponse::Bare(message) => message,
        })
    }

    async fn mark_read(&self, chat_id: ChatId) -> Result<(), ClientError> {
        Self::checked(self.request(Method::POST, &chat_mark_read_path(chat_id))).await?;
        Ok(())
    }
}

/// Finds the conversation shared by `student` and `admin`, creating it on
/// first access.
pub async fn get_or_create_chat(
    api: &dyn LiveChatApi,
    student: UserId,
    admin: UserId,
) -> Result<ChatSummary, ClientError> {
    let chats = api.list_chats().await?;
    if let Some(existing) = chats
        .into_iter()
        .find(|chat| chat.has_participants(student, admin))
    {
        debug!(chat_id = existing.id.0, "api: reusing existing conversation");
        return Ok(existing);
    }

    let chat = api
        .create_chat(&CreateChatRequest {
            title: format!("Chat with student {student}"),
            admin_id: Some(admin),
            student_id: Some(student),
        })
        .await?;
    info!(chat_id = chat.id.0, %student, %admin, "api: created conversation");
    Ok(chat)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

/// Fetches one history page, retrying transient failures.
pub async fn fetch_page_with_retry(
    api: &dyn LiveChatApi,
    chat_id: ChatId,
    page: u32,
    retry: RetryPolicy,
) -> Result<MessagePage, ClientError> {
    let mut attempt = 1;
    loop {
        match api.fetch_messages_page(chat_id, page).await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_retryable() && attempt < retry.attempts => {
                warn!(
                    chat_id = chat_id.0,
                    page, attempt, "api: history page failed, retrying: {err}"
                );
                attempt += 1;
                tokio::time::sleep(retry.delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Walks a conversation's history page by page. The caller pulls one page
/// at a time so it can stop between pages.
pub struct HistoryPages<'a> {
    api: &'a dyn LiveChatApi,
    chat_id: ChatId,
    retry: RetryPolicy,
    page: u32,
    done: bool,
}

impl<'a> HistoryPages<'a> {
    pub fn new(api: &'a dyn LiveChatApi, chat_id: ChatId, retry: RetryPolicy) -> Self {
        Self {
            api,
            chat_id,
            retry,
            page: 1,
            done: false,
        }
    }

    /// Number of the page the next call fetches.
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Next page of messages, or `None` once the last page was returned.
    /// A failed page ends the walk.
    pub async fn next_page(&mut self) -> Option<Result<Vec<WireMessage>, ClientError>> {
        if self.done {
            return None;
        }
        let result = fetch_page_with_retry(self.api, self.chat_id, self.page, self.retry).await;
        match result {
            Ok(page) => {
                self.done = page.next.is_none() || page.results.is_empty();
                self.page += 1;
                Some(Ok(page.results))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
