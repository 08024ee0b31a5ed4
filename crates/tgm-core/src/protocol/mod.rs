//! Protocol client seam.
//!
//! The wrapped chat-protocol client is consumed as a black box that accepts
//! commands and emits an asynchronous stream of updates. Commands, responses and
//! updates follow the client's JSON interface, where every object carries its
//! kind in an `@type` field.
//!
//! ```text
//! session ──send(Command)──────────► client ──► remote service
//!    ▲                                  │
//!    └──── UpdateStream (Update) ◄──────┘
//! ```

pub mod bridge;
mod content;

pub use bridge::{BridgeClient, BridgeClientFactory};
pub use content::MessageContent;

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Stream of updates delivered by a protocol client.
pub type UpdateStream = mpsc::UnboundedReceiver<Update>;

/// A handle to one instance of the wrapped protocol client.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Submit a command and wait for its response object.
    async fn send(&self, command: Command) -> Result<Value>;

    /// Take the update stream. A client has exactly one subscriber.
    fn subscribe_updates(&self) -> Result<UpdateStream>;

    /// Close the client and release its resources.
    async fn close(&self) -> Result<()>;
}

/// Creates one protocol client per session.
pub trait ClientFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn ProtocolClient>>;
}

/// Decode a response object into the expected type
pub fn parse_response<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::UnexpectedResponse(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Commands understood by the protocol client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum Command {
    SetTdlibParameters(TdlibParameters),
    SetLogVerbosityLevel {
        new_verbosity_level: i32,
    },
    LoadChats {
        chat_list: Option<Value>,
        limit: i32,
    },
    GetChatHistory {
        chat_id: i64,
        from_message_id: i64,
        offset: i32,
        limit: i32,
        only_local: bool,
    },
    DownloadFile {
        file_id: i32,
        priority: i32,
        offset: i64,
        limit: i64,
        synchronous: bool,
    },
    GetMe,
    LogOut,
    Close,
    RequestQrCodeAuthentication {
        other_user_ids: Vec<i64>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetTdlibParameters(_) => "setTdlibParameters",
            Self::SetLogVerbosityLevel { .. } => "setLogVerbosityLevel",
            Self::LoadChats { .. } => "loadChats",
            Self::GetChatHistory { .. } => "getChatHistory",
            Self::DownloadFile { .. } => "downloadFile",
            Self::GetMe => "getMe",
            Self::LogOut => "logOut",
            Self::Close => "close",
            Self::RequestQrCodeAuthentication { .. } => "requestQrCodeAuthentication",
        }
    }
}

/// Configuration sent when the client asks for its parameters.
#[derive(Debug, Clone, Serialize)]
pub struct TdlibParameters {
    pub use_test_dc: bool,
    pub database_directory: String,
    pub files_directory: String,
    pub database_encryption_key: String,
    pub use_file_database: bool,
    pub use_chat_info_database: bool,
    pub use_message_database: bool,
    pub use_secret_chats: bool,
    pub api_id: i32,
    pub api_hash: String,
    pub system_language_code: String,
    pub device_model: String,
    pub system_version: String,
    pub application_version: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Objects
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocalFile {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub is_downloading_completed: bool,
    #[serde(default)]
    pub downloaded_size: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct File {
    pub id: i32,
    #[serde(default)]
    pub size: i64,
    pub local: LocalFile,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatPhotoInfo {
    pub small: File,
    pub big: Option<File>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    pub photo: Option<ChatPhotoInfo>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Message {
    pub id: i64,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub is_outgoing: bool,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Messages {
    #[serde(default)]
    pub total_count: i32,
    #[serde(default)]
    pub messages: Vec<Option<Message>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Updates
// ─────────────────────────────────────────────────────────────────────────────

/// Authorization progress reported by the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "@type")]
pub enum AuthorizationState {
    #[serde(rename = "authorizationStateWaitTdlibParameters")]
    WaitParameters,
    #[serde(rename = "authorizationStateWaitPhoneNumber")]
    WaitPhoneNumber,
    #[serde(rename = "authorizationStateWaitOtherDeviceConfirmation")]
    WaitOtherDeviceConfirmation { link: String },
    #[serde(rename = "authorizationStateReady")]
    Ready,
    #[serde(rename = "authorizationStateClosed")]
    Closed,
    #[serde(other)]
    Other,
}

/// Update events pushed by the client, one variant per handled kind.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "@type")]
pub enum Update {
    #[serde(rename = "updateAuthorizationState")]
    AuthorizationState {
        authorization_state: AuthorizationState,
    },
    #[serde(rename = "updateOption")]
    OptionChanged { name: String, value: Value },
    #[serde(rename = "updateUser")]
    UserInfo { user: User },
    #[serde(rename = "updateUserStatus")]
    UserStatus { user_id: i64, status: Value },
    #[serde(rename = "updateNewChat")]
    NewChat { chat: Chat },
    #[serde(rename = "updateChatPosition")]
    ChatPosition { chat_id: i64, position: Value },
    #[serde(rename = "updateNewMessage")]
    NewMessage { message: Message },
    #[serde(rename = "updateChatPhoto")]
    ChatPhoto {
        chat_id: i64,
        photo: Option<ChatPhotoInfo>,
    },
    #[serde(rename = "updateFile")]
    File { file: File },
    #[serde(rename = "updateFileDownload")]
    FileDownload {
        file_id: i32,
        #[serde(default)]
        complete_date: i64,
        #[serde(default)]
        is_paused: bool,
    },
    #[serde(other)]
    Unsupported,
}

impl Update {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthorizationState { .. } => "authorization_state",
            Self::OptionChanged { .. } => "option",
            Self::UserInfo { .. } => "user",
            Self::UserStatus { .. } => "user_status",
            Self::NewChat { .. } => "new_chat",
            Self::ChatPosition { .. } => "chat_position",
            Self::NewMessage { .. } => "new_message",
            Self::ChatPhoto { .. } => "chat_photo",
            Self::File { .. } => "file",
            Self::FileDownload { .. } => "file_download",
            Self::Unsupported => "unsupported",
        }
    }

    /// Shorthand for an authorization-state update
    pub fn authorization(state: AuthorizationState) -> Self {
        Self::AuthorizationState {
            authorization_state: state,
        }
    }
}
