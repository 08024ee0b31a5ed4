use crate::protocol::{AuthorizationState, Chat, ChatPhotoInfo, File, Message, Update, User};
use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

/// Per-kind reactions to client updates. Every hook defaults to a no-op.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn on_authorization_state(&self, _state: AuthorizationState) {}

    async fn on_option(&self, _name: String, _value: Value) {}

    async fn on_user(&self, _user: User) {}

    async fn on_user_status(&self, _user_id: i64, _status: Value) {}

    async fn on_new_chat(&self, _chat: Chat) {}

    async fn on_chat_position(&self, _chat_id: i64, _position: Value) {}

    async fn on_new_message(&self, _message: Message) {}

    async fn on_chat_photo(&self, _chat_id: i64, _photo: Option<ChatPhotoInfo>) {}

    async fn on_file(&self, _file: File) {}

    async fn on_file_download(&self, _file_id: i32, _complete_date: i64, _is_paused: bool) {}
}

/// Route one update to its hook
pub async fn dispatch(handler: &dyn UpdateHandler, update: Update) {
    trace!(kind = update.kind(), "Dispatching update");
    match update {
        Update::AuthorizationState {
            authorization_state,
        } => handler.on_authorization_state(authorization_state).await,
        Update::OptionChanged { name, value } => handler.on_option(name, value).await,
        Update::UserInfo { user } => handler.on_user(user).await,
        Update::UserStatus { user_id, status } => handler.on_user_status(user_id, status).await,
        Update::NewChat { chat } => handler.on_new_chat(chat).await,
        Update::ChatPosition { chat_id, position } => {
            handler.on_chat_position(chat_id, position).await
        }
        Update::NewMessage { message } => handler.on_new_message(message).await,
        Update::ChatPhoto { chat_id, photo } => handler.on_chat_photo(chat_id, photo).await,
        Update::File { file } => handler.on_file(file).await,
        Update::FileDownload {
            file_id,
            complete_date,
            is_paused,
        } => {
            handler
                .on_file_download(file_id, complete_date, is_paused)
                .await
        }
        Update::Unsupported => {}
    }
}
