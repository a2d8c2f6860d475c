//! Event handlers and notification producers
//!
//! Inbound events from a connection are handled here on the connection's
//! own inbound task, not inside the hub loop. Domain events raised by the
//! API layer (new post, new comment) are turned into envelopes and handed
//! to the hub for broadcast.

use tracing::debug;

use crate::connection::Session;
use crate::error::AppError;
use crate::hub::Hub;
use crate::message::{
    ClientEvent, NewCommentEvent, NewMessageEvent, NewPostEvent, PrivateMessagePayload,
    ServerEvent, StopTypingEvent, TypingEvent, TypingPayload,
};
use crate::store::{CommentRecord, NewMessage, PostRecord, UserDisplay};

/// Route a decoded inbound event to its handler
pub async fn dispatch(hub: &Hub, session: Session, event: ClientEvent) -> Result<(), AppError> {
    match event {
        ClientEvent::PrivateMessage(payload) => handle_private_message(hub, session, payload).await,
        ClientEvent::Typing(payload) => handle_typing(hub, session, payload).await,
        ClientEvent::StopTyping(payload) => handle_stop_typing(hub, session, payload).await,
    }
}

/// Store a private message and deliver it to both ends
///
/// The recipient only gets it if currently connected; the sender's own
/// connection always gets the same envelope as confirmation.
pub async fn handle_private_message(
    hub: &Hub,
    session: Session,
    payload: PrivateMessagePayload,
) -> Result<(), AppError> {
    let PrivateMessagePayload {
        recipient_id,
        content,
    } = payload;

    if !recipient_id.is_valid() {
        return Err(AppError::InvalidEvent("recipient ID must be positive"));
    }
    if recipient_id == session.user_id {
        return Err(AppError::InvalidEvent("cannot message yourself"));
    }
    if content.trim().is_empty() {
        return Err(AppError::InvalidEvent("message content is empty"));
    }

    let record = hub
        .store()
        .create_message(NewMessage {
            sender_id: session.user_id,
            recipient_id,
            content,
        })
        .await?;
    let sender = hub.store().user_display(session.user_id).await?;

    let frame = ServerEvent::NewMessage(NewMessageEvent {
        id: record.id,
        sender_id: record.sender_id,
        recipient_id: record.recipient_id,
        content: record.content,
        sender: sender.nickname,
        timestamp: record.created_at,
    })
    .encode()?;

    if let Err(e) = hub.send_to_user(recipient_id, frame.clone()).await {
        debug!("Message {} not delivered to user {}: {}", record.id, recipient_id, e);
    }
    if let Err(e) = hub.send_to_connection(session.connection_id, frame).await {
        debug!("Message {} not confirmed to sender {}: {}", record.id, session.user_id, e);
    }
    Ok(())
}

/// Tell the counterpart the user is typing
pub async fn handle_typing(
    hub: &Hub,
    session: Session,
    payload: TypingPayload,
) -> Result<(), AppError> {
    let chat_with = payload.chat_with;
    if chat_with == session.user_id {
        return Err(AppError::InvalidEvent("cannot type to yourself"));
    }
    if hub.connection_for(chat_with).is_none() {
        return Ok(());
    }

    let sender = hub.store().user_display(session.user_id).await?;
    let frame = ServerEvent::Typing(TypingEvent {
        user_id: session.user_id,
        username: sender.nickname,
        chat_with,
    })
    .encode()?;

    if let Err(e) = hub.send_to_user(chat_with, frame).await {
        debug!("Typing indicator for {} dropped: {}", chat_with, e);
    }
    Ok(())
}

/// Tell the counterpart the user stopped typing
pub async fn handle_stop_typing(
    hub: &Hub,
    session: Session,
    payload: TypingPayload,
) -> Result<(), AppError> {
    let chat_with = payload.chat_with;
    if chat_with == session.user_id {
        return Err(AppError::InvalidEvent("cannot type to yourself"));
    }

    let frame = ServerEvent::StopTyping(StopTypingEvent {
        user_id: session.user_id,
        chat_with,
    })
    .encode()?;

    if let Err(e) = hub.send_to_user(chat_with, frame).await {
        debug!("Stop-typing indicator for {} dropped: {}", chat_with, e);
    }
    Ok(())
}

/// Broadcast a post the API layer just stored
pub async fn publish_new_post(
    hub: &Hub,
    post: &PostRecord,
    author: &UserDisplay,
) -> Result<(), AppError> {
    let frame = ServerEvent::NewPost(NewPostEvent {
        id: post.id,
        user_id: post.user_id,
        title: post.title.clone(),
        content: post.content.clone(),
        category_id: post.category_id,
        category_name: post.category_name.clone(),
        nickname: author.nickname.clone(),
        avatar_color: author.avatar_color.clone(),
        timestamp: post.created_at,
    })
    .encode()?;

    debug!("Broadcasting post {}", post.id);
    hub.broadcast(frame).await
}

/// Broadcast a comment the API layer just stored
pub async fn publish_new_comment(
    hub: &Hub,
    comment: &CommentRecord,
    author: &UserDisplay,
) -> Result<(), AppError> {
    let frame = ServerEvent::NewComment(NewCommentEvent {
        id: comment.id,
        post_id: comment.post_id,
        user_id: comment.user_id,
        content: comment.content.clone(),
        nickname: author.nickname.clone(),
        avatar_color: author.avatar_color.clone(),
        timestamp: comment.created_at,
    })
    .encode()?;

    debug!("Broadcasting comment {} on post {}", comment.id, comment.post_id);
    hub.broadcast(frame).await
}
