//! Server-rendered chat page.
//!
//! The page is rendered once with the current conversation. After that the
//! live socket pushes a fresh `#messages` fragment on every conversation
//! update; the client swaps it in by id and scrolls the anchor that follows
//! the last bubble into view.

use chrono::{DateTime, Utc};
use maud::{html, Markup, PreEscaped, DOCTYPE};
use serde::Serialize;

use crate::models::{Identity, Message, MessageRole};

pub const MESSAGE_LIST_ID: &str = "messages";
pub const SCROLL_ANCHOR_ID: &str = "scroll-anchor";
pub const BOT_AVATAR_PATH: &str = "/assets/bot.svg";
pub const LOGO_PATH: &str = "/assets/yildly.svg";
pub const HISTORY_ENTRIES: usize = 10;

pub const LOGO_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 120 32"><text x="0" y="25" font-family="system-ui, sans-serif" font-size="26" font-weight="700" letter-spacing="1" fill="#ffffff">yildly</text></svg>"##;

pub const BOT_AVATAR_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 40 40"><circle cx="20" cy="20" r="20" fill="#1f6feb"/><path d="M12 11l8 10 8-10h-4l-4 5-4-5z M18 21h4v9h-4z" fill="#fff"/></svg>"##;

/// How a bubble is drawn relative to the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BubbleKind {
    Sent,
    ReceivedChatbot,
    Received,
}

impl BubbleKind {
    pub fn classify(message: &Message, viewer: &Identity) -> Self {
        let own_conversation = message.conversation_id == viewer.uid;
        match message.role {
            MessageRole::Human if own_conversation => BubbleKind::Sent,
            MessageRole::Bot if own_conversation => BubbleKind::ReceivedChatbot,
            _ => BubbleKind::Received,
        }
    }

    pub fn css_class(self) -> &'static str {
        match self {
            BubbleKind::Sent => "sent",
            BubbleKind::ReceivedChatbot => "received chatbot",
            BubbleKind::Received => "received",
        }
    }
}

/// JSON projection of a message for one viewer.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: String,
    pub uid: String,
    pub role: MessageRole,
    pub text: String,
    pub photo_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub kind: &'static str,
}

impl MessageView {
    pub fn new(message: &Message, viewer: &Identity) -> Self {
        Self {
            id: message.id.clone(),
            uid: message.author_uid(),
            role: message.role,
            text: message.text.clone(),
            photo_url: message.photo_url.clone(),
            created_at: message.created_at,
            kind: BubbleKind::classify(message, viewer).css_class(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageSettings {
    pub google_client_id: Option<String>,
    pub dev_sign_in: bool,
}

/// Id of the message the viewport should end on.
pub fn scroll_target(conversation: &[Message]) -> Option<&str> {
    conversation.last().map(|m| m.id.as_str())
}

pub fn page(identity: Option<&Identity>, conversation: &[Message], settings: &PageSettings) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { "Yildly Chat" }
                style { (PreEscaped(STYLES)) }
                @if identity.is_none() && settings.google_client_id.is_some() {
                    script src="https://accounts.google.com/gsi/client" async defer {}
                }
            }
            body {
                div class="App" {
                    header {
                        img class="logo" src=(LOGO_PATH) alt="yildly";
                        @if identity.is_some() {
                            button class="sign-out" type="button" onclick="signOut()" { "Sign Out" }
                        }
                    }
                    section {
                        @match identity {
                            Some(viewer) => { (chat_room(viewer, conversation)) }
                            None => { (sign_in_panel(settings)) }
                        }
                    }
                }
                script { (PreEscaped(CLIENT_SCRIPT)) }
            }
        }
    }
}

fn sign_in_panel(settings: &PageSettings) -> Markup {
    html! {
        div class="sign-in" {
            @if let Some(client_id) = &settings.google_client_id {
                div id="g_id_onload"
                    data-client_id=(client_id)
                    data-callback="onGoogleCredential"
                    data-intermediate_iframe_close_callback="onSignInClosed"
                    data-auto_prompt="false" {}
                div class="g_id_signin" data-type="standard" data-text="signin_with" {}
            }
            @if settings.dev_sign_in {
                form id="dev-sign-in" onsubmit="return devSignIn(event)" {
                    input name="display_name" placeholder="Your name" autocomplete="off" required;
                    button type="submit" { "Sign in (dev)" }
                }
            }
            @if settings.google_client_id.is_none() && !settings.dev_sign_in {
                p { "Sign-in is not configured." }
            }
        }
    }
}

fn chat_room(viewer: &Identity, conversation: &[Message]) -> Markup {
    html! {
        main {
            div class="sidebar" { (history_sidebar()) }
            div class="contentContainer" {
                (message_list(viewer, conversation))
                (compose_form(""))
            }
        }
    }
}

/// The fragment the live socket pushes on every update.
pub fn message_list(viewer: &Identity, conversation: &[Message]) -> Markup {
    html! {
        div id=(MESSAGE_LIST_ID) class="messageContainer" {
            @for message in conversation {
                (bubble(message, viewer))
            }
            span id=(SCROLL_ANCHOR_ID) data-scroll-to=(scroll_target(conversation).unwrap_or_default()) {}
        }
    }
}

fn bubble(message: &Message, viewer: &Identity) -> Markup {
    let kind = BubbleKind::classify(message, viewer);
    html! {
        div class={ "message " (kind.css_class()) } id={ "m-" (message.id) } data-uid=(message.author_uid()) {
            @match (kind, &message.photo_url) {
                (BubbleKind::ReceivedChatbot, _) => { img src=(BOT_AVATAR_PATH) alt="chatbot icon"; }
                (_, Some(url)) => { img src=(url) alt="user icon"; }
                (_, None) => { span class="avatar" {} }
            }
            p { (message.text) }
        }
    }
}

/// Placeholder sidebar; the buttons do nothing.
pub fn history_sidebar() -> Markup {
    html! {
        div {
            h1 { "Chat History" }
            @for n in 1..=HISTORY_ENTRIES {
                button class="chat-history-button" type="button" { "chat " (n) }
            }
        }
    }
}

/// Compose form; submit stays disabled while the draft is empty.
pub fn compose_form(draft: &str) -> Markup {
    let blank = draft.is_empty();
    html! {
        form id="compose" onsubmit="return sendMessage(event)" {
            input name="text"
                value=(draft)
                placeholder="Ask a question here..."
                autocomplete="off"
                oninput="syncCompose(this)";
            button class="submit" type="submit" disabled[blank] { "Send" }
        }
    }
}

const STYLES: &str = r#"
body { margin: 0; background: #282c34; font-family: system-ui, sans-serif; }
.App { text-align: center; max-width: 1100px; margin: 0 auto; }
header { height: 10vh; display: flex; align-items: center; justify-content: space-between; padding: 0 1rem; color: #fff; }
.logo { height: 5vh; }
main { display: flex; height: 80vh; }
.sidebar { width: 14rem; padding: 1rem; background: #1e1e24; color: #fff; overflow-y: auto; }
.chat-history-button { display: block; width: 100%; margin: 0.25rem 0; padding: 0.5rem; background: #3a3f4b; color: #fff; border: none; border-radius: 4px; }
.contentContainer { flex: 1; display: flex; flex-direction: column; }
.messageContainer { flex: 1; padding: 1rem; overflow-y: auto; display: flex; flex-direction: column; }
.message { display: flex; align-items: center; margin: 0.25rem 0; }
.message img, .message .avatar { width: 40px; height: 40px; border-radius: 50%; margin: 2px 5px; background: #555; }
.message p { max-width: 500px; margin: 0; padding: 10px 20px; border-radius: 25px; line-height: 24px; color: #fff; text-align: left; }
.sent { flex-direction: row-reverse; }
.sent p { background: #0b93f6; align-self: flex-end; }
.received p { background: #e5e5ea; color: #000; }
.chatbot p { background: #d8e7ff; }
form { display: flex; height: 10vh; }
form input { flex: 1; font-size: 1.2rem; padding: 0 10px; border: none; outline: none; background: #3a3f4b; color: #fff; }
form button { width: 20%; font-size: 1.2rem; border: none; background: #38388f; color: #fff; }
form button:disabled { opacity: 0.5; cursor: not-allowed; }
.sign-in { padding: 3rem; display: flex; flex-direction: column; align-items: center; gap: 1rem; color: #fff; }
.sign-out { padding: 0.5rem 1rem; border: none; border-radius: 4px; background: #3a3f4b; color: #fff; }
"#;

const CLIENT_SCRIPT: &str = r#"
(function () {
  var socket = null;

  function scrollToLatest() {
    var anchor = document.getElementById('scroll-anchor');
    if (anchor) anchor.scrollIntoView({ behavior: 'auto' });
  }

  function connect() {
    if (!document.getElementById('messages')) return;
    var scheme = location.protocol === 'https:' ? 'wss://' : 'ws://';
    socket = new WebSocket(scheme + location.host + '/ws');
    socket.onmessage = function (e) {
      if (e.data.charAt(0) === '{') {
        restoreDraft(JSON.parse(e.data));
        return;
      }
      var tmp = document.createElement('div');
      tmp.innerHTML = e.data;
      var el = tmp.firstElementChild;
      if (el && el.id) {
        var target = document.getElementById(el.id);
        if (target) target.outerHTML = el.outerHTML;
      }
      scrollToLatest();
    };
    socket.onclose = function () { setTimeout(connect, 1000); };
  }

  function restoreDraft(frame) {
    var input = document.querySelector('#compose input[name=text]');
    if (!input) return;
    if (!input.value && frame.text) input.value = frame.text;
    input.setCustomValidity(frame.error || '');
    input.reportValidity();
    input.setCustomValidity('');
    window.syncCompose(input);
  }

  function postJson(path, body) {
    return fetch(path, {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify(body || {})
    });
  }

  window.syncCompose = function (input) {
    input.form.querySelector('button[type=submit]').disabled = !input.value;
  };

  window.sendMessage = function (event) {
    event.preventDefault();
    var input = event.target.elements.text;
    var text = input.value;
    if (!text || !socket || socket.readyState !== WebSocket.OPEN) return false;
    socket.send(JSON.stringify({ text: text }));
    input.value = '';
    window.syncCompose(input);
    return false;
  };

  window.onGoogleCredential = function (response) {
    postJson('/auth/google', { credential: response.credential }).then(function (r) {
      if (r.status === 200) location.reload();
    });
  };

  window.onSignInClosed = function () {
    postJson('/auth/google', { error: 'popup_closed_by_user' });
  };

  window.devSignIn = function (event) {
    event.preventDefault();
    var name = event.target.elements.display_name.value;
    postJson('/auth/dev', { display_name: name }).then(function (r) {
      if (r.ok) location.reload();
    });
    return false;
  };

  window.signOut = function () {
    postJson('/auth/sign-out').then(function () { location.reload(); });
  };

  scrollToLatest();
  connect();
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMessage;

    fn confirmed(new: NewMessage, seq: u64) -> Message {
        let mut msg = Message::accepted(new, seq);
        msg.created_at = Some(Utc::now());
        msg
    }

    fn viewer() -> Identity {
        Identity::new("U1", "Ada").with_photo("https://img/ada.png")
    }

    #[test]
    fn test_classify_against_viewer() {
        let me = viewer();
        let other = Identity::new("U2", "Bob");

        let mine = confirmed(NewMessage::human(&me, "hi"), 1);
        let my_bot = confirmed(NewMessage::bot("U1", "Hello!"), 2);
        let theirs = confirmed(NewMessage::human(&other, "yo"), 3);
        let their_bot = confirmed(NewMessage::bot("U2", "Hello!"), 4);

        assert_eq!(BubbleKind::classify(&mine, &me), BubbleKind::Sent);
        assert_eq!(BubbleKind::classify(&my_bot, &me), BubbleKind::ReceivedChatbot);
        assert_eq!(BubbleKind::classify(&theirs, &me), BubbleKind::Received);
        assert_eq!(BubbleKind::classify(&their_bot, &me), BubbleKind::Received);
    }

    #[test]
    fn test_message_list_ends_with_scroll_anchor() {
        let me = viewer();
        let conversation = vec![
            confirmed(NewMessage::human(&me, "hi"), 1),
            confirmed(NewMessage::bot("U1", "Hello!"), 2),
        ];

        let html = message_list(&me, &conversation).into_string();

        let last_bubble = html.find(&format!("id=\"m-{}\"", conversation[1].id)).unwrap();
        let anchor = html.find("id=\"scroll-anchor\"").unwrap();
        assert!(last_bubble < anchor);
        assert!(html.contains(&format!("data-scroll-to=\"{}\"", conversation[1].id)));
    }

    #[test]
    fn test_bubbles_render_in_order_with_kinds() {
        let me = viewer();
        let conversation = vec![
            confirmed(NewMessage::human(&me, "hi"), 1),
            confirmed(NewMessage::bot("U1", "Hello!"), 2),
        ];

        let html = message_list(&me, &conversation).into_string();

        let sent = html.find("class=\"message sent\"").unwrap();
        let bot = html.find("class=\"message received chatbot\"").unwrap();
        assert!(sent < bot);
        assert!(html.contains(BOT_AVATAR_PATH));
        assert!(html.contains("https://img/ada.png"));
    }

    #[test]
    fn test_message_text_is_escaped() {
        let me = viewer();
        let conversation = vec![confirmed(NewMessage::human(&me, "<script>x</script>"), 1)];

        let html = message_list(&me, &conversation).into_string();

        assert!(!html.contains("<script>x"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_compose_disabled_only_while_empty() {
        assert!(compose_form("").into_string().contains("disabled"));
        assert!(!compose_form("  ").into_string().contains("disabled"));
        assert!(!compose_form("hi").into_string().contains("disabled"));
    }

    #[test]
    fn test_history_sidebar_has_ten_inert_buttons() {
        let html = history_sidebar().into_string();

        assert_eq!(html.matches("chat-history-button").count(), HISTORY_ENTRIES);
        assert!(html.contains("chat 10"));
        assert!(!html.contains("onclick"));
    }

    #[test]
    fn test_page_shows_sign_in_when_signed_out() {
        let settings = PageSettings {
            google_client_id: Some("client-1".into()),
            dev_sign_in: false,
        };

        let html = page(None, &[], &settings).into_string();

        assert!(html.contains("g_id_signin"));
        assert!(html.contains("client-1"));
        assert!(!html.contains("id=\"messages\""));
        assert!(!html.contains("Sign Out"));
    }

    #[test]
    fn test_page_shows_chat_room_when_signed_in() {
        let me = viewer();
        let html = page(Some(&me), &[], &PageSettings::default()).into_string();

        assert!(html.contains("id=\"messages\""));
        assert!(html.contains("Chat History"));
        assert!(html.contains("Sign Out"));
        assert!(html.contains(&format!("src=\"{LOGO_PATH}\"")));
        assert!(!html.contains("g_id_signin"));
    }

    #[test]
    fn test_message_view_carries_legacy_uid() {
        let me = viewer();
        let reply = confirmed(NewMessage::bot("U1", "Hello!"), 2);

        let view = MessageView::new(&reply, &me);

        assert_eq!(view.uid, "chatbot-U1");
        assert_eq!(view.kind, "received chatbot");
        assert_eq!(view.role, MessageRole::Bot);
    }
}
