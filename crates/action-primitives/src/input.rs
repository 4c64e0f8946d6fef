//! Raw `Input.*` event sequences.
//!
//! Everything is dispatched on the page's top-level session in main-frame coordinates; the
//! browser routes events into out-of-process frames itself.

use std::time::Duration;

use action_locator::Point;
use cdp_adapter::CdpSession;
use serde_json::json;

use crate::errors::ActionError;
use crate::keys::{KeyChord, KeyDef, Modifiers};
use crate::types::MouseButton;

pub(crate) async fn mouse_move(
    session: &CdpSession,
    point: Point,
    buttons: u8,
    modifiers: Modifiers,
) -> Result<(), ActionError> {
    session
        .send(
            "Input.dispatchMouseEvent",
            json!({
                "type": "mouseMoved",
                "x": point.x,
                "y": point.y,
                "buttons": buttons,
                "modifiers": modifiers.bits(),
            }),
        )
        .await?;
    Ok(())
}

pub(crate) async fn mouse_button(
    session: &CdpSession,
    pressed: bool,
    point: Point,
    button: MouseButton,
    click_count: u32,
    modifiers: Modifiers,
) -> Result<(), ActionError> {
    let (kind, buttons) = if pressed {
        ("mousePressed", button.mask())
    } else {
        ("mouseReleased", 0)
    };
    session
        .send(
            "Input.dispatchMouseEvent",
            json!({
                "type": kind,
                "x": point.x,
                "y": point.y,
                "button": button.as_str(),
                "buttons": buttons,
                "clickCount": click_count,
                "modifiers": modifiers.bits(),
            }),
        )
        .await?;
    Ok(())
}

pub(crate) async fn mouse_wheel(
    session: &CdpSession,
    point: Point,
    dx: f64,
    dy: f64,
) -> Result<(), ActionError> {
    session
        .send(
            "Input.dispatchMouseEvent",
            json!({
                "type": "mouseWheel",
                "x": point.x,
                "y": point.y,
                "deltaX": dx,
                "deltaY": dy,
            }),
        )
        .await?;
    Ok(())
}

/// Full press: modifiers down, key down/up, modifiers up in reverse.
pub(crate) async fn press_chord(session: &CdpSession, chord: &KeyChord) -> Result<(), ActionError> {
    let held: Vec<Modifiers> = chord.modifiers.iter().collect();
    let mut active = Modifiers::NONE;
    for modifier in &held {
        active |= *modifier;
        if let Some(key) = modifier.key() {
            key_event(session, "rawKeyDown", &key, active, None, None).await?;
        }
    }

    let text = chord.text();
    let down = if text.is_some() { "keyDown" } else { "rawKeyDown" };
    key_event(
        session,
        down,
        &chord.key,
        chord.modifiers,
        text.as_deref(),
        chord.edit_command(),
    )
    .await?;
    key_event(session, "keyUp", &chord.key, chord.modifiers, None, None).await?;

    for modifier in held.iter().rev() {
        active = active.without(*modifier);
        if let Some(key) = modifier.key() {
            key_event(session, "keyUp", &key, active, None, None).await?;
        }
    }
    Ok(())
}

/// Types `text` one key press per character. Characters without a key definition are inserted
/// directly.
pub(crate) async fn type_chars(
    session: &CdpSession,
    text: &str,
    delay: Duration,
) -> Result<(), ActionError> {
    for ch in text.chars() {
        match KeyDef::for_char(ch) {
            Some(key) => {
                let modifiers = if needs_shift(ch) {
                    Modifiers::SHIFT
                } else {
                    Modifiers::NONE
                };
                let text = key.text.clone();
                let down = if text.is_some() { "keyDown" } else { "rawKeyDown" };
                key_event(session, down, &key, modifiers, text.as_deref(), None).await?;
                key_event(session, "keyUp", &key, modifiers, None, None).await?;
            }
            None => insert_text(session, &ch.to_string()).await?,
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    Ok(())
}

fn needs_shift(ch: char) -> bool {
    ch.is_ascii_uppercase() || "~!@#$%^&*()_+{}|:\"<>?".contains(ch)
}

pub(crate) async fn insert_text(session: &CdpSession, text: &str) -> Result<(), ActionError> {
    session
        .send("Input.insertText", json!({ "text": text }))
        .await?;
    Ok(())
}

pub(crate) async fn key_event(
    session: &CdpSession,
    kind: &str,
    key: &KeyDef,
    modifiers: Modifiers,
    text: Option<&str>,
    command: Option<&str>,
) -> Result<(), ActionError> {
    let mut params = json!({
        "type": kind,
        "key": key.key,
        "code": key.code,
        "windowsVirtualKeyCode": key.key_code,
        "nativeVirtualKeyCode": key.key_code,
        "modifiers": modifiers.bits(),
    });
    if let Some(text) = text {
        params["text"] = json!(text);
        params["unmodifiedText"] = json!(text);
    }
    if let Some(command) = command {
        params["commands"] = json!([command]);
    }
    session.send("Input.dispatchKeyEvent", params).await?;
    Ok(())
}
