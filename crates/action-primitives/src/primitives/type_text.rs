//! Type primitive - text entry with strategy selection and the `{Key}` grammar

use std::time::{Duration, Instant};

use action_locator::{ElementHandle, Point};
use cdp_adapter::CdpSession;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use crate::{
    errors::ActionError,
    input,
    keys::{has_special_keys, parse_keys, KeyChord, KeyDef, KeyToken, Modifiers},
    primitives::{bounded, DefaultActionPrimitives},
    scripts,
    types::{ActionReport, ExecCtx, Target, TypeOptions, TypeTimeout, TypingConfig, TypingStrategy},
};

const MIN_TYPE_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_TYPE_TIMEOUT: Duration = Duration::from_secs(600);
const KEYBOARD_TYPE_TIMEOUT: Duration = Duration::from_secs(20);
const SPECIAL_KEY_BONUS: Duration = Duration::from_secs(5);
/// Texts up to this length get the base timeout
const TIMEOUT_FREE_CHARS: usize = 100;

/// Picks how `text` reaches the element.
pub fn choose_strategy(text: &str, config: &TypingConfig) -> TypingStrategy {
    if has_special_keys(text) {
        TypingStrategy::KeyboardSimulation
    } else if text.chars().count() > config.progressive_threshold {
        TypingStrategy::Progressive
    } else {
        TypingStrategy::DirectAssign
    }
}

/// Deadline derived from the text: longer texts and key simulation get more time.
pub fn auto_timeout(text: &str) -> Duration {
    let keyboard = has_special_keys(text);
    let base = if keyboard {
        KEYBOARD_TYPE_TIMEOUT
    } else {
        MIN_TYPE_TIMEOUT
    };
    let len = text.chars().count();
    if len <= TIMEOUT_FREE_CHARS {
        return base;
    }

    let per_second = if keyboard { 20 } else { 30 };
    let length_factor = Duration::from_secs(((len - TIMEOUT_FREE_CHARS) / per_second) as u64);
    let long_text_bonus = match len {
        n if n > 2000 => Duration::from_secs(30),
        n if n > 1000 => Duration::from_secs(20),
        n if n > 500 => Duration::from_secs(10),
        _ => Duration::ZERO,
    };
    let special = if keyboard {
        SPECIAL_KEY_BONUS
    } else {
        Duration::ZERO
    };

    (base + length_factor + long_text_bonus + special).clamp(MIN_TYPE_TIMEOUT, MAX_TYPE_TIMEOUT)
}

/// Manual timeouts must lie within the same bounds as derived ones.
pub fn resolve_timeout(timeout: TypeTimeout, text: &str) -> Result<Duration, ActionError> {
    match timeout {
        TypeTimeout::Auto => Ok(auto_timeout(text)),
        TypeTimeout::Millis(ms) => {
            let duration = Duration::from_millis(ms);
            if duration < Duration::from_millis(5_000) || duration > MAX_TYPE_TIMEOUT {
                return Err(ActionError::InvalidArgument(format!(
                    "type timeout {ms}ms outside 5000..=600000ms"
                )));
            }
            Ok(duration)
        }
    }
}

/// Execute type primitive
///
/// Steps:
/// 1. Parse the key grammar (unknown keys fail before any event is sent)
/// 2. Derive the typing deadline and strategy
/// 3. Focus the target, clearing it when asked
/// 4. Deliver the text with the chosen strategy
/// 5. Optionally submit with Enter
pub async fn execute_type_text(
    primitives: &DefaultActionPrimitives,
    ctx: &ExecCtx,
    target: &Target,
    text: &str,
    options: &TypeOptions,
) -> Result<ActionReport, ActionError> {
    let started_at = Utc::now();
    let start_instant = Instant::now();

    let tokens = parse_keys(text)?;
    let timeout = resolve_timeout(options.timeout, text)?;
    let strategy = choose_strategy(text, primitives.typing());

    info!(
        action_id = %ctx.action_id,
        target = %target.describe(),
        chars = text.chars().count(),
        strategy = ?strategy,
        timeout_ms = timeout.as_millis() as u64,
        "Executing type primitive"
    );

    let mut typing_ctx = ctx.clone();
    typing_ctx.deadline = ctx.deadline.min(Instant::now() + timeout);

    let point = bounded(&typing_ctx, "type", async {
        let session = ctx.page.session();
        let (element, point) = focus_target(&session, target, options.clear_first).await?;
        let delay = Duration::from_millis(options.delay_ms);

        match strategy {
            TypingStrategy::DirectAssign => match &element {
                Some(element) => direct_assign(&session, element, text, !options.clear_first).await?,
                None => input::insert_text(&session, text).await?,
            },
            TypingStrategy::Progressive => {
                progressive(&session, text, primitives.typing(), options.delay_ms).await?
            }
            TypingStrategy::KeyboardSimulation => simulate(&session, &tokens, delay).await?,
        }

        if options.submit {
            press_named(&session, "Enter").await?;
        }
        Ok(point)
    })
    .await?;

    let latency_ms = start_instant.elapsed().as_millis() as u64;
    info!(
        action_id = %ctx.action_id,
        latency_ms = latency_ms,
        "Type completed successfully"
    );

    let report = ActionReport::success(started_at, latency_ms).with_strategy(strategy);
    Ok(match point {
        Some(point) => report.with_point(point),
        None => report,
    })
}

/// Execute press primitive: sends keys to whatever currently has focus.
pub async fn execute_press(ctx: &ExecCtx, keys: &str) -> Result<ActionReport, ActionError> {
    let started_at = Utc::now();
    let start_instant = Instant::now();

    let tokens = parse_keys(keys)?;
    info!(action_id = %ctx.action_id, keys = %keys, "Executing press primitive");

    bounded(ctx, "press", async {
        simulate(&ctx.page.session(), &tokens, Duration::ZERO).await
    })
    .await?;

    let latency_ms = start_instant.elapsed().as_millis() as u64;
    Ok(ActionReport::success(started_at, latency_ms).with_strategy(TypingStrategy::KeyboardSimulation))
}

/// Focuses the element (or clicks the point) that receives the text.
async fn focus_target(
    session: &CdpSession,
    target: &Target,
    clear: bool,
) -> Result<(Option<ElementHandle>, Option<Point>), ActionError> {
    match target {
        Target::Locator(locator) => {
            let element = locator.resolve().await?;
            element.scroll_into_view().await?;
            let focused = element.call(scripts::FOCUS_FOR_INPUT, &[json!(clear)]).await?;
            if !focused["editable"].as_bool().unwrap_or(false) {
                let kind = focused["kind"].as_str().unwrap_or("element");
                return Err(ActionError::NotEditable(format!(
                    "'{}' is a {kind}",
                    locator.selector()
                )));
            }
            Ok((Some(element), None))
        }
        Target::Point(point) => {
            input::mouse_move(session, *point, 0, Modifiers::NONE).await?;
            input::mouse_button(session, true, *point, Default::default(), 1, Modifiers::NONE)
                .await?;
            input::mouse_button(session, false, *point, Default::default(), 1, Modifiers::NONE)
                .await?;
            if clear {
                simulate(session, &parse_keys("{Ctrl+A}{Delete}")?, Duration::ZERO).await?;
            }
            Ok((None, Some(*point)))
        }
    }
}

/// Native value assignment followed by one press of the last character so key listeners see
/// a whole keystroke. The press carries no text, so nothing is typed twice.
async fn direct_assign(
    session: &CdpSession,
    element: &ElementHandle,
    text: &str,
    append: bool,
) -> Result<(), ActionError> {
    element
        .call(scripts::ASSIGN_VALUE, &[json!(text), json!(append)])
        .await?;
    if let Some(key) = text.chars().last().and_then(KeyDef::for_char) {
        input::key_event(session, "rawKeyDown", &key, Modifiers::NONE, None, None).await?;
        input::key_event(session, "keyUp", &key, Modifiers::NONE, None, None).await?;
    }
    Ok(())
}

async fn progressive(
    session: &CdpSession,
    text: &str,
    config: &TypingConfig,
    delay_ms: u64,
) -> Result<(), ActionError> {
    let chars: Vec<char> = text.chars().collect();
    let pause = Duration::from_millis(delay_ms.max(config.chunk_pause_ms));
    let chunks: Vec<String> = chars
        .chunks(config.chunk_size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect();

    debug!(chunks = chunks.len(), "Typing progressively");
    for (i, chunk) in chunks.iter().enumerate() {
        input::insert_text(session, chunk).await?;
        if i + 1 < chunks.len() && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
    Ok(())
}

async fn simulate(
    session: &CdpSession,
    tokens: &[KeyToken],
    delay: Duration,
) -> Result<(), ActionError> {
    for token in tokens {
        match token {
            KeyToken::Text(text) => input::type_chars(session, text, delay).await?,
            KeyToken::Chord(chord) => {
                input::press_chord(session, chord).await?;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Ok(())
}

async fn press_named(session: &CdpSession, name: &str) -> Result<(), ActionError> {
    let key = KeyDef::lookup(name).ok_or_else(|| ActionError::InvalidKey(name.to_string()))?;
    input::press_chord(
        session,
        &KeyChord {
            modifiers: Modifiers::NONE,
            key,
        },
    )
    .await
}
