//! Key grammar used by typing and `press`.
//!
//! Plain characters are typed as text. `{Name}` presses one special key and `{Mod+Key}` a chord,
//! e.g. `{Enter}`, `{Shift+Tab}`, `{Ctrl+A}`. A `{` with no closing `}` is ordinary text.

use serde::{Deserialize, Serialize};

use crate::errors::ActionError;

/// Modifier bit mask as the protocol encodes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    pub const ALT: Modifiers = Modifiers(1);
    pub const CTRL: Modifiers = Modifiers(2);
    pub const META: Modifiers = Modifiers(4);
    pub const SHIFT: Modifiers = Modifiers(8);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn without(self, other: Modifiers) -> Modifiers {
        Modifiers(self.0 & !other.0)
    }

    /// Individual modifiers in press order.
    pub fn iter(self) -> impl Iterator<Item = Modifiers> {
        [Self::CTRL, Self::ALT, Self::META, Self::SHIFT]
            .into_iter()
            .filter(move |m| self.contains(*m))
    }

    /// Combines modifier names such as `["Ctrl", "Shift"]`.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Modifiers, ActionError> {
        let mut modifiers = Modifiers::NONE;
        for name in names {
            let name = name.as_ref();
            modifiers |= Modifiers::parse(name)
                .ok_or_else(|| ActionError::InvalidKey(format!("unknown modifier '{name}'")))?;
        }
        Ok(modifiers)
    }

    fn parse(name: &str) -> Option<Modifiers> {
        match name.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => Some(Self::CTRL),
            "alt" | "option" => Some(Self::ALT),
            "shift" => Some(Self::SHIFT),
            "meta" | "cmd" | "command" => Some(Self::META),
            _ => None,
        }
    }

    /// Key definition of the modifier key itself.
    pub fn key(self) -> Option<KeyDef> {
        let (key, code, key_code) = match self {
            Self::CTRL => ("Control", "ControlLeft", 17),
            Self::ALT => ("Alt", "AltLeft", 18),
            Self::META => ("Meta", "MetaLeft", 91),
            Self::SHIFT => ("Shift", "ShiftLeft", 16),
            _ => return None,
        };
        Some(KeyDef::named(key, code, key_code))
    }
}

impl std::ops::BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Modifiers) -> Modifiers {
        Modifiers(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Modifiers {
    fn bitor_assign(&mut self, rhs: Modifiers) {
        self.0 |= rhs.0;
    }
}

/// Protocol description of one physical key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDef {
    pub key: String,
    pub code: String,
    pub key_code: u32,
    /// Text the key inserts when pressed without modifiers.
    pub text: Option<String>,
}

impl KeyDef {
    fn named(key: &str, code: &str, key_code: u32) -> Self {
        Self {
            key: key.to_string(),
            code: code.to_string(),
            key_code,
            text: None,
        }
    }

    fn printable(key: &str, code: &str, key_code: u32, text: &str) -> Self {
        Self {
            key: key.to_string(),
            code: code.to_string(),
            key_code,
            text: Some(text.to_string()),
        }
    }

    /// Definition for a named key such as `Enter` or `ArrowLeft`, case-insensitive.
    pub fn lookup(name: &str) -> Option<KeyDef> {
        let lower = name.to_ascii_lowercase();
        let def = match lower.as_str() {
            "enter" | "return" => Self::printable("Enter", "Enter", 13, "\r"),
            "tab" => Self::named("Tab", "Tab", 9),
            "escape" | "esc" => Self::named("Escape", "Escape", 27),
            "backspace" => Self::named("Backspace", "Backspace", 8),
            "delete" | "del" => Self::named("Delete", "Delete", 46),
            "insert" => Self::named("Insert", "Insert", 45),
            "space" => Self::printable(" ", "Space", 32, " "),
            "arrowup" | "up" => Self::named("ArrowUp", "ArrowUp", 38),
            "arrowdown" | "down" => Self::named("ArrowDown", "ArrowDown", 40),
            "arrowleft" | "left" => Self::named("ArrowLeft", "ArrowLeft", 37),
            "arrowright" | "right" => Self::named("ArrowRight", "ArrowRight", 39),
            "home" => Self::named("Home", "Home", 36),
            "end" => Self::named("End", "End", 35),
            "pageup" => Self::named("PageUp", "PageUp", 33),
            "pagedown" => Self::named("PageDown", "PageDown", 34),
            _ => {
                if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u32>().ok()) {
                    if (1..=12).contains(&n) {
                        let key = format!("F{n}");
                        return Some(Self::named(&key, &key, 111 + n));
                    }
                }
                let mut chars = name.chars();
                return match (chars.next(), chars.next()) {
                    (Some(ch), None) => Self::for_char(ch),
                    _ => None,
                };
            }
        };
        Some(def)
    }

    /// Definition for a single character on a US layout, if it has one.
    pub fn for_char(ch: char) -> Option<KeyDef> {
        let text = ch.to_string();
        if ch.is_ascii_alphabetic() {
            let upper = ch.to_ascii_uppercase();
            let code = format!("Key{upper}");
            return Some(Self::printable(&text, &code, upper as u32, &text));
        }
        if ch.is_ascii_digit() {
            let code = format!("Digit{ch}");
            return Some(Self::printable(&text, &code, ch as u32, &text));
        }
        let (code, key_code) = match ch {
            ' ' => ("Space", 32),
            '\n' | '\r' => return Self::lookup("Enter"),
            '\t' => return Self::lookup("Tab"),
            '-' | '_' => ("Minus", 189),
            '=' | '+' => ("Equal", 187),
            ',' | '<' => ("Comma", 188),
            '.' | '>' => ("Period", 190),
            '/' | '?' => ("Slash", 191),
            ';' | ':' => ("Semicolon", 186),
            '\'' | '"' => ("Quote", 222),
            '[' | '{' => ("BracketLeft", 219),
            ']' | '}' => ("BracketRight", 221),
            '\\' | '|' => ("Backslash", 220),
            '`' | '~' => ("Backquote", 192),
            _ => return None,
        };
        Some(Self::printable(&text, code, key_code, &text))
    }
}

/// One key press, possibly with held modifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyChord {
    pub modifiers: Modifiers,
    pub key: KeyDef,
}

impl KeyChord {
    /// Editing command the browser should run for this chord; shortcuts such as select-all are
    /// not applied by synthetic key events alone.
    pub fn edit_command(&self) -> Option<&'static str> {
        let primary = self.modifiers.contains(Modifiers::CTRL) || self.modifiers.contains(Modifiers::META);
        if !primary {
            return None;
        }
        match self.key.code.as_str() {
            "KeyA" => Some("selectAll"),
            "KeyC" => Some("copy"),
            "KeyX" => Some("cut"),
            "KeyV" => Some("paste"),
            "KeyZ" if self.modifiers.contains(Modifiers::SHIFT) => Some("redo"),
            "KeyZ" => Some("undo"),
            _ => None,
        }
    }

    /// Text inserted by the chord; modified presses other than Shift insert nothing.
    pub fn text(&self) -> Option<String> {
        let text = self.key.text.as_ref()?;
        if self.modifiers.contains(Modifiers::CTRL)
            || self.modifiers.contains(Modifiers::ALT)
            || self.modifiers.contains(Modifiers::META)
        {
            return None;
        }
        if self.modifiers.contains(Modifiers::SHIFT) && text.len() == 1 {
            return Some(text.to_uppercase());
        }
        Some(text.clone())
    }
}

/// Parsed piece of a key string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyToken {
    Text(String),
    Chord(KeyChord),
}

/// Splits `input` into literal text runs and key chords.
pub fn parse_keys(input: &str) -> Result<Vec<KeyToken>, ActionError> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut rest = input;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            break;
        };
        let inner = &after[..close];
        if inner.trim().is_empty() || inner.contains('{') {
            text.push_str(&rest[..open + 1]);
            rest = after;
            continue;
        }
        text.push_str(&rest[..open]);
        if !text.is_empty() {
            tokens.push(KeyToken::Text(std::mem::take(&mut text)));
        }
        tokens.push(KeyToken::Chord(parse_chord(inner)?));
        rest = &after[close + 1..];
    }
    text.push_str(rest);
    if !text.is_empty() {
        tokens.push(KeyToken::Text(text));
    }
    Ok(tokens)
}

/// True when `input` contains at least one `{...}` key.
pub fn has_special_keys(input: &str) -> bool {
    parse_keys(input)
        .map(|tokens| tokens.iter().any(|t| matches!(t, KeyToken::Chord(_))))
        .unwrap_or(true)
}

fn parse_chord(inner: &str) -> Result<KeyChord, ActionError> {
    let parts: Vec<&str> = inner.split('+').map(str::trim).collect();
    // `{+}` and `{Ctrl++}` name the plus key itself.
    let (mods, key_name) = match parts.as_slice() {
        [.., "", ""] => (&parts[..parts.len() - 2], "+"),
        [mods @ .., key] => (mods, *key),
        [] => return Err(ActionError::InvalidKey(inner.to_string())),
    };

    let mut modifiers = Modifiers::NONE;
    for name in mods {
        modifiers |= Modifiers::parse(name)
            .ok_or_else(|| ActionError::InvalidKey(format!("unknown modifier '{name}' in {{{inner}}}")))?;
    }

    let key = match Modifiers::parse(key_name).and_then(Modifiers::key) {
        Some(modifier_key) => modifier_key,
        None => KeyDef::lookup(key_name)
            .ok_or_else(|| ActionError::InvalidKey(format!("unknown key '{key_name}' in {{{inner}}}")))?,
    };
    Ok(KeyChord { modifiers, key })
}
