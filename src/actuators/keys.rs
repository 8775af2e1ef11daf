//! Keystroke injection
//!
//! Chords are written `"<modifiers> <key>"` with `+`-separated modifiers, e.g.
//! `"ctrl+shift a"`. By default they are typed through the native input API
//! (enigo) on a dedicated thread. When `keys.command` is configured the chord
//! is handed to that program instead (`xdotool`, `ydotool`, `wtype`...).

use anyhow::{anyhow, Context, Result};
use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::Actuator;
use crate::mapping::ResolvedAction;

/// Placeholder replaced by the rendered chord in `keys.command`
pub const KEYS_PLACEHOLDER: &str = "{{keys}}";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyChordError {
    #[error("empty key chord")]
    Empty,
    #[error("key chord {0:?} has no key, expected \"<modifiers> <key>\"")]
    MissingKey(String),
    #[error("unknown key {0:?}")]
    UnknownKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    pub modifiers: Vec<String>,
    pub key: String,
}

impl KeyChord {
    /// Parse `"<mod>+<mod> <key>"`
    pub fn parse(chord: &str) -> Result<Self, KeyChordError> {
        let chord = chord.trim();
        if chord.is_empty() {
            return Err(KeyChordError::Empty);
        }

        let (mods, key) = chord
            .split_once(' ')
            .ok_or_else(|| KeyChordError::MissingKey(chord.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(KeyChordError::MissingKey(chord.to_string()));
        }

        Ok(Self {
            modifiers: mods
                .split('+')
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
            key: key.to_string(),
        })
    }
}

/// `ctrl+shift+a`, the form accepted by xdotool
impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.modifiers {
            write!(f, "{}+", m)?;
        }
        write!(f, "{}", self.key)
    }
}

/// Substitute the chord into every argument of the command template
pub fn render_command(template: &[String], chord: &KeyChord) -> Vec<String> {
    let rendered = chord.to_string();
    template
        .iter()
        .map(|arg| arg.replace(KEYS_PLACEHOLDER, &rendered))
        .collect()
}

/// A chord translated to native key codes
#[derive(Debug, Clone, PartialEq)]
pub struct NativeChord {
    pub modifiers: Vec<Key>,
    pub key: Key,
}

impl TryFrom<&KeyChord> for NativeChord {
    type Error = KeyChordError;

    fn try_from(chord: &KeyChord) -> Result<Self, Self::Error> {
        let modifiers = chord
            .modifiers
            .iter()
            .map(|m| modifier_key(m).ok_or_else(|| KeyChordError::UnknownKey(m.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            modifiers,
            key: named_key(&chord.key)?,
        })
    }
}

fn modifier_key(name: &str) -> Option<Key> {
    match name.to_ascii_lowercase().as_str() {
        "ctrl" | "control" => Some(Key::Control),
        "shift" => Some(Key::Shift),
        "alt" | "option" => Some(Key::Alt),
        "super" | "meta" | "win" | "cmd" => Some(Key::Meta),
        _ => None,
    }
}

/// Key names follow the xdotool keysyms people already write in configs
fn named_key(name: &str) -> Result<Key, KeyChordError> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Ok(Key::Unicode(c));
    }

    let key = match name.to_ascii_lowercase().as_str() {
        "return" | "enter" => Key::Return,
        "tab" => Key::Tab,
        "space" => Key::Space,
        "escape" | "esc" => Key::Escape,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" | "page_up" | "prior" => Key::PageUp,
        "pagedown" | "page_down" | "next" => Key::PageDown,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        _ => return Err(KeyChordError::UnknownKey(name.to_string())),
    };
    Ok(key)
}

/// Raw keyboard events, implemented by enigo
pub trait KeyBackend {
    fn key(&mut self, key: Key, direction: Direction) -> Result<()>;
}

impl KeyBackend for Enigo {
    fn key(&mut self, key: Key, direction: Direction) -> Result<()> {
        Keyboard::key(self, key, direction).map_err(|e| anyhow!("{}", e))
    }
}

/// Hold the modifiers, tap the key, release the modifiers in reverse order
///
/// Modifiers already pressed are released even if a later event fails.
pub fn press_chord<K: KeyBackend + ?Sized>(backend: &mut K, chord: &NativeChord) -> Result<()> {
    let mut held = Vec::with_capacity(chord.modifiers.len());
    let mut result = Ok(());

    for &modifier in &chord.modifiers {
        result = backend.key(modifier, Direction::Press);
        if result.is_err() {
            break;
        }
        held.push(modifier);
    }
    if result.is_ok() {
        result = backend.key(chord.key, Direction::Click);
    }

    for &modifier in held.iter().rev() {
        if let Err(e) = backend.key(modifier, Direction::Release) {
            warn!("Failed to release {:?}: {:#}", modifier, e);
        }
    }
    result
}

/// Something that can type a chord without blocking the caller
pub trait KeyInjector: Send + Sync {
    fn inject(&self, chord: &KeyChord) -> Result<()>;
}

/// Types chords through a [`KeyBackend`] owned by a dedicated thread
pub struct NativeInjector {
    tx: mpsc::UnboundedSender<NativeChord>,
}

impl NativeInjector {
    /// Start the injector thread on the platform keyboard
    pub fn spawn() -> Result<Self> {
        Self::spawn_with(|| {
            Enigo::new(&Settings::default()).map_err(|e| anyhow!("Failed to connect to the input system: {}", e))
        })
    }

    /// Start the injector thread on the backend built by `make`
    ///
    /// `make` runs on the new thread; its error is returned here.
    pub fn spawn_with<K, F>(make: F) -> Result<Self>
    where
        K: KeyBackend + 'static,
        F: FnOnce() -> Result<K> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<NativeChord>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        std::thread::Builder::new()
            .name("key-injector".to_string())
            .spawn(move || {
                let mut backend = match make() {
                    Ok(backend) => {
                        let _ = ready_tx.send(Ok(()));
                        backend
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while let Some(chord) = rx.blocking_recv() {
                    if let Err(e) = press_chord(&mut backend, &chord) {
                        warn!("Key injection failed: {:#}", e);
                    }
                }
                debug!("Key injector stopped");
            })
            .context("Failed to start key injector thread")?;

        ready_rx
            .recv()
            .context("Key injector thread exited during startup")??;
        Ok(Self { tx })
    }
}

impl KeyInjector for NativeInjector {
    fn inject(&self, chord: &KeyChord) -> Result<()> {
        let native = NativeChord::try_from(chord)?;
        self.tx
            .send(native)
            .map_err(|_| anyhow!("key injector thread is gone"))
    }
}

/// Runs the configured external program for every chord
pub struct CommandInjector {
    template: Vec<String>,
}

impl CommandInjector {
    /// `template` is the program and its arguments, with `{{keys}}` placeholders
    pub fn new(template: Vec<String>) -> Self {
        Self { template }
    }
}

impl KeyInjector for CommandInjector {
    fn inject(&self, chord: &KeyChord) -> Result<()> {
        let argv = render_command(&self.template, chord);
        let Some((program, args)) = argv.split_first() else {
            anyhow::bail!("keys.command is empty");
        };

        debug!("Running {} {}", program, args.join(" "));
        tokio::process::Command::new(program)
            .args(args)
            .spawn()
            .with_context(|| format!("Failed to run key command '{}'", program))?;
        Ok(())
    }
}

pub struct KeystrokeActuator {
    injector: Box<dyn KeyInjector>,
}

impl KeystrokeActuator {
    /// Actuator typing chords through `injector`
    pub fn new(injector: impl KeyInjector + 'static) -> Self {
        Self {
            injector: Box::new(injector),
        }
    }
}

impl Actuator for KeystrokeActuator {
    fn name(&self) -> &str {
        "keys"
    }

    fn perform(&self, action: &ResolvedAction) -> Result<()> {
        let Some(keys) = action.keys.as_deref() else {
            return Ok(());
        };

        let chord = KeyChord::parse(keys)?;
        info!("⌨️  Press {}", chord);
        self.injector.inject(&chord)
    }
}
