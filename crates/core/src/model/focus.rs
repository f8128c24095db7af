use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Rendering mode requested for the lesson screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusMode {
    Modern,
    Classic,
    #[default]
    Auto,
}

/// A concrete rendering mode; what `auto` eventually resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultFocusMode {
    #[default]
    Modern,
    Classic,
}

impl From<DefaultFocusMode> for FocusMode {
    fn from(mode: DefaultFocusMode) -> Self {
        match mode {
            DefaultFocusMode::Modern => FocusMode::Modern,
            DefaultFocusMode::Classic => FocusMode::Classic,
        }
    }
}

impl fmt::Display for FocusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FocusMode::Modern => "modern",
            FocusMode::Classic => "classic",
            FocusMode::Auto => "auto",
        })
    }
}

impl fmt::Display for DefaultFocusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&FocusMode::from(*self), f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown focus mode: {0}")]
pub struct ParseFocusModeError(String);

impl FromStr for FocusMode {
    type Err = ParseFocusModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "modern" => Ok(Self::Modern),
            "classic" => Ok(Self::Classic),
            "auto" => Ok(Self::Auto),
            _ => Err(ParseFocusModeError(s.to_owned())),
        }
    }
}

impl FromStr for DefaultFocusMode {
    type Err = ParseFocusModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<FocusMode>()? {
            FocusMode::Modern => Ok(Self::Modern),
            FocusMode::Classic => Ok(Self::Classic),
            FocusMode::Auto => Err(ParseFocusModeError(s.to_owned())),
        }
    }
}

/// Persisted lesson-focus preferences.
///
/// Combines the admin default, an optional learner preference and an explicit
/// mode. Use [`LessonFocusState::current_mode`] to resolve what to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonFocusState {
    focus_mode: FocusMode,
    user_preference: Option<FocusMode>,
    admin_default_mode: DefaultFocusMode,
    allow_user_choice: bool,
}

impl Default for LessonFocusState {
    fn default() -> Self {
        Self {
            focus_mode: FocusMode::Auto,
            user_preference: None,
            admin_default_mode: DefaultFocusMode::Modern,
            allow_user_choice: true,
        }
    }
}

impl LessonFocusState {
    /// Rehydrate from persisted fields, restoring the "no orphaned preference" rule.
    #[must_use]
    pub fn from_persisted(
        focus_mode: FocusMode,
        user_preference: Option<FocusMode>,
        admin_default_mode: DefaultFocusMode,
        allow_user_choice: bool,
    ) -> Self {
        Self {
            focus_mode,
            user_preference: user_preference.filter(|_| allow_user_choice),
            admin_default_mode,
            allow_user_choice,
        }
    }

    #[must_use]
    pub fn focus_mode(&self) -> FocusMode {
        self.focus_mode
    }

    #[must_use]
    pub fn user_preference(&self) -> Option<FocusMode> {
        self.user_preference
    }

    #[must_use]
    pub fn admin_default_mode(&self) -> DefaultFocusMode {
        self.admin_default_mode
    }

    #[must_use]
    pub fn allow_user_choice(&self) -> bool {
        self.allow_user_choice
    }

    pub fn set_focus_mode(&mut self, mode: FocusMode) {
        self.focus_mode = mode;
    }

    pub fn set_user_preference(&mut self, preference: Option<FocusMode>) {
        self.user_preference = preference;
    }

    /// Apply admin settings in one step; revoking user choice drops the preference.
    pub fn set_admin_settings(&mut self, default_mode: DefaultFocusMode, allow_user_choice: bool) {
        self.admin_default_mode = default_mode;
        self.allow_user_choice = allow_user_choice;
        if !allow_user_choice {
            self.user_preference = None;
        }
    }

    /// Resolve the mode to render.
    ///
    /// Order: an allowed user preference, then `auto` mapped to the admin default,
    /// then the explicit focus mode. A user preference of `auto` also falls back to
    /// the admin default.
    #[must_use]
    pub fn current_mode(&self) -> DefaultFocusMode {
        let requested = match self.user_preference {
            Some(preference) if self.allow_user_choice => preference,
            _ => self.focus_mode,
        };
        match requested {
            FocusMode::Modern => DefaultFocusMode::Modern,
            FocusMode::Classic => DefaultFocusMode::Classic,
            FocusMode::Auto => self.admin_default_mode,
        }
    }
}
